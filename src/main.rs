// src/main.rs
//! RTK Surveyor - RTK GPS survey station service

use anyhow::Context;
use clap::Parser;
use rtk_surveyor::{
    clock::system_clock,
    display::{self, TerminalDisplay},
    gps::source::list_serial_ports,
    logging::{init_logging, LogTargets},
    stats::{run_sampler, SystemMonitor},
    survey_log::SurveyLogger,
    web::{self, AppState, PushGateway},
    BroadcastHub, ControlRouter, HubSettings, SessionController, StateReader, SurveyorConfig,
};
use std::{path::PathBuf, process, sync::Arc, time::Duration};

#[derive(Parser)]
#[command(name = "rtk-surveyor")]
#[command(about = "RTK GPS survey station with a live web dashboard", long_about = None)]
struct Cli {
    /// Serial device of the GNSS receiver
    #[arg(long)]
    port: Option<String>,

    /// Serial baud rate
    #[arg(long)]
    baud: Option<u32>,

    /// Replay built-in NMEA instead of opening the receiver
    #[arg(long)]
    simulate: bool,

    /// Dashboard HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Configuration file (default: ~/.config/rtk-surveyor/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Draw a status display on the terminal
    #[arg(long)]
    display: bool,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.list_ports {
        if let Err(e) = list_serial_ports() {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
        return;
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<SurveyorConfig> {
    let mut config = match &cli.config {
        Some(path) => SurveyorConfig::load_from(path)?,
        None => SurveyorConfig::load().unwrap_or_default(),
    };

    if let Some(port) = &cli.port {
        config.update_serial(port.clone(), cli.baud.unwrap_or(config.serial_baudrate));
    } else if let Some(baud) = cli.baud {
        config.serial_baudrate = baud;
    }
    if cli.simulate {
        config.simulate = true;
    }
    if let Some(http_port) = cli.http_port {
        config.http_port = http_port;
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file.clone();
    }

    config.validate()?;

    if cli.save_config {
        match &cli.config {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli).context("Invalid configuration")?;

    let show_display = cli.display && display::stdout_is_terminal();
    let _log_guard = init_logging(
        &config.log_level,
        &LogTargets {
            log_file: config.log_file.clone(),
            console: !show_display,
        },
    )
    .context("Failed to initialise logging")?;

    let clock = system_clock();
    let controller = SessionController::from_config(&config, clock.clone())?;
    let session = controller.handle();
    let shutdown = session.shutdown_token();
    tracing::info!(source = %controller.source().describe(), "RTK Surveyor starting");

    let reader = StateReader::new(session.clone(), clock.clone(), config.stale_after());
    let gateway = Arc::new(PushGateway::new(reader.clone()));
    let hub = Arc::new(BroadcastHub::new(
        reader.clone(),
        HubSettings {
            gps_interval: config.gps_push_interval(),
            status_interval: config.status_push_interval(),
        },
    ));
    hub.register(gateway.clone());

    let listener = web::bind(&config.bind_address())
        .await
        .context("Cannot start the HTTP dashboard")?;

    let (survey_logger, survey_writer) =
        SurveyLogger::spawn(config.survey_log_path.clone(), session.clone());
    let survey_logger = Arc::new(survey_logger);
    hub.register(survey_logger.clone());

    let display_task = if show_display {
        let terminal = Arc::new(TerminalDisplay::new(Duration::from_secs(1)));
        hub.register(terminal.clone());
        let token = shutdown.clone();
        Some(tokio::spawn(async move { terminal.run(token).await }))
    } else {
        None
    };

    let sampler = tokio::spawn(run_sampler(
        SystemMonitor::new(),
        session.clone(),
        clock.clone(),
        config.stats_sample_interval(),
        shutdown.clone(),
    ));
    let hub_task = tokio::spawn(Arc::clone(&hub).run(shutdown.clone()));

    let app = AppState {
        gateway,
        control: Arc::new(ControlRouter::new(session.clone())),
        reader,
    };
    let mut server = tokio::spawn(web::serve(listener, app, shutdown.clone()));

    let signal_session = session.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            signal_session.shutdown();
        }
    });

    let mut session_task = tokio::spawn(controller.run());
    let mut server_done = false;
    let mut server_error: Option<anyhow::Error> = None;

    let outcome = tokio::select! {
        outcome = &mut session_task => outcome.context("GPS session task panicked")?,
        served = &mut server => {
            server_done = true;
            server_error = match served {
                Ok(Ok(())) if shutdown.is_cancelled() => None,
                Ok(Ok(())) => Some(anyhow::anyhow!("HTTP server stopped unexpectedly")),
                Ok(Err(e)) => Some(e.into()),
                Err(e) => Some(anyhow::Error::new(e).context("HTTP server task panicked")),
            };
            if let Some(e) = &server_error {
                tracing::error!(error = %e, "HTTP server failed, stopping GPS session");
            }
            session.shutdown();
            session_task.await.context("GPS session task panicked")?
        }
    };
    // Stop everything else whether the session ended cleanly or not
    session.shutdown();

    if !server_done {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "HTTP server failed"),
            Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
        }
    }
    if let Err(e) = hub_task.await {
        tracing::error!(error = %e, "Broadcast hub task panicked");
    }
    if let Err(e) = sampler.await {
        tracing::error!(error = %e, "System stats sampler panicked");
    }
    if let Some(task) = display_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Terminal display failed"),
            Err(e) => tracing::error!(error = %e, "Terminal display task panicked"),
        }
    }

    // Once the hub and this handle let go of the logger the writer drains and exits
    let dropped = survey_logger.dropped();
    drop(survey_logger);
    drop(hub);
    match survey_writer.await? {
        Ok(written) => tracing::info!(written, dropped, "Survey log flushed"),
        Err(e) => tracing::error!(error = %e, dropped, "Survey log failed"),
    }

    if let Err(e) = outcome {
        tracing::error!(error = %e, "GPS session failed");
        return Err(e).context("GPS session failed");
    }
    if let Some(e) = server_error {
        return Err(e);
    }
    tracing::info!("RTK Surveyor stopped");
    Ok(())
}
