// src/display/terminal.rs
//! Terminal status display for running headless on the Pi console

use crate::{
    error::Result,
    gps::Position,
    hub::{GpsUpdate, SnapshotListener, StatusUpdate},
};
use crossterm::{
    cursor::{Hide, MoveTo, Show},
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType, DisableLineWrap, EnableLineWrap},
};
use std::{
    io::{self, Write},
    sync::{Mutex, PoisonError},
    time::Duration,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone)]
struct Latest {
    gps: Option<GpsUpdate>,
    status: Option<StatusUpdate>,
}

/// Redraws the latest pushed state once per refresh interval
#[derive(Debug)]
pub struct TerminalDisplay {
    latest: Mutex<Latest>,
    refresh: Duration,
}

impl TerminalDisplay {
    pub fn new(refresh: Duration) -> Self {
        Self {
            latest: Mutex::new(Latest::default()),
            refresh,
        }
    }

    /// Draw until shutdown, then restore the cursor
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(stdout, Hide, DisableLineWrap)?;

        let mut ticker = tokio::time::interval(self.refresh);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
                    let latest = self.snapshot();
                    render(&mut stdout, &latest)?;
                    stdout.flush()?;
                }
            }
        }

        execute!(stdout, Show, EnableLineWrap)?;
        println!("\nShutting down...");
        Ok(())
    }

    fn snapshot(&self) -> Latest {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotListener for TerminalDisplay {
    fn name(&self) -> &str {
        "terminal"
    }

    fn on_gps_update(&self, update: &GpsUpdate) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gps = Some(update.clone());
    }

    fn on_status_update(&self, status: &StatusUpdate) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .status = Some(status.clone());
    }
}

fn render(out: &mut impl Write, latest: &Latest) -> Result<()> {
    execute!(
        out,
        SetForegroundColor(Color::Green),
        Print("=".repeat(60)),
        Print("\n"),
        Print("RTK Surveyor"),
        Print("\n"),
        Print("=".repeat(60)),
        Print("\n"),
        ResetColor
    )?;

    match &latest.gps {
        Some(gps) => {
            render_fix(out, gps)?;
            render_position(out, &gps.position)?;
            render_raw(out, gps)?;
        }
        None => execute!(out, Print("Waiting for GPS data...\n\n"))?,
    }

    if let Some(status) = &latest.status {
        render_status(out, status)?;
    }

    execute!(
        out,
        SetForegroundColor(Color::Green),
        Print("=".repeat(60)),
        Print("\n"),
        Print("Press Ctrl+C to exit"),
        Print("\n"),
        ResetColor
    )?;
    Ok(())
}

/// Label and colour for the RTK status line
fn fix_label(gps: &GpsUpdate) -> (&'static str, Color) {
    if !gps.connected {
        ("DISCONNECTED", Color::Red)
    } else if gps.rtk_fixed {
        ("RTK FIXED", Color::Green)
    } else if gps.rtk_float {
        ("RTK FLOAT", Color::Yellow)
    } else if gps.position.valid {
        ("GPS", Color::Cyan)
    } else {
        ("NO FIX", Color::Red)
    }
}

fn render_fix(out: &mut impl Write, gps: &GpsUpdate) -> Result<()> {
    let (label, color) = fix_label(gps);
    let updated = match gps.timestamp {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "No data received".to_string(),
    };

    execute!(
        out,
        Print("Status:      "),
        SetForegroundColor(color),
        Print(label),
        ResetColor,
        Print(format!("  ({})\n", gps.state)),
        Print(format!("Last Update: {}\n\n", updated))
    )?;
    Ok(())
}

fn render_position(out: &mut impl Write, position: &Position) -> Result<()> {
    let fix_type = position
        .fix_quality
        .map(|quality| quality.description())
        .unwrap_or("Unknown");

    execute!(
        out,
        SetForegroundColor(Color::Yellow),
        Print("POSITION:\n"),
        ResetColor,
        Print(format!("  Latitude:   {}\n", Position::format_coordinate(position.latitude))),
        Print(format!("  Longitude:  {}\n", Position::format_coordinate(position.longitude))),
        Print(format!("  Elevation:  {}\n\n", Position::format_value(position.elevation, "m"))),
        SetForegroundColor(Color::Magenta),
        Print("QUALITY:\n"),
        ResetColor,
        Print(format!("  Satellites: {}\n", Position::format_value(position.satellites_used, ""))),
        Print(format!("  HDOP:       {}\n", Position::format_value(position.hdop, ""))),
        Print(format!("  VDOP:       {}\n", Position::format_value(position.vdop, ""))),
        Print(format!("  PDOP:       {}\n", Position::format_value(position.pdop, ""))),
        Print(format!(
            "  Accuracy H: {}\n",
            Position::format_value(position.accuracy_horizontal, "m")
        )),
        Print(format!(
            "  Accuracy V: {}\n",
            Position::format_value(position.accuracy_vertical, "m")
        )),
        Print(format!("  Fix Type:   {:>11}\n\n", fix_type))
    )?;
    Ok(())
}

fn render_raw(out: &mut impl Write, gps: &GpsUpdate) -> Result<()> {
    let stats = &gps.statistics;
    execute!(
        out,
        SetForegroundColor(Color::Blue),
        Print("NMEA:\n"),
        ResetColor,
        Print(format!(
            "  Messages: {}  Errors: {} ({:.1}%)  Reconnects: {}\n",
            stats.messages_received,
            stats.parsing_errors,
            stats.error_rate * 100.0,
            stats.reconnects
        ))
    )?;

    if stats.recent_sentences.is_empty() {
        execute!(out, Print("  No data\n"))?;
    }
    for sentence in &stats.recent_sentences {
        execute!(out, Print(format!("  {}\n", sentence)))?;
    }
    execute!(out, Print("\n"))?;
    Ok(())
}

fn render_status(out: &mut impl Write, status: &StatusUpdate) -> Result<()> {
    execute!(
        out,
        SetForegroundColor(Color::Cyan),
        Print("SYSTEM:\n"),
        ResetColor,
        Print(format!(
            "  Logging: {}  Clients: {}  Uptime: {:.0}s\n",
            if status.logging_enabled { "ON" } else { "off" },
            status.connected_clients,
            status.uptime
        ))
    )?;

    if let Some(system) = &status.system {
        execute!(
            out,
            Print(format!("  CPU Temp:   {}\n", Position::format_value(system.cpu_temp, "°C"))),
            Print(format!("  CPU Usage:  {}\n", Position::format_value(system.cpu_usage, "%"))),
            Print(format!("  Memory:     {}\n", Position::format_value(system.memory_usage, "%"))),
            Print(format!("  Disk:       {}\n", Position::format_value(system.disk_usage, "%"))),
            Print(format!("  Load:       {}\n", format_load(system.load_average))),
            Print(format!("  Battery:    {}\n", Position::format_value(system.battery_level, "%")))
        )?;
    }
    execute!(out, Print("\n"))?;
    Ok(())
}

fn format_load(load: Option<[f64; 3]>) -> String {
    match load {
        Some([one, five, fifteen]) => format!("{:.2} {:.2} {:.2}", one, five, fifteen),
        None => "Unknown".to_string(),
    }
}
