// src/gps/source.rs
//! Line sources feeding the GPS session
//!
//! A [`SourceSpec`] is chosen once, when the session is built: either the
//! serial GNSS HAT or a simulated feed. The session opens it (and re-opens it
//! after a restart) to get a [`LineSource`].

use super::nmea::format_sentence;
use crate::{
    config::SurveyorConfig,
    error::{Result, SessionError, SurveyorError},
};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Longest line accepted from the serial port before it is cut
const MAX_LINE_BYTES: u64 = 1024;

/// Canned feeds for running without hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationScenario {
    /// Base station sitting on an RTK fixed solution
    #[default]
    Stationary,
    /// Cold start: no fix, GPS, RTK float, then RTK fixed
    RtkAcquisition,
}

impl SimulationScenario {
    pub fn lines(self) -> Vec<String> {
        let bodies: &[&str] = match self {
            SimulationScenario::Stationary => &[
                "GNGGA,123456.00,4012.34567,N,07401.23456,W,4,12,0.8,45.2,M,-33.2,M,1.2,0000",
                "GNRMC,123456.00,A,4012.34567,N,07401.23456,W,0.0,0.0,150324,,,A",
                "GNGSA,A,3,01,03,06,09,12,17,19,22,25,31,,,1.4,0.8,1.1,1",
                "GNVTG,0.0,T,0.0,M,0.0,N,0.0,K,A",
            ],
            SimulationScenario::RtkAcquisition => &[
                "GNGGA,123450.00,,,,,0,00,99.9,,M,,M,,",
                "GNGGA,123451.00,4012.34601,N,07401.23511,W,1,06,2.1,47.9,M,-33.2,M,,",
                "GNGGA,123452.00,4012.34580,N,07401.23470,W,5,09,1.1,45.9,M,-33.2,M,2.0,0000",
                "GNGGA,123453.00,4012.34571,N,07401.23461,W,5,10,0.9,45.4,M,-33.2,M,1.0,0000",
                "GNGGA,123454.00,4012.34567,N,07401.23456,W,4,12,0.8,45.2,M,-33.2,M,1.0,0000",
                "GNGSA,A,3,01,03,06,09,12,17,19,22,25,31,,,1.4,0.8,1.1,1",
            ],
        };
        bodies.iter().map(|body| format_sentence(body)).collect()
    }
}

/// How to reach the GPS receiver
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSpec {
    Serial {
        port: String,
        baudrate: u32,
        read_timeout: Duration,
    },
    Simulated {
        lines: Vec<String>,
        interval: Duration,
        /// Start over at the first line once the last one was served
        repeat: bool,
    },
}

impl SourceSpec {
    /// Pick the source for a configuration.
    ///
    /// A configured serial device that does not exist falls back to the
    /// simulated feed when `simulate_on_missing_device` is set.
    pub fn from_config(config: &SurveyorConfig) -> Result<Self> {
        let simulated = SourceSpec::Simulated {
            lines: config.simulation_scenario.lines(),
            interval: config.simulation_interval(),
            repeat: true,
        };

        if config.simulate {
            tracing::info!(scenario = ?config.simulation_scenario, "Using simulated GPS feed");
            return Ok(simulated);
        }

        if !Path::new(&config.serial_port).exists() {
            if config.simulate_on_missing_device {
                tracing::warn!(
                    port = %config.serial_port,
                    "GPS device not found, falling back to simulated feed"
                );
                return Ok(simulated);
            }
            return Err(SurveyorError::Session(SessionError::DeviceNotFound(
                config.serial_port.clone(),
            )));
        }

        Ok(SourceSpec::Serial {
            port: config.serial_port.clone(),
            baudrate: config.serial_baudrate,
            read_timeout: config.read_timeout(),
        })
    }

    /// A finite scripted feed, served as fast as it is read
    pub fn script<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SourceSpec::Simulated {
            lines: lines.into_iter().map(Into::into).collect(),
            interval: Duration::ZERO,
            repeat: false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            SourceSpec::Serial { port, baudrate, .. } => format!("{} @ {} baud", port, baudrate),
            SourceSpec::Simulated { lines, .. } => format!("simulated feed ({} lines)", lines.len()),
        }
    }

    /// Open the source. The returned value owns the device handle.
    pub async fn open(&self) -> std::result::Result<LineSource, SessionError> {
        match self {
            SourceSpec::Serial {
                port,
                baudrate,
                read_timeout,
            } => {
                let source = SerialLineSource::open(port, *baudrate, *read_timeout)?;
                Ok(LineSource::Serial(source))
            }
            SourceSpec::Simulated {
                lines,
                interval,
                repeat,
            } => Ok(LineSource::Simulated(SimulatedLineSource::new(
                lines.clone(),
                *interval,
                *repeat,
            ))),
        }
    }
}

/// An open line-oriented GPS feed
#[derive(Debug)]
pub enum LineSource {
    Serial(SerialLineSource),
    Simulated(SimulatedLineSource),
}

impl LineSource {
    /// Next raw line, without its terminator
    pub async fn next_line(&mut self) -> std::result::Result<Vec<u8>, SessionError> {
        match self {
            LineSource::Serial(source) => source.next_line().await,
            LineSource::Simulated(source) => source.next_line().await,
        }
    }
}

/// NMEA over a serial port
#[derive(Debug)]
pub struct SerialLineSource {
    reader: BufReader<SerialStream>,
    read_timeout: Duration,
    /// Bytes of a line cut short by a timeout, finished on the next read
    pending: Vec<u8>,
}

impl SerialLineSource {
    pub fn open(
        port: &str,
        baudrate: u32,
        read_timeout: Duration,
    ) -> std::result::Result<Self, SessionError> {
        tracing::info!(port, baudrate, "Opening GPS serial port");

        let serial = tokio_serial::new(port, baudrate)
            .timeout(read_timeout)
            .open_native_async()
            .map_err(|e| match e.kind() {
                tokio_serial::ErrorKind::NoDevice => SessionError::DeviceNotFound(port.to_string()),
                tokio_serial::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                    SessionError::DeviceNotFound(port.to_string())
                }
                _ => SessionError::ConnectFailed {
                    device: port.to_string(),
                    reason: e.to_string(),
                },
            })?;

        Ok(Self {
            reader: BufReader::new(serial),
            read_timeout,
            pending: Vec::with_capacity(96),
        })
    }

    async fn next_line(&mut self) -> std::result::Result<Vec<u8>, SessionError> {
        read_line(
            &mut self.reader,
            &mut self.pending,
            self.read_timeout,
        )
        .await
    }
}

/// Read one line into `pending` under a timeout.
///
/// `read_until` appends whatever arrived before the timeout fired, so the
/// partial line stays in `pending` and the next call completes it.
async fn read_line<R>(
    reader: &mut R,
    pending: &mut Vec<u8>,
    read_timeout: Duration,
) -> std::result::Result<Vec<u8>, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let budget = MAX_LINE_BYTES.saturating_sub(pending.len() as u64);
    let mut limited = reader.take(budget);
    let read = limited.read_until(b'\n', pending);

    match tokio::time::timeout(read_timeout, read).await {
        Err(_) => Err(SessionError::ReadTimeout(read_timeout)),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
            Err(SessionError::ReadTimeout(read_timeout))
        }
        Ok(Err(e)) => {
            pending.clear();
            Err(SessionError::Read(e))
        }
        Ok(Ok(0)) if pending.is_empty() => Err(SessionError::EndOfStream),
        Ok(Ok(_)) => {
            let mut line = std::mem::take(pending);
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            Ok(line)
        }
    }
}

/// Replays a fixed list of sentences
#[derive(Debug, Clone)]
pub struct SimulatedLineSource {
    lines: Vec<String>,
    index: usize,
    interval: Duration,
    repeat: bool,
}

impl SimulatedLineSource {
    pub fn new(lines: Vec<String>, interval: Duration, repeat: bool) -> Self {
        Self {
            lines,
            index: 0,
            interval,
            repeat,
        }
    }

    async fn next_line(&mut self) -> std::result::Result<Vec<u8>, SessionError> {
        if self.index >= self.lines.len() {
            if !self.repeat || self.lines.is_empty() {
                return Err(SessionError::EndOfStream);
            }
            self.index = 0;
        }

        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }

        let line = self.lines[self.index].clone().into_bytes();
        self.index += 1;
        Ok(line)
    }
}

/// List available serial ports
pub fn list_serial_ports() -> Result<()> {
    let ports = tokio_serial::available_ports()
        .map_err(|e| SurveyorError::Other(format!("Failed to list serial ports: {}", e)))?;

    if ports.is_empty() {
        println!("No serial ports found.");
    } else {
        println!("Available serial ports:");
        for port in ports {
            println!("  {} - {:?}", port.port_name, port.port_type);
        }
    }

    Ok(())
}
