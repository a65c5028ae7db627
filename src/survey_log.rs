// src/survey_log.rs
//! Survey log file
//!
//! While logging is active, every valid position the hub pushes is appended
//! to a JSON-lines file. The listener only queues records; a separate task
//! owns the file.

use crate::{
    error::Result,
    hub::{GpsUpdate, PositionRecord, SnapshotListener},
    session::SessionHandle,
};
use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::mpsc, task::JoinHandle};

const QUEUE_DEPTH: usize = 256;

pub struct SurveyLogger {
    session: SessionHandle,
    sender: mpsc::Sender<PositionRecord>,
    last_sequence: AtomicU64,
    dropped: AtomicU64,
}

impl SurveyLogger {
    /// Create the listener and spawn the task that writes `path`
    pub fn spawn(path: impl Into<PathBuf>, session: SessionHandle) -> (Self, JoinHandle<Result<u64>>) {
        let (sender, receiver) = mpsc::channel(QUEUE_DEPTH);
        let writer = tokio::spawn(write_records(path.into(), receiver));
        let logger = Self {
            session,
            sender,
            last_sequence: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        };
        (logger, writer)
    }

    /// Records lost because the writer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl SnapshotListener for SurveyLogger {
    fn name(&self) -> &str {
        "survey-log"
    }

    fn on_gps_update(&self, update: &GpsUpdate) {
        if !self.session.logging_active() || !update.position.valid {
            return;
        }
        // The hub re-pushes an unchanged snapshot every tick; log it once
        if self.last_sequence.fetch_max(update.sequence, Ordering::AcqRel) >= update.sequence {
            return;
        }

        if self.sender.try_send(update.record()).is_err() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped, "Survey log writer behind, record dropped");
        }
    }
}

/// Append records until every sender is gone, returning how many were written
async fn write_records(path: PathBuf, mut records: mpsc::Receiver<PositionRecord>) -> Result<u64> {
    let mut file = open_log(&path).await?;
    let mut written = 0u64;
    tracing::info!(path = %path.display(), "Survey log open");

    while let Some(record) = records.recv().await {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        written += 1;
    }

    tracing::info!(path = %path.display(), written, "Survey log closed");
    Ok(written)
}

async fn open_log(path: &Path) -> Result<tokio::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::SystemClock,
        gps::{nmea::format_sentence, SourceSpec},
        hub::StateReader,
        session::{SessionController, SessionSettings},
    };
    use std::{sync::Arc, time::Duration};

    #[tokio::test]
    async fn test_logs_valid_positions_while_active() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/survey.jsonl");

        let mut controller = SessionController::new(
            SourceSpec::script(Vec::<String>::new()),
            SessionSettings::default(),
            50,
            Arc::new(SystemClock),
        );
        let handle = controller.handle();
        let reader = StateReader::new(handle.clone(), Arc::new(SystemClock), Duration::from_secs(5));
        let (logger, writer) = SurveyLogger::spawn(&path, handle.clone());

        let gga = |quality: u8| {
            format_sentence(&format!(
                "GNGGA,120000.00,4012.0,N,07401.0,W,{},10,0.9,50.0,M,-33.2,M,1.2,0000",
                quality
            ))
        };

        // Not logging yet
        controller.ingest_line(gga(4).as_bytes()).unwrap();
        logger.on_gps_update(&reader.gps_update());

        handle.set_logging(true);
        controller.ingest_line(gga(4).as_bytes()).unwrap();
        logger.on_gps_update(&reader.gps_update());
        // Same snapshot again
        logger.on_gps_update(&reader.gps_update());
        // No fix
        controller.ingest_line(gga(0).as_bytes()).unwrap();
        logger.on_gps_update(&reader.gps_update());
        controller.ingest_line(gga(5).as_bytes()).unwrap();
        logger.on_gps_update(&reader.gps_update());

        drop(logger);
        assert_eq!(writer.await.unwrap().unwrap(), 2);

        let contents = std::fs::read_to_string(&path).unwrap();
        let records: Vec<PositionRecord> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert!(records[0].rtk_fixed);
        assert!(records[1].rtk_float);
        assert_eq!(records[0].position.latitude, Some(40.2));
    }
}
