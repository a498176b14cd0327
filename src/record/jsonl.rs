use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};

use crate::{
    record::{
        RecordSink,
        error::{RecordError, io_failed, serialize_failed},
    },
    types::OutcomeRecord,
};

/// Appends one JSON document per line to `<dir>/<collection>.jsonl`.
#[derive(Debug)]
pub struct JsonlRecordSink {
    dir: PathBuf,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRecordSink {
    pub fn new(dir: PathBuf, collection: &str) -> Self {
        let path = dir.join(format!("{collection}.jsonl"));
        Self {
            dir,
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for JsonlRecordSink {
    async fn store(&self, record: &OutcomeRecord) -> Result<(), RecordError> {
        let mut line = serde_json::to_vec(record).map_err(|err| {
            serialize_failed(format!("failed to serialize outcome record: {err}"))
        })?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await.map_err(|err| {
            io_failed(format!(
                "failed to create record directory '{}': {err}",
                self.dir.display()
            ))
        })?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|err| {
                io_failed(format!(
                    "failed to open record collection '{}': {err}",
                    self.path.display()
                ))
            })?;
        file.write_all(&line).await.map_err(|err| {
            io_failed(format!(
                "failed to append record to '{}': {err}",
                self.path.display()
            ))
        })?;
        file.flush().await.map_err(|err| {
            io_failed(format!(
                "failed to flush record collection '{}': {err}",
                self.path.display()
            ))
        })?;

        tracing::debug!(
            target: "record",
            path = %self.path.display(),
            "record_stored"
        );
        Ok(())
    }
}
