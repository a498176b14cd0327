pub mod error;
pub mod jsonl;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;

use crate::types::OutcomeRecord;

pub use error::{RecordError, RecordErrorKind};
pub use jsonl::JsonlRecordSink;
#[cfg(any(test, feature = "testing"))]
pub use memory::MemoryRecordSink;

use error::unsupported_uri;

/// Durable store for outcome records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn store(&self, record: &OutcomeRecord) -> Result<(), RecordError>;
}

const FILE_SCHEME: &str = "file://";

/// Opens the sink addressed by `uri`. Relative `file://` directories are
/// resolved against `base_dir`.
pub fn open_record_sink(
    uri: &str,
    collection: &str,
    base_dir: &Path,
) -> Result<Arc<dyn RecordSink>, RecordError> {
    let dir = record_dir_from_uri(uri, base_dir)?;
    let collection = collection.trim();
    if collection.is_empty() || collection.contains(['/', '\\']) {
        return Err(unsupported_uri(format!(
            "record collection '{collection}' must be a plain non-empty name"
        )));
    }
    Ok(Arc::new(JsonlRecordSink::new(dir, collection)))
}

fn record_dir_from_uri(uri: &str, base_dir: &Path) -> Result<PathBuf, RecordError> {
    let Some(location) = uri.trim().strip_prefix(FILE_SCHEME) else {
        return Err(unsupported_uri(format!(
            "record store uri '{uri}' is not supported, expected a {FILE_SCHEME} uri"
        )));
    };
    if location.is_empty() {
        return Err(unsupported_uri(format!(
            "record store uri '{uri}' has no directory"
        )));
    }

    let path = PathBuf::from(location);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(base_dir.join(path))
    }
}
