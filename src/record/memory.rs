use std::sync::{
    Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;

use crate::{
    record::{
        RecordSink,
        error::{RecordError, io_failed},
    },
    types::OutcomeRecord,
};

/// In-process sink. Can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<OutcomeRecord>>,
    failing: AtomicBool,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<OutcomeRecord> {
        self.records.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl RecordSink for MemoryRecordSink {
    async fn store(&self, record: &OutcomeRecord) -> Result<(), RecordError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(io_failed("record store unavailable"));
        }
        self.records
            .lock()
            .expect("lock poisoned")
            .push(record.clone());
        Ok(())
    }
}
