use std::sync::Mutex;

use async_trait::async_trait;

use super::{AuditEntry, AuditSink, AuditSinkError};

/// In-memory audit buffer. Used by tests and when no database is configured
/// for audit storage.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    buffer: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all buffered entries.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|buf| buf.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditSinkError> {
        let mut buf = self
            .buffer
            .lock()
            .map_err(|_| AuditSinkError::Unavailable("audit buffer lock poisoned".into()))?;
        buf.push(entry);
        Ok(())
    }
}
