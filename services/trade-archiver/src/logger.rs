//! Diagnostic logger
//!
//! Persists operational events to the store's log table and optionally
//! mirrors them to `tracing`. Each event is its own write; a failed write is
//! reported to `tracing` only and never retried, so a broken store cannot
//! feed back into the logger.

use std::sync::Arc;
use std::time::Duration;

use persistence::{StoreError, TradeStore};
use tracing::{debug, error, info, warn};
use types::log::{LogEvent, LogLevel};

pub struct DiagnosticLogger {
    store: Arc<dyn TradeStore>,
    log_to_console: bool,
    write_timeout: Duration,
}

impl DiagnosticLogger {
    pub fn new(store: Arc<dyn TradeStore>, log_to_console: bool, write_timeout: Duration) -> Self {
        Self {
            store,
            log_to_console,
            write_timeout,
        }
    }

    pub fn log_to_console(&self) -> bool {
        self.log_to_console
    }

    pub async fn log_msg(&self, message: impl Into<String>, level: LogLevel, payload: impl Into<String>) {
        self.log_msg_with(message, level, payload, None).await;
    }

    /// `mirror` overrides the configured console setting for this call.
    pub async fn log_msg_with(
        &self,
        message: impl Into<String>,
        level: LogLevel,
        payload: impl Into<String>,
        mirror: Option<bool>,
    ) {
        let event = LogEvent::new(message, level, payload);

        if mirror.unwrap_or(self.log_to_console) {
            mirror_to_tracing(&event);
        }

        let write = tokio::time::timeout(
            self.write_timeout,
            self.store.insert_logs(std::slice::from_ref(&event)),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout(self.write_timeout)));

        if let Err(err) = write {
            error!(
                error = %err,
                message = %event.message,
                level = %event.level,
                "Failed to persist log event"
            );
        }
    }

    pub async fn info(&self, message: impl Into<String>, payload: impl Into<String>) {
        self.log_msg(message, LogLevel::Info, payload).await;
    }

    pub async fn warn(&self, message: impl Into<String>, payload: impl Into<String>) {
        self.log_msg(message, LogLevel::Warning, payload).await;
    }
}

fn mirror_to_tracing(event: &LogEvent) {
    let message = event.message.as_str();
    let payload = event.payload.as_str();
    match event.level {
        LogLevel::NotSet | LogLevel::Debug => debug!(payload, "{message}"),
        LogLevel::Info => info!(payload, "{message}"),
        LogLevel::Warning => warn!(payload, "{message}"),
        LogLevel::Error | LogLevel::Critical => error!(payload, level = %event.level, "{message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::MemoryStore;

    fn logger(store: &Arc<MemoryStore>) -> DiagnosticLogger {
        DiagnosticLogger::new(store.clone(), false, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_each_call_writes_one_event() {
        let store = Arc::new(MemoryStore::new());
        let logger = logger(&store);

        logger.info("Connection opened", "BTCUSDT").await;
        logger
            .log_msg("Flush failed", LogLevel::Warning, "store unavailable")
            .await;

        let logs = store.logs();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].level, LogLevel::Info);
        assert_eq!(logs[0].payload, "BTCUSDT");
        assert_eq!(logs[1].level, LogLevel::Warning);
        assert_eq!(logs[1].message, "Flush failed");
    }

    #[tokio::test]
    async fn test_failed_write_is_swallowed() {
        let store = Arc::new(MemoryStore::new());
        store.set_log_writes_failing(true);
        let logger = logger(&store);

        logger.warn("nobody hears this", "").await;
        assert!(store.logs().is_empty());

        store.set_log_writes_failing(false);
        logger.warn("this one lands", "").await;
        assert_eq!(store.logs().len(), 1);
    }

    #[tokio::test]
    async fn test_mirror_override_still_persists() {
        let store = Arc::new(MemoryStore::new());
        let logger = DiagnosticLogger::new(store.clone(), true, Duration::from_secs(1));
        logger
            .log_msg_with("silenced", LogLevel::Debug, "", Some(false))
            .await;
        assert_eq!(store.logs().len(), 1);
        assert!(logger.log_to_console());
    }
}
