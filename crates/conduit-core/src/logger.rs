//! Request-correlated logging.

use tracing::Level;

use crate::request_id::RequestId;

/// Emits `tracing` events tagged with the owning request's ID.
///
/// Obtained from [`Context::log`](crate::Context::log).
#[derive(Debug, Clone, Copy)]
pub struct RequestLogger {
    request_id: RequestId,
}

impl RequestLogger {
    pub(crate) fn new(request_id: RequestId) -> Self {
        Self { request_id }
    }

    /// Logs `message` at `level`.
    pub fn log(&self, level: Level, message: &str) {
        let request_id = self.request_id;
        match level {
            Level::ERROR => tracing::error!(request_id = %request_id, "{message}"),
            Level::WARN => tracing::warn!(request_id = %request_id, "{message}"),
            Level::INFO => tracing::info!(request_id = %request_id, "{message}"),
            Level::DEBUG => tracing::debug!(request_id = %request_id, "{message}"),
            _ => tracing::trace!(request_id = %request_id, "{message}"),
        }
    }

    /// Logs at `ERROR`.
    pub fn error(&self, message: &str) {
        self.log(Level::ERROR, message);
    }

    /// Logs at `WARN`.
    pub fn warn(&self, message: &str) {
        self.log(Level::WARN, message);
    }

    /// Logs at `INFO`.
    pub fn info(&self, message: &str) {
        self.log(Level::INFO, message);
    }

    /// Logs at `DEBUG`.
    pub fn debug(&self, message: &str) {
        self.log(Level::DEBUG, message);
    }
}
