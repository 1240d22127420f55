use futures::{future::BoxFuture, stream::BoxStream};
use linkfix_core::{AppConfig, BackendEvent};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend rejected command: {0}")]
    Rejected(String),
    #[error("backend request timed out")]
    Timeout,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Pull commands, mutation commands and push events offered by the backend.
///
/// Every method returns an owned future so callers can drive the command after
/// releasing any borrow of the implementation.
pub trait Backend: Send + Sync + 'static {
    fn fetch_state(&self) -> BoxFuture<'static, Result<AppConfig, BackendError>>;

    fn toggle_platform(
        &self,
        platform: &str,
        enabled: bool,
    ) -> BoxFuture<'static, Result<(), BackendError>>;

    fn select_converter(
        &self,
        platform: &str,
        converter_name: &str,
    ) -> BoxFuture<'static, Result<(), BackendError>>;

    /// Fire-and-forget on the backend side; repeated calls are harmless.
    fn start_clipboard_monitor(&self) -> BoxFuture<'static, Result<(), BackendError>>;

    /// A fresh subscription to push events sent after this call.
    fn events(&self) -> BoxStream<'static, BackendEvent>;
}
