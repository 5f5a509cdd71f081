use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::progress::ProgressUpdate;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("ftp error: {0}")]
    Ftp(#[from] suppaftp::FtpError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid remote address: {0}")]
    InvalidAddress(String),
    #[error("no active session")]
    NotConnected,
    #[error("remote file already exists: {0}")]
    RemoteExists(String),
    #[error("transfer task failed: {0}")]
    Background(#[from] tokio::task::JoinError),
}

/// Callback invoked during an upload purely for interactive display.
pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

#[derive(Clone)]
pub struct UploadOptions {
    /// Replace an existing remote file. Off means the upload fails if the
    /// remote path is already present.
    pub overwrite: bool,
    /// Create missing remote parent directories before storing.
    pub create_missing_dirs: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            create_missing_dirs: true,
        }
    }
}

/// Contract the sync engine holds against the remote side. One session is
/// kept per loop iteration and re-established on demand when dropped.
pub trait Transport {
    fn connect(
        &self,
        address: &str,
        user: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn is_connected(&self) -> impl Future<Output = bool> + Send;

    fn upload(
        &self,
        local: &Path,
        remote: &str,
        options: UploadOptions,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}
