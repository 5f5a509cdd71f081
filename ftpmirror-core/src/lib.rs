mod ftp;
mod progress;
mod transport;

pub use ftp::FtpTransport;
pub use progress::{ProgressUpdate, console_reporter, render_progress_bar};
pub use transport::{ProgressFn, Transport, TransportError, UploadOptions};
