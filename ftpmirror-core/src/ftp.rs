use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use suppaftp::FtpStream;
use suppaftp::types::FileType;

use crate::progress::ProgressUpdate;
use crate::transport::{ProgressFn, Transport, TransportError, UploadOptions};

const DEFAULT_FTP_PORT: u16 = 21;
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Files below this size upload without progress reporting.
const PROGRESS_MIN_BYTES: u64 = 1024 * 1024;

/// FTP-backed transport. The control connection lives as long as the
/// session; a failed exchange drops it so the next call reconnects.
///
/// `suppaftp` is a blocking client, so every session interaction runs on
/// the blocking thread pool.
#[derive(Clone)]
pub struct FtpTransport {
    session: Arc<Mutex<Option<FtpStream>>>,
    progress: Option<ProgressFn>,
}

impl FtpTransport {
    pub fn new() -> Self {
        Self {
            session: Arc::new(Mutex::new(None)),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl Default for FtpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for FtpTransport {
    async fn connect(
        &self,
        address: &str,
        user: &str,
        password: &str,
    ) -> Result<(), TransportError> {
        let (host, port) = split_address(address)?;
        let session = Arc::clone(&self.session);
        let user = user.to_string();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || {
            let mut stream = FtpStream::connect((host.as_str(), port))?;
            stream.login(&user, &password)?;
            stream.transfer_type(FileType::Binary)?;
            *lock_session(&session) = Some(stream);
            Ok(())
        })
        .await?
    }

    async fn is_connected(&self) -> bool {
        lock_session(&self.session).is_some()
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        options: UploadOptions,
    ) -> Result<(), TransportError> {
        let session = Arc::clone(&self.session);
        let local = local.to_path_buf();
        let remote = remote.to_string();
        let progress = self.progress.clone();
        tokio::task::spawn_blocking(move || {
            upload_blocking(&session, &local, &remote, &options, progress)
        })
        .await?
    }
}

fn upload_blocking(
    session: &Mutex<Option<FtpStream>>,
    local: &Path,
    remote: &str,
    options: &UploadOptions,
    progress: Option<ProgressFn>,
) -> Result<(), TransportError> {
    let mut guard = lock_session(session);
    let Some(stream) = guard.as_mut() else {
        return Err(TransportError::NotConnected);
    };
    let outcome = store_file(stream, local, remote, options, progress);
    if outcome.is_err() {
        // The control/data channels are in an unknown state after a failed
        // exchange; drop the session so the next upload reconnects.
        *guard = None;
    }
    outcome
}

fn store_file(
    stream: &mut FtpStream,
    local: &Path,
    remote: &str,
    options: &UploadOptions,
    progress: Option<ProgressFn>,
) -> Result<(), TransportError> {
    if !options.overwrite && stream.size(remote).is_ok() {
        return Err(TransportError::RemoteExists(remote.to_string()));
    }
    if options.create_missing_dirs {
        for dir in ancestor_dirs(remote) {
            // Already-existing directories answer with an error; harmless.
            let _ = stream.mkdir(&dir);
        }
    }

    let mut file = File::open(local)?;
    let total = file.metadata()?.len();
    let report = progress.filter(|_| total >= PROGRESS_MIN_BYTES);

    let mut writer = stream.put_with_stream(remote)?;
    let mut buf = [0u8; UPLOAD_CHUNK_BYTES];
    let mut transferred: u64 = 0;
    let started = Instant::now();
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buf[..read])?;
        transferred += read as u64;
        if let Some(callback) = report.as_ref() {
            let elapsed = started.elapsed().as_secs_f64().max(1e-6);
            callback(ProgressUpdate {
                fraction: if total == 0 {
                    1.0
                } else {
                    transferred as f64 / total as f64
                },
                transferred_bytes: transferred,
                total_bytes: total,
                bytes_per_sec: transferred as f64 / elapsed,
            });
        }
    }
    stream.finalize_put_stream(writer)?;
    Ok(())
}

fn lock_session(session: &Mutex<Option<FtpStream>>) -> MutexGuard<'_, Option<FtpStream>> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn split_address(address: &str) -> Result<(String, u16), TransportError> {
    let trimmed = address.strip_prefix("ftp://").unwrap_or(address);
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(TransportError::InvalidAddress(address.to_string()));
    }
    match trimmed.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(TransportError::InvalidAddress(address.to_string()));
            }
            let port = port
                .parse::<u16>()
                .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
            Ok((host.to_string(), port))
        }
        None => Ok((trimmed.to_string(), DEFAULT_FTP_PORT)),
    }
}

/// Parent directories of a remote file path, shallowest first.
fn ancestor_dirs(remote: &str) -> Vec<String> {
    let mut dirs = Vec::new();
    let parent = match Path::new(remote).parent() {
        Some(parent) if parent != Path::new("") && parent != Path::new("/") => parent,
        _ => return dirs,
    };
    let mut partial = if remote.starts_with('/') {
        String::from("/")
    } else {
        String::new()
    };
    for component in parent.components() {
        let part = match component {
            std::path::Component::Normal(part) => part.to_string_lossy(),
            _ => continue,
        };
        if !partial.is_empty() && !partial.ends_with('/') {
            partial.push('/');
        }
        partial.push_str(&part);
        dirs.push(partial.clone());
    }
    dirs
}
