use std::path::{Path, PathBuf};
use std::time::Duration;

use ftpmirror_core::{Transport, UploadOptions};
use thiserror::Error;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::storage::{CredentialError, Credentials, Vault};
use crate::sync::ledger::{Ledger, LedgerError};
use crate::sync::paths::{collect_files, remote_path_for};
use crate::sync::policy::{SyncDecision, evaluate};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),
    #[error("remote credentials are not configured")]
    MissingCredentials,
}

/// One configured (local source folder, remote target folder) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub source: PathBuf,
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mappings: Vec<Mapping>,
    pub max_retries: i64,
    pub delete_after_transfer: bool,
    pub loop_interval: Duration,
}

/// Counters for one pass over all mappings.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IterationReport {
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Files whose outcome this iteration is indeterminate (ledger or
    /// local metadata errors). Nothing was recorded for them.
    pub errors: usize,
}

/// The only component aware of wall-clock cadence. Walks every mapping
/// sequentially, one transfer at a time; the transport session lives for a
/// full iteration and is re-established lazily when dropped.
pub struct SyncEngine<T: Transport> {
    transport: T,
    ledger: Ledger,
    vault: Vault,
    config: EngineConfig,
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(transport: T, ledger: Ledger, vault: Vault, config: EngineConfig) -> Self {
        Self {
            transport,
            ledger,
            vault,
            config,
        }
    }

    /// Loop forever: one iteration, then an interruptible sleep. Iteration
    /// errors are logged and the loop proceeds to the next cycle.
    pub async fn run(&self, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            match self.run_iteration(&shutdown).await {
                Ok(report) => {
                    if report.uploaded > 0 || report.failed > 0 || report.errors > 0 {
                        eprintln!(
                            "[ftpmirrord] iteration done: uploaded={}, failed={}, skipped={}, errors={}",
                            report.uploaded, report.failed, report.skipped, report.errors
                        );
                    }
                }
                Err(err) => {
                    eprintln!("[ftpmirrord] iteration error: {err}");
                }
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.loop_interval) => {}
            }
        }
        eprintln!("[ftpmirrord] shutting down");
    }

    /// One pass over all mappings. Cancellation is observed between scopes
    /// and between files, never mid-transfer.
    pub async fn run_iteration(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<IterationReport, EngineError> {
        let credentials = Credentials::load(&self.ledger, &self.vault)
            .await?
            .ok_or(EngineError::MissingCredentials)?;

        let mut report = IterationReport::default();
        for mapping in &self.config.mappings {
            if shutdown.is_cancelled() {
                return Ok(report);
            }

            let scope_id = self
                .ledger
                .resolve_or_create_scope(
                    &mapping.source.to_string_lossy(),
                    &mapping.target,
                )
                .await?;

            let files = match collect_files(&mapping.source).await {
                Ok(files) => files,
                Err(err) => {
                    eprintln!(
                        "[ftpmirrord] cannot enumerate {}: {err}",
                        mapping.source.display()
                    );
                    report.errors += 1;
                    continue;
                }
            };

            for rel_path in files {
                if shutdown.is_cancelled() {
                    return Ok(report);
                }
                self.sync_file(scope_id, mapping, &rel_path, &credentials, &mut report)
                    .await;
            }
        }
        Ok(report)
    }

    async fn sync_file(
        &self,
        scope_id: i64,
        mapping: &Mapping,
        rel_path: &Path,
        credentials: &Credentials,
        report: &mut IterationReport,
    ) {
        let local = mapping.source.join(rel_path);
        let Some((file_size, last_modified)) = observe_file(&local).await else {
            // Vanished or unreadable between enumeration and now.
            report.errors += 1;
            return;
        };

        let rel_key = rel_path.to_string_lossy();
        let status = match self
            .ledger
            .file_status(scope_id, &rel_key, file_size, last_modified)
            .await
        {
            Ok(status) => status,
            Err(err) => {
                // The outcome for this file is indeterminate; do not guess
                // either way, just move on.
                eprintln!("[ftpmirrord] ledger error for {}: {err}", local.display());
                report.errors += 1;
                return;
            }
        };

        let decision = evaluate(&status, self.config.max_retries);
        if !decision.is_transfer() {
            report.skipped += 1;
            return;
        }
        if decision == SyncDecision::TransferDueToChange {
            eprintln!("[ftpmirrord] {} changed, replacing", local.display());
        }

        if !self.transport.is_connected().await {
            if let Err(err) = self
                .transport
                .connect(
                    &credentials.address,
                    &credentials.username,
                    &credentials.password,
                )
                .await
            {
                eprintln!("[ftpmirrord] connect failed: {err}");
                self.record(scope_id, &rel_key, file_size, last_modified, false, Some(&format!("connect failed: {err}")), report)
                    .await;
                report.failed += 1;
                return;
            }
        }

        let remote = remote_path_for(&mapping.target, rel_path);
        match self
            .transport
            .upload(&local, &remote, UploadOptions::default())
            .await
        {
            Ok(()) => {
                eprintln!("[ftpmirrord] uploaded {} -> {remote}", local.display());
                self.record(scope_id, &rel_key, file_size, last_modified, true, None, report)
                    .await;
                report.uploaded += 1;
                if self.config.delete_after_transfer {
                    // Best effort; a delete failure never reverts the
                    // outcome already recorded.
                    if let Err(err) = tokio::fs::remove_file(&local).await {
                        eprintln!(
                            "[ftpmirrord] delete after transfer failed for {}: {err}",
                            local.display()
                        );
                    }
                }
            }
            Err(err) => {
                eprintln!("[ftpmirrord] upload failed for {}: {err}", local.display());
                self.record(scope_id, &rel_key, file_size, last_modified, false, Some(&err.to_string()), report)
                    .await;
                report.failed += 1;
            }
        }
    }

    async fn record(
        &self,
        scope_id: i64,
        rel_key: &str,
        file_size: i64,
        last_modified: i64,
        success: bool,
        error: Option<&str>,
        report: &mut IterationReport,
    ) {
        if let Err(err) = self
            .ledger
            .record_outcome(scope_id, rel_key, file_size, last_modified, success, error)
            .await
        {
            eprintln!("[ftpmirrord] failed to record outcome for {rel_key}: {err}");
            report.errors += 1;
        }
    }
}

/// Current size and modification time (UTC unix seconds) of a local file.
async fn observe_file(path: &Path) -> Option<(i64, i64)> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    if !meta.is_file() {
        return None;
    }
    let modified = meta.modified().ok()?;
    Some((
        meta.len() as i64,
        OffsetDateTime::from(modified).unix_timestamp(),
    ))
}
