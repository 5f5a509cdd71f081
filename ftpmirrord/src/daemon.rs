use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use ftpmirror_core::{FtpTransport, console_reporter};
use tokio_util::sync::CancellationToken;

use crate::storage::{Credentials, Vault};
use crate::sync::engine::{EngineConfig, Mapping, SyncEngine};
use crate::sync::ledger::Ledger;

const DEFAULT_MAX_RETRIES: i64 = 3;
const DEFAULT_LOOP_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub db_path: Option<PathBuf>,
    pub key_dir: Option<PathBuf>,
    pub mappings: Vec<Mapping>,
    pub max_retries: i64,
    pub delete_after_transfer: bool,
    pub loop_interval: Duration,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let home = dirs::home_dir().context("home directory is unavailable")?;
        let db_path = std::env::var("FTPMIRROR_DB")
            .ok()
            .map(|value| expand_with_home(&value, &home));
        let key_dir = std::env::var("FTPMIRROR_KEY_DIR")
            .ok()
            .map(|value| expand_with_home(&value, &home));
        let mappings = std::env::var("FTPMIRROR_MAPPINGS")
            .ok()
            .map(|value| parse_mappings(&value, &home))
            .transpose()?
            .unwrap_or_default();
        let max_retries = read_u64_env("FTPMIRROR_MAX_RETRIES", DEFAULT_MAX_RETRIES as u64) as i64;
        let delete_after_transfer = read_bool_env("FTPMIRROR_DELETE_AFTER_TRANSFER", false);
        let loop_interval =
            Duration::from_secs(read_u64_env("FTPMIRROR_LOOP_SECS", DEFAULT_LOOP_SECS));

        Ok(Self {
            db_path,
            key_dir,
            mappings,
            max_retries,
            delete_after_transfer,
            loop_interval,
        })
    }
}

pub struct DaemonRuntime {
    engine: SyncEngine<FtpTransport>,
}

impl DaemonRuntime {
    /// Single synchronous bootstrap: open ledger and vault, persist any
    /// credentials supplied on the command line, then verify that a usable
    /// configuration exists. Missing credentials or mappings are fatal.
    pub async fn bootstrap(
        config: DaemonConfig,
        bootstrap_credentials: Option<Credentials>,
    ) -> anyhow::Result<Self> {
        if config.mappings.is_empty() {
            anyhow::bail!("no folder mappings configured; set FTPMIRROR_MAPPINGS");
        }

        let ledger = match &config.db_path {
            Some(path) => Ledger::open(path).await,
            None => Ledger::open_default().await,
        }
        .context("failed to open sync ledger")?;

        let vault = match &config.key_dir {
            Some(dir) => Vault::open(dir),
            None => Vault::open_default(),
        }
        .context("failed to open credential vault")?;

        if let Some(credentials) = bootstrap_credentials {
            credentials
                .store(&ledger, &vault)
                .await
                .context("failed to persist bootstrap credentials")?;
            eprintln!("[ftpmirrord] credentials stored");
        }

        // Decryption failures here mean the salt files were lost or
        // replaced; stored credentials are unrecoverable and the operator
        // must re-run the bootstrap.
        let credentials = Credentials::load(&ledger, &vault)
            .await
            .context("failed to load stored credentials")?;
        match credentials {
            Some(creds) if !creds.address.trim().is_empty() && !creds.username.trim().is_empty() => {}
            _ => anyhow::bail!(
                "remote address or user is not configured; run once with --server/--user/--password"
            ),
        }

        let transport = FtpTransport::new().with_progress(console_reporter());
        let engine_config = EngineConfig {
            mappings: config.mappings.clone(),
            max_retries: config.max_retries,
            delete_after_transfer: config.delete_after_transfer,
            loop_interval: config.loop_interval,
        };
        let engine = SyncEngine::new(transport, ledger, vault, engine_config);

        eprintln!(
            "[ftpmirrord] started: mappings={}, max_retries={}, loop={}s, delete_after_transfer={}",
            config.mappings.len(),
            config.max_retries,
            config.loop_interval.as_secs(),
            config.delete_after_transfer
        );
        Ok(Self { engine })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("[ftpmirrord] shutdown signal received");
                signal_token.cancel();
            }
        });

        self.engine.run(shutdown).await;
        Ok(())
    }
}

/// Parses `source=target` pairs separated by `;`, e.g.
/// `/data/out=/remote/in;~/exports=/remote/exports`.
fn parse_mappings(value: &str, home: &Path) -> anyhow::Result<Vec<Mapping>> {
    let mut mappings = Vec::new();
    for entry in value.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((source, target)) = entry.split_once('=') else {
            anyhow::bail!("malformed mapping entry (expected source=target): {entry}");
        };
        let source = source.trim();
        let target = target.trim();
        if source.is_empty() || target.is_empty() {
            anyhow::bail!("malformed mapping entry (empty side): {entry}");
        }
        mappings.push(Mapping {
            source: expand_with_home(source, home),
            target: target.to_string(),
        });
    }
    Ok(mappings)
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| parse_flag(&value))
        .unwrap_or(default)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value,
        "1" | "true" | "TRUE" | "True" | "yes" | "YES" | "Yes" | "on" | "ON" | "On"
    )
}
