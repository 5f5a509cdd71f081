use thiserror::Error;

use crate::storage::vault::{Vault, VaultError};
use crate::sync::ledger::{Ledger, LedgerError};

const SETTING_ADDRESS: &str = "remote_address";
const SETTING_USER: &str = "remote_user";
const SETTING_PASSWORD: &str = "remote_password";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
}

/// Plaintext remote credentials. Only materialized in process memory for
/// the duration of a transport session; at rest each field lives in the
/// ledger settings table as a separately vault-encrypted value.
#[derive(Clone)]
pub struct Credentials {
    pub address: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub async fn store(&self, ledger: &Ledger, vault: &Vault) -> Result<(), CredentialError> {
        ledger
            .set_setting(SETTING_ADDRESS, &vault.encrypt(&self.address)?)
            .await?;
        ledger
            .set_setting(SETTING_USER, &vault.encrypt(&self.username)?)
            .await?;
        ledger
            .set_setting(SETTING_PASSWORD, &vault.encrypt(&self.password)?)
            .await?;
        Ok(())
    }

    /// Loads and decrypts the stored credentials. `None` when no bootstrap
    /// has persisted them yet.
    pub async fn load(ledger: &Ledger, vault: &Vault) -> Result<Option<Self>, CredentialError> {
        let (Some(address), Some(username), Some(password)) = (
            ledger.get_setting(SETTING_ADDRESS).await?,
            ledger.get_setting(SETTING_USER).await?,
            ledger.get_setting(SETTING_PASSWORD).await?,
        ) else {
            return Ok(None);
        };

        Ok(Some(Self {
            address: vault.decrypt(&address)?,
            username: vault.decrypt(&username)?,
            password: vault.decrypt(&password)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::SqlitePool;

    async fn make_ledger() -> Ledger {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let ledger = Ledger::from_pool(pool);
        ledger.init().await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn stores_and_loads_encrypted_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        let ledger = make_ledger().await;

        let creds = Credentials {
            address: "ftp.example.com:21".into(),
            username: "mirror".into(),
            password: "hunter2".into(),
        };
        creds.store(&ledger, &vault).await.unwrap();

        let loaded = Credentials::load(&ledger, &vault).await.unwrap().unwrap();
        assert_eq!(loaded.address, "ftp.example.com:21");
        assert_eq!(loaded.username, "mirror");
        assert_eq!(loaded.password, "hunter2");
    }

    #[tokio::test]
    async fn nothing_persisted_in_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        let ledger = make_ledger().await;

        let creds = Credentials {
            address: "ftp.example.com".into(),
            username: "mirror".into(),
            password: "hunter2".into(),
        };
        creds.store(&ledger, &vault).await.unwrap();

        for name in [SETTING_ADDRESS, SETTING_USER, SETTING_PASSWORD] {
            let raw = ledger.get_setting(name).await.unwrap().unwrap();
            assert!(!raw.contains("mirror"));
            assert!(!raw.contains("hunter2"));
            assert!(!raw.contains("ftp.example.com"));
        }
    }

    #[tokio::test]
    async fn load_is_none_before_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        let ledger = make_ledger().await;
        assert!(Credentials::load(&ledger, &vault).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restoring_overwrites_previous_values() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        let ledger = make_ledger().await;

        Credentials {
            address: "old.example.com".into(),
            username: "old".into(),
            password: "old".into(),
        }
        .store(&ledger, &vault)
        .await
        .unwrap();
        Credentials {
            address: "new.example.com".into(),
            username: "new".into(),
            password: "new".into(),
        }
        .store(&ledger, &vault)
        .await
        .unwrap();

        let loaded = Credentials::load(&ledger, &vault).await.unwrap().unwrap();
        assert_eq!(loaded.address, "new.example.com");
        assert_eq!(loaded.username, "new");
    }
}
