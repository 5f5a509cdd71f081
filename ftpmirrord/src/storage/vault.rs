use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce, aead::Aead};
use pbkdf2::pbkdf2_hmac;
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;

const STORAGE_DIR: &str = "ftpmirrord";
const KEYS_DIR: &str = "keys";
const SALT_A_FILENAME: &str = "salt_a.bin";
const SALT_B_FILENAME: &str = "salt_b.bin";
const SALT_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const KDF_ROUNDS: u32 = 148_835;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("persisted salt file is corrupt: {0}")]
    CorruptSalt(PathBuf),
    #[error("encryption error")]
    Encryption,
    #[error("decryption error")]
    Decryption,
}

/// Encrypts and decrypts secret strings at rest. The symmetric key is
/// derived from two persisted random salts plus the local user and host
/// names; it is recomputed on open and never written anywhere.
///
/// Losing either salt file makes every stored secret unrecoverable.
pub struct Vault {
    key: [u8; 32],
}

impl Vault {
    /// Opens the vault against a key directory, creating both salt files
    /// on first use. Creation is idempotent; existing salts are reused.
    pub fn open(key_dir: &Path) -> Result<Self, VaultError> {
        let salt_a = read_or_create_salt(&key_dir.join(SALT_A_FILENAME))?;
        let salt_b = read_or_create_salt(&key_dir.join(SALT_B_FILENAME))?;
        Ok(Self {
            key: derive_key(&salt_a, &salt_b, &local_identity()),
        })
    }

    pub fn open_default() -> Result<Self, VaultError> {
        Self::open(&default_key_dir()?)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| VaultError::Encryption)?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    pub fn decrypt(&self, opaque: &str) -> Result<String, VaultError> {
        let payload = BASE64.decode(opaque).map_err(|_| VaultError::Decryption)?;
        if payload.len() <= NONCE_LEN {
            return Err(VaultError::Decryption);
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Decryption)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Decryption)
    }
}

fn read_or_create_salt(path: &Path) -> Result<[u8; SALT_LEN], VaultError> {
    if path.exists() {
        let bytes = fs::read(path)?;
        return bytes
            .try_into()
            .map_err(|_| VaultError::CorruptSalt(path.to_path_buf()));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)?;
    file.write_all(&salt)?;
    file.sync_all()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(salt)
}

fn derive_key(salt_a: &[u8], salt_b: &[u8], identity: &str) -> [u8; 32] {
    let mut password = Vec::with_capacity(salt_a.len() + identity.len());
    password.extend_from_slice(salt_a);
    password.extend_from_slice(identity.as_bytes());

    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(&password, salt_b, KDF_ROUNDS, &mut key);
    key
}

fn local_identity() -> String {
    let host = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
    format!("{}@{}", whoami::username(), host)
}

fn default_key_dir() -> Result<PathBuf, VaultError> {
    let mut dir = dirs::data_dir().ok_or(VaultError::MissingDataDir)?;
    dir.push(STORAGE_DIR);
    dir.push(KEYS_DIR);
    Ok(dir)
}
