mod credentials;
mod vault;

pub use credentials::{CredentialError, Credentials};
pub use vault::{Vault, VaultError};
