use anyhow::{Context, Result};
use keyring::Entry;

/// Keychain service name
pub const SERVICE_NAME: &str = "stockroom";

/// Keychain account holding the bearer token of the last login
const TOKEN_ACCOUNT: &str = "session-token";

/// Out-of-band storage for the backend's bearer token in the OS keychain.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    service: String,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl CredentialStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, TOKEN_ACCOUNT).context("Failed to create keyring entry")
    }

    /// Store the bearer token in the OS keychain
    pub fn store_token(&self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .context("Failed to store token in keychain")
    }

    /// Retrieve the bearer token from the OS keychain
    pub fn get_token(&self) -> Result<String> {
        self.entry()?
            .get_password()
            .context("Failed to retrieve token from keychain")
    }

    /// Delete the stored bearer token
    pub fn delete_token(&self) -> Result<()> {
        self.entry()?
            .delete_credential()
            .context("Failed to delete token from keychain")
    }
}
