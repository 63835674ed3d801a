//! Steam Web API key resolution and keyring storage.

use keyring::Entry;

const STEAM_WEB_API_SERVICE_NAME: &str = "steam-pick.steam-web-api";
const STEAM_WEB_API_USER: &str = "default";
pub const API_KEY_ENV_VAR: &str = "STEAM_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to access keyring: {0}")]
    Keyring(#[from] keyring::Error),
    #[error("no Steam Web API key found: set steam.api_key, export STEAM_API_KEY, or run `steam-pick login --api-key <KEY>`")]
    MissingApiKey,
    #[error("API key must not be empty")]
    EmptyApiKey,
}

fn api_key_entry() -> Result<Entry, CredentialError> {
    Ok(Entry::new(STEAM_WEB_API_SERVICE_NAME, STEAM_WEB_API_USER)?)
}

/// Saves the Web API key into the OS keyring.
pub fn store_api_key(api_key: &str) -> Result<(), CredentialError> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(CredentialError::EmptyApiKey);
    }
    api_key_entry()?.set_password(api_key)?;
    Ok(())
}

/// Loads the Web API key from the OS keyring.
pub fn keyring_api_key() -> Result<Option<String>, CredentialError> {
    match api_key_entry()?.get_password() {
        Ok(api_key) => Ok(Some(api_key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Resolves the key from config, then the environment, then the keyring.
pub fn resolve_api_key(configured: &str) -> Result<String, CredentialError> {
    resolve_api_key_with(
        configured,
        std::env::var(API_KEY_ENV_VAR).ok(),
        keyring_api_key,
    )
}

fn resolve_api_key_with(
    configured: &str,
    from_env: Option<String>,
    from_keyring: impl FnOnce() -> Result<Option<String>, CredentialError>,
) -> Result<String, CredentialError> {
    let non_empty = |value: &str| Some(value.trim().to_string()).filter(|key| !key.is_empty());
    if let Some(api_key) = non_empty(configured) {
        return Ok(api_key);
    }
    if let Some(api_key) = from_env.as_deref().and_then(non_empty) {
        return Ok(api_key);
    }
    from_keyring()?
        .as_deref()
        .and_then(non_empty)
        .ok_or(CredentialError::MissingApiKey)
}
