//! Credential store: token bundles plus the multi-account registry,
//! layered over a pluggable [`SecretStore`].
//!
//! Key scheme: `tokens-{provider}` (single-account providers),
//! `tokens-{provider}-{login}` (GitHub accounts), `accounts-{provider}`
//! (the registry, a JSON array of lowercase logins).

use std::sync::Arc;

use crate::oauth::TokenBundle;
use crate::secrets::{SecretStore, StorageError};
use crate::types::Provider;

pub struct CredentialStore {
    backend: Arc<dyn SecretStore>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn SecretStore>) -> Self {
        Self { backend }
    }

    fn bundle_key(provider: Provider) -> String {
        format!("tokens-{}", provider.key())
    }

    fn account_bundle_key(provider: Provider, login: &str) -> String {
        format!("tokens-{}-{}", provider.key(), login)
    }

    fn registry_key(provider: Provider) -> String {
        format!("accounts-{}", provider.key())
    }

    // ------------------------------------------------------------------
    // Token bundles
    // ------------------------------------------------------------------

    pub fn put_bundle(&self, provider: Provider, bundle: &TokenBundle) -> Result<(), StorageError> {
        let payload =
            serde_json::to_vec(bundle).map_err(|e| StorageError::Decode(e.to_string()))?;
        self.backend.put(&Self::bundle_key(provider), &payload)
    }

    pub fn get_bundle(&self, provider: Provider) -> Result<Option<TokenBundle>, StorageError> {
        self.decode(self.backend.get(&Self::bundle_key(provider))?)
    }

    pub fn delete_bundle(&self, provider: Provider) -> Result<(), StorageError> {
        self.backend.delete(&Self::bundle_key(provider))
    }

    pub fn put_account_bundle(
        &self,
        provider: Provider,
        login: &str,
        bundle: &TokenBundle,
    ) -> Result<(), StorageError> {
        let login = normalize_login(login);
        let payload =
            serde_json::to_vec(bundle).map_err(|e| StorageError::Decode(e.to_string()))?;
        self.backend
            .put(&Self::account_bundle_key(provider, &login), &payload)
    }

    pub fn get_account_bundle(
        &self,
        provider: Provider,
        login: &str,
    ) -> Result<Option<TokenBundle>, StorageError> {
        let login = normalize_login(login);
        self.decode(
            self.backend
                .get(&Self::account_bundle_key(provider, &login))?,
        )
    }

    pub fn delete_account_bundle(&self, provider: Provider, login: &str) -> Result<(), StorageError> {
        let login = normalize_login(login);
        self.backend
            .delete(&Self::account_bundle_key(provider, &login))
    }

    /// Best-effort probe: any read error collapses to `false`.
    pub fn has_credential(&self, provider: Provider) -> bool {
        if self
            .backend
            .has(&Self::bundle_key(provider))
            .unwrap_or(false)
        {
            return true;
        }
        self.list_accounts(provider)
            .unwrap_or_default()
            .iter()
            .any(|login| {
                self.backend
                    .has(&Self::account_bundle_key(provider, login))
                    .unwrap_or(false)
            })
    }

    fn decode(&self, raw: Option<Vec<u8>>) -> Result<Option<TokenBundle>, StorageError> {
        match raw {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------
    // Account registry
    // ------------------------------------------------------------------

    /// Ordered lowercase logins known for a multi-account provider.
    pub fn list_accounts(&self, provider: Provider) -> Result<Vec<String>, StorageError> {
        match self.backend.get(&Self::registry_key(provider))? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| StorageError::Decode(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn add_account(&self, provider: Provider, login: &str) -> Result<(), StorageError> {
        let login = normalize_login(login);
        let mut accounts = self.list_accounts(provider)?;
        if !accounts.contains(&login) {
            accounts.push(login);
            self.save_accounts(provider, &accounts)?;
        }
        Ok(())
    }

    pub fn remove_account(&self, provider: Provider, login: &str) -> Result<(), StorageError> {
        let login = normalize_login(login);
        let mut accounts = self.list_accounts(provider)?;
        let before = accounts.len();
        accounts.retain(|a| a != &login);
        if accounts.len() != before {
            self.save_accounts(provider, &accounts)?;
        }
        Ok(())
    }

    pub fn clear_accounts(&self, provider: Provider) -> Result<(), StorageError> {
        self.backend.delete(&Self::registry_key(provider))
    }

    fn save_accounts(&self, provider: Provider, accounts: &[String]) -> Result<(), StorageError> {
        let payload =
            serde_json::to_vec(accounts).map_err(|e| StorageError::Decode(e.to_string()))?;
        self.backend.put(&Self::registry_key(provider), &payload)
    }

    // ------------------------------------------------------------------
    // Legacy migration
    // ------------------------------------------------------------------

    /// One-time startup migration from the legacy single-slot scheme.
    ///
    /// If the registry is empty and a single-slot bundle exists, the
    /// bundle moves under `login_hint` (or `default`), the login is
    /// registered, and the legacy slot is deleted. Returns the login the
    /// bundle was migrated to, if a migration ran.
    pub fn migrate_legacy_single_slot(
        &self,
        provider: Provider,
        login_hint: Option<&str>,
    ) -> Result<Option<String>, StorageError> {
        if !self.list_accounts(provider)?.is_empty() {
            return Ok(None);
        }
        let Some(bundle) = self.get_bundle(provider)? else {
            return Ok(None);
        };

        let login = normalize_login(login_hint.filter(|l| !l.trim().is_empty()).unwrap_or("default"));
        self.put_account_bundle(provider, &login, &bundle)?;
        self.add_account(provider, &login)?;
        self.delete_bundle(provider)?;
        log::info!(
            "Migrated legacy {} credential slot to account '{}'",
            provider,
            login
        );
        Ok(Some(login))
    }
}

/// Account identifiers are case-insensitive, normalized to lowercase.
pub fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretStore;

    fn store() -> CredentialStore {
        CredentialStore::new(Arc::new(MemorySecretStore::new()))
    }

    fn bundle(token: &str) -> TokenBundle {
        TokenBundle {
            access_token: token.to_string(),
            refresh_token: None,
            expires_at: None,
        }
    }

    #[test]
    fn bundle_round_trip() {
        let creds = store();
        creds.put_bundle(Provider::Notion, &bundle("secret")).unwrap();
        let loaded = creds.get_bundle(Provider::Notion).unwrap().unwrap();
        assert_eq!(loaded.access_token, "secret");
        assert!(creds.has_credential(Provider::Notion));

        creds.delete_bundle(Provider::Notion).unwrap();
        assert!(creds.get_bundle(Provider::Notion).unwrap().is_none());
        assert!(!creds.has_credential(Provider::Notion));
    }

    #[test]
    fn account_registry_is_ordered_and_lowercased() {
        let creds = store();
        creds.add_account(Provider::Github, "Octocat").unwrap();
        creds.add_account(Provider::Github, "other").unwrap();
        creds.add_account(Provider::Github, "OCTOCAT").unwrap();
        assert_eq!(
            creds.list_accounts(Provider::Github).unwrap(),
            vec!["octocat".to_string(), "other".to_string()]
        );

        creds.remove_account(Provider::Github, "octocat").unwrap();
        assert_eq!(
            creds.list_accounts(Provider::Github).unwrap(),
            vec!["other".to_string()]
        );

        creds.clear_accounts(Provider::Github).unwrap();
        assert!(creds.list_accounts(Provider::Github).unwrap().is_empty());
    }

    #[test]
    fn per_account_bundles_are_keyed_by_login() {
        let creds = store();
        creds
            .put_account_bundle(Provider::Github, "Alice", &bundle("t-alice"))
            .unwrap();
        creds
            .put_account_bundle(Provider::Github, "bob", &bundle("t-bob"))
            .unwrap();

        let alice = creds
            .get_account_bundle(Provider::Github, "alice")
            .unwrap()
            .unwrap();
        assert_eq!(alice.access_token, "t-alice");

        creds.delete_account_bundle(Provider::Github, "alice").unwrap();
        assert!(creds
            .get_account_bundle(Provider::Github, "alice")
            .unwrap()
            .is_none());
        assert_eq!(
            creds
                .get_account_bundle(Provider::Github, "bob")
                .unwrap()
                .unwrap()
                .access_token,
            "t-bob"
        );
    }

    #[test]
    fn legacy_slot_migrates_once() {
        let creds = store();
        creds.put_bundle(Provider::Github, &bundle("legacy")).unwrap();

        let migrated = creds
            .migrate_legacy_single_slot(Provider::Github, Some("Octocat"))
            .unwrap();
        assert_eq!(migrated.as_deref(), Some("octocat"));
        assert!(creds.get_bundle(Provider::Github).unwrap().is_none());
        assert_eq!(
            creds
                .get_account_bundle(Provider::Github, "octocat")
                .unwrap()
                .unwrap()
                .access_token,
            "legacy"
        );
        assert_eq!(
            creds.list_accounts(Provider::Github).unwrap(),
            vec!["octocat".to_string()]
        );

        // Second run is a no-op
        let again = creds
            .migrate_legacy_single_slot(Provider::Github, Some("someone-else"))
            .unwrap();
        assert!(again.is_none());
    }

    #[test]
    fn migration_without_hint_uses_default_login() {
        let creds = store();
        creds.put_bundle(Provider::Github, &bundle("legacy")).unwrap();
        let migrated = creds.migrate_legacy_single_slot(Provider::Github, None).unwrap();
        assert_eq!(migrated.as_deref(), Some("default"));
    }
}
