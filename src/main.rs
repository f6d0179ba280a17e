//! Headless debug harness: build the engine against the file-backed
//! stores, run one refresh round, print the aggregated snapshot as
//! JSON. Interactive authorization needs the desktop shell and is not
//! available here.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use workbar::oauth::{AuthPresenter, ConsentError};
use workbar::secrets::FileSecretStore;
use workbar::sources::github::GithubSource;
use workbar::sources::google_calendar::GoogleCalendarSource;
use workbar::sources::notion::NotionSource;
use workbar::sources::teams::TeamsSource;
use workbar::sources::NotificationSource;
use workbar::{
    Aggregator, CredentialStore, Env, OAuthEngine, Provider, ProviderConfig, SettingsStore,
};

/// No consent UI in a headless run; any authorize call resolves as
/// cancelled.
struct HeadlessPresenter;

#[async_trait]
impl AuthPresenter for HeadlessPresenter {
    async fn present(
        &self,
        _authorize_url: Url,
        _callback_scheme: &str,
    ) -> Result<Url, ConsentError> {
        Err(ConsentError::Cancelled)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let env = Env::load();
    let state_dir = dirs::home_dir().unwrap_or_default().join(".workbar");

    let secrets = FileSecretStore::open(state_dir.join("secrets.json"))?;
    let credentials = Arc::new(CredentialStore::new(Arc::new(secrets)));
    let settings = Arc::new(SettingsStore::open(state_dir.join("settings.json")));

    // One-time migration of a legacy single-slot GitHub credential.
    let login_hint = settings.active_account();
    if let Err(e) = credentials.migrate_legacy_single_slot(Provider::Github, login_hint.as_deref())
    {
        log::warn!("legacy credential migration failed: {e}");
    }

    let oauth = Arc::new(OAuthEngine::new(
        credentials,
        settings.clone(),
        Arc::new(HeadlessPresenter),
    ));

    // The system-calendar adapter needs an OS calendar backend supplied
    // by the desktop shell, so the headless harness runs without it.
    let sources: Vec<Arc<dyn NotificationSource>> = vec![
        Arc::new(GithubSource::new(
            oauth.clone(),
            settings.clone(),
            ProviderConfig::github(&env),
        )),
        Arc::new(TeamsSource::new(oauth.clone(), ProviderConfig::microsoft(&env))),
        Arc::new(NotionSource::new(oauth.clone(), ProviderConfig::notion(&env))),
        Arc::new(GoogleCalendarSource::new(
            oauth.clone(),
            settings.clone(),
            ProviderConfig::google(&env),
        )),
    ];

    let aggregator = Aggregator::new(sources, settings);
    aggregator.refresh_all().await;

    let snapshot = aggregator.snapshot();
    println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
    Ok(())
}
