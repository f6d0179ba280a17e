//! WorkBar core: notification aggregation and account/credential
//! engine for a menu-bar work widget.
//!
//! The crate owns the OAuth token lifecycle, the per-service fetch and
//! normalize adapters, and the polling/merge/pin engine. Presentation
//! (panel, status item, views), OS keychain mechanics, and OS calendar
//! access stay outside, behind the traits in [`secrets`],
//! [`oauth::consent`], and [`sources::system_calendar`].
//!
//! Modules:
//! - types: uniform notification model and published state
//! - config: `.env`-style configuration provider
//! - secrets / credentials: secure storage and the account registry
//! - oauth: authorization flows, token exchange and refresh
//! - sources: one adapter per provider
//! - aggregator: concurrent fan-out, merge, sections, polling
//! - settings: persisted user settings

pub mod aggregator;
pub mod config;
pub mod credentials;
pub mod http;
pub mod oauth;
pub mod secrets;
pub mod settings;
pub mod sources;
pub mod types;

pub use aggregator::Aggregator;
pub use config::Env;
pub use credentials::CredentialStore;
pub use oauth::{OAuthEngine, ProviderConfig, TokenBundle};
pub use settings::SettingsStore;
pub use types::{AggregatedState, Notification, NotificationGroup, Priority, Provider};
