//! Site Services
//!
//! Service facade for a small business site: contact and newsletter forms,
//! account sign-up and sign-in, and simple record queries, over a document
//! store and an identity provider.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use site_services::{Config, SiteServices};
//!
//! let services = SiteServices::from_config(&Config::load(None)?).await?;
//! let envelope = services.subscribe_newsletter("reader@example.com").await;
//! println!("{:?}", envelope);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod identity;
pub mod ip_lookup;
pub mod listener;
pub mod mail;
pub mod models;
pub mod services;
pub mod store;

pub use config::{ClientContext, Config, ConfigError};
pub use identity::{
    get_auth_error_message, AccountStore, AuthError, AuthErrorCode, ConsentFlow, IdentityProvider,
    LocalIdentityProvider, SessionObserver, SqliteAccountStore,
};
pub use ip_lookup::IpLookup;
pub use listener::ListenerHandle;
pub use models::{
    Collection, Condition, Envelope, Fields, Operator, ProfileUpdate, Record, Session,
    SessionEvent,
};
pub use services::{ContactForm, QuickContactForm, SiteServices, DEFAULT_CONTACT_LIMIT};
pub use store::{DocumentStore, MemoryStore, SqliteStore, StoreError, Subscription};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
