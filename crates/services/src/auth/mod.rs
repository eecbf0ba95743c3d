pub mod engine;
pub mod events;
pub mod memory;
pub mod oauth;
pub mod oauth1;
pub mod password;
pub mod ports;
pub mod providers;
pub mod sweeper;
pub mod tokens;


pub use engine::{LoginStep, SessionEngine, SESSION_TOKEN_KEY, STATE_TOKEN_KEY};
pub use events::{EventNotifier, TracingAuditListener};
pub use memory::InMemoryCredentialStore;
pub use oauth::OAuth2Client;
pub use oauth1::OAuth1Client;
pub use password::PasswordAuthenticator;
pub use ports::*;
pub use providers::{ProviderEntry, ProviderHandle, ProviderRegistry};
pub use sweeper::ExpirySweeper;
pub use tokens::RandomTokenGenerator;
