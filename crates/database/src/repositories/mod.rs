pub mod client_session;
pub mod login_state;
pub mod profile;
pub mod session;

pub use client_session::PgClientSessionStore;
pub use login_state::PgLoginStateRepository;
pub use profile::PgProfileRepository;
pub use session::PgSessionRepository;
