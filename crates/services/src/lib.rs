pub mod auth;

pub use auth::{SessionEngine, UserProfile};

#[cfg(test)]
mod test_utils;
