//! Create or reset a local `Password` provider account.
//!
//! Usage: `add-password-user <username>`; the password is read from
//! `CLIENTLOGIN_PASSWORD` or, when unset, from the first line of stdin.

use anyhow::{anyhow, Context, Result};
use config::PASSWORD_PROVIDER;
use database::Database;
use services::auth::password::{
    credentials_well_formed, PasswordAuthenticator, PASSWORD_HASH_KEY,
};
use std::io::BufRead;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore errors if not found)
    let _ = dotenvy::dotenv();

    // Initialize tracing for CLI output
    tracing_subscriber::fmt()
        .compact()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    let username = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow!("Usage: add-password-user <username>"))?;
    let password = match std::env::var("CLIENTLOGIN_PASSWORD") {
        Ok(password) => password,
        Err(_) => read_password_line()?,
    };

    if !credentials_well_formed(&username, &password) {
        return Err(anyhow!(
            "Username must be 5-64 characters and password 6-64 characters"
        ));
    }

    // Load database config from environment
    let db_config = config::DatabaseConfig::from_env()
        .map_err(|e| anyhow!("Failed to load database config: {e}"))?;

    let database = Database::from_config(&db_config)
        .await
        .context("Failed to connect to database")?;
    database
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let hash = PasswordAuthenticator::default()
        .hash(&password)
        .map_err(|e| anyhow!("{e}"))?;

    let existing = database
        .profiles
        .get_by_identifier(PASSWORD_PROVIDER, &username)
        .await?;

    match existing {
        Some(profile) => {
            let mut provider_data = profile.provider_data;
            if !provider_data.is_object() {
                provider_data = serde_json::json!({});
            }
            provider_data[PASSWORD_HASH_KEY] = serde_json::Value::String(hash);
            database
                .profiles
                .update_provider_data(profile.id, provider_data)
                .await?;
            info!("Password reset for {}", username);
        }
        None => {
            let profile = database
                .profiles
                .create(
                    PASSWORD_PROVIDER,
                    &username,
                    serde_json::json!({ PASSWORD_HASH_KEY: hash }),
                )
                .await?;
            info!("Created password profile {} for {}", profile.id, username);
        }
    }

    Ok(())
}

fn read_password_line() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
