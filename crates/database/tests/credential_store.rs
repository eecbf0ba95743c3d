//! Credential Store against a live PostgreSQL.
//!
//! Run with `TEST_DATABASE_URL=postgres://... cargo test -p database -- --ignored`.

use chrono::{Duration, Utc};
use database::{create_pool_from_url, migrations, Database};
use serde_json::json;
use services::auth::{
    LoginStateRepository, PendingLogin, ProfileRepository, SessionRepository, SessionToken,
};
use std::collections::HashMap;
use tower_sessions::{
    cookie::time::{Duration as CookieDuration, OffsetDateTime},
    session::{Id, Record},
    SessionStore,
};
use uuid::Uuid;

async fn database() -> Database {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let pool = create_pool_from_url(&url).expect("Failed to create pool");
    migrations::run(&pool).await.expect("Failed to run migrations");
    Database::new(pool)
}

fn token() -> SessionToken {
    SessionToken(Uuid::new_v4().simple().to_string())
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_profile_upsert_keeps_one_row() {
    let db = database().await;
    let uid = Uuid::new_v4().to_string();

    let first = ProfileRepository::create(db.profiles.as_ref(), "GitHub", &uid, json!({"n": 1}))
        .await
        .unwrap();
    let second = ProfileRepository::create(db.profiles.as_ref(), "GitHub", &uid, json!({"n": 2}))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.provider_data["n"], 2);

    let found = db
        .profiles
        .get_by_identifier("GitHub", &uid)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, first.id.0);
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_session_lifecycle() {
    let db = database().await;
    let profile = ProfileRepository::create(
        db.profiles.as_ref(),
        "Password",
        &Uuid::new_v4().to_string(),
        json!({}),
    )
    .await
    .unwrap();
    let token = token();

    SessionRepository::create(db.sessions.as_ref(), &token, profile.id, json!({"t": "x"}))
        .await
        .unwrap();
    let record = SessionRepository::get_by_token(db.sessions.as_ref(), &token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.profile_id, profile.id);
    assert!(SessionRepository::touch(db.sessions.as_ref(), &token)
        .await
        .unwrap());

    assert!(SessionRepository::delete_by_token(db.sessions.as_ref(), &token)
        .await
        .unwrap());
    assert!(SessionRepository::get_by_token(db.sessions.as_ref(), &token)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_delete_created_before_and_revoke() {
    let db = database().await;
    let profile = ProfileRepository::create(
        db.profiles.as_ref(),
        "Password",
        &Uuid::new_v4().to_string(),
        json!({}),
    )
    .await
    .unwrap();
    let (old, fresh) = (token(), token());
    SessionRepository::create(db.sessions.as_ref(), &old, profile.id, json!(null))
        .await
        .unwrap();
    SessionRepository::create(db.sessions.as_ref(), &fresh, profile.id, json!(null))
        .await
        .unwrap();

    let client = db.pool().get().await.unwrap();
    client
        .execute(
            "UPDATE client_sessions SET created_at = $1 WHERE token_hash = $2",
            &[
                &(Utc::now() - Duration::days(30)),
                &database::PgSessionRepository::hash_session_token(&old.0),
            ],
        )
        .await
        .unwrap();

    let removed = SessionRepository::delete_created_before(
        db.sessions.as_ref(),
        Utc::now() - Duration::days(14),
    )
    .await
    .unwrap();
    assert!(removed >= 1);
    assert!(SessionRepository::get_by_token(db.sessions.as_ref(), &old)
        .await
        .unwrap()
        .is_none());

    assert_eq!(
        SessionRepository::list_by_profile(db.sessions.as_ref(), profile.id)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        SessionRepository::delete_all_for_profile(db.sessions.as_ref(), profile.id)
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_login_state_spent_by_one_of_concurrent_callbacks() {
    let db = database().await;
    let pending = PendingLogin {
        state: Uuid::new_v4().simple().to_string(),
        provider: "GitHub".to_string(),
        return_url: "/members".to_string(),
        issued_at: Utc::now(),
    };
    LoginStateRepository::create(db.login_states.as_ref(), &pending)
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        LoginStateRepository::take(db.login_states.as_ref(), &pending.state),
        LoginStateRepository::take(db.login_states.as_ref(), &pending.state),
    );
    let taken: Vec<_> = [first.unwrap(), second.unwrap()]
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(taken.len(), 1);
    assert_eq!(taken[0].return_url, "/members");
}

#[tokio::test]
#[ignore] // Requires TEST_DATABASE_URL
async fn test_client_session_store_round_trip() {
    let db = database().await;
    let store = db.client_sessions.clone();

    let mut data = HashMap::new();
    data.insert("clientlogin_session".to_string(), json!("token-value"));
    let mut record = Record {
        id: Id::default(),
        data,
        expiry_date: OffsetDateTime::now_utc() + CookieDuration::hours(1),
    };
    store.create(&mut record).await.unwrap();

    // A second store over the same database sees the record, as after a restart
    let restarted = database::PgClientSessionStore::new(db.pool().clone());
    let loaded = restarted.load(&record.id).await.unwrap().unwrap();
    assert_eq!(loaded.data["clientlogin_session"], "token-value");

    record.expiry_date = OffsetDateTime::now_utc() - CookieDuration::minutes(1);
    store.save(&record).await.unwrap();
    assert!(restarted.load(&record.id).await.unwrap().is_none());
    assert!(store.delete_expired().await.unwrap() >= 1);

    store.delete(&record.id).await.unwrap();
}
