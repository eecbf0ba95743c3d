mod common;

use api::models::{ErrorResponse, StatusResponse};
use common::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;

async fn logged_in(app: &TestApp, browser: &Browser) -> bool {
    let response = browser
        .attach(app.server.get("/authenticate/status"))
        .await;
    assert_eq!(response.status_code(), 200);
    response.json::<StatusResponse>().logged_in
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_callbacks_exchange_once() {
    let github = Arc::new(SlowGithub::default());
    let app = TestApp::with_oauth_client(github.clone());
    let mut browser = Browser::new();

    let login = browser
        .attach(app.server.get("/authenticate/login?provider=GitHub"))
        .await;
    assert_eq!(login.status_code(), 303);
    browser.remember(&login);
    let state = state_param(&location(&login));

    let callback = format!("/authenticate/endpoint?provider=GitHub&code={GOOD_CODE}&state={state}");
    let (first, second) = tokio::join!(
        async { browser.attach(app.server.get(&callback)).await },
        async { browser.attach(app.server.get(&callback)).await },
    );

    let mut codes = vec![first.status_code().as_u16(), second.status_code().as_u16()];
    codes.sort();
    assert_eq!(codes, vec![303, 403]);

    let rejected = if first.status_code() == 403 { &first } else { &second };
    assert_eq!(
        rejected.json::<ErrorResponse>().error.r#type,
        "csrf_mismatch"
    );

    assert_eq!(github.exchanges.load(Ordering::SeqCst), 1);
    assert_eq!(app.store.session_count().await, 1);
    assert_eq!(app.store.pending_state_count().await, 0);
}

#[tokio::test]
async fn test_session_survives_restart() {
    let app = TestApp::new();
    app.add_password_user("alice", "s3cret!").await;
    let mut browser = Browser::new();

    let login = browser
        .attach(app.server.post("/authenticate/endpoint?provider=Password"))
        .form(&[("username", "alice"), ("password", "s3cret!")])
        .await;
    assert_eq!(login.status_code(), 303);
    browser.remember(&login);

    let restarted = app.restarted();
    assert!(logged_in(&restarted, &browser).await);

    let logout = browser
        .attach(restarted.server.get("/authenticate/logout"))
        .await;
    browser.remember(&logout);
    assert!(!logged_in(&app, &browser).await);
}

#[tokio::test]
async fn test_login_started_before_restart_completes_after() {
    let app = TestApp::new();
    let mut browser = Browser::new();

    let login = browser
        .attach(app.server.get("/authenticate/login?provider=GitHub&return_to=/members"))
        .await;
    browser.remember(&login);
    let state = state_param(&location(&login));

    let restarted = app.restarted();
    let callback = browser
        .attach(restarted.server.get(&format!(
            "/authenticate/endpoint?provider=GitHub&code={GOOD_CODE}&state={state}"
        )))
        .await;
    assert_eq!(callback.status_code(), 303);
    assert_eq!(location(&callback), "/members");
    browser.remember(&callback);

    assert!(logged_in(&restarted, &browser).await);
}

#[tokio::test]
async fn test_fresh_cookie_store_forgets_clients() {
    let app = TestApp::new();
    app.add_password_user("alice", "s3cret!").await;
    let mut browser = Browser::new();

    let login = browser
        .attach(app.server.post("/authenticate/endpoint?provider=Password"))
        .form(&[("username", "alice"), ("password", "s3cret!")])
        .await;
    browser.remember(&login);

    // A process with stores of its own has never seen this cookie
    let other = TestApp::with_oauth_client(Arc::new(mock_github()));
    assert!(!logged_in(&other, &browser).await);
    assert!(logged_in(&app, &browser).await);
}
