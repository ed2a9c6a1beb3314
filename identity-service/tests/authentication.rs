mod common;

use chrono::Utc;
use common::TestApp;
use identity_service::services::totp;
use serde_json::{json, Value};

const PASSWORD: &str = "correct-horse-battery";

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn wrong_passwords_lock_the_account_at_the_bound() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("locked");
    app.create_service_with_admin(&email).await;

    for _ in 0..10 {
        let response = app
            .post("/auth/login", json!({ "email": email, "password": "wrong-password" }))
            .await;
        assert_eq!(response.status().as_u16(), 401);
    }

    // The right password no longer works once disabled.
    let response = app
        .post("/auth/login", json!({ "email": email, "password": PASSWORD }))
        .await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn reset_login_counter_reenables_a_locked_account() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("rescued");
    let (_, user) = app.create_service_with_admin(&email).await;

    for _ in 0..10 {
        app.post("/auth/login", json!({ "email": email, "password": "wrong-password" }))
            .await;
    }

    let response = app
        .post(&format!("/users/{}/reset-login-counter", user), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["login_counter"], 0);
    assert_eq!(body["disabled"], false);

    let response = app
        .post("/auth/login", json!({ "email": email, "password": PASSWORD }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn successful_login_clears_the_counter() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("recoverer");
    app.create_service_with_admin(&email).await;

    for _ in 0..5 {
        app.post("/auth/login", json!({ "email": email, "password": "wrong-password" }))
            .await;
    }

    let response = app
        .post("/auth/login", json!({ "email": email, "password": PASSWORD }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["login_counter"], 0);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn second_factor_login_accepts_the_active_secret() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("totp");
    app.create_service_with_admin(&email).await;

    // The invite's secret carried over as the user's active secret.
    let (otp_key,): (String,) =
        sqlx::query_as("SELECT otp_key FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(&email)
            .fetch_one(app.db.pool())
            .await
            .unwrap();
    let code = totp::generate(&otp_key, Utc::now()).unwrap();

    let response = app
        .post("/auth/second-factor", json!({ "email": email, "code": code }))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .post("/auth/second-factor", json!({ "email": email, "code": "000000" }))
        .await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn provisioned_second_factor_activates_after_verification() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("enroller");
    let (_, user) = app.create_service_with_admin(&email).await;

    let response = app
        .post(&format!("/users/{}/second-factor", user), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    let secret = body["otp_secret"].as_str().unwrap().to_string();

    // The active secret is untouched until activation; the old one still
    // authenticates.
    let (active,): (String,) =
        sqlx::query_as("SELECT otp_key FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(&email)
            .fetch_one(app.db.pool())
            .await
            .unwrap();
    assert_ne!(active, secret);

    // A wrong code promotes nothing.
    let response = app
        .post(
            &format!("/users/{}/second-factor/activate", user),
            json!({ "method": "app", "code": "000000" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 401);

    let code = totp::generate(&secret, Utc::now()).unwrap();
    let response = app
        .post(
            &format!("/users/{}/second-factor/activate", user),
            json!({ "method": "app", "code": code }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["second_factor"], "app");

    // The provisional secret is now the active one, and activating again
    // without a fresh provisioning round is refused.
    let code = totp::generate(&secret, Utc::now()).unwrap();
    let response = app
        .post("/auth/second-factor", json!({ "email": email, "code": code }))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let code = totp::generate(&secret, Utc::now()).unwrap();
    let response = app
        .post(
            &format!("/users/{}/second-factor/activate", user),
            json!({ "method": "app", "code": code }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 400);
}
