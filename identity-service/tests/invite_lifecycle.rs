mod common;

use chrono::{Duration, Utc};
use common::TestApp;
use identity_service::services::totp;
use serde_json::{json, Value};

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn self_registration_runs_to_completion() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("founder");

    let code = app.create_self_registration_invite(&email).await;

    // Fresh invite projects as created and hides its secret.
    let response = app.get(&format!("/invites/{}", code)).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["state"], "created");
    assert!(body.get("otp_key").is_none());

    app.validate_invite(&code).await;

    let response = app
        .post(
            &format!("/invites/{}/complete", code),
            json!({ "service_name": "Acme" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    let user_external_id = body["user_external_id"].as_str().unwrap();
    assert!(body["service_external_id"].as_str().is_some());

    // The created account can authenticate with the password set during
    // the OTP leg.
    let response = app
        .post(
            "/auth/login",
            json!({ "email": email, "password": "correct-horse-battery" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["external_id"], user_external_id);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn completion_is_gone_the_second_time() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("once");

    let code = app.create_self_registration_invite(&email).await;
    app.validate_invite(&code).await;

    let complete = json!({ "service_name": "Acme" });
    let response = app
        .post(&format!("/invites/{}/complete", code), complete.clone())
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .post(&format!("/invites/{}/complete", code), complete)
        .await;
    assert_eq!(response.status().as_u16(), 410);

    // A completed invite is also gone for readers.
    let response = app.get(&format!("/invites/{}", code)).await;
    assert_eq!(response.status().as_u16(), 410);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn completion_without_validation_is_refused() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("eager");

    let code = app.create_self_registration_invite(&email).await;

    let response = app
        .post(
            &format!("/invites/{}/complete", code),
            json!({ "service_name": "Acme", "password": "long-enough-pass" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 412);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn duplicate_invite_for_same_email_conflicts() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("twice");

    app.create_self_registration_invite(&email).await;

    let response = app
        .post(
            "/invites",
            json!({
                "kind": "self_registration",
                "email": email,
                "role_name": "admin"
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn wrong_passcodes_disable_the_invite_at_the_bound() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("fumbler");

    let code = app.create_self_registration_invite(&email).await;
    let response = app
        .post(
            &format!("/invites/{}/otp", code),
            json!({ "telephone_number": "+447700900000" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    // Nine failures leave the invite live.
    for _ in 0..9 {
        let response = app
            .post(
                &format!("/invites/{}/otp/validate", code),
                json!({ "otp": "000000" }),
            )
            .await;
        assert_eq!(response.status().as_u16(), 401);
    }

    // The tenth disables it.
    let response = app
        .post(
            &format!("/invites/{}/otp/validate", code),
            json!({ "otp": "000000" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 410);

    // Even the right passcode no longer helps.
    let secret = app.invite_otp_key(&code).await;
    let otp = totp::generate(&secret, Utc::now()).unwrap();
    let response = app
        .post(&format!("/invites/{}/otp/validate", code), json!({ "otp": otp }))
        .await;
    assert_eq!(response.status().as_u16(), 410);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn validation_succeeds_exactly_once() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("replayer");

    let code = app.create_self_registration_invite(&email).await;
    app.validate_invite(&code).await;

    // Replaying the still-current passcode after success is refused.
    let secret = app.invite_otp_key(&code).await;
    let otp = totp::generate(&secret, Utc::now()).unwrap();
    let response = app
        .post(&format!("/invites/{}/otp/validate", code), json!({ "otp": otp }))
        .await;
    assert_eq!(response.status().as_u16(), 410);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn reprovision_invalidates_old_passcodes() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("rotator");

    let code = app.create_self_registration_invite(&email).await;
    let response = app
        .post(
            &format!("/invites/{}/otp", code),
            json!({ "telephone_number": "+447700900000" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let old_secret = app.invite_otp_key(&code).await;
    let old_otp = totp::generate(&old_secret, Utc::now()).unwrap();

    let response = app
        .post(&format!("/invites/{}/otp/reprovision", code), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let new_secret = app.invite_otp_key(&code).await;
    assert_ne!(old_secret, new_secret);

    let response = app
        .post(
            &format!("/invites/{}/otp/validate", code),
            json!({ "otp": old_otp }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn expired_invite_allows_otp_leg_but_not_validation() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("latecomer");

    let code = app.create_self_registration_invite(&email).await;

    // Age the invite past its TTL directly in the store.
    sqlx::query("UPDATE invites SET expires_at = $2 WHERE code = $1")
        .bind(&code)
        .bind(Utc::now() - Duration::hours(1))
        .execute(app.db.pool())
        .await
        .unwrap();

    // Reading it is refused.
    let response = app.get(&format!("/invites/{}", code)).await;
    assert_eq!(response.status().as_u16(), 410);

    // Storing contact details and dispatching the SMS still work.
    let response = app
        .post(
            &format!("/invites/{}/otp", code),
            json!({ "telephone_number": "+447700900000" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let response = app
        .post(&format!("/invites/{}/otp/send", code), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 202);

    // Validation is not permitted past the TTL.
    let secret = app.invite_otp_key(&code).await;
    let otp = totp::generate(&secret, Utc::now()).unwrap();
    let response = app
        .post(&format!("/invites/{}/otp/validate", code), json!({ "otp": otp }))
        .await;
    assert_eq!(response.status().as_u16(), 410);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn patch_updates_contact_details() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("editor");

    let code = app.create_self_registration_invite(&email).await;
    let response = app
        .post(
            &format!("/invites/{}/otp", code),
            json!({ "telephone_number": "+447700900000" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    // A multi-field patch lands as one unit.
    let response = app
        .client
        .patch(format!("{}/invites/{}", app.address, code))
        .json(&json!([
            { "op": "replace", "path": "telephone_number", "value": "+12025550123" },
            { "op": "replace", "path": "password", "value": "patched-password" }
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["telephone_number"], "+12025550123");

    // A malformed patch is rejected as a whole; the stored fields keep
    // their previous values.
    let response = app
        .client
        .patch(format!("{}/invites/{}", app.address, code))
        .json(&json!([
            { "op": "replace", "path": "telephone_number", "value": "bogus" },
            { "op": "replace", "path": "password", "value": "another-password" }
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let response = app.get(&format!("/invites/{}", code)).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["telephone_number"], "+12025550123");

    // Completion produces an account holding the patched credentials.
    let secret = app.invite_otp_key(&code).await;
    let otp = identity_service::services::totp::generate(&secret, Utc::now()).unwrap();
    let response = app
        .post(&format!("/invites/{}/otp/validate", code), json!({ "otp": otp }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let response = app
        .post(
            &format!("/invites/{}/complete", code),
            json!({ "service_name": "Patched Co" }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 200);

    let response = app
        .post("/auth/login", json!({ "email": email, "password": "patched-password" }))
        .await;
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn new_user_invite_joins_an_existing_service() {
    let app = TestApp::spawn().await;
    let admin_email = TestApp::unique_email("admin");
    let (service_external_id, _) = app.create_service_with_admin(&admin_email).await;

    let invitee_email = TestApp::unique_email("joiner");
    let response = app
        .post(
            "/invites",
            json!({
                "kind": "new_user",
                "email": invitee_email,
                "role_name": "view-only",
                "service_external_id": service_external_id
            }),
        )
        .await;
    assert_eq!(response.status().as_u16(), 201);
    let body: Value = response.json().await.unwrap();
    let code = body["code"].as_str().unwrap().to_string();

    app.validate_invite(&code).await;

    let response = app
        .post(&format!("/invites/{}/complete", code), json!({}))
        .await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["service_external_id"], service_external_id.as_str());
}
