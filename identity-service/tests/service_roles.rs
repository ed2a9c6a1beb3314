mod common;

use common::TestApp;
use serde_json::{json, Value};

async fn add_member(app: &TestApp, service_external_id: &str, role_name: &str) -> String {
    let email = TestApp::unique_email("member");
    let response = app
        .post(
            "/invites",
            json!({
                "kind": "new_user",
                "email": email,
                "role_name": role_name,
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
    body["user_external_id"].as_str().unwrap().to_string()
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn last_admin_cannot_be_downgraded() {
    let app = TestApp::spawn().await;
    let (service, admin) = app
        .create_service_with_admin(&TestApp::unique_email("solo"))
        .await;

    let response = app
        .client
        .put(format!(
            "{}/services/{}/users/{}/role",
            app.address, service, admin
        ))
        .json(&json!({ "role_name": "view-only" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 412);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn admin_can_be_downgraded_once_another_exists() {
    let app = TestApp::spawn().await;
    let (service, first_admin) = app
        .create_service_with_admin(&TestApp::unique_email("first"))
        .await;
    add_member(&app, &service, "admin").await;

    let response = app
        .client
        .put(format!(
            "{}/services/{}/users/{}/role",
            app.address, service, first_admin
        ))
        .json(&json!({ "role_name": "view-only" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["name"], "view-only");
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn last_admin_cannot_be_removed() {
    let app = TestApp::spawn().await;
    let (service, admin) = app
        .create_service_with_admin(&TestApp::unique_email("anchor"))
        .await;

    let response = app
        .client
        .delete(format!("{}/services/{}/users/{}", app.address, service, admin))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 412);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn non_admin_member_can_be_removed() {
    let app = TestApp::spawn().await;
    let (service, _) = app
        .create_service_with_admin(&TestApp::unique_email("keeper"))
        .await;
    let member = add_member(&app, &service, "view-only").await;

    let response = app
        .client
        .delete(format!("{}/services/{}/users/{}", app.address, service, member))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    // Removing again finds no binding.
    let response = app
        .client
        .delete(format!("{}/services/{}/users/{}", app.address, service, member))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn role_change_for_non_member_is_refused() {
    let app = TestApp::spawn().await;
    let (service, _) = app
        .create_service_with_admin(&TestApp::unique_email("host"))
        .await;
    // A user belonging to a different service entirely.
    let (_, outsider) = app
        .create_service_with_admin(&TestApp::unique_email("outsider"))
        .await;

    let response = app
        .client
        .put(format!(
            "{}/services/{}/users/{}/role",
            app.address, service, outsider
        ))
        .json(&json!({ "role_name": "view-only" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 412);
}

#[tokio::test]
#[ignore] // Requires running PostgreSQL
async fn existing_user_invite_adds_a_second_service() {
    let app = TestApp::spawn().await;
    let email = TestApp::unique_email("multi");
    let (_, user) = app.create_service_with_admin(&email).await;
    let (second_service, _) = app
        .create_service_with_admin(&TestApp::unique_email("second"))
        .await;

    let response = app
        .post(
            "/invites",
            json!({
                "kind": "existing_user",
                "email": email,
                "role_name": "view-only",
                "service_external_id": second_service
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
    assert_eq!(body["user_external_id"], user.as_str());
    assert_eq!(body["service_external_id"], second_service.as_str());
}
