mod common;

use reqwest::StatusCode;
use serde_json::{Value, json};

use common::test_server::TestServer;

struct Api {
    client: reqwest::Client,
    base_url: String,
}

impl Api {
    fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
        }
    }

    async fn post(&self, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .expect("send request");
        let status = resp.status();
        let body = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn post_empty(&self, path: &str, token: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("send request");
        let status = resp.status();
        let body = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn get(&self, path: &str, token: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("send request");
        let status = resp.status();
        let body = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    async fn delete(&self, path: &str, token: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .delete(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .send()
            .await
            .expect("send request");
        let status = resp.status();
        let body = resp.json().await.unwrap_or(Value::Null);
        (status, body)
    }

    /// Creates a user with the given seeded roles and returns (user_id, token).
    async fn create_user(&self, admin_token: &str, username: &str, roles: &[&str]) -> (String, String) {
        let (status, body) = self
            .post(
                "/api/v1/admin/users",
                admin_token,
                json!({"username": username, "roles": roles}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create user: {body}");
        let user_id = body["data"]["id"].as_str().expect("user id").to_string();

        let (status, body) = self
            .post(
                &format!("/api/v1/admin/users/{}/tokens", user_id),
                admin_token,
                json!({}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create token: {body}");
        let token = body["data"]["token"].as_str().expect("token").to_string();

        (user_id, token)
    }
}

struct Fixture {
    manager_id: String,
    manager_token: String,
    contractor_id: String,
    contractor_token: String,
    project_id: String,
    plan_id: String,
}

/// Provisions the standard cast and one project with a floor plan.
async fn setup_fixture(api: &Api, admin_token: &str) -> Fixture {
    let (manager_id, manager_token) = api.create_user(admin_token, "meredith", &["manager"]).await;
    let (contractor_id, contractor_token) =
        api.create_user(admin_token, "conrad", &["contractor"]).await;

    let (status, body) = api
        .post(
            "/api/v1/projects",
            &manager_token,
            json!({"name": "riverside-tower", "description": "Riverside tower fit-out"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create project: {body}");
    let project_id = body["data"]["id"].as_str().expect("project id").to_string();

    let (status, body) = api
        .post(
            &format!("/api/v1/projects/{}/plans", project_id),
            &manager_token,
            json!({"name": "level-3", "image_ref": "plans/level-3.png"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create plan: {body}");
    let plan_id = body["data"]["id"].as_str().expect("plan id").to_string();

    Fixture {
        manager_id,
        manager_token,
        contractor_id,
        contractor_token,
        project_id,
        plan_id,
    }
}

async fn create_defect(api: &Api, fx: &Fixture, title: &str) -> String {
    let (status, body) = api
        .post(
            "/api/v1/defects",
            &fx.contractor_token,
            json!({
                "project_id": fx.project_id,
                "floor_plan_id": fx.plan_id,
                "title": title,
                "pin_x": 0.42,
                "pin_y": 0.17,
                "priority": "high",
                "assignee_id": fx.contractor_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "create defect: {body}");
    body["data"]["id"].as_str().expect("defect id").to_string()
}

#[tokio::test]
async fn test_full_defect_lifecycle_with_audit_trail() {
    let server = TestServer::start().await;
    let api = Api::new(&server.base_url);
    let fx = setup_fixture(&api, &server.admin_token).await;

    let defect_id = create_defect(&api, &fx, "Cracked facade panel").await;

    // open -> in_progress -> completed
    let (status, body) = api
        .post_empty(
            &format!("/api/v1/defects/{}/start", defect_id),
            &fx.contractor_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "start: {body}");
    assert_eq!(body["data"]["status"], "in_progress");

    let (status, body) = api
        .post_empty(
            &format!("/api/v1/defects/{}/complete", defect_id),
            &fx.contractor_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "complete: {body}");
    assert_eq!(body["data"]["status"], "completed");

    // completed -> accepted, by the manager, with a comment.
    let (status, body) = api
        .post(
            &format!("/api/v1/defects/{}/accept", defect_id),
            &fx.manager_token,
            json!({"comment": "looks good"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "accept: {body}");
    assert_eq!(body["data"]["status"], "accepted");
    assert_eq!(body["data"]["accepted_by"], fx.manager_id.as_str());
    assert_eq!(body["data"]["acceptance_comment"], "looks good");

    // The audit trail holds one row per transition, details round-tripping
    // the persisted values.
    let (status, body) = api
        .get(
            &format!("/api/v1/defects/{}/audit", defect_id),
            &fx.manager_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let entries = body["data"].as_array().expect("audit entries");
    let actions: Vec<&str> = entries
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["created", "started", "completed", "accepted"]);
    let accepted = &entries[3];
    assert_eq!(accepted["details"]["from"], "completed");
    assert_eq!(accepted["details"]["to"], "accepted");
    assert_eq!(accepted["details"]["comment"], "looks good");
    assert_eq!(accepted["actor_id"], fx.manager_id.as_str());

    // Repeating the accept hits the state guard: 400, no state change,
    // no duplicate audit row.
    let (status, body) = api
        .post(
            &format!("/api/v1/defects/{}/accept", defect_id),
            &fx.manager_token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "double accept: {body}");

    let (_, body) = api
        .get(
            &format!("/api/v1/defects/{}/audit", defect_id),
            &fx.manager_token,
        )
        .await;
    let count = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["action"] == "accepted")
        .count();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_transition_guards_and_validation() {
    let server = TestServer::start().await;
    let api = Api::new(&server.base_url);
    let fx = setup_fixture(&api, &server.admin_token).await;

    let defect_id = create_defect(&api, &fx, "Loose handrail").await;

    // Accepting an open defect is an invalid transition.
    let (status, body) = api
        .post(
            &format!("/api/v1/defects/{}/accept", defect_id),
            &fx.manager_token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "accept open: {body}");

    // Rejecting without a comment is a validation error that writes nothing.
    let (status, _) = api
        .post(
            &format!("/api/v1/defects/{}/reject", defect_id),
            &fx.manager_token,
            json!({"comment": "  "}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Closing without evidence fails and writes no audit row.
    let (status, _) = api
        .post(
            &format!("/api/v1/defects/{}/close", defect_id),
            &fx.contractor_token,
            json!({"evidence": ""}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = api
        .get(
            &format!("/api/v1/defects/{}/audit", defect_id),
            &fx.manager_token,
        )
        .await;
    let actions: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["created"]);

    // The defect is still open, so a proper close succeeds.
    let (status, body) = api
        .post(
            &format!("/api/v1/defects/{}/close", defect_id),
            &fx.contractor_token,
            json!({"evidence": "uploads/handrail-fixed.jpg"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "close: {body}");
    assert_eq!(body["data"]["status"], "closed");
    assert_eq!(body["data"]["closure_evidence"], "uploads/handrail-fixed.jpg");

    // closed -> rejected (with comment) -> reopened -> open again.
    let (status, body) = api
        .post(
            &format!("/api/v1/defects/{}/reject", defect_id),
            &fx.manager_token,
            json!({"comment": "evidence shows the wrong rail"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "reject: {body}");
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(
        body["data"]["rejection_comment"],
        "evidence shows the wrong rail"
    );

    let (status, body) = api
        .post_empty(
            &format!("/api/v1/defects/{}/reopen", defect_id),
            &fx.manager_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "reopen: {body}");
    assert_eq!(body["data"]["status"], "reopened");

    let (status, body) = api
        .post_empty(
            &format!("/api/v1/defects/{}/resume", defect_id),
            &fx.contractor_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "resume: {body}");
    assert_eq!(body["data"]["status"], "open");
}

#[tokio::test]
async fn test_permission_gating() {
    let server = TestServer::start().await;
    let api = Api::new(&server.base_url);
    let fx = setup_fixture(&api, &server.admin_token).await;

    let defect_id = create_defect(&api, &fx, "Paint overspray").await;

    api.post_empty(
        &format!("/api/v1/defects/{}/start", defect_id),
        &fx.contractor_token,
    )
    .await;
    api.post_empty(
        &format!("/api/v1/defects/{}/complete", defect_id),
        &fx.contractor_token,
    )
    .await;

    // A contractor holds defect:write but not defect:review.
    let (status, _) = api
        .post(
            &format!("/api/v1/defects/{}/accept", defect_id),
            &fx.contractor_token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A user with zero roles has an empty permission set: default deny.
    let (_, nobody_token) = api
        .create_user(&server.admin_token, "norma", &[])
        .await;
    let (status, _) = api.get("/api/v1/defects", &nobody_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // A deny grant strips a role-derived permission.
    let (reviewer_id, reviewer_token) = api
        .create_user(&server.admin_token, "rita", &["manager"])
        .await;
    let (status, body) = api
        .get(
            &format!("/api/v1/admin/users/{}/permissions", reviewer_id),
            &server.admin_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        body["data"]["permissions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "defect:review")
    );

    let resp = api
        .client
        .put(format!(
            "{}/api/v1/admin/users/{}/grant",
            api.base_url, reviewer_id
        ))
        .bearer_auth(&server.admin_token)
        .json(&json!({"allow": [], "deny": ["defect:review"]}))
        .send()
        .await
        .expect("put grant");
    assert_eq!(resp.status(), StatusCode::OK);

    let (_, body) = api
        .get(
            &format!("/api/v1/admin/users/{}/permissions", reviewer_id),
            &server.admin_token,
        )
        .await;
    assert!(
        !body["data"]["permissions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "defect:review")
    );

    let (status, _) = api
        .post(
            &format!("/api/v1/defects/{}/accept", defect_id),
            &reviewer_token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Admin API routes reject user tokens, and vice versa.
    let (status, _) = api.get("/api/v1/admin/users", &fx.manager_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = api.get("/api/v1/defects", &server.admin_token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // No token at all is unauthorized.
    let resp = api
        .client
        .get(format!("{}/api/v1/defects", api.base_url))
        .send()
        .await
        .expect("send request");
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_soft_delete_and_restore() {
    let server = TestServer::start().await;
    let api = Api::new(&server.base_url);
    let fx = setup_fixture(&api, &server.admin_token).await;
    let (_, admin_user_token) = api
        .create_user(&server.admin_token, "ada", &["admin"])
        .await;

    let defect_id = create_defect(&api, &fx, "Water stain on ceiling").await;

    // Comment on it so the cascade has something to sweep.
    let (status, _) = api
        .post(
            &format!("/api/v1/defects/{}/comments", defect_id),
            &fx.contractor_token,
            json!({"body": "checked on site, confirmed"}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Managers may not delete; only the admin permission allows it.
    let (status, _) = api
        .delete(&format!("/api/v1/defects/{}", defect_id), &fx.manager_token)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = api
        .delete(&format!("/api/v1/defects/{}", defect_id), &admin_user_token)
        .await;
    assert_eq!(status, StatusCode::OK, "delete: {body}");
    assert_eq!(body["data"]["status"], "deleted");

    // Idempotent: deleting again reports already deleted.
    let (status, body) = api
        .delete(&format!("/api/v1/defects/{}", defect_id), &admin_user_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "already_deleted");

    // Gone from active listings and direct fetch.
    let (status, body) = api
        .get(
            &format!("/api/v1/defects?project={}", fx.project_id),
            &fx.manager_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .all(|d| d["id"] != defect_id.as_str())
    );
    let (status, _) = api
        .get(&format!("/api/v1/defects/{}", defect_id), &fx.manager_token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Restore brings the defect and its swept comments back.
    let (status, body) = api
        .post_empty(
            &format!("/api/v1/defects/{}/restore", defect_id),
            &admin_user_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "restore: {body}");

    let (status, body) = api
        .get(
            &format!("/api/v1/defects/{}/comments", defect_id),
            &fx.manager_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_defect_crud_and_pin_validation() {
    let server = TestServer::start().await;
    let api = Api::new(&server.base_url);
    let fx = setup_fixture(&api, &server.admin_token).await;

    // Pin coordinates outside [0, 1] are rejected.
    let (status, _) = api
        .post(
            "/api/v1/defects",
            &fx.contractor_token,
            json!({
                "project_id": fx.project_id,
                "floor_plan_id": fx.plan_id,
                "title": "Out of bounds pin",
                "pin_x": 1.5,
                "pin_y": 0.5,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A pin without a floor plan is rejected.
    let (status, _) = api
        .post(
            "/api/v1/defects",
            &fx.contractor_token,
            json!({
                "project_id": fx.project_id,
                "title": "Floating pin",
                "pin_x": 0.5,
                "pin_y": 0.5,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let defect_id = create_defect(&api, &fx, "Scratched glazing").await;

    // Patch details; status is untouchable through this route.
    let resp = api
        .client
        .patch(format!("{}/api/v1/defects/{}", api.base_url, defect_id))
        .bearer_auth(&fx.contractor_token)
        .json(&json!({"priority": "critical", "description": "full pane replacement"}))
        .send()
        .await
        .expect("patch defect");
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["priority"], "critical");
    assert_eq!(body["data"]["status"], "open");

    // Status filter accepts the legacy alias vocabulary.
    let (status, body) = api
        .get(
            &format!("/api/v1/defects?project={}&status=pending", fx.project_id),
            &fx.manager_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .any(|d| d["id"] == defect_id.as_str())
    );

    let (status, _) = api
        .get(
            &format!("/api/v1/defects?project={}&status=bogus", fx.project_id),
            &fx.manager_token,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_notifications_on_transitions() {
    let server = TestServer::start().await;
    let api = Api::new(&server.base_url);
    let fx = setup_fixture(&api, &server.admin_token).await;

    let defect_id = create_defect(&api, &fx, "Misaligned door frame").await;

    api.post_empty(
        &format!("/api/v1/defects/{}/start", defect_id),
        &fx.contractor_token,
    )
    .await;
    api.post_empty(
        &format!("/api/v1/defects/{}/complete", defect_id),
        &fx.contractor_token,
    )
    .await;
    let (status, _) = api
        .post(
            &format!("/api/v1/defects/{}/accept", defect_id),
            &fx.manager_token,
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // The reporter/assignee (contractor) was notified of the manager's accept.
    let (status, body) = api
        .get("/api/v1/notifications?unread=true", &fx.contractor_token)
        .await;
    assert_eq!(status, StatusCode::OK);
    let notifications = body["data"].as_array().unwrap();
    let accepted: Vec<_> = notifications
        .iter()
        .filter(|n| n["kind"] == "accepted" && n["defect_id"] == defect_id.as_str())
        .collect();
    assert_eq!(accepted.len(), 1);

    // Mark it read; it drops out of the unread view.
    let id = accepted[0]["id"].as_i64().unwrap();
    let (status, _) = api
        .post_empty(
            &format!("/api/v1/notifications/{}/read", id),
            &fx.contractor_token,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = api
        .get("/api/v1/notifications?unread=true", &fx.contractor_token)
        .await;
    assert!(
        body["data"]
            .as_array()
            .unwrap()
            .iter()
            .all(|n| n["id"].as_i64() != Some(id))
    );
}

#[tokio::test]
async fn test_floor_plan_delete_cascades() {
    let server = TestServer::start().await;
    let api = Api::new(&server.base_url);
    let fx = setup_fixture(&api, &server.admin_token).await;
    let (_, admin_user_token) = api
        .create_user(&server.admin_token, "ada", &["admin"])
        .await;

    let defect_id = create_defect(&api, &fx, "Chipped floor tile").await;

    // Deleting the plan takes its pinned defects with it, in one transaction.
    let (status, _) = api
        .delete(&format!("/api/v1/plans/{}", fx.plan_id), &admin_user_token)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = api
        .get(&format!("/api/v1/defects/{}", defect_id), &fx.manager_token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = api
        .get(&format!("/api/v1/plans/{}", fx.plan_id), &fx.manager_token)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
