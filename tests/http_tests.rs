mod common;

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use mongodb::bson::oid::ObjectId;
use serde_json::{json, Value};
use urlencoding::encode;

use taskboard::app_state::AppState;
use taskboard::config::Config;
use taskboard::store::MemoryStore;

fn state(task_list_limit: &str) -> (MemoryStore, AppState) {
    let store = MemoryStore::new();
    let limit = task_list_limit.to_string();
    let config = Config::from_lookup(|name: &str| match name {
        "STORE" => Some("memory".to_string()),
        "TASK_LIST_LIMIT" => Some(limit.clone()),
        _ => None,
    })
    .unwrap();
    let state = AppState::new(Arc::new(store.clone()), config);
    (store, state)
}

macro_rules! test_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .configure(taskboard::configure),
        )
        .await
    };
}

macro_rules! send {
    ($app:expr, $req:expr) => {{
        let resp = test::call_service(&$app, $req.to_request()).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }};
}

#[actix_web::test]
async fn create_and_fetch_with_backfilled_pending_tasks() {
    let (_, state) = state("100");
    let app = test_app!(state);

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/users")
            .set_json(json!({ "name": "Alice", "email": "a@x.com" }))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "New user created successfully");
    assert_eq!(body["data"]["pendingTasks"], json!([]));
    let alice_id = body["data"]["_id"].as_str().unwrap().to_string();

    let (status, body) = send!(
        app,
        test::TestRequest::post().uri("/tasks").set_json(json!({
            "name": "T1",
            "deadline": "2030-01-01T00:00:00Z",
            "assignedUser": alice_id,
        }))
    );
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "New task created successfully");
    assert_eq!(body["data"]["assignedUser"], json!(alice_id));
    assert_eq!(body["data"]["assignedUserName"], "Alice");
    assert_eq!(body["data"]["description"], "No description");
    assert!(body["data"]["deadline"].as_str().unwrap().starts_with("2030-01-01T00:00:00"));
    let task_id = body["data"]["_id"].as_str().unwrap().to_string();

    let (status, body) = send!(
        app,
        test::TestRequest::get().uri(&format!("/users/{}", alice_id))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User retrieved successfully");
    assert_eq!(body["data"]["pendingTasks"], json!([task_id]));
}

#[actix_web::test]
async fn list_options_filter_sort_select_and_count() {
    let (_, state) = state("100");
    let app = test_app!(state);

    for (name, completed) in [("b", true), ("a", false), ("c", true)] {
        let (status, _) = send!(
            app,
            test::TestRequest::post().uri("/tasks").set_json(json!({
                "name": name,
                "deadline": 0,
                "completed": completed,
            }))
        );
        assert_eq!(status, StatusCode::CREATED);
    }

    let uri = format!(
        "/tasks?where={}&sort={}&select={}",
        encode(r#"{"completed": true}"#),
        encode(r#"{"name": -1}"#),
        encode(r#"{"name": 1}"#),
    );
    let (status, body) = send!(app, test::TestRequest::get().uri(&uri));
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "tasks retrieved successfully");
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|task| task["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["c", "b"]);
    assert!(body["data"][0].get("completed").is_none());

    let uri = format!("/tasks?where={}&count=true", encode(r#"{"completed": true}"#));
    let (_, body) = send!(app, test::TestRequest::get().uri(&uri));
    assert_eq!(body["message"], "task count retrieved successfully");
    assert_eq!(body["data"], json!(2));

    let uri = format!("/tasks?where={}&select={}", encode(r#"{"name": "a"}"#), encode("{}"));
    let (_, body) = send!(app, test::TestRequest::get().uri(&uri));
    assert_eq!(body["data"][0]["name"], "a");
    assert_eq!(body["data"][0]["completed"], json!(false));

    let uri = format!("/tasks?sort={}&skip=1&limit=1", encode(r#"{"name": 1}"#));
    let (_, body) = send!(app, test::TestRequest::get().uri(&uri));
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["name"], "b");
}

#[actix_web::test]
async fn task_list_default_limit_does_not_cap_counts() {
    let (_, state) = state("2");
    let app = test_app!(state);

    for name in ["one", "two", "three"] {
        send!(
            app,
            test::TestRequest::post()
                .uri("/tasks")
                .set_json(json!({ "name": name, "deadline": 0 }))
        );
    }

    let (_, body) = send!(app, test::TestRequest::get().uri("/tasks"));
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = send!(app, test::TestRequest::get().uri("/tasks?count=true"));
    assert_eq!(body["data"], json!(3));

    let (_, body) = send!(app, test::TestRequest::get().uri("/tasks?limit=0"));
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
}

#[actix_web::test]
async fn malformed_requests_get_400_envelopes() {
    let (_, state) = state("100");
    let app = test_app!(state);

    let uri = format!("/tasks?where={}", encode("{oops"));
    let (status, body) = send!(app, test::TestRequest::get().uri(&uri));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "message": "Invalid JSON in query parameters", "data": null }));

    let uri = format!("/users?where={}", encode(r#"{"$where": "1"}"#));
    let (status, _) = send!(app, test::TestRequest::get().uri(&uri));
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/tasks")
            .set_json(json!({ "name": "T1", "deadline": 0, "priority": "high" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["data"], Value::Null);

    let (status, body) = send!(
        app,
        test::TestRequest::post().uri("/users").set_json(json!({ "name": "Nobody" }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "User validation failed: email: Email is required");

    let uri = format!("/users?where={}", encode(r#"{"name": {"$options": "i"}}"#));
    let (status, body) = send!(app, test::TestRequest::get().uri(&uri));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "$options needs a $regex");

    let (status, body) = send!(app, test::TestRequest::get().uri("/tasks/not-an-id"));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid task id");
}

#[actix_web::test]
async fn missing_ids_are_404() {
    let (_, state) = state("100");
    let app = test_app!(state);
    let id = ObjectId::new().to_hex();

    let (status, body) = send!(app, test::TestRequest::get().uri(&format!("/tasks/{}", id)));
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "message": "task not found", "data": null }));

    let (status, body) = send!(
        app,
        test::TestRequest::put()
            .uri(&format!("/users/{}", id))
            .set_json(json!({ "name": "Ghost" }))
    );
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "User not found");

    let (status, _) = send!(app, test::TestRequest::delete().uri(&format!("/tasks/{}", id)));
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send!(
        app,
        test::TestRequest::get().uri(&format!("/users/{}?count=true", id))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(0));
}

#[actix_web::test]
async fn update_and_delete_round_through_the_coordinator() {
    let (store, state) = state("100");
    let app = test_app!(state);

    let (_, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/users")
            .set_json(json!({ "name": "Bob", "email": "b@x.com" }))
    );
    let bob_id = body["data"]["_id"].as_str().unwrap().to_string();

    let (_, body) = send!(
        app,
        test::TestRequest::post()
            .uri("/tasks")
            .set_json(json!({ "name": "T1", "deadline": 0 }))
    );
    let task_id = body["data"]["_id"].as_str().unwrap().to_string();

    let (status, body) = send!(
        app,
        test::TestRequest::put()
            .uri(&format!("/tasks/{}", task_id))
            .set_json(json!({ "name": null }))
    );
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Task validation failed: name: Name is required");

    let (status, body) = send!(
        app,
        test::TestRequest::put()
            .uri(&format!("/users/{}", bob_id))
            .set_json(json!({ "pendingTasks": task_id }))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User updated successfully");
    assert_eq!(body["data"]["pendingTasks"], json!([task_id]));

    let (_, body) = send!(
        app,
        test::TestRequest::get().uri(&format!("/tasks/{}", task_id))
    );
    assert_eq!(body["data"]["assignedUserName"], "Bob");

    let (status, body) = send!(
        app,
        test::TestRequest::delete().uri(&format!("/users/{}", bob_id))
    );
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "User deleted successfully", "data": null }));

    let task = store
        .task(&ObjectId::parse_str(&task_id).unwrap())
        .await
        .unwrap();
    assert_eq!(task.assigned_user, None);
    assert_eq!(task.assigned_user_name, "unassigned");

    common::assert_consistent(&store).await;
}

#[actix_web::test]
async fn duplicate_email_is_rejected() {
    let (_, state) = state("100");
    let app = test_app!(state);
    let alice = json!({ "name": "Alice", "email": "a@x.com" });

    let (status, _) = send!(app, test::TestRequest::post().uri("/users").set_json(&alice));
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send!(app, test::TestRequest::post().uri("/users").set_json(&alice));
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "A user with this email already exists");
}
