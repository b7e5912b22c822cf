use apstra_tf::{ApstraClient, ApstraError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ApstraClient {
    ApstraClient::with_base_url(server.uri(), "admin".to_string(), "admin_pw".to_string()).unwrap()
}

async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path("/api/aaa/login"))
        .and(body_json(json!({"username": "admin", "password": "admin_pw"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"token": token, "id": "s1"})))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_token_sent_on_requests() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "tok123").await;

    Mock::given(method("GET"))
        .and(path("/api/design/tags"))
        .and(header("AuthToken", "tok123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);
    client.login().await.unwrap();
    let body: serde_json::Value = client.get("/api/design/tags").await.unwrap();
    assert_eq!(body, json!({"items": []}));
}

#[tokio::test]
async fn test_login_rejected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/aaa/login"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"errors": "Invalid credential"})),
        )
        .mount(&mock_server)
        .await;

    let err = client(&mock_server).login().await.unwrap_err();
    match err {
        ApstraError::Auth { message } => {
            assert!(message.contains("Invalid credential"));
            assert!(!message.contains("admin_pw"));
        }
        other => panic!("Expected Auth error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_not_found_and_api_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/design/tags/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"errors": "not found"})))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/design/tags"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"errors": {"label": "already exists"}})),
        )
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);

    let err = client
        .get::<serde_json::Value>("/api/design/tags/missing")
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = client
        .post::<_, serde_json::Value>("/api/design/tags", &json!({"label": "x"}))
        .await
        .unwrap_err();
    match err {
        ApstraError::Api { status, message } => {
            assert_eq!(status, 422);
            assert!(message.contains("already exists"));
        }
        other => panic!("Expected Api error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_graph_query_targets_staging() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/blueprints/bp1/qe"))
        .and(query_param("type", "staging"))
        .and(body_json(json!({"query": "node(type='system', name='n_system')"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 1,
            "items": [{"n_system": {"id": "sys1"}}]
        })))
        .mount(&mock_server)
        .await;

    let query = apstra_tf::apstra::PathQuery::new()
        .node(vec![
            apstra_tf::apstra::QEAttribute::new("type", "system"),
            apstra_tf::apstra::QEAttribute::new("name", "n_system"),
        ]);

    let response = client(&mock_server)
        .graph_query::<serde_json::Value>("bp1", &query)
        .await
        .unwrap();
    assert_eq!(response.count, 1);
    assert_eq!(response.items[0]["n_system"]["id"], "sys1");
}

#[tokio::test]
async fn test_logout_without_session_is_noop() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/aaa/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    client(&mock_server).logout().await.unwrap();
}

#[tokio::test]
async fn test_logout_after_login() {
    let mock_server = MockServer::start().await;
    mount_login(&mock_server, "tok123").await;

    Mock::given(method("POST"))
        .and(path("/api/aaa/logout"))
        .and(header("AuthToken", "tok123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server);
    client.login().await.unwrap();
    client.logout().await.unwrap();
}
