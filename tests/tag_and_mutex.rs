use std::time::Duration;

use apstra_tf::apstra::BlueprintMutexes;
use apstra_tf::provider::{apply_resource, destroy_resource, import_resource, read_resource};
use apstra_tf::resources::get_resource;
use apstra_tf::{ApstraClient, ApstraError, Diagnostics, ProviderContext};
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ApstraClient {
    ApstraClient::with_base_url(server.uri(), "admin".to_string(), "admin".to_string()).unwrap()
}

#[tokio::test]
async fn test_tag_create_read_delete() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/design/tags"))
        .and(body_json(json!({"label": "prod", "description": "production"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "tag1"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/design/tags/tag1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "tag1",
            "label": "prod",
            "description": "changed in the UI"
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/design/tags/tag1"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let ctx = ProviderContext::without_mutex(client(&mock_server));
    let resource = get_resource("apstra_tag").unwrap();
    let mut diags = Diagnostics::new();

    let config = json!({"name": "prod", "description": "production"});
    let state = apply_resource(&ctx, resource.as_ref(), &config, None, &mut diags)
        .await
        .unwrap();
    assert!(!diags.has_error(), "{}", diags);
    assert_eq!(state, json!({"id": "tag1", "name": "prod", "description": "production"}));

    let refreshed = read_resource(&ctx, resource.as_ref(), &state, &mut diags)
        .await
        .unwrap();
    assert_eq!(refreshed["description"], "changed in the UI");

    destroy_resource(&ctx, resource.as_ref(), &refreshed, &mut diags).await;
    assert!(!diags.has_error(), "{}", diags);
}

#[tokio::test]
async fn test_tag_read_gone() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/design/tags/tag1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let ctx = ProviderContext::without_mutex(client(&mock_server));
    let resource = get_resource("apstra_tag").unwrap();
    let mut diags = Diagnostics::new();

    let state = json!({"id": "tag1", "name": "prod", "description": null});
    assert!(read_resource(&ctx, resource.as_ref(), &state, &mut diags).await.is_none());
    assert!(!diags.has_error());
}

#[tokio::test]
async fn test_import_missing_tag_is_an_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/design/tags/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let ctx = ProviderContext::without_mutex(client(&mock_server));
    let resource = get_resource("apstra_tag").unwrap();
    let mut diags = Diagnostics::new();

    assert!(import_resource(Some(&ctx), resource.as_ref(), "nope", &mut diags).await.is_none());
    assert!(diags.has_error());
}

#[tokio::test]
async fn test_mutex_lock_and_unlock() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/design/tags"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "mutex1"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("DELETE"))
        .and(path("/api/design/tags/mutex1"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mutexes = BlueprintMutexes::new(client(&mock_server), true, Duration::from_secs(5));
    mutexes.lock("bp1").await.unwrap();
    // second lock on the same blueprint is already held
    mutexes.lock("bp1").await.unwrap();
    assert_eq!(mutexes.held().await, vec!["bp1".to_string()]);

    mutexes.unlock_all().await.unwrap();
    assert!(mutexes.held().await.is_empty());
}

#[tokio::test]
async fn test_mutex_times_out_when_held_elsewhere() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/design/tags"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"errors": {"label": "exists"}})),
        )
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/design/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "other",
                "label": "blueprint-mutex-bp1",
                "description": "{\"owner\":\"someone-else\",\"details\":\"locked by terraform\"}"
            }]
        })))
        .mount(&mock_server)
        .await;

    let mutexes = BlueprintMutexes::new(client(&mock_server), true, Duration::from_secs(1));
    let err = mutexes.lock("bp1").await.unwrap_err();
    assert!(matches!(err, ApstraError::Lock { .. }));
    assert!(mutexes.held().await.is_empty());
}

#[tokio::test]
async fn test_mutex_adopts_own_tag() {
    let mock_server = MockServer::start().await;
    let mutexes = BlueprintMutexes::new(client(&mock_server), true, Duration::from_secs(5));
    let description = json!({"owner": mutexes.owner().to_string(), "details": "locked by terraform"})
        .to_string();

    Mock::given(method("POST"))
        .and(path("/api/design/tags"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/design/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "mine", "label": "blueprint-mutex-bp1", "description": description}]
        })))
        .mount(&mock_server)
        .await;

    mutexes.lock("bp1").await.unwrap();
    assert_eq!(mutexes.held().await, vec!["bp1".to_string()]);
}
