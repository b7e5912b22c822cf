use std::collections::BTreeMap;

use apstra_tf::apstra::ApstraError;
use apstra_tf::provider::{apply_resource, destroy_resource, read_resource};
use apstra_tf::resources::ct_assignments::set_application_points_connectivity_templates;
use apstra_tf::resources::get_resource;
use apstra_tf::{ApstraClient, Diagnostics, ProviderContext};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BATCH_APPLY: &str = "/api/blueprints/bp1/obj-policy-batch-apply";
const RESOURCE: &str = "apstra_datacenter_connectivity_template_assignments";

fn client(server: &MockServer) -> ApstraClient {
    ApstraClient::with_base_url(server.uri(), "admin".to_string(), "admin".to_string()).unwrap()
}

fn assignment(ap: &str, ct: &str, used: bool) -> (String, BTreeMap<String, bool>) {
    (ap.to_string(), BTreeMap::from([(ct.to_string(), used)]))
}

#[tokio::test]
async fn test_create_posts_batch_apply() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(BATCH_APPLY))
        .and(body_json(json!({"application_points": [
            {"id": "ap1", "policies": [{"policy": "ct1", "used": true}]},
            {"id": "ap2", "policies": [{"policy": "ct1", "used": true}]},
        ]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let ctx = ProviderContext::without_mutex(client(&mock_server));
    let resource = get_resource(RESOURCE).unwrap();
    let mut diags = Diagnostics::new();

    let config = json!({
        "blueprint_id": "bp1",
        "connectivity_template_id": "ct1",
        "application_point_ids": ["ap2", "ap1"],
    });
    let state = apply_resource(&ctx, resource.as_ref(), &config, None, &mut diags)
        .await
        .unwrap();
    assert!(!diags.has_error(), "{}", diags);
    assert_eq!(state["application_point_ids"], json!(["ap1", "ap2"]));
    assert!(state["ip_links_ids"].is_null());
}

#[tokio::test]
async fn test_retry_after_invalid_application_point() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(BATCH_APPLY))
        .and(body_json(json!({"application_points": [
            {"id": "ap1", "policies": [{"policy": "ct1", "used": true}]},
            {"id": "gone", "policies": [{"policy": "ct1", "used": false}]},
        ]})))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "errors": {"invalid_application_point_ids": ["gone"]}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(BATCH_APPLY))
        .and(body_json(json!({"application_points": [
            {"id": "ap1", "policies": [{"policy": "ct1", "used": true}]},
        ]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = BTreeMap::from([assignment("ap1", "ct1", true), assignment("gone", "ct1", false)]);
    set_application_points_connectivity_templates(&client(&mock_server), "bp1", request)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_invalid_addition_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(BATCH_APPLY))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "errors": {"invalid_application_point_ids": ["ap1"]}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = BTreeMap::from([assignment("ap1", "ct1", true)]);
    let err = set_application_points_connectivity_templates(&client(&mock_server), "bp1", request)
        .await
        .unwrap_err();
    match err {
        ApstraError::CtAssignmentFailed { detail } => {
            assert_eq!(detail["invalid_application_point_ids"], json!(["ap1"]));
        }
        other => panic!("Expected CtAssignmentFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_other_unprocessable_errors_pass_through() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(BATCH_APPLY))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"errors": "policy is not applicable"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = BTreeMap::from([assignment("ap1", "ct1", true)]);
    let err = set_application_points_connectivity_templates(&client(&mock_server), "bp1", request)
        .await
        .unwrap_err();
    assert!(matches!(err, ApstraError::Api { status: 422, .. }));
}

#[tokio::test]
async fn test_empty_request_sends_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(BATCH_APPLY))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&mock_server)
        .await;

    set_application_points_connectivity_templates(&client(&mock_server), "bp1", BTreeMap::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_destroy_drops_vanished_application_points() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(BATCH_APPLY))
        .and(body_json(json!({"application_points": [
            {"id": "ap1", "policies": [{"policy": "ct1", "used": false}]},
            {"id": "ap2", "policies": [{"policy": "ct1", "used": false}]},
        ]})))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "errors": {"invalid_application_point_ids": ["ap2"]}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(BATCH_APPLY))
        .and(body_json(json!({"application_points": [
            {"id": "ap1", "policies": [{"policy": "ct1", "used": false}]},
        ]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let ctx = ProviderContext::without_mutex(client(&mock_server));
    let resource = get_resource(RESOURCE).unwrap();
    let mut diags = Diagnostics::new();

    let state = json!({
        "blueprint_id": "bp1",
        "connectivity_template_id": "ct1",
        "application_point_ids": ["ap1", "ap2"],
        "fetch_ip_link_ids": null,
        "ip_links_ids": null,
    });
    destroy_resource(&ctx, resource.as_ref(), &state, &mut diags).await;
    assert!(!diags.has_error(), "{}", diags);
}

#[tokio::test]
async fn test_read_without_application_points_is_gone() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/blueprints/bp1/qe"))
        .and(query_param("type", "staging"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0, "items": []})))
        .mount(&mock_server)
        .await;

    let ctx = ProviderContext::without_mutex(client(&mock_server));
    let resource = get_resource(RESOURCE).unwrap();
    let mut diags = Diagnostics::new();

    let state = json!({
        "blueprint_id": "bp1",
        "connectivity_template_id": "ct1",
        "application_point_ids": ["ap1"],
        "fetch_ip_link_ids": null,
        "ip_links_ids": null,
    });
    assert!(read_resource(&ctx, resource.as_ref(), &state, &mut diags).await.is_none());
    assert!(!diags.has_error());
}
