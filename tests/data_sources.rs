use apstra_tf::data_sources::get_data_source;
use apstra_tf::provider::read_data_source;
use apstra_tf::{ApstraClient, Diagnostics, ProviderContext};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn context(server: &MockServer) -> ProviderContext {
    let client =
        ApstraClient::with_base_url(server.uri(), "admin".to_string(), "admin".to_string())
            .unwrap();
    ProviderContext::without_mutex(client)
}

#[tokio::test]
async fn test_systems_filter_query() {
    let mock_server = MockServer::start().await;
    let query = "match(node(type='system', name='n_system', role='leaf'), \
                 node(type='system', name='n_system').in_(type='tag').node(type='tag', label='prod'))";

    Mock::given(method("POST"))
        .and(path("/api/blueprints/bp1/qe"))
        .and(body_json(json!({"query": query})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "count": 2,
            "items": [{"n_system": {"id": "sys2"}}, {"n_system": {"id": "sys1"}}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let ctx = context(&mock_server);
    let data_source = get_data_source("apstra_datacenter_systems").unwrap();
    let mut diags = Diagnostics::new();

    let config = json!({
        "blueprint_id": "bp1",
        "filter": {"role": "leaf", "tag_ids": ["prod"]},
    });
    let result = read_data_source(&ctx, data_source.as_ref(), &config, &mut diags)
        .await
        .unwrap();
    assert!(!diags.has_error(), "{}", diags);
    assert_eq!(result["ids"], json!(["sys1", "sys2"]));
    assert_eq!(result["query_string"], query);
}

#[tokio::test]
async fn test_systems_invalid_config_skips_api() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/blueprints/bp1/qe"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let ctx = context(&mock_server);
    let data_source = get_data_source("apstra_datacenter_systems").unwrap();
    let mut diags = Diagnostics::new();

    let config = json!({"blueprint_id": "bp1", "filter": {"system_type": "toaster"}});
    assert!(
        read_data_source(&ctx, data_source.as_ref(), &config, &mut diags)
            .await
            .is_none()
    );
    assert!(diags.has_error());
}

#[tokio::test]
async fn test_security_policies_without_filters_lists_all() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/blueprints/bp1/policies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "policies": [
                {"id": "p2", "label": "web"},
                {"id": "p1", "label": "db"}
            ]
        })))
        .mount(&mock_server)
        .await;

    let ctx = context(&mock_server);
    let data_source = get_data_source("apstra_datacenter_security_policies").unwrap();
    let mut diags = Diagnostics::new();

    let result = read_data_source(&ctx, data_source.as_ref(), &json!({"blueprint_id": "bp1"}), &mut diags)
        .await
        .unwrap();
    assert!(!diags.has_error(), "{}", diags);
    assert_eq!(result["ids"], json!(["p1", "p2"]));
    assert!(result["graph_queries"].is_null());
}

#[tokio::test]
async fn test_api_token_opens_new_session() {
    let mock_server = MockServer::start().await;
    let claims = URL_SAFE_NO_PAD.encode(
        json!({"username": "admin", "user_session": "sess-9", "exp": 4_102_444_800i64}).to_string(),
    );
    let token = format!("header.{}.signature", claims);

    Mock::given(method("POST"))
        .and(path("/api/aaa/login"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"token": token})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let ctx = context(&mock_server);
    let data_source = get_data_source("apstra_api_token").unwrap();
    let mut diags = Diagnostics::new();

    let result = read_data_source(&ctx, data_source.as_ref(), &json!({}), &mut diags)
        .await
        .unwrap();
    assert!(diags.is_empty(), "{}", diags);
    assert_eq!(result["value"], token);
    assert_eq!(result["user_name"], "admin");
    assert_eq!(result["session_id"], "sess-9");
    assert_eq!(result["expires_at"], 4_102_444_800i64);
    assert_eq!(result["warn_seconds"], 60);
}

async fn mount_routing_policies(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/blueprints/bp1/routing-policies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "rp1", "label": "blue", "description": "", "policy_type": "user",
                "import_policy": "all",
                "export_policy": {"spine_leaf_links": true, "spine_superspine_links": false,
                                  "l3edge_server_links": false, "l2edge_subnets": true,
                                  "loopbacks": true, "static_routes": false},
                "expect_default_ipv4_route": true, "expect_default_ipv6_route": false,
                "aggregate_prefixes": [],
                "extra_import_routes": [], "extra_export_routes": []
            }]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_routing_policies_match() {
    let mock_server = MockServer::start().await;
    mount_routing_policies(&mock_server).await;

    let ctx = context(&mock_server);
    let data_source = get_data_source("apstra_datacenter_routing_policies").unwrap();
    let mut diags = Diagnostics::new();

    let config = json!({"blueprint_id": "bp1", "filters": [{"name": "blue"}]});
    let result = read_data_source(&ctx, data_source.as_ref(), &config, &mut diags)
        .await
        .unwrap();
    assert!(!diags.has_error(), "{}", diags);
    assert_eq!(result["ids"], json!(["rp1"]));
}

#[tokio::test]
async fn test_routing_policies_without_match_are_null() {
    let mock_server = MockServer::start().await;
    mount_routing_policies(&mock_server).await;

    let ctx = context(&mock_server);
    let data_source = get_data_source("apstra_datacenter_routing_policies").unwrap();
    let mut diags = Diagnostics::new();

    let config = json!({"blueprint_id": "bp1", "filters": [{"name": "red"}]});
    let result = read_data_source(&ctx, data_source.as_ref(), &config, &mut diags)
        .await
        .unwrap();
    assert!(!diags.has_error(), "{}", diags);
    assert!(result["ids"].is_null());
}
