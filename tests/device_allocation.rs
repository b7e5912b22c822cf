use apstra_tf::provider::{apply_resource, destroy_resource};
use apstra_tf::resources::get_resource;
use apstra_tf::{ApstraClient, Diagnostics, ProviderContext};
use serde_json::{Value as JsonValue, json};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RESOURCE: &str = "apstra_datacenter_device_allocation";

const NODE_BY_LABEL: &str = "node(type='system', label='leaf1', name='n_system')";

fn client(server: &MockServer) -> ApstraClient {
    ApstraClient::with_base_url(server.uri(), "admin".to_string(), "admin".to_string()).unwrap()
}

async fn mount_query(server: &MockServer, query: &str, items: JsonValue) {
    let count = items.as_array().map(|a| a.len()).unwrap_or_default();
    Mock::given(method("POST"))
        .and(path("/api/blueprints/bp1/qe"))
        .and(body_json(json!({"query": query})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"count": count, "items": items})),
        )
        .mount(server)
        .await;
}

fn candidates_query(interface_map: &str) -> String {
    format!(
        "node(type='system', id='sys1').out(type='logical_device').node(type='logical_device')\
         .in_(type='logical_device').node({}).out(type='device_profile')\
         .node(type='device_profile', id='dp1')",
        interface_map
    )
}

#[tokio::test]
async fn test_allocate_with_interface_map() {
    let mock_server = MockServer::start().await;

    mount_query(&mock_server, NODE_BY_LABEL, json!([{"n_system": {"id": "sys1"}}])).await;
    mount_query(
        &mock_server,
        "node(type='interface_map', id='im1').out(type='device_profile')\
         .node(type='device_profile', name='n_device_profile')",
        json!([{"n_device_profile": {"id": "dp1"}}]),
    )
    .await;
    mount_query(
        &mock_server,
        &candidates_query("type='interface_map', name='n_interface_map', id='im1'"),
        json!([{"n_interface_map": {"id": "im1"}}]),
    )
    .await;

    Mock::given(method("PATCH"))
        .and(path("/api/blueprints/bp1/interface-map-assignments"))
        .and(body_json(json!({"assignments": {"sys1": "im1"}})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/api/blueprints/bp1/nodes/sys1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&mock_server)
        .await;

    let ctx = ProviderContext::without_mutex(client(&mock_server));
    let resource = get_resource(RESOURCE).unwrap();
    let mut diags = Diagnostics::new();

    let config = json!({
        "blueprint_id": "bp1",
        "node_name": "leaf1",
        "interface_map_id": "im1",
    });
    let state = apply_resource(&ctx, resource.as_ref(), &config, None, &mut diags)
        .await
        .unwrap();
    assert!(!diags.has_error(), "{}", diags);
    assert_eq!(state["node_id"], "sys1");
    assert_eq!(state["device_profile_node_id"], "dp1");
    assert_eq!(state["interface_map_id"], "im1");
    assert!(state["device_key"].is_null());
}

#[tokio::test]
async fn test_ambiguous_interface_map_lists_candidates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/systems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"device_key": "SN1", "facts": {"aos_hcl_model": "Juniper_vQFX"}},
                {"device_key": "SN2", "facts": {"aos_hcl_model": "Arista_vEOS"}}
            ]
        })))
        .mount(&mock_server)
        .await;

    mount_query(&mock_server, NODE_BY_LABEL, json!([{"n_system": {"id": "sys1"}}])).await;
    mount_query(
        &mock_server,
        "node(type='device_profile', device_profile_id='Juniper_vQFX', name='n_device_profile')",
        json!([{"n_device_profile": {"id": "dp1"}}]),
    )
    .await;
    mount_query(
        &mock_server,
        &candidates_query("type='interface_map', name='n_interface_map'"),
        json!([
            {"n_interface_map": {"id": "im_a"}},
            {"n_interface_map": {"id": "im_b"}}
        ]),
    )
    .await;

    Mock::given(method("PATCH"))
        .and(path("/api/blueprints/bp1/interface-map-assignments"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&mock_server)
        .await;

    let ctx = ProviderContext::without_mutex(client(&mock_server));
    let resource = get_resource(RESOURCE).unwrap();
    let mut diags = Diagnostics::new();

    let config = json!({"blueprint_id": "bp1", "node_name": "leaf1", "device_key": "SN1"});
    assert!(
        apply_resource(&ctx, resource.as_ref(), &config, None, &mut diags)
            .await
            .is_none()
    );
    let error = diags.errors().next().unwrap();
    assert_eq!(error.attribute.as_deref(), Some("interface_map_id"));
    assert!(error.detail.contains("\"im_a\", \"im_b\""));
}

#[tokio::test]
async fn test_unknown_node_name() {
    let mock_server = MockServer::start().await;
    mount_query(&mock_server, NODE_BY_LABEL, json!([])).await;

    let ctx = ProviderContext::without_mutex(client(&mock_server));
    let resource = get_resource(RESOURCE).unwrap();
    let mut diags = Diagnostics::new();

    let config = json!({"blueprint_id": "bp1", "node_name": "leaf1", "interface_map_id": "im1"});
    assert!(
        apply_resource(&ctx, resource.as_ref(), &config, None, &mut diags)
            .await
            .is_none()
    );
    assert_eq!(
        diags.errors().next().unwrap().attribute.as_deref(),
        Some("node_name")
    );
}

#[tokio::test]
async fn test_destroy_clears_assignments() {
    let mock_server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/api/blueprints/bp1/interface-map-assignments"))
        .and(body_json(json!({"assignments": {"sys1": null}})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/api/blueprints/bp1/nodes/sys1"))
        .and(body_json(json!({"system_id": null})))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let ctx = ProviderContext::without_mutex(client(&mock_server));
    let resource = get_resource(RESOURCE).unwrap();
    let mut diags = Diagnostics::new();

    let state = json!({
        "blueprint_id": "bp1",
        "node_name": "leaf1",
        "device_key": "SN1",
        "interface_map_id": "im1",
        "node_id": "sys1",
        "device_profile_node_id": "dp1",
    });
    destroy_resource(&ctx, resource.as_ref(), &state, &mut diags).await;
    assert!(!diags.has_error(), "{}", diags);
}
