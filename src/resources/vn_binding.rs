//! Virtual network bindings and the logic that derives them from a set of
//! switch IDs.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::apstra::client::encode;
use crate::apstra::graph::{MatchQuery, PathQuery, is_in, qe};
use crate::apstra::{ApstraClient, ApstraError};
use crate::framework::value::{int_value_or_null, set_value_or_null};
use crate::framework::{Diagnostics, Value};

const ROLE_LEAF: &str = "leaf";
const ROLE_ACCESS: &str = "access";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VnBinding {
    pub vlan_id: Value<i64>,
    pub leaf_id: Value<String>,
    pub access_ids: Value<BTreeSet<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVnBinding {
    pub system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<i64>,
    #[serde(default)]
    pub access_switch_node_ids: Vec<String>,
}

impl VnBinding {
    pub fn request(&self) -> ApiVnBinding {
        ApiVnBinding {
            system_id: self.leaf_id.value_or_default(),
            vlan_id: self.vlan_id.as_option().copied(),
            access_switch_node_ids: self
                .access_ids
                .value_or_default()
                .into_iter()
                .collect(),
        }
    }

    pub fn load_api_data(&mut self, api: &ApiVnBinding) {
        self.leaf_id = Value::Value(api.system_id.clone());
        self.vlan_id = int_value_or_null(api.vlan_id);
        self.access_ids = set_value_or_null(api.access_switch_node_ids.iter().cloned());
    }
}

#[derive(Debug, Deserialize)]
struct GraphNode {
    id: String,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RedundancyGroupItem {
    n_redundancy_group: GraphNode,
    n_system: GraphNode,
}

#[derive(Debug, Deserialize)]
struct ParentItem {
    n_access: GraphNode,
    n_leaf: GraphNode,
}

#[derive(Debug, Deserialize)]
struct SystemNodes {
    nodes: HashMap<String, GraphNode>,
}

/// Redundancy group membership of leaf and access switches.
#[derive(Debug, Default)]
struct RedundancyGroups {
    group_of: HashMap<String, String>,
    role_of: HashMap<String, String>,
    members: HashMap<String, BTreeSet<String>>,
}

impl RedundancyGroups {
    fn from_items(items: Vec<RedundancyGroupItem>) -> Self {
        let mut groups = Self::default();
        for item in items {
            let group_id = item.n_redundancy_group.id;
            let system_id = item.n_system.id;
            if let Some(role) = item.n_system.role {
                groups.role_of.insert(group_id.clone(), role);
            }
            groups
                .members
                .entry(group_id.clone())
                .or_default()
                .insert(system_id.clone());
            groups.group_of.insert(system_id, group_id);
        }
        groups
    }

    fn group(&self, system_id: &str) -> Option<&str> {
        self.group_of.get(system_id).map(String::as_str)
    }

    fn role(&self, group_id: &str) -> &str {
        self.role_of.get(group_id).map(String::as_str).unwrap_or_default()
    }

    /// The group ID for grouped systems, the system ID otherwise.
    fn binding_id(&self, system_id: &str) -> String {
        self.group(system_id).unwrap_or(system_id).to_string()
    }
}

fn redundancy_group_query() -> MatchQuery {
    MatchQuery::new()
        .match_(
            PathQuery::new()
                .node(vec![qe("type", "redundancy_group"), qe("name", "n_redundancy_group")])
                .out(vec![qe("type", "composed_of_systems")])
                .node(vec![
                    qe("type", "system"),
                    qe("system_type", "switch"),
                    qe("role", is_in(&[ROLE_ACCESS, ROLE_LEAF])),
                    qe("name", "n_system"),
                ]),
        )
        .distinct(&["n_system"])
}

fn access_parent_query(access_ids: &BTreeSet<String>) -> MatchQuery {
    let ids: Vec<&String> = access_ids.iter().collect();
    MatchQuery::new().match_(
        PathQuery::new()
            .node(vec![
                qe("type", "system"),
                qe("role", ROLE_ACCESS),
                qe("name", "n_access"),
                qe("id", is_in(&ids)),
            ])
            .out(vec![qe("type", "hosted_interfaces")])
            .node(vec![qe("type", "interface")])
            .out(vec![qe("type", "link")])
            .node(vec![qe("type", "link"), qe("link_type", "ethernet")])
            .in_(vec![qe("type", "link")])
            .node(vec![qe("type", "interface")])
            .in_(vec![qe("type", "hosted_interfaces")])
            .node(vec![qe("type", "system"), qe("role", ROLE_LEAF), qe("name", "n_leaf")]),
    )
}

async fn system_roles(
    client: &ApstraClient,
    blueprint_id: &str,
) -> Result<HashMap<String, String>, ApstraError> {
    let path = format!(
        "/api/blueprints/{}/nodes?node_type=system",
        encode(blueprint_id)
    );
    let response: SystemNodes = client.get(&path).await?;
    Ok(response
        .nodes
        .into_iter()
        .map(|(id, node)| (id, node.role.unwrap_or_default()))
        .collect())
}

/// Computes the bindings that attach a VN to `switch_ids`: leaf switches
/// directly, access switches beneath their parent leaf. Redundant switches
/// are represented by their redundancy group.
pub async fn construct_bindings(
    client: &ApstraClient,
    blueprint_id: &str,
    vlan_id: Option<i64>,
    switch_ids: &BTreeSet<String>,
    diags: &mut Diagnostics,
) -> Option<Vec<VnBinding>> {
    let group_items = match client
        .graph_query::<RedundancyGroupItem>(blueprint_id, &redundancy_group_query())
        .await
    {
        Ok(response) => response.items,
        Err(e) => {
            diags.add_error("error querying redundancy groups", e.to_string());
            return None;
        }
    };
    let groups = RedundancyGroups::from_items(group_items);

    let roles = match system_roles(client, blueprint_id).await {
        Ok(roles) => roles,
        Err(e) => {
            diags.add_error("error fetching blueprint system nodes", e.to_string());
            return None;
        }
    };

    let mut leaf_ids = BTreeSet::new();
    let mut access_ids = BTreeSet::new();
    for id in switch_ids {
        match roles.get(id).map(String::as_str) {
            None => diags.add_error(
                "switch not found",
                format!("system node {:?} not found in blueprint {:?}", id, blueprint_id),
            ),
            Some(ROLE_LEAF) => {
                leaf_ids.insert(id.clone());
            }
            Some(ROLE_ACCESS) => {
                access_ids.insert(id.clone());
            }
            Some(role) => diags.add_error(
                "invalid system role",
                format!(
                    "system {:?} has role {:?}, only {:?} and {:?} switches may be bound",
                    id, role, ROLE_LEAF, ROLE_ACCESS
                ),
            ),
        }
    }
    if diags.has_error() {
        return None;
    }

    // peers of redundant access switches are bound too
    let peers: Vec<String> = access_ids
        .iter()
        .filter_map(|id| groups.group(id))
        .filter_map(|group_id| groups.members.get(group_id))
        .flatten()
        .cloned()
        .collect();
    access_ids.extend(peers);

    let mut parents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    if !access_ids.is_empty() {
        match client
            .graph_query::<ParentItem>(blueprint_id, &access_parent_query(&access_ids))
            .await
        {
            Ok(response) => {
                for item in response.items {
                    parents
                        .entry(item.n_access.id)
                        .or_default()
                        .insert(item.n_leaf.id);
                }
            }
            Err(e) => {
                diags.add_error("error querying access switch parents", e.to_string());
                return None;
            }
        }
    }

    let mut bindings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for access_id in &access_ids {
        if let Some(group_id) = groups.group(access_id) {
            if groups.role(group_id) != ROLE_ACCESS {
                diags.add_error(
                    "wrong redundancy group type",
                    format!(
                        "access switch {:?} belongs to redundancy group {:?} with role {:?}",
                        access_id,
                        group_id,
                        groups.role(group_id)
                    ),
                );
                return None;
            }
        }

        let Some(leafs) = parents.get(access_id).filter(|l| !l.is_empty()) else {
            diags.add_error(
                "unable to find access switch parent",
                format!("no leaf switch found above access switch {:?}", access_id),
            );
            return None;
        };

        let parent_ids: BTreeSet<String> = leafs.iter().map(|l| groups.binding_id(l)).collect();
        if parent_ids.len() != 1 {
            diags.add_error(
                "unexpected access switch parents",
                format!(
                    "access switch {:?} expected to have exactly 1 parent, found {:?}",
                    access_id, parent_ids
                ),
            );
            return None;
        }
        let parent_id = parent_ids.into_iter().next().unwrap_or_default();
        bindings
            .entry(parent_id)
            .or_default()
            .insert(groups.binding_id(access_id));
    }

    for leaf_id in &leaf_ids {
        if let Some(group_id) = groups.group(leaf_id) {
            if groups.role(group_id) != ROLE_LEAF {
                diags.add_error(
                    "redundancy group type mismatch",
                    format!(
                        "leaf switch {:?} belongs to redundancy group {:?} with role {:?}",
                        leaf_id,
                        group_id,
                        groups.role(group_id)
                    ),
                );
                return None;
            }
        }
        bindings.entry(groups.binding_id(leaf_id)).or_default();
    }

    Some(
        bindings
            .into_iter()
            .map(|(leaf_id, access)| VnBinding {
                vlan_id: Value::from_option(vlan_id),
                leaf_id: Value::Value(leaf_id),
                access_ids: set_value_or_null(access),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_and_load() {
        let binding = VnBinding {
            vlan_id: Value::Value(10),
            leaf_id: Value::Value("leaf1".to_string()),
            access_ids: Value::Value(["a2", "a1"].iter().map(|s| s.to_string()).collect()),
        };
        let api = binding.request();
        assert_eq!(
            serde_json::to_value(&api).unwrap(),
            json!({"system_id": "leaf1", "vlan_id": 10, "access_switch_node_ids": ["a1", "a2"]})
        );

        let mut loaded = VnBinding::default();
        loaded.load_api_data(&ApiVnBinding {
            system_id: "leaf1".to_string(),
            vlan_id: None,
            access_switch_node_ids: vec![],
        });
        assert!(loaded.vlan_id.is_null());
        assert!(loaded.access_ids.is_null());
    }

    #[test]
    fn test_redundancy_group_query() {
        assert_eq!(
            redundancy_group_query().to_string(),
            "match(node(type='redundancy_group', name='n_redundancy_group')\
             .out(type='composed_of_systems')\
             .node(type='system', system_type='switch', role=is_in(['access','leaf']), name='n_system'))\
             .distinct(['n_system'])"
        );
    }

    #[test]
    fn test_redundancy_groups_binding_id() {
        let items: Vec<RedundancyGroupItem> = serde_json::from_value(json!([
            {"n_redundancy_group": {"id": "rg1"}, "n_system": {"id": "l1", "role": "leaf"}},
            {"n_redundancy_group": {"id": "rg1"}, "n_system": {"id": "l2", "role": "leaf"}},
        ]))
        .unwrap();
        let groups = RedundancyGroups::from_items(items);
        assert_eq!(groups.binding_id("l1"), "rg1");
        assert_eq!(groups.binding_id("l3"), "l3");
        assert_eq!(groups.role("rg1"), "leaf");
        assert_eq!(groups.members["rg1"].len(), 2);
    }
}
