//! Human readable renderings: type listings, diagnostics tables and schema
//! trees.

use std::collections::BTreeMap;

use tabled::settings::Style;
use tabled::{Table, Tabled};
use termtree::Tree;

use crate::framework::{Attribute, Diagnostics, Schema};

#[derive(Debug, Tabled)]
pub struct TypeRow {
    #[tabled(rename = "Type")]
    pub name: String,
    #[tabled(rename = "Kind")]
    pub kind: &'static str,
    #[tabled(rename = "Description")]
    pub description: String,
}

#[derive(Debug, Tabled)]
struct DiagnosticRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Attribute")]
    attribute: String,
    #[tabled(rename = "Summary")]
    summary: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

pub fn types_table(rows: Vec<TypeRow>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Empty when there is nothing to report.
pub fn diagnostics_table(diags: &Diagnostics) -> String {
    if diags.is_empty() {
        return String::new();
    }
    let rows: Vec<DiagnosticRow> = diags
        .iter()
        .map(|d| DiagnosticRow {
            severity: d.severity.to_string(),
            attribute: d.attribute.clone().unwrap_or_default(),
            summary: d.summary.clone(),
            detail: d.detail.clone(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

fn attribute_flags(attribute: &Attribute) -> String {
    let mut flags = Vec::new();
    if attribute.required {
        flags.push("required");
    }
    if attribute.optional {
        flags.push("optional");
    }
    if attribute.computed {
        flags.push("computed");
    }
    if attribute.sensitive {
        flags.push("sensitive");
    }
    flags.join(", ")
}

fn attribute_tree(name: &str, attribute: &Attribute) -> Tree<String> {
    let label = format!(
        "{} ({}) [{}]",
        name,
        attribute.kind.type_name(),
        attribute_flags(attribute)
    );
    let tree = Tree::new(label);
    match attribute.kind.nested() {
        Some(nested) => tree.with_leaves(attribute_trees(&nested.attributes)),
        None => tree,
    }
}

fn attribute_trees(attributes: &BTreeMap<String, Attribute>) -> Vec<Tree<String>> {
    attributes
        .iter()
        .map(|(name, attribute)| attribute_tree(name, attribute))
        .collect()
}

pub fn schema_tree(type_name: &str, schema: &Schema) -> String {
    Tree::new(type_name.to_string())
        .with_leaves(attribute_trees(&schema.attributes))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{ElementType, NestedObject};

    #[test]
    fn test_diagnostics_table_empty() {
        assert_eq!(diagnostics_table(&Diagnostics::new()), "");
    }

    #[test]
    fn test_diagnostics_table_rows() {
        let mut diags = Diagnostics::new();
        diags.add_attribute_error("vni", "Invalid Attribute Value", "out of range");
        let table = diagnostics_table(&diags);
        assert!(table.contains("Severity"));
        assert!(table.contains("vni"));
        assert!(table.contains("out of range"));
    }

    #[test]
    fn test_schema_tree_nests_attributes() {
        let schema = Schema::new("test")
            .attribute("name", Attribute::string().required())
            .attribute(
                "rules",
                Attribute::list_nested(
                    NestedObject::new()
                        .attribute("ports", Attribute::set(ElementType::Int64).optional()),
                )
                .optional(),
            );
        let tree = schema_tree("apstra_test", &schema);
        assert!(tree.starts_with("apstra_test"));
        assert!(tree.contains("name (string) [required]"));
        assert!(tree.contains("rules (list(object)) [optional]"));
        assert!(tree.contains("ports (set(int64)) [optional]"));
    }

    #[test]
    fn test_types_table() {
        let table = types_table(vec![TypeRow {
            name: "apstra_tag".to_string(),
            kind: "resource",
            description: "tag".to_string(),
        }]);
        assert!(table.contains("apstra_tag"));
        assert!(table.contains("Kind"));
    }
}
