//! Builders for Apstra graph queries (QE).
//!
//! ```text
//! node(type='system', name='n_system').out(type='hosted_interfaces').node(type='interface')
//! match(node(...), optional(node(...))).distinct(['n_system'])
//! ```

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QEValue {
    String(String),
    Bool(bool),
    Int(i64),
    IsIn(Vec<String>),
    NotNone,
}

impl fmt::Display for QEValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QEValue::String(s) => write!(f, "'{}'", s),
            QEValue::Bool(true) => write!(f, "True"),
            QEValue::Bool(false) => write!(f, "False"),
            QEValue::Int(i) => write!(f, "{}", i),
            QEValue::IsIn(items) => {
                let quoted: Vec<String> = items.iter().map(|i| format!("'{}'", i)).collect();
                write!(f, "is_in([{}])", quoted.join(","))
            }
            QEValue::NotNone => write!(f, "not_none()"),
        }
    }
}

impl From<&str> for QEValue {
    fn from(s: &str) -> Self {
        QEValue::String(s.to_string())
    }
}

impl From<String> for QEValue {
    fn from(s: String) -> Self {
        QEValue::String(s)
    }
}

impl From<&String> for QEValue {
    fn from(s: &String) -> Self {
        QEValue::String(s.clone())
    }
}

impl From<bool> for QEValue {
    fn from(b: bool) -> Self {
        QEValue::Bool(b)
    }
}

impl From<i64> for QEValue {
    fn from(i: i64) -> Self {
        QEValue::Int(i)
    }
}

pub fn is_in<S: AsRef<str>>(items: &[S]) -> QEValue {
    QEValue::IsIn(items.iter().map(|s| s.as_ref().to_string()).collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QEAttribute {
    pub key: String,
    pub value: QEValue,
}

impl QEAttribute {
    pub fn new(key: &str, value: impl Into<QEValue>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }
}

/// Shorthand for `QEAttribute::new`.
pub fn qe(key: &str, value: impl Into<QEValue>) -> QEAttribute {
    QEAttribute::new(key, value)
}

impl fmt::Display for QEAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

fn render_attributes(attributes: &[QEAttribute]) -> String {
    attributes
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub trait Query: fmt::Display + Send + Sync {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathQuery {
    elements: Vec<String>,
}

impl PathQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, attributes: Vec<QEAttribute>) -> Self {
        self.elements
            .push(format!("node({})", render_attributes(&attributes)));
        self
    }

    pub fn out(mut self, attributes: Vec<QEAttribute>) -> Self {
        self.elements
            .push(format!("out({})", render_attributes(&attributes)));
        self
    }

    pub fn in_(mut self, attributes: Vec<QEAttribute>) -> Self {
        self.elements
            .push(format!("in_({})", render_attributes(&attributes)));
        self
    }

    /// Appends a `where(...)` clause, e.g. `lambda n: 'x' in n.tags`.
    pub fn where_(mut self, lambda: &str) -> Self {
        self.elements.push(format!("where({})", lambda));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl fmt::Display for PathQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.elements.join("."))
    }
}

impl Query for PathQuery {}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchQuery {
    paths: Vec<(PathQuery, bool)>,
    distinct: Vec<String>,
}

impl MatchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn match_(mut self, path: PathQuery) -> Self {
        self.paths.push((path, false));
        self
    }

    pub fn optional(mut self, path: PathQuery) -> Self {
        self.paths.push((path, true));
        self
    }

    pub fn distinct<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.distinct = names.iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl fmt::Display for MatchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<String> = self
            .paths
            .iter()
            .map(|(p, optional)| {
                if *optional {
                    format!("optional({})", p)
                } else {
                    p.to_string()
                }
            })
            .collect();
        write!(f, "match({})", paths.join(", "))?;
        if !self.distinct.is_empty() {
            let names: Vec<String> = self.distinct.iter().map(|n| format!("'{}'", n)).collect();
            write!(f, ".distinct([{}])", names.join(","))?;
        }
        Ok(())
    }
}

impl Query for MatchQuery {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_rendering() {
        assert_eq!(QEValue::from("leaf").to_string(), "'leaf'");
        assert_eq!(QEValue::from(true).to_string(), "True");
        assert_eq!(QEValue::from(false).to_string(), "False");
        assert_eq!(QEValue::from(7i64).to_string(), "7");
        assert_eq!(is_in(&["leaf", "access"]).to_string(), "is_in(['leaf','access'])");
    }

    #[test]
    fn test_path_query() {
        let q = PathQuery::new()
            .node(vec![qe("type", "system"), qe("name", "n_system")])
            .out(vec![qe("type", "hosted_interfaces")])
            .node(vec![qe("type", "interface")]);
        assert_eq!(
            q.to_string(),
            "node(type='system', name='n_system').out(type='hosted_interfaces').node(type='interface')"
        );
    }

    #[test]
    fn test_path_query_with_where() {
        let q = PathQuery::new()
            .node(vec![qe("type", "policy"), qe("name", "n_policy")])
            .where_("lambda n_policy: 'prod' in (n_policy.tags or [])");
        assert_eq!(
            q.to_string(),
            "node(type='policy', name='n_policy').where(lambda n_policy: 'prod' in (n_policy.tags or []))"
        );
    }

    #[test]
    fn test_match_query_with_optional_and_distinct() {
        let a = PathQuery::new().node(vec![qe("name", "a")]);
        let b = PathQuery::new().node(vec![qe("name", "b")]);
        let q = MatchQuery::new().match_(a).optional(b).distinct(&["a", "b"]);
        assert_eq!(
            q.to_string(),
            "match(node(name='a'), optional(node(name='b'))).distinct(['a','b'])"
        );
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_empty_node() {
        assert_eq!(PathQuery::new().node(vec![]).to_string(), "node()");
    }
}
