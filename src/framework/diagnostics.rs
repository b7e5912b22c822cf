use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "Error"),
            Severity::Warning => write!(f, "Warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attribute {
            Some(path) => write!(
                f,
                "{}: {} (attribute {}): {}",
                self.severity, self.summary, path, self.detail
            ),
            None => write!(f, "{}: {}: {}", self.severity, self.summary, self.detail),
        }
    }
}

/// Ordered collection of errors and warnings produced by validation, planning
/// and API calls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.push(Severity::Error, None, summary, detail);
    }

    pub fn add_warning(&mut self, summary: impl Into<String>, detail: impl Into<String>) {
        self.push(Severity::Warning, None, summary, detail);
    }

    pub fn add_attribute_error(
        &mut self,
        path: impl Into<String>,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.push(Severity::Error, Some(path.into()), summary, detail);
    }

    fn push(
        &mut self,
        severity: Severity,
        attribute: Option<String>,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) {
        let diagnostic = Diagnostic {
            severity,
            summary: summary.into(),
            detail: detail.into(),
            attribute,
        };
        if severity == Severity::Warning {
            tracing::warn!(summary = %diagnostic.summary, "{}", diagnostic.detail);
        }
        self.items.push(diagnostic);
    }

    pub fn append(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }

    pub fn has_error(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.items.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_error_ignores_warnings() {
        let mut diags = Diagnostics::new();
        diags.add_warning("no changes", "nothing to deploy");
        assert!(!diags.has_error());
        diags.add_error("boom", "it broke");
        assert!(diags.has_error());
        assert_eq!(diags.errors().count(), 1);
        assert_eq!(diags.warnings().count(), 1);
    }

    #[test]
    fn test_attribute_error_display() {
        let mut diags = Diagnostics::new();
        diags.add_attribute_error("ipv4_subnet", "invalid CIDR", "bad value");
        assert_eq!(
            diags.to_string(),
            "Error: invalid CIDR (attribute ipv4_subnet): bad value"
        );
    }

    #[test]
    fn test_append_preserves_order() {
        let mut a = Diagnostics::new();
        a.add_error("first", "");
        let mut b = Diagnostics::new();
        b.add_warning("second", "");
        a.append(b);
        let summaries: Vec<_> = a.iter().map(|d| d.summary.as_str()).collect();
        assert_eq!(summaries, vec!["first", "second"]);
    }

    #[test]
    fn test_serializes_as_list() {
        let mut diags = Diagnostics::new();
        diags.add_error("s", "d");
        let json = serde_json::to_value(&diags).unwrap();
        assert_eq!(json[0]["severity"], "error");
        assert!(json[0].get("attribute").is_none());
    }
}
