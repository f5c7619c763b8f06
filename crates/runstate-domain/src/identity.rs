//! Entity identity - the (namespace, name) key of a watched PipelineRun

use std::fmt;

/// Identity of a monitored PipelineRun
///
/// Stable for the lifetime of the resource and used as the only key into
/// the metric state store. Ordering is namespace first, then name, so
/// snapshots render in a deterministic order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId {
    namespace: String,
    name: String,
}

impl EntityId {
    /// Create a new identity
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Namespace the resource lives in
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Resource name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parse a `namespace/name` string
    ///
    /// # Errors
    /// Returns error if either half is missing or empty
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(format!("Invalid entity identity: {}", s)),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl std::str::FromStr for EntityId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let id = EntityId::new("build", "pr-123");
        assert_eq!(id.to_string(), "build/pr-123");
        assert_eq!(EntityId::parse("build/pr-123").unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(EntityId::parse("no-slash").is_err());
        assert!(EntityId::parse("/name").is_err());
        assert!(EntityId::parse("ns/").is_err());
        assert!(EntityId::parse("a/b/c").is_err());
    }

    #[test]
    fn test_ordering_namespace_first() {
        let a = EntityId::new("a", "z");
        let b = EntityId::new("b", "a");
        assert!(a < b);
    }
}
