//! Runtime configuration.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// How a policy stores and evaluates its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Rules whose consequences are stored and maintained incrementally.
    Materialized,
    /// Rules without recursion, evaluated at query time.
    Nonrecursive,
    /// Facts only.
    Database,
}

/// One policy to create at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub name: String,
    pub kind: PolicyKind,
    /// Policies consulted when a literal is not answered locally.
    #[serde(default)]
    pub includes: Vec<String>,
}

impl PolicyConfig {
    pub fn new(name: impl Into<String>, kind: PolicyKind, includes: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind,
            includes: includes.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Configuration for a [`Runtime`](crate::Runtime).
///
/// # Examples
///
/// ```rust
/// use verdict::{PolicyKind, RuntimeConfig};
///
/// let config = RuntimeConfig::from_json(
///     r#"{"policies": [{"name": "classification", "kind": "materialized"}]}"#,
/// )
/// .unwrap();
/// assert_eq!(config.policies[0].kind, PolicyKind::Materialized);
/// assert_eq!(config.log_filter, "info");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Policy used when an operation names no target.
    pub default_target: String,
    pub policies: Vec<PolicyConfig>,
    /// Filter directive for [`init_tracing`](crate::telemetry::init_tracing).
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_target: "classification".to_string(),
            policies: vec![
                PolicyConfig::new("classification", PolicyKind::Materialized, &[]),
                PolicyConfig::new("service", PolicyKind::Nonrecursive, &["classification"]),
                PolicyConfig::new("action", PolicyKind::Nonrecursive, &["classification"]),
            ],
            log_filter: "info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, RuntimeError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Config` if:
    /// - two policies share a name
    /// - a policy includes an undeclared policy or itself
    /// - the default target is not declared
    pub fn validate(&self) -> Result<(), RuntimeError> {
        let mut names = HashSet::new();
        for policy in &self.policies {
            if policy.name.is_empty() {
                return Err(RuntimeError::Config("policy name cannot be empty".to_string()));
            }
            if !names.insert(policy.name.as_str()) {
                return Err(RuntimeError::Config(format!(
                    "duplicate policy name '{}'",
                    policy.name
                )));
            }
        }

        for policy in &self.policies {
            for include in &policy.includes {
                if include == &policy.name {
                    return Err(RuntimeError::Config(format!(
                        "policy '{}' includes itself",
                        policy.name
                    )));
                }
                if !names.contains(include.as_str()) {
                    return Err(RuntimeError::Config(format!(
                        "policy '{}' includes unknown policy '{include}'",
                        policy.name
                    )));
                }
            }
        }

        if !names.contains(self.default_target.as_str()) {
            return Err(RuntimeError::Config(format!(
                "default target '{}' is not a declared policy",
                self.default_target
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_default_is_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.policies.len(), 3);
    }

    #[test]
    fn test_round_trip() {
        let config = RuntimeConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""kind":"nonrecursive""#));
        assert_eq!(RuntimeConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let config = RuntimeConfig::from_json(r#"{"log_filter": "debug"}"#).unwrap();
        assert_eq!(config.default_target, "classification");
        assert_eq!(config.log_filter, "debug");
    }

    #[test_case(
        r#"{"default_target": "", "policies": [{"name": "", "kind": "database"}]}"#,
        "cannot be empty";
        "empty name"
    )]
    #[test_case(
        r#"{"default_target": "a", "policies": [{"name": "a", "kind": "database"}, {"name": "a", "kind": "materialized"}]}"#,
        "duplicate policy name 'a'";
        "duplicate name"
    )]
    #[test_case(
        r#"{"default_target": "a", "policies": [{"name": "a", "kind": "nonrecursive", "includes": ["a"]}]}"#,
        "includes itself";
        "self include"
    )]
    #[test_case(
        r#"{"default_target": "a", "policies": [{"name": "a", "kind": "nonrecursive", "includes": ["b"]}]}"#,
        "includes unknown policy 'b'";
        "unknown include"
    )]
    #[test_case(
        r#"{"default_target": "b", "policies": [{"name": "a", "kind": "database"}]}"#,
        "default target 'b'";
        "unknown default target"
    )]
    fn test_invalid_json_configs(json: &str, message: &str) {
        let err = RuntimeConfig::from_json(json).unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
        assert!(err.to_string().contains(message), "{err}");
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut config = RuntimeConfig::default();
        config
            .policies
            .push(PolicyConfig::new("service", PolicyKind::Database, &[]));
        assert!(matches!(config.validate(), Err(RuntimeError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_includes() {
        let mut config = RuntimeConfig::default();
        config.policies[1].includes.push("missing".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("missing"));

        let mut config = RuntimeConfig::default();
        config.policies[0].includes.push("classification".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_default_target() {
        let config = RuntimeConfig {
            default_target: "nope".to_string(),
            ..RuntimeConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(matches!(
            RuntimeConfig::from_json("{not json"),
            Err(RuntimeError::Json(_))
        ));
    }
}
