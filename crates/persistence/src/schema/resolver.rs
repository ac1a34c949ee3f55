//! Tenant-to-namespace resolution.
//!
//! Tenant namespaces are named `{prefix}{tenant id}`. The shared
//! and unassigned namespaces are fixed names outside that pattern.

use serde::{Deserialize, Serialize};

use crate::error::{TenantError, ValidationError};
use crate::tenant::TenantId;

use super::{Namespace, NamespaceKind};

/// Configuration for namespace naming.
///
/// # Example
///
/// ```
/// use shiftbook_persistence::schema::SchemaConfig;
///
/// let config = SchemaConfig {
///     tenant_prefix: "tenant_".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.shared_schema, "public");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Prefix shared by every tenant namespace.
    #[serde(default = "default_tenant_prefix")]
    pub tenant_prefix: String,

    /// Name of the namespace holding cross-tenant registries.
    #[serde(default = "default_shared_schema")]
    pub shared_schema: String,

    /// Name of the sentinel namespace for orphaned data.
    #[serde(default = "default_unassigned_schema")]
    pub unassigned_schema: String,

    /// Maximum namespace name length (PostgreSQL limit is 63).
    #[serde(default = "default_max_schema_length")]
    pub max_schema_length: usize,

    /// Pattern every tenant namespace name must match.
    #[serde(default = "default_schema_pattern")]
    pub schema_pattern: String,
}

fn default_tenant_prefix() -> String {
    "company_".to_string()
}

fn default_shared_schema() -> String {
    "public".to_string()
}

fn default_unassigned_schema() -> String {
    "unassigned".to_string()
}

fn default_max_schema_length() -> usize {
    63 // PostgreSQL identifier limit
}

fn default_schema_pattern() -> String {
    r"^[a-z][a-z0-9_]*$".to_string()
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            tenant_prefix: default_tenant_prefix(),
            shared_schema: default_shared_schema(),
            unassigned_schema: default_unassigned_schema(),
            max_schema_length: default_max_schema_length(),
            schema_pattern: default_schema_pattern(),
        }
    }
}

impl SchemaConfig {
    /// Sets the tenant prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tenant_prefix = prefix.into();
        self
    }

    /// Sets the shared namespace name.
    pub fn with_shared_schema(mut self, schema: impl Into<String>) -> Self {
        self.shared_schema = schema.into();
        self
    }
}

/// Maps tenant identifiers to namespaces.
///
/// Resolution is pure and deterministic: the same identifier always maps to
/// the same namespace, and no I/O is performed. Identifiers are used as is:
/// any character outside `[a-z0-9_]` makes the identifier invalid rather than
/// being rewritten, so two distinct identifiers never share a namespace.
///
/// # Examples
///
/// ```
/// use shiftbook_persistence::schema::{NamespaceKind, SchemaResolver};
/// use shiftbook_persistence::tenant::TenantId;
///
/// let resolver = SchemaResolver::default();
///
/// let ns = resolver.resolve(&TenantId::new("north_shore")).unwrap();
/// assert_eq!(ns.name(), "company_north_shore");
/// assert_eq!(ns.kind(), NamespaceKind::Tenant);
///
/// assert!(resolver.resolve(&TenantId::new("")).is_err());
/// assert!(resolver.resolve(&TenantId::new("North-Shore")).is_err());
/// assert_eq!(resolver.shared().name(), "public");
/// assert_eq!(resolver.unassigned().name(), "unassigned");
/// ```
#[derive(Debug, Clone)]
pub struct SchemaResolver {
    config: SchemaConfig,
    schema_pattern: regex::Regex,
    shared: Namespace,
    unassigned: Namespace,
}

impl Default for SchemaResolver {
    fn default() -> Self {
        Self::new(SchemaConfig::default()).expect("default schema configuration is valid")
    }
}

impl SchemaResolver {
    /// Creates a resolver, validating the configuration.
    pub fn new(config: SchemaConfig) -> Result<Self, ValidationError> {
        let schema_pattern =
            regex::Regex::new(&config.schema_pattern).map_err(|e| ValidationError::InvalidConfig {
                key: "schema_pattern".to_string(),
                message: e.to_string(),
            })?;

        let invalid = |key: &str, message: String| ValidationError::InvalidConfig {
            key: key.to_string(),
            message,
        };

        if config.tenant_prefix.is_empty() {
            return Err(invalid("tenant_prefix", "must not be empty".to_string()));
        }
        for (key, name) in [
            ("shared_schema", &config.shared_schema),
            ("unassigned_schema", &config.unassigned_schema),
        ] {
            if name.is_empty() || name.len() > config.max_schema_length {
                return Err(invalid(
                    key,
                    format!(
                        "'{}' must be 1 to {} characters",
                        name, config.max_schema_length
                    ),
                ));
            }
            if name.starts_with(&config.tenant_prefix) {
                return Err(invalid(
                    key,
                    format!(
                        "'{}' must not start with the tenant prefix '{}'",
                        name, config.tenant_prefix
                    ),
                ));
            }
        }
        if config.shared_schema == config.unassigned_schema {
            return Err(invalid(
                "unassigned_schema",
                "must differ from the shared schema".to_string(),
            ));
        }

        Ok(Self {
            shared: Namespace::new(config.shared_schema.clone(), NamespaceKind::Shared),
            unassigned: Namespace::new(config.unassigned_schema.clone(), NamespaceKind::Unassigned),
            config,
            schema_pattern,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }

    /// Returns the tenant namespace prefix.
    pub fn tenant_prefix(&self) -> &str {
        &self.config.tenant_prefix
    }

    /// Resolves a tenant identifier to its namespace.
    ///
    /// Fails with `InvalidTenant` for empty or malformed identifiers; never
    /// falls back to the shared or unassigned namespace.
    pub fn resolve(&self, tenant_id: &TenantId) -> Result<Namespace, TenantError> {
        let invalid = |reason: String| TenantError::InvalidTenant {
            tenant_id: tenant_id.clone(),
            reason,
        };

        if tenant_id.is_empty() {
            return Err(invalid("tenant identifier is empty".to_string()));
        }

        if !is_tenant_id_charset(tenant_id.as_str()) {
            return Err(invalid(
                "tenant identifier may only contain lowercase letters, digits and '_'".to_string(),
            ));
        }

        let name = format!("{}{}", self.config.tenant_prefix, tenant_id.as_str());
        self.validate_schema_name(&name).map_err(invalid)?;

        Ok(Namespace::new(name, NamespaceKind::Tenant))
    }

    /// The namespace holding cross-tenant registries.
    pub fn shared(&self) -> &Namespace {
        &self.shared
    }

    /// The sentinel namespace for data with no known owner.
    pub fn unassigned(&self) -> &Namespace {
        &self.unassigned
    }

    /// Both fixed namespaces, registered idempotently at startup.
    pub fn fixed_namespaces(&self) -> [&Namespace; 2] {
        [&self.shared, &self.unassigned]
    }

    /// Classifies a physical namespace name found in the database.
    ///
    /// Returns `None` for names that are neither fixed namespaces nor valid
    /// tenant namespaces, e.g. `pg_catalog` or `company_` followed by
    /// characters no tenant identifier can produce.
    pub fn classify(&self, name: &str) -> Option<Namespace> {
        if name == self.shared.name() {
            return Some(self.shared.clone());
        }
        if name == self.unassigned.name() {
            return Some(self.unassigned.clone());
        }
        let suffix = name.strip_prefix(&self.config.tenant_prefix)?;
        if suffix.is_empty() || self.validate_schema_name(name).is_err() {
            return None;
        }
        Some(Namespace::new(name, NamespaceKind::Tenant))
    }

    fn validate_schema_name(&self, schema: &str) -> Result<(), String> {
        if schema.len() > self.config.max_schema_length {
            return Err(format!(
                "schema name exceeds maximum length of {} characters",
                self.config.max_schema_length
            ));
        }

        if !self.schema_pattern.is_match(schema) {
            return Err(format!(
                "schema name does not match required pattern: {}",
                self.config.schema_pattern
            ));
        }

        Ok(())
    }
}

fn is_tenant_id_charset(id: &str) -> bool {
    id.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
