//! Namespaces and tenant-to-namespace resolution.
//!
//! Each tenant's operational data lives in its own relational namespace
//! (a PostgreSQL schema). Cross-tenant registries live in one shared
//! namespace, and a sentinel "unassigned" namespace holds data whose owner
//! cannot be determined.
//!
//! ```text
//! tenant "acme"        -> company_acme   (Tenant)
//! shared registries    -> public         (Shared)
//! orphaned rows        -> unassigned     (Unassigned)
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

mod resolver;

pub use resolver::{SchemaConfig, SchemaResolver};

/// The role a namespace plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceKind {
    /// Holds one tenant's data.
    Tenant,
    /// Holds registries shared by every tenant.
    Shared,
    /// Defensive fallback for data with no known owner.
    Unassigned,
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamespaceKind::Tenant => write!(f, "tenant"),
            NamespaceKind::Shared => write!(f, "shared"),
            NamespaceKind::Unassigned => write!(f, "unassigned"),
        }
    }
}

/// A physical namespace name together with its role.
///
/// Ordering is lexicographic by name, which is the order fan-out
/// operations visit tenant namespaces in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    name: String,
    kind: NamespaceKind,
}

impl Namespace {
    pub(crate) fn new(name: impl Into<String>, kind: NamespaceKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Returns the physical name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the role of the namespace.
    pub fn kind(&self) -> NamespaceKind {
        self.kind
    }

    /// Returns `true` for tenant namespaces.
    pub fn is_tenant(&self) -> bool {
        self.kind == NamespaceKind::Tenant
    }

    /// Returns the name as a double-quoted SQL identifier.
    ///
    /// ```
    /// use shiftbook_persistence::schema::SchemaResolver;
    ///
    /// let resolver = SchemaResolver::default();
    /// assert_eq!(resolver.shared().quoted(), "\"public\"");
    /// ```
    pub fn quoted(&self) -> String {
        quote_identifier(&self.name)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Quotes a SQL identifier, doubling embedded quotes.
pub fn quote_identifier(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}
