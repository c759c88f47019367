//! Message-store namespaces.
//!
//! A recipient's message store on each snode is partitioned into signed
//! integer namespaces: conversation messages in the default namespace,
//! client configuration in the positive config namespaces, legacy closed
//! group traffic in a negative one.

use serde::{Deserialize, Serialize};

/// A single message-store namespace (closed set).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Namespace {
    /// Conversation messages (0).
    Default,
    /// User profile configuration (2).
    UserProfileConfig,
    /// Contacts configuration (3).
    ContactsConfig,
    /// Volatile per-conversation metadata (4).
    ConvoInfoVolatileConfig,
    /// User groups configuration (5).
    UserGroupsConfig,
    /// Legacy closed group messages (-10).
    LegacyClosedGroup,
}

/// Scope for operations that may address one namespace or all of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceScope {
    /// A single namespace.
    One(Namespace),
    /// Every namespace the recipient owns.
    All,
}

impl Namespace {
    /// The signed integer value used on the wire.
    pub fn value(self) -> i32 {
        match self {
            Namespace::Default => 0,
            Namespace::UserProfileConfig => 2,
            Namespace::ContactsConfig => 3,
            Namespace::ConvoInfoVolatileConfig => 4,
            Namespace::UserGroupsConfig => 5,
            Namespace::LegacyClosedGroup => -10,
        }
    }

    /// Parse from the wire integer.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Namespace::Default),
            2 => Some(Namespace::UserProfileConfig),
            3 => Some(Namespace::ContactsConfig),
            4 => Some(Namespace::ConvoInfoVolatileConfig),
            5 => Some(Namespace::UserGroupsConfig),
            -10 => Some(Namespace::LegacyClosedGroup),
            _ => None,
        }
    }

    /// The string this namespace contributes to signature payloads: empty
    /// for the default namespace, the decimal value otherwise.
    pub fn verification_string(self) -> String {
        match self {
            Namespace::Default => String::new(),
            other => other.value().to_string(),
        }
    }

    /// Whether retrieval from this namespace must be authenticated.
    ///
    /// Legacy closed groups poll with the group's shared key rather than a
    /// per-user signature, so reads there stay unauthenticated.
    pub fn requires_read_auth(self) -> bool {
        !matches!(self, Namespace::LegacyClosedGroup)
    }

    /// Whether stores into this namespace must be authenticated.
    pub fn requires_write_auth(self) -> bool {
        !matches!(self, Namespace::Default | Namespace::LegacyClosedGroup)
    }

    /// Whether this namespace carries client configuration.
    pub fn is_config(self) -> bool {
        matches!(
            self,
            Namespace::UserProfileConfig
                | Namespace::ContactsConfig
                | Namespace::ConvoInfoVolatileConfig
                | Namespace::UserGroupsConfig
        )
    }

    /// Relative weight of this namespace when splitting a poll budget.
    ///
    /// Conversation traffic dominates; config namespaces are small deltas.
    fn budget_weight(self) -> i64 {
        match self {
            Namespace::Default => 10,
            Namespace::LegacyClosedGroup => 10,
            _ => 2,
        }
    }

    /// Split `budget_bytes` across `namespaces` proportionally to their
    /// priority class. Deterministic given the input set; the same set in a
    /// different order yields the same allocation per namespace.
    pub fn max_size_map(
        namespaces: &[Namespace],
        budget_bytes: i64,
    ) -> Vec<(Namespace, i64)> {
        let total_weight: i64 = namespaces.iter().map(|ns| ns.budget_weight()).sum();
        if total_weight == 0 {
            return Vec::new();
        }
        namespaces
            .iter()
            .map(|ns| (*ns, budget_bytes * ns.budget_weight() / total_weight))
            .collect()
    }
}

impl NamespaceScope {
    /// The string this scope contributes to signature payloads: `"all"` for
    /// the all-namespace scope, the per-namespace string otherwise.
    pub fn verification_string(self) -> String {
        match self {
            NamespaceScope::All => "all".to_string(),
            NamespaceScope::One(ns) => ns.verification_string(),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value())
    }
}
