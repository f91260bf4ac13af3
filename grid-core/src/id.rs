use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GridError;

/// The namespace an identifier belongs to.
///
/// Principals and roles are always referred to by a prefixed identifier
/// (`user:<id>`, `sa:<id>`, `group:<name>`, `role:<id>`) so that a bare
/// string can never be mistaken for the wrong kind of subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    User,
    Group,
    ServiceAccount,
    Role,
}

impl IdKind {
    /// The canonical prefix, without the trailing colon.
    pub fn prefix(&self) -> &'static str {
        match self {
            IdKind::User => "user",
            IdKind::Group => "group",
            IdKind::ServiceAccount => "sa",
            IdKind::Role => "role",
        }
    }

    /// Resolve a prefix back to its kind.
    pub fn from_prefix(prefix: &str) -> Option<IdKind> {
        match prefix {
            "user" => Some(IdKind::User),
            "group" => Some(IdKind::Group),
            "sa" => Some(IdKind::ServiceAccount),
            "role" => Some(IdKind::Role),
            _ => None,
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A typed, prefixed identifier: a kind plus the raw id it namespaces.
///
/// Renders as `user:0192f0c1-...` / `group:platform-team` and parses back,
/// rejecting unknown prefixes and empty remainders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedId {
    kind: IdKind,
    raw: String,
}

impl QualifiedId {
    pub fn new(kind: IdKind, raw: impl Into<String>) -> Self {
        Self {
            kind,
            raw: raw.into(),
        }
    }

    pub fn user(id: Uuid) -> Self {
        Self::new(IdKind::User, id.to_string())
    }

    pub fn service_account(id: Uuid) -> Self {
        Self::new(IdKind::ServiceAccount, id.to_string())
    }

    pub fn role(id: Uuid) -> Self {
        Self::new(IdKind::Role, id.to_string())
    }

    pub fn group(name: impl Into<String>) -> Self {
        Self::new(IdKind::Group, name)
    }

    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// The unprefixed part of the identifier.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for QualifiedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.raw)
    }
}

impl FromStr for QualifiedId {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rest) = s.split_once(':').ok_or_else(|| {
            GridError::invalid_argument(format!("identifier '{s}' is missing a prefix"))
        })?;
        let kind = IdKind::from_prefix(prefix).ok_or_else(|| {
            GridError::invalid_argument(format!("unknown identifier prefix '{prefix}'"))
        })?;
        if rest.is_empty() {
            return Err(GridError::invalid_argument(format!(
                "identifier '{s}' has an empty id after the prefix"
            )));
        }
        Ok(QualifiedId::new(kind, rest))
    }
}

impl Serialize for QualifiedId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QualifiedId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
