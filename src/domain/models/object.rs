//! References to observed objects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The class of an observed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// A containerized workload on a container host.
    Container,
    /// A JVM service exposing a managed-bean metrics interface.
    Jmx,
    /// A generic web service reachable by TCP and HTTP(S).
    Service,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Jmx => "jmx",
            Self::Service => "service",
        }
    }

    /// Human-readable noun used in alarm messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Jmx => "JMX service",
            Self::Service => "service",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "container" => Some(Self::Container),
            "jmx" => Some(Self::Jmx),
            "service" => Some(Self::Service),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of an observed object: its kind plus its configured name.
///
/// Used as the key for restart notifications, alarms and storage lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Container, name)
    }

    pub fn jmx(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Jmx, name)
    }

    pub fn service(name: impl Into<String>) -> Self {
        Self::new(ObjectKind::Service, name)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind.describe(), self.name)
    }
}
