//! Core data types shared by every stage of the pipeline.
//!
//! Observations and the payloads they carry are immutable once built; they are
//! moved from the watch loop to the aggregator and never mutated in between.

use std::fmt;

use bytes::Bytes;

/// Opaque registry index. `0` means "no prior knowledge".
pub type Cursor = u64;

/// Cursor value that asks for an immediate read instead of a blocking wait.
pub const FRESH_CURSOR: Cursor = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Service,
    Key,
    KeyPrefix,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Service => "service",
            ResourceKind::Key => "key",
            ResourceKind::KeyPrefix => "prefix",
        }
    }
}

/// A single watchable thing in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Service(String),
    Key(String),
    KeyPrefix(String),
}

impl Resource {
    pub fn service(name: impl Into<String>) -> Self {
        Resource::Service(name.into())
    }

    pub fn key(key: impl Into<String>) -> Self {
        Resource::Key(key.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Resource::KeyPrefix(prefix.into())
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Service(_) => ResourceKind::Service,
            Resource::Key(_) => ResourceKind::Key,
            Resource::KeyPrefix(_) => ResourceKind::KeyPrefix,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Resource::Service(name) | Resource::Key(name) | Resource::KeyPrefix(name) => name,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().as_str(), self.name())
    }
}

/// HTTP-style status returned with every fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);

    pub fn class(&self) -> StatusClass {
        match self.0 {
            200..=299 => StatusClass::Found,
            404 => StatusClass::NotFound,
            500..=599 => StatusClass::ServerError,
            _ => StatusClass::Other,
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.class() == StatusClass::ServerError
    }

    /// Only found and not-found observations may change aggregate state.
    pub fn is_accepted(&self) -> bool {
        matches!(self.class(), StatusClass::Found | StatusClass::NotFound)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Found,
    NotFound,
    ServerError,
    Other,
}

impl StatusClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusClass::Found => "found",
            StatusClass::NotFound => "not_found",
            StatusClass::ServerError => "server_error",
            StatusClass::Other => "other",
        }
    }
}

/// One instance of a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceEntry {
    pub node: String,
    pub address: String,
    pub service_id: String,
    pub service_name: String,
    pub service_address: String,
    pub service_port: u16,
    pub tags: Vec<String>,
    pub modify_index: u64,
}

/// One key/value record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValueNode {
    pub key: String,
    pub value: Bytes,
    pub flags: u64,
    pub create_index: u64,
    pub modify_index: u64,
    pub session: Option<String>,
}

impl ValueNode {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        ValueNode {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    /// Value as UTF-8, if it is valid UTF-8
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Service(Vec<ServiceEntry>),
    Key(Option<ValueNode>),
    KeyPrefix(Option<Vec<ValueNode>>),
}

impl Payload {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Payload::Service(_) => ResourceKind::Service,
            Payload::Key(_) => ResourceKind::Key,
            Payload::KeyPrefix(_) => ResourceKind::KeyPrefix,
        }
    }
}

/// Outcome of one fetch cycle for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub resource: Resource,
    pub status: StatusCode,
    pub payload: Payload,
    pub cursor: Cursor,
}

impl Observation {
    /// Payload kind disagrees with the resource it claims to describe
    pub fn is_malformed(&self) -> bool {
        self.resource.kind() != self.payload.kind()
    }
}
