//! Registry client abstraction
//!
//! The watch engine only needs three blocking reads. Each one takes the last
//! known cursor and returns the payload together with the registry's new
//! cursor and an HTTP-style status. A returned `Err` means nothing usable came
//! back (transport failure); any status, including 5xx, is a returned `Ok`.
mod http_client;
mod memory;
pub use http_client::*;
pub use memory::*;


#[cfg(test)]
use mockall::automock;

use crate::errors::TransportError;
use crate::model::Cursor;
use crate::model::ServiceEntry;
use crate::model::StatusCode;
use crate::model::ValueNode;

pub type FetchResult<T> = std::result::Result<FetchResponse<T>, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse<T> {
    pub payload: T,
    /// Registry index at the time the response was produced
    pub cursor: Cursor,
    pub status: StatusCode,
}

impl<T> FetchResponse<T> {
    pub fn new(payload: T, cursor: Cursor, status: StatusCode) -> Self {
        Self {
            payload,
            cursor,
            status,
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync + 'static {
    /// Instances registered under a service name, in registry order.
    ///
    /// A `cursor` of 0 returns immediately; otherwise the call blocks until
    /// the service changes past `cursor` or the long-poll wait expires.
    async fn fetch_service(&self, name: &str, cursor: Cursor) -> FetchResult<Vec<ServiceEntry>>;

    /// A single key. `None` when the key does not exist.
    async fn fetch_key(&self, key: &str, cursor: Cursor) -> FetchResult<Option<ValueNode>>;

    /// Every key under `prefix`. Empty when nothing matches.
    async fn fetch_key_prefix(&self, prefix: &str, cursor: Cursor) -> FetchResult<Vec<ValueNode>>;
}
