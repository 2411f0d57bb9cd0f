mod api;
mod controller;
mod error;
#[cfg(test)]
mod fake;
mod node;
mod runtime;
mod subnet;
mod watch;

use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use overlay_crds::v1::host_subnet::HostSubnet;

pub use error::Error;
pub use runtime::{SubnetMasterConfig, start_subnet_master};
pub use watch::{Notification, WatchAction, WatchTracker};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Authoritative HostSubnet store. `get` and `delete` report a missing record
/// as [`Error::NotFound`], writes losing an optimistic-concurrency race as
/// [`Error::Conflict`].
pub(crate) trait SubnetStore {
    async fn list(&self) -> Result<Vec<HostSubnet>>;
    async fn get(&self, name: &str) -> Result<HostSubnet>;
    async fn create(&self, subnet: &HostSubnet) -> Result<HostSubnet>;
    async fn replace(&self, subnet: &HostSubnet) -> Result<HostSubnet>;
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Node lookups: a local cache first, the API server when the cache misses.
pub(crate) trait NodeLookup {
    fn cached(&self, name: &str) -> Option<Arc<Node>>;
    async fn fetch(&self, name: &str) -> Result<Node>;
}
