pub mod allocator;
mod error;
pub mod host;
pub mod topology;
pub mod validator;

pub use allocator::{Lease, SubnetAllocator};
pub use error::{Error, Result};
pub use host::{HostAddress, list_host_addresses};
pub use topology::{ClusterNetworkRange, DEFAULT_MTU, DEFAULT_VXLAN_PORT, Topology};
pub use validator::{AggregateError, Conflict, MAX_REPORTED_CONFLICTS};
