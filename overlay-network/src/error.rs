use ipnetwork::Ipv4Network;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to parse {field} CIDR {value:?}")]
    Parse { field: &'static str, value: String },

    #[error("{field} CIDR {value:?} is not IPv4")]
    NotIpv4 { field: &'static str, value: String },

    #[error("no cluster networks configured")]
    NoClusterNetworks,

    #[error("invalid node IP {0:?}")]
    InvalidNodeIp(String),

    #[error("node IP {ip} conflicts with {kind} network {network}")]
    NodeIpConflict {
        ip: String,
        kind: &'static str,
        network: Ipv4Network,
    },

    #[error("invalid network range {network} with {host_bits} host bits: {reason}")]
    InvalidRange {
        network: Ipv4Network,
        host_bits: u32,
        reason: String,
    },

    #[error("network range {network} overlaps configured range {existing}")]
    OverlappingRange {
        network: Ipv4Network,
        existing: Ipv4Network,
    },

    #[error("no free subnet left in any cluster network")]
    Exhausted,

    #[error("subnet {0} does not fit any cluster network range")]
    SubnetNotInRange(Ipv4Network),

    #[error("subnet {0} is already allocated")]
    AlreadyAllocated(Ipv4Network),

    #[error("subnet {0} is not allocated")]
    NotAllocated(Ipv4Network),

    #[error("failed to list host interfaces: {0}")]
    HostInterfaces(#[from] nix::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
