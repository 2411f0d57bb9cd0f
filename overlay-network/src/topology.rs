use std::net::IpAddr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;
use overlay_crds::cidr::{CidrError, parse_ipv4_cidr};
use overlay_crds::v1::cluster_network::ClusterNetworkSpec;
use tracing::warn;

use crate::{Error, Result};

pub const DEFAULT_VXLAN_PORT: u32 = 4789;
pub const DEFAULT_MTU: u32 = 1450;

/// A pod network range and the number of host bits in each node subnet cut from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterNetworkRange {
    pub cidr: Ipv4Network,
    pub host_subnet_bits: u32,
}

/// Parsed cluster-wide network configuration. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub plugin_name: String,
    pub cluster_networks: Vec<ClusterNetworkRange>,
    pub service_network: Option<Ipv4Network>,
    pub vxlan_port: u32,
    pub mtu: u32,
}

impl Topology {
    pub fn parse(spec: &ClusterNetworkSpec) -> Result<Self> {
        if spec.cluster_networks.is_empty() {
            return Err(Error::NoClusterNetworks);
        }

        let mut cluster_networks = Vec::with_capacity(spec.cluster_networks.len());
        for entry in &spec.cluster_networks {
            let cidr = match parse_ipv4_cidr(&entry.cidr) {
                Ok(cidr) => cidr,
                Err(CidrError::Unaligned { network, .. }) => {
                    warn!(
                        "Configured clusterNetworks value {:?} is invalid; treating it as {:?}",
                        entry.cidr,
                        network.to_string()
                    );
                    network
                }
                Err(e) => return Err(cidr_error("cluster network", e)),
            };
            cluster_networks.push(ClusterNetworkRange {
                cidr,
                host_subnet_bits: entry.host_subnet_bits,
            });
        }

        let service_network = if spec.service_network.is_empty() {
            None
        } else {
            Some(
                parse_ipv4_cidr(&spec.service_network)
                    .map_err(|e| cidr_error("service network", e))?,
            )
        };

        Ok(Self {
            plugin_name: spec.plugin_name.clone(),
            cluster_networks,
            service_network,
            vxlan_port: spec.vxlan_port.unwrap_or(DEFAULT_VXLAN_PORT),
            mtu: spec.mtu.unwrap_or(DEFAULT_MTU),
        })
    }

    pub fn cluster_network_containing(&self, ip: IpAddr) -> Option<&ClusterNetworkRange> {
        let IpAddr::V4(ip) = ip else {
            return None;
        };
        self.cluster_networks.iter().find(|cn| cn.cidr.contains(ip))
    }

    pub fn pod_network_contains(&self, ip: IpAddr) -> bool {
        self.cluster_network_containing(ip).is_some()
    }

    /// False when no service network is configured.
    pub fn service_network_contains(&self, ip: IpAddr) -> bool {
        match (self.service_network, ip) {
            (Some(service), IpAddr::V4(ip)) => service.contains(ip),
            _ => false,
        }
    }

    /// A node's routable address must never alias an address inside the
    /// overlay, otherwise traffic to it would loop back into the tunnel.
    pub fn validate_node_ip(&self, node_ip: &str) -> Result<()> {
        // HostSubnet records only carry IPv4 host addresses.
        let ip = match IpAddr::from_str(node_ip) {
            Ok(ip @ IpAddr::V4(v4)) if !v4.is_loopback() => ip,
            _ => return Err(Error::InvalidNodeIp(node_ip.to_string())),
        };

        if let Some(cn) = self.cluster_network_containing(ip) {
            return Err(Error::NodeIpConflict {
                ip: node_ip.to_string(),
                kind: "cluster",
                network: cn.cidr,
            });
        }
        if let Some(service) = self.service_network
            && self.service_network_contains(ip)
        {
            return Err(Error::NodeIpConflict {
                ip: node_ip.to_string(),
                kind: "service",
                network: service,
            });
        }
        Ok(())
    }
}

pub(crate) fn cidrs_overlap(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

fn cidr_error(field: &'static str, err: CidrError) -> Error {
    match err {
        CidrError::NotIpv4(value) => Error::NotIpv4 { field, value },
        CidrError::Malformed(value) | CidrError::Unaligned { value, .. } => {
            Error::Parse { field, value }
        }
    }
}
