use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use ipnetwork::Ipv4Network;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::ResourceExt;
use overlay_crds::v1::host_subnet::HostSubnet;
use thiserror::Error;

use crate::Topology;
use crate::topology::cidrs_overlap;

/// Findings past this count are summarized by a single [`Conflict::Truncated`].
pub const MAX_REPORTED_CONFLICTS: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    #[error("cluster IP: {} conflicts with host network: {host}", .cluster.network())]
    HostClusterNetwork {
        host: Ipv4Network,
        cluster: Ipv4Network,
    },

    #[error("service IP: {service} conflicts with host network: {host}")]
    HostServiceNetwork {
        host: Ipv4Network,
        service: Ipv4Network,
    },

    #[error("failed to parse network address: {0}")]
    UnparseableSubnet(String),

    #[error("existing node subnet: {0} is not part of any cluster network CIDR")]
    SubnetOutsideClusterNetwork(String),

    #[error("existing pod {namespace}:{name} with IP {ip} is not part of cluster network")]
    PodOutsideClusterNetwork {
        namespace: String,
        name: String,
        ip: String,
    },

    #[error(
        "existing service {namespace}:{name} with IP {ip} is not part of service network {network}"
    )]
    ServiceOutsideServiceNetwork {
        namespace: String,
        name: String,
        ip: String,
        network: Ipv4Network,
    },

    #[error("too many errors... truncating")]
    Truncated,
}

/// Every conflict found by a check, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateError(pub Vec<Conflict>);

impl AggregateError {
    pub fn conflicts(&self) -> &[Conflict] {
        &self.0
    }

    fn into_result(conflicts: Vec<Conflict>) -> Result<(), Self> {
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(Self(conflicts))
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.0.as_slice() {
            return write!(f, "{only}");
        }
        write!(f, "[")?;
        for (i, conflict) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{conflict}")?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for AggregateError {}

impl Topology {
    /// Checks the addresses configured on this host against the overlay ranges.
    pub fn check_host_networks(&self, host_networks: &[Ipv4Network]) -> Result<(), AggregateError> {
        let mut conflicts = Vec::new();
        for host in host_networks {
            for cn in &self.cluster_networks {
                if cidrs_overlap(*host, cn.cidr) {
                    conflicts.push(Conflict::HostClusterNetwork {
                        host: *host,
                        cluster: cn.cidr,
                    });
                }
            }
            if let Some(service) = self.service_network
                && cidrs_overlap(*host, service)
            {
                conflicts.push(Conflict::HostServiceNetwork {
                    host: *host,
                    service,
                });
            }
        }
        AggregateError::into_result(conflicts)
    }

    /// Checks that existing subnets, pods and services still fit the configured
    /// ranges. Reports at most [`MAX_REPORTED_CONFLICTS`] findings.
    pub fn check_cluster_objects(
        &self,
        subnets: &[HostSubnet],
        pods: &[Pod],
        services: &[Service],
    ) -> Result<(), AggregateError> {
        let mut conflicts: Vec<Conflict> = subnets
            .iter()
            .filter_map(|subnet| self.check_subnet(subnet).err())
            .take(MAX_REPORTED_CONFLICTS)
            .collect();

        let remaining = MAX_REPORTED_CONFLICTS - conflicts.len();
        conflicts.extend(
            pods.iter()
                .filter_map(|pod| self.check_pod(pod))
                .take(remaining),
        );

        if self.service_network.is_some() {
            let remaining = MAX_REPORTED_CONFLICTS - conflicts.len();
            conflicts.extend(
                services
                    .iter()
                    .filter_map(|svc| self.check_service(svc))
                    .take(remaining),
            );
        }

        if conflicts.len() >= MAX_REPORTED_CONFLICTS {
            conflicts.push(Conflict::Truncated);
        }
        AggregateError::into_result(conflicts)
    }

    /// Checks that a subnet record lies within a cluster network. Structural
    /// validation of the rest of the record is [`HostSubnet::validate`].
    pub fn check_subnet(&self, subnet: &HostSubnet) -> Result<(), Conflict> {
        let raw = &subnet.spec.subnet;
        let ip = raw
            .split_once('/')
            .and_then(|(addr, prefix)| {
                prefix.parse::<u8>().ok()?;
                IpAddr::from_str(addr).ok()
            })
            .ok_or_else(|| Conflict::UnparseableSubnet(raw.clone()))?;
        if !self.pod_network_contains(ip) {
            return Err(Conflict::SubnetOutsideClusterNetwork(raw.clone()));
        }
        Ok(())
    }

    fn check_pod(&self, pod: &Pod) -> Option<Conflict> {
        let host_network = pod
            .spec
            .as_ref()
            .and_then(|spec| spec.host_network)
            .unwrap_or(false);
        if host_network {
            return None;
        }
        let raw = pod.status.as_ref()?.pod_ip.as_deref()?;
        let ip = IpAddr::from_str(raw).ok()?;
        if self.pod_network_contains(ip) {
            return None;
        }
        Some(Conflict::PodOutsideClusterNetwork {
            namespace: pod.namespace().unwrap_or_default(),
            name: pod.name_any(),
            ip: raw.to_string(),
        })
    }

    fn check_service(&self, svc: &Service) -> Option<Conflict> {
        let network = self.service_network?;
        let raw = svc.spec.as_ref()?.cluster_ip.as_deref()?;
        let ip = Ipv4Addr::from_str(raw).ok()?;
        if network.contains(ip) {
            return None;
        }
        Some(Conflict::ServiceOutsideServiceNetwork {
            namespace: svc.namespace().unwrap_or_default(),
            name: svc.name_any(),
            ip: raw.to_string(),
            network,
        })
    }
}
