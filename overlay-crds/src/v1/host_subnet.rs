use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::{IpNetwork, Ipv4Network};
use kube::{CustomResource, KubeSchema, ResourceExt};
use serde::{Deserialize, Serialize};

use crate::cidr::parse_ipv4_cidr;
use crate::{Error, Result};

pub const NAME_GROUP_HOSTSUBNET: &str = "hostsubnets.network.overlay.dev";

/// UID of the Node object a HostSubnet was created for.
pub const NODE_UID_ANNOTATION: &str = "network.overlay.dev/node-uid";
/// Set by an operator to request a subnet for a host that is not a Node.
pub const ASSIGN_SUBNET_ANNOTATION: &str = "network.overlay.dev/assign-subnet";
pub const FIXED_VNID_ANNOTATION: &str = "network.overlay.dev/fixed-vnid-host";

pub const MAX_VNID: u32 = (1 << 24) - 1;

#[derive(
    CustomResource, KubeSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug,
)]
#[kube(
    group = "network.overlay.dev",
    version = "v1",
    kind = "HostSubnet",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct HostSubnetSpec {
    /// Name of the host, always equal to the object name
    pub host: String,
    /// Routable address of the host
    #[serde(rename = "hostIP")]
    pub host_ip: String,
    /// Pod subnet assigned to the host
    #[serde(default)]
    pub subnet: String,
    #[serde(default, rename = "egressIPs", skip_serializing_if = "Vec::is_empty")]
    pub egress_ips: Vec<String>,
    #[serde(
        default,
        rename = "egressCIDRs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub egress_cidrs: Vec<String>,
}

/// Typed view of the HostSubnet annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetMeta {
    pub owner_uid: Option<String>,
    pub assign_subnet: bool,
    pub fixed_vnid: Option<u32>,
}

impl SubnetMeta {
    pub fn parse(annotations: &BTreeMap<String, String>) -> Result<Self> {
        let owner_uid = annotations
            .get(NODE_UID_ANNOTATION)
            .filter(|uid| !uid.is_empty())
            .cloned();
        let fixed_vnid = annotations
            .get(FIXED_VNID_ANNOTATION)
            .map(|vnid| parse_vnid(vnid))
            .transpose()?;
        Ok(Self {
            owner_uid,
            assign_subnet: annotations.contains_key(ASSIGN_SUBNET_ANNOTATION),
            fixed_vnid,
        })
    }

    pub fn to_annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        if let Some(uid) = &self.owner_uid {
            annotations.insert(NODE_UID_ANNOTATION.to_string(), uid.clone());
        }
        if self.assign_subnet {
            annotations.insert(ASSIGN_SUBNET_ANNOTATION.to_string(), "true".to_string());
        }
        if let Some(vnid) = self.fixed_vnid {
            annotations.insert(FIXED_VNID_ANNOTATION.to_string(), vnid.to_string());
        }
        annotations
    }
}

pub fn parse_vnid(value: &str) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(vnid) if vnid <= MAX_VNID => Ok(vnid),
        _ => Err(Error::InvalidAnnotation {
            key: FIXED_VNID_ANNOTATION.to_string(),
            value: value.to_string(),
        }),
    }
}

impl HostSubnet {
    pub fn for_host(name: &str, host_ip: &str, subnet: Ipv4Network, meta: &SubnetMeta) -> Self {
        let mut host_subnet = HostSubnet::new(
            name,
            HostSubnetSpec {
                host: name.to_string(),
                host_ip: host_ip.to_string(),
                subnet: subnet.to_string(),
                ..Default::default()
            },
        );
        let annotations = meta.to_annotations();
        if !annotations.is_empty() {
            host_subnet.metadata.annotations = Some(annotations);
        }
        host_subnet
    }

    pub fn owner_uid(&self) -> Option<&str> {
        self.annotations()
            .get(NODE_UID_ANNOTATION)
            .map(String::as_str)
            .filter(|uid| !uid.is_empty())
    }

    pub fn set_owner_uid(&mut self, uid: &str) {
        self.annotations_mut()
            .insert(NODE_UID_ANNOTATION.to_string(), uid.to_string());
    }

    pub fn is_assign_request(&self) -> bool {
        self.annotations().contains_key(ASSIGN_SUBNET_ANNOTATION)
    }

    pub fn fixed_vnid(&self) -> Result<Option<u32>> {
        self.annotations()
            .get(FIXED_VNID_ANNOTATION)
            .map(|vnid| parse_vnid(vnid))
            .transpose()
    }

    pub fn meta(&self) -> Result<SubnetMeta> {
        SubnetMeta::parse(self.annotations())
    }

    /// Structural validation. Returns the parsed subnet, which is only absent
    /// on an assign-subnet request that leaves the subnet to the allocator.
    pub fn validate(&self) -> Result<Option<Ipv4Network>> {
        let name = self.metadata.name.as_deref().unwrap_or_default();
        let invalid = |reason: String| Error::InvalidHostSubnet {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("metadata.name must be set".into()));
        }
        if self.spec.host != name {
            return Err(invalid(format!(
                "host {:?} must match metadata.name",
                self.spec.host
            )));
        }

        let subnet = if self.spec.subnet.is_empty() {
            if !self.is_assign_request() {
                return Err(invalid("subnet cannot be empty".into()));
            }
            None
        } else {
            Some(parse_ipv4_cidr(&self.spec.subnet).map_err(|e| invalid(e.to_string()))?)
        };

        if Ipv4Addr::from_str(&self.spec.host_ip).is_err() {
            return Err(invalid(format!("invalid hostIP {:?}", self.spec.host_ip)));
        }
        for ip in &self.spec.egress_ips {
            if Ipv4Addr::from_str(ip).is_err() {
                return Err(invalid(format!("invalid egress IP {ip:?}")));
            }
        }
        for cidr in &self.spec.egress_cidrs {
            if !cidr.contains('/') || IpNetwork::from_str(cidr).is_err() {
                return Err(invalid(format!("invalid egress CIDR {cidr:?}")));
            }
        }
        // An assign request drops a malformed VNID instead of being rejected.
        if !self.is_assign_request() {
            self.fixed_vnid()?;
        }

        Ok(subnet)
    }

    pub fn summary(&self) -> String {
        format!(
            "{} (host: {:?}, ip: {:?}, subnet: {:?})",
            self.name_any(),
            self.spec.host,
            self.spec.host_ip,
            self.spec.subnet
        )
    }
}
