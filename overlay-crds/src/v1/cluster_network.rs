use kube::{CustomResource, KubeSchema, ResourceExt};
use serde::{Deserialize, Serialize};

pub const NAME_GROUP_CLUSTERNETWORK: &str = "clusternetworks.network.overlay.dev";

/// Name of the ClusterNetwork object read at startup unless configured otherwise.
pub const DEFAULT_CLUSTER_NETWORK: &str = "default";

#[derive(
    CustomResource, KubeSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug,
)]
#[kube(
    group = "network.overlay.dev",
    version = "v1",
    kind = "ClusterNetwork",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkSpec {
    /// Pod network ranges, in allocation order
    pub cluster_networks: Vec<ClusterNetworkEntry>,
    /// Service network CIDR
    #[serde(default)]
    pub service_network: String,
    #[serde(default)]
    pub plugin_name: String,
    /// VXLAN port, defaults to 4789
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vxlan_port: Option<u32>,
    /// Overlay MTU, defaults to 1450
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

#[derive(KubeSchema, Serialize, Deserialize, Default, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetworkEntry {
    pub cidr: String,
    /// Host bits of each node subnet carved out of `cidr`
    pub host_subnet_bits: u32,
}

impl ClusterNetwork {
    pub fn summary(&self) -> String {
        let networks: Vec<String> = self
            .spec
            .cluster_networks
            .iter()
            .map(|entry| format!("{}/{}", entry.cidr, entry.host_subnet_bits))
            .collect();
        format!(
            "{} (networks: {:?}, serviceNetwork: {:?}, pluginName: {:?})",
            self.name_any(),
            networks,
            self.spec.service_network,
            self.spec.plugin_name
        )
    }
}
