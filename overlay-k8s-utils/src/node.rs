use k8s_openapi::api::core::v1::Node;

const INTERNAL_IP: &str = "InternalIP";

/// First address of type InternalIP in the node status.
pub fn node_internal_ip(node: &Node) -> Option<&str> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|addr| addr.type_ == INTERNAL_IP)
        .map(|addr| addr.address.as_str())
}
