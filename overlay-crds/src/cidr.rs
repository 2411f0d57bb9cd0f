use std::str::FromStr;

use ipnetwork::{IpNetwork, Ipv4Network};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CidrError {
    #[error("invalid CIDR address {0:?}")]
    Malformed(String),

    #[error("CIDR {0:?} is not IPv4")]
    NotIpv4(String),

    #[error("CIDR {value:?} is not network aligned, network is {network}")]
    Unaligned { value: String, network: Ipv4Network },
}

/// Parses `value` as a network-aligned IPv4 CIDR. A CIDR with host bits set is
/// reported as [`CidrError::Unaligned`] carrying the containing network so
/// callers can decide whether to accept the correction.
pub fn parse_ipv4_cidr(value: &str) -> Result<Ipv4Network, CidrError> {
    // ipnetwork accepts a bare address as a /32, a CIDR must carry its prefix
    if !value.contains('/') {
        return Err(CidrError::Malformed(value.to_string()));
    }
    let parsed =
        IpNetwork::from_str(value).map_err(|_| CidrError::Malformed(value.to_string()))?;
    let IpNetwork::V4(net) = parsed else {
        return Err(CidrError::NotIpv4(value.to_string()));
    };
    let network = Ipv4Network::new(net.network(), net.prefix())
        .map_err(|_| CidrError::Malformed(value.to_string()))?;
    if network.ip() != net.ip() {
        return Err(CidrError::Unaligned {
            value: value.to_string(),
            network,
        });
    }
    Ok(network)
}
