use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use nix::ifaddrs::getifaddrs;
use tracing::debug;

use crate::Result;

/// An IPv4 address configured on a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    pub interface: String,
    pub ip: Ipv4Addr,
    /// Network the address belongs to, host bits cleared.
    pub network: Ipv4Network,
}

/// Lists the non-loopback IPv4 addresses on this host, ignoring the
/// interfaces named in `skip`.
pub fn list_host_addresses(skip: &[String]) -> Result<Vec<HostAddress>> {
    let mut addresses = Vec::new();
    for ifaddr in getifaddrs()? {
        if skip.iter().any(|name| *name == ifaddr.interface_name) {
            continue;
        }
        let Some(ip) = ifaddr
            .address
            .as_ref()
            .and_then(|addr| addr.as_sockaddr_in())
            .map(|addr| addr.ip())
        else {
            continue;
        };
        if ip.is_loopback() {
            continue;
        }
        let netmask = ifaddr
            .netmask
            .as_ref()
            .and_then(|mask| mask.as_sockaddr_in())
            .map(|mask| mask.ip())
            .unwrap_or(Ipv4Addr::BROADCAST);
        let Some(network) = host_network(ip, netmask) else {
            debug!(
                "Skipping {ip} on {} with non-contiguous netmask {netmask}",
                ifaddr.interface_name
            );
            continue;
        };
        addresses.push(HostAddress {
            interface: ifaddr.interface_name,
            ip,
            network,
        });
    }
    Ok(addresses)
}

fn host_network(ip: Ipv4Addr, netmask: Ipv4Addr) -> Option<Ipv4Network> {
    let with_host = Ipv4Network::with_netmask(ip, netmask).ok()?;
    Ipv4Network::new(with_host.network(), with_host.prefix()).ok()
}
