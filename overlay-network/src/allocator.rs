use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{debug, error};

use crate::topology::cidrs_overlap;
use crate::{Error, Result, Topology};

/// Caps a single range at 2^24 node subnets, a 2 MiB bitmap.
const MAX_SUBNET_BITS: u32 = 24;

/// Bitmap over the node subnets of one cluster network range, indexed by
/// subnet offset from the start of the range.
#[derive(Debug)]
struct RangeAllocator {
    network: Ipv4Network,
    host_bits: u32,
    capacity: u32,
    allocated: u32,
    bitmap: Vec<u64>,
}

impl RangeAllocator {
    fn new(network: Ipv4Network, host_bits: u32) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidRange {
            network,
            host_bits,
            reason: reason.to_string(),
        };

        if network.ip() != network.network() {
            return Err(invalid("range is not network aligned"));
        }
        let free_bits = 32 - u32::from(network.prefix());
        if host_bits == 0 {
            return Err(invalid("node subnets need at least one host bit"));
        }
        if host_bits >= free_bits {
            return Err(invalid("no bits left to number node subnets"));
        }
        let subnet_bits = free_bits - host_bits;
        if subnet_bits > MAX_SUBNET_BITS {
            return Err(invalid("range holds too many node subnets"));
        }

        let capacity = 1u32 << subnet_bits;
        Ok(Self {
            network,
            host_bits,
            capacity,
            allocated: 0,
            bitmap: vec![0; capacity.div_ceil(u64::BITS) as usize],
        })
    }

    fn base(&self) -> u32 {
        u32::from(self.network.network())
    }

    fn subnet_prefix(&self) -> u8 {
        (32 - self.host_bits) as u8
    }

    fn offset_of(&self, subnet: Ipv4Network) -> Option<u32> {
        if subnet.prefix() != self.subnet_prefix() || !self.network.contains(subnet.ip()) {
            return None;
        }
        let relative = u32::from(subnet.ip()) - self.base();
        if relative & ((1u32 << self.host_bits) - 1) != 0 {
            return None;
        }
        Some(relative >> self.host_bits)
    }

    fn subnet_at(&self, offset: u32) -> Result<Ipv4Network> {
        let addr = Ipv4Addr::from(self.base() + (offset << self.host_bits));
        Ipv4Network::new(addr, self.subnet_prefix()).map_err(|_| Error::InvalidRange {
            network: self.network,
            host_bits: self.host_bits,
            reason: format!("offset {offset} is outside the range"),
        })
    }

    fn is_set(&self, offset: u32) -> bool {
        self.bitmap[(offset / u64::BITS) as usize] & (1 << (offset % u64::BITS)) != 0
    }

    fn set(&mut self, offset: u32) {
        self.bitmap[(offset / u64::BITS) as usize] |= 1 << (offset % u64::BITS);
        self.allocated += 1;
    }

    fn clear(&mut self, offset: u32) {
        self.bitmap[(offset / u64::BITS) as usize] &= !(1 << (offset % u64::BITS));
        self.allocated -= 1;
    }

    fn first_free(&self) -> Option<u32> {
        if self.allocated == self.capacity {
            return None;
        }
        self.bitmap
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)
            .map(|(i, word)| i as u32 * u64::BITS + word.trailing_ones())
            .filter(|offset| *offset < self.capacity)
    }
}

/// Hands out disjoint node subnets from the configured cluster network ranges.
///
/// The allocator does no I/O and no locking: it is owned by exactly one
/// reconciliation actor, which is the only caller of the mutating methods.
#[derive(Debug, Default)]
pub struct SubnetAllocator {
    ranges: Vec<RangeAllocator>,
}

impl SubnetAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_topology(topology: &Topology) -> Result<Self> {
        let mut allocator = Self::new();
        for cn in &topology.cluster_networks {
            allocator.add_network_range(cn.cidr, cn.host_subnet_bits)?;
        }
        Ok(allocator)
    }

    pub fn add_network_range(&mut self, network: Ipv4Network, host_subnet_bits: u32) -> Result<()> {
        if let Some(existing) = self
            .ranges
            .iter()
            .find(|range| cidrs_overlap(range.network, network))
        {
            return Err(Error::OverlappingRange {
                network,
                existing: existing.network,
            });
        }
        self.ranges
            .push(RangeAllocator::new(network, host_subnet_bits)?);
        Ok(())
    }

    fn locate(&self, subnet: Ipv4Network) -> Result<(usize, u32)> {
        self.ranges
            .iter()
            .enumerate()
            .find_map(|(i, range)| range.offset_of(subnet).map(|offset| (i, offset)))
            .ok_or(Error::SubnetNotInRange(subnet))
    }

    /// Records a subnet issued before this allocator existed.
    pub fn mark_allocated_network(&mut self, subnet: Ipv4Network) -> Result<()> {
        let (i, offset) = self.locate(subnet)?;
        let range = &mut self.ranges[i];
        if range.is_set(offset) {
            return Err(Error::AlreadyAllocated(subnet));
        }
        range.set(offset);
        Ok(())
    }

    /// First fit: ranges in configuration order, lowest offset first.
    pub fn allocate_network(&mut self) -> Result<Ipv4Network> {
        for range in self.ranges.iter_mut() {
            if let Some(offset) = range.first_free() {
                let subnet = range.subnet_at(offset)?;
                range.set(offset);
                return Ok(subnet);
            }
        }
        Err(Error::Exhausted)
    }

    pub fn release_network(&mut self, subnet: Ipv4Network) -> Result<()> {
        let (i, offset) = self.locate(subnet)?;
        let range = &mut self.ranges[i];
        if !range.is_set(offset) {
            return Err(Error::NotAllocated(subnet));
        }
        range.clear(offset);
        Ok(())
    }

    pub fn is_allocated(&self, subnet: Ipv4Network) -> bool {
        self.locate(subnet)
            .is_ok_and(|(i, offset)| self.ranges[i].is_set(offset))
    }

    pub fn capacity(&self) -> u64 {
        self.ranges.iter().map(|range| u64::from(range.capacity)).sum()
    }

    pub fn allocated(&self) -> u64 {
        self.ranges.iter().map(|range| u64::from(range.allocated)).sum()
    }

    /// Allocates a subnet that goes back to the pool when the lease is dropped
    /// without [`Lease::commit`].
    pub fn lease(&mut self) -> Result<Lease<'_>> {
        let network = self.allocate_network()?;
        Ok(Lease {
            allocator: self,
            network,
            committed: false,
        })
    }
}

#[must_use = "an uncommitted lease releases its subnet when dropped"]
pub struct Lease<'a> {
    allocator: &'a mut SubnetAllocator,
    network: Ipv4Network,
    committed: bool,
}

impl Lease<'_> {
    pub fn network(&self) -> Ipv4Network {
        self.network
    }

    pub fn commit(mut self) -> Ipv4Network {
        self.committed = true;
        self.network
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match self.allocator.release_network(self.network) {
            Ok(()) => debug!("released uncommitted subnet {}", self.network),
            Err(e) => error!(%e, "failed to release uncommitted subnet {}", self.network),
        }
    }
}
