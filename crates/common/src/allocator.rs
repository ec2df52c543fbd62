//! Overlay address allocation
//!
//! Addresses are drawn at random inside the mesh CIDR, nothing is reserved in
//! the store. Each octet is a random byte limited to the host bits of that
//! octet, added to the network address. The first and last octets are offset
//! by +2 and +1 to stay clear of the network and broadcast extremes.

use ipnetwork::Ipv4Network;
use rand::Rng;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use tracing::trace;

use crate::{Error, Result};

/// Draws before giving up on finding a free address
pub const MAX_ALLOCATION_ATTEMPTS: usize = 64;

/// One random candidate address inside `network`
pub fn candidate_ip<R: Rng>(network: &Ipv4Network, rng: &mut R) -> Ipv4Addr {
    let base = network.network().octets();
    let mask = network.mask().octets();
    let offsets = [2u8, 0, 0, 1];

    let mut octets = [0u8; 4];
    for i in 0..4 {
        let random = rng.gen_range(0..250u8) + offsets[i];
        // The network address has no host bits set, so or-ing adds without carry
        octets[i] = (random & !mask[i]) | base[i];
    }

    Ipv4Addr::from(octets)
}

/// Allocate an address inside `network` that is neither the network nor the
/// broadcast address and not already in `taken`
pub fn allocate_ip<R: Rng>(
    network: &Ipv4Network,
    taken: &HashSet<Ipv4Addr>,
    rng: &mut R,
) -> Result<Ipv4Addr> {
    for attempt in 1..=MAX_ALLOCATION_ATTEMPTS {
        let ip = candidate_ip(network, rng);
        if ip == network.network() || ip == network.broadcast() {
            trace!("Candidate {} is a reserved address, redrawing", ip);
            continue;
        }
        if taken.contains(&ip) {
            trace!("Candidate {} already used (attempt {}), redrawing", ip, attempt);
            continue;
        }
        return Ok(ip);
    }

    Err(Error::AddressAllocation(format!(
        "no free address in {} after {} attempts",
        network, MAX_ALLOCATION_ATTEMPTS
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_mesh_cidr;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn inside(network: &Ipv4Network, ip: Ipv4Addr) -> bool {
        let mask = u32::from(network.mask());
        u32::from(ip) & mask == u32::from(network.network()) & mask
    }

    #[test]
    fn test_allocations_stay_strictly_inside() {
        let mut rng = StdRng::seed_from_u64(7);
        let taken = HashSet::new();

        for cidr in [
            "10.0.0.0/8",
            "172.16.0.0/12",
            "10.37.0.0/16",
            "192.168.100.0/22",
            "192.168.7.0/24",
            "192.168.7.64/27",
            "192.168.7.8/29",
            "192.168.7.4/30",
        ] {
            let network = parse_mesh_cidr(cidr).unwrap();
            for _ in 0..500 {
                let ip = allocate_ip(&network, &taken, &mut rng).unwrap();
                assert!(inside(&network, ip), "{} outside {}", ip, cidr);
                assert_ne!(ip, network.network(), "network address for {}", cidr);
                assert_ne!(ip, network.broadcast(), "broadcast address for {}", cidr);
            }
        }
    }

    #[test]
    fn test_every_prefix_length() {
        let mut rng = StdRng::seed_from_u64(42);
        let taken = HashSet::new();

        for prefix in 1..=30u8 {
            let network = Ipv4Network::new(Ipv4Addr::new(0, 0, 0, 0), prefix).unwrap();
            for _ in 0..100 {
                let ip = allocate_ip(&network, &taken, &mut rng).unwrap();
                assert!(inside(&network, ip));
            }
        }
    }

    #[test]
    fn test_skips_taken_addresses() {
        let mut rng = StdRng::seed_from_u64(1);
        let network = parse_mesh_cidr("192.168.7.4/30").unwrap();
        let taken: HashSet<_> = [Ipv4Addr::new(192, 168, 7, 5)].into_iter().collect();

        for _ in 0..50 {
            assert_eq!(
                allocate_ip(&network, &taken, &mut rng).unwrap(),
                Ipv4Addr::new(192, 168, 7, 6)
            );
        }
    }

    #[test]
    fn test_exhausted_network() {
        let mut rng = StdRng::seed_from_u64(3);
        let network = parse_mesh_cidr("192.168.7.4/30").unwrap();
        let taken: HashSet<_> = [Ipv4Addr::new(192, 168, 7, 5), Ipv4Addr::new(192, 168, 7, 6)]
            .into_iter()
            .collect();

        assert!(matches!(
            allocate_ip(&network, &taken, &mut rng),
            Err(Error::AddressAllocation(_))
        ));
    }
}
