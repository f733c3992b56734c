use std::net::{Ipv4Addr, Ipv6Addr};

/// Check if an IPv4 address falls within a network/prefix.
/// prefix=0 matches all. prefix>32 matches none.
pub fn ip4_in_network(ip: Ipv4Addr, network: Ipv4Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    if prefix > 32 {
        return false;
    }
    let mask = !0u32 << (32 - prefix);
    (u32::from(ip) & mask) == (u32::from(network) & mask)
}

/// Check if an IPv6 address falls within a network/prefix.
/// prefix=0 matches all. prefix>128 matches none.
pub fn ip6_in_network(ip: Ipv6Addr, network: Ipv6Addr, prefix: u8) -> bool {
    if prefix == 0 {
        return true;
    }
    if prefix > 128 {
        return false;
    }
    let mask = !0u128 << (128 - prefix);
    (u128::from(ip) & mask) == (u128::from(network) & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- IPv4 ---

    #[test]
    fn ip4_full_width_is_reflexive() {
        let ip: Ipv4Addr = "192.0.2.5".parse().unwrap();
        assert!(ip4_in_network(ip, ip, 32));
        assert!(!ip4_in_network("192.0.2.6".parse().unwrap(), ip, 32));
    }

    #[test]
    fn ip4_prefix_0_matches_everything() {
        let net: Ipv4Addr = "192.0.2.0".parse().unwrap();
        assert!(ip4_in_network("10.0.0.1".parse().unwrap(), net, 0));
        assert!(ip4_in_network("255.255.255.255".parse().unwrap(), net, 0));
    }

    #[test]
    fn ip4_subnet_match() {
        let net: Ipv4Addr = "192.0.2.0".parse().unwrap();
        assert!(ip4_in_network("192.0.2.5".parse().unwrap(), net, 24));
        assert!(ip4_in_network("192.0.2.255".parse().unwrap(), net, 24));
        assert!(!ip4_in_network("203.0.113.9".parse().unwrap(), net, 24));
    }

    #[test]
    fn ip4_slash_16_boundary() {
        let net: Ipv4Addr = "10.20.0.0".parse().unwrap();
        assert!(ip4_in_network("10.20.99.1".parse().unwrap(), net, 16));
        assert!(!ip4_in_network("10.21.0.0".parse().unwrap(), net, 16));
    }

    #[test]
    fn ip4_prefix_too_large_matches_none() {
        let ip: Ipv4Addr = "1.2.3.4".parse().unwrap();
        assert!(!ip4_in_network(ip, ip, 33));
    }

    // --- IPv6 ---

    #[test]
    fn ip6_full_width_is_reflexive() {
        let ip: Ipv6Addr = "2001:db8::1".parse().unwrap();
        assert!(ip6_in_network(ip, ip, 128));
        assert!(!ip6_in_network("2001:db8::2".parse().unwrap(), ip, 128));
    }

    #[test]
    fn ip6_prefix_0_matches_everything() {
        let net: Ipv6Addr = "2001:db8::".parse().unwrap();
        assert!(ip6_in_network("fe80::1".parse().unwrap(), net, 0));
    }

    #[test]
    fn ip6_subnet_match() {
        let net: Ipv6Addr = "2001:db8::".parse().unwrap();
        assert!(ip6_in_network("2001:db8::abcd".parse().unwrap(), net, 32));
        assert!(!ip6_in_network("2001:db9::1".parse().unwrap(), net, 32));
    }

    #[test]
    fn ip6_slash_64_boundary() {
        let net: Ipv6Addr = "2001:db8::".parse().unwrap();
        assert!(ip6_in_network("2001:db8:0:0:ffff::1".parse().unwrap(), net, 64));
        assert!(!ip6_in_network("2001:db8:0:1::1".parse().unwrap(), net, 64));
    }

    #[test]
    fn ip6_prefix_too_large_matches_none() {
        let ip: Ipv6Addr = "::1".parse().unwrap();
        assert!(!ip6_in_network(ip, ip, 129));
    }
}
