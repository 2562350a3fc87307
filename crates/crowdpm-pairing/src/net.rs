//! First-contact header derivation helpers: IP coarsening for the
//! human-facing pairing session view.

use std::net::IpAddr;

use ipnetwork::{Ipv4Network, Ipv6Network};

/// Coarsen an IP address for display to the approving human: `/24` for
/// IPv4, `/64` for IPv6.
pub fn coarsen_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let net = Ipv4Network::new(v4, 24).expect("24 is a valid IPv4 prefix length");
            format!("{}/24", net.network())
        }
        IpAddr::V6(v6) => {
            let net = Ipv6Network::new(v6, 64).expect("64 is a valid IPv6 prefix length");
            format!("{}/64", net.network())
        }
    }
}
