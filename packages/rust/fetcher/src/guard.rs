//! Refuses to fetch loopback, private, and non-HTTP targets.
//!
//! Search results come from a third party, so their links are treated as
//! untrusted input.

use std::net::IpAddr;

use url::{Host, Url};

/// Check if a URL targets a potentially dangerous resource.
///
/// Non-HTTP schemes are always refused; `allow_private_hosts` only relaxes
/// the address checks.
pub(crate) fn is_blocked_target(url: &Url, allow_private_hosts: bool) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }
    if allow_private_hosts {
        return false;
    }

    match url.host() {
        Some(Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(&IpAddr::V4(v4));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local, fe80::/10 link local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
