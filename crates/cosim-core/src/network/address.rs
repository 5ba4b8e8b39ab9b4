//! Endpoint string handling
//!
//! Parsing, composing, and classifying network endpoint strings of the form
//! `[scheme://]host[:port]`. Every function here is total: unparseable input
//! yields the documented "unassigned" sentinel instead of an error, so the
//! callers in the configuration layer never have to branch on failure.

use std::net::UdpSocket;

use super::config::{InterfaceNetwork, InterfaceType};

// ----------------------------------------------------------------------------
// Protocol Prefixes
// ----------------------------------------------------------------------------

/// Strip a leading `scheme://` from an address, returning the remainder.
pub fn strip_protocol(address: &str) -> String {
    match address.find("://") {
        Some(idx) => address[idx + 3..].to_string(),
        None => address.to_string(),
    }
}

/// Strip a leading `scheme://` in place.
pub fn remove_protocol(address: &mut String) {
    if let Some(idx) = address.find("://") {
        address.replace_range(..idx + 3, "");
    }
}

/// Prefix the scheme for the given interface family, unless the address
/// already carries one. [`InterfaceType::Ip`] composes with `tcp://`.
pub fn add_protocol(address: &str, interface: InterfaceType) -> String {
    if address.contains("://") {
        address.to_string()
    } else {
        format!("{}{}", interface.scheme(), address)
    }
}

/// Prefix the scheme in place, unless one is already present.
pub fn insert_protocol(address: &mut String, interface: InterfaceType) {
    if !address.contains("://") {
        address.insert_str(0, interface.scheme());
    }
}

// ----------------------------------------------------------------------------
// Interface / Port Splitting
// ----------------------------------------------------------------------------

/// Split an address at the last `:` not inside brackets, retaining the
/// textual port form (so service names survive).
///
/// A missing port yields an empty string. Bracketed IPv6 hosts are returned
/// without their brackets.
pub fn extract_interface_and_port_string(address: &str) -> (String, String) {
    if let (Some(open), Some(close)) = (address.find('['), address.rfind(']')) {
        if open < close {
            let host = address[open + 1..close].to_string();
            let port = address[close + 1..]
                .strip_prefix(':')
                .unwrap_or("")
                .to_string();
            return (host, port);
        }
    }
    match address.rfind(':') {
        // the scheme separator is not a port separator
        Some(idx) if !address[idx + 1..].starts_with("//") => {
            (address[..idx].to_string(), address[idx + 1..].to_string())
        }
        _ => (address.to_string(), String::new()),
    }
}

/// Split an address into interface and numeric port.
///
/// A missing port yields `-1`; a non-numeric suffix yields the whole input
/// as the interface with port `-1`.
pub fn extract_interface_and_port(address: &str) -> (String, i32) {
    let (host, port) = extract_interface_and_port_string(address);
    if port.is_empty() {
        return (host, -1);
    }
    match port.parse::<i32>() {
        Ok(value) => (host, value),
        Err(_) => (address.to_string(), -1),
    }
}

/// Compose an interface string and a port into a full address.
///
/// An existing `:port` suffix is replaced; IPv6 literals are wrapped in
/// brackets; a negative port or an ipc/inproc address returns the interface
/// unchanged.
pub fn make_port_address(interface: &str, port: i32) -> String {
    if port < 0 {
        return interface.to_string();
    }
    let (scheme, rest) = split_scheme(interface);
    if scheme == "ipc://" || scheme == "inproc://" {
        return interface.to_string();
    }
    if is_ipv6(rest) {
        let host = if rest.contains('[') {
            extract_interface_and_port_string(rest).0
        } else {
            rest.to_string()
        };
        format!("{scheme}[{host}]:{port}")
    } else {
        let (host, _) = extract_interface_and_port_string(rest);
        format!("{scheme}{host}:{port}")
    }
}

fn split_scheme(address: &str) -> (&str, &str) {
    match address.find("://") {
        Some(idx) => address.split_at(idx + 3),
        None => ("", address),
    }
}

// ----------------------------------------------------------------------------
// Address Classification
// ----------------------------------------------------------------------------

/// Heuristic IPv6 check: a bracketed form, a `::`, or more than one colon
/// outside the scheme prefix.
pub fn is_ipv6(address: &str) -> bool {
    let stripped = strip_protocol(address);
    if stripped.contains('[') || stripped.contains("::") {
        return true;
    }
    stripped.matches(':').count() >= 2
}

/// The host portion of an address, tolerant of unbracketed IPv6 literals.
fn host_part(address: &str) -> String {
    let stripped = strip_protocol(address);
    if is_ipv6(&stripped) && !stripped.contains('[') {
        return stripped;
    }
    extract_interface_and_port_string(&stripped).0
}

fn is_loopback(address: &str) -> bool {
    let host = host_part(address);
    host == "localhost" || host == "::1" || host.starts_with("127.")
}

// ----------------------------------------------------------------------------
// Address Prioritisation
// ----------------------------------------------------------------------------

/// Merge two candidate address lists into a rough priority order: addresses
/// appearing in both lists first (deduplicated, in `high` order), then the
/// remaining `high` entries, then the remaining `low` entries. Loopback
/// addresses sort last within each tier.
pub fn prioritize_external_addresses(high: Vec<String>, low: Vec<String>) -> Vec<String> {
    let mut both = Vec::new();
    let mut high_only = Vec::new();
    for addr in high {
        if both.contains(&addr) || high_only.contains(&addr) {
            continue;
        }
        if low.contains(&addr) {
            both.push(addr);
        } else {
            high_only.push(addr);
        }
    }
    let mut low_only: Vec<String> = Vec::new();
    for addr in low {
        if !both.contains(&addr) && !high_only.contains(&addr) && !low_only.contains(&addr) {
            low_only.push(addr);
        }
    }

    let mut result = Vec::new();
    for tier in [both, high_only, low_only] {
        let (external, loopback): (Vec<_>, Vec<_>) =
            tier.into_iter().partition(|a| !is_loopback(a));
        result.extend(external);
        result.extend(loopback);
    }
    result
}

// ----------------------------------------------------------------------------
// Interface Matching
// ----------------------------------------------------------------------------

/// The best local interface address for reaching `server` on the given
/// network scope.
///
/// `Local` yields the loopback of the server's family; `All` yields the
/// unspecified bind address; `Ipv4`/`Ipv6` consult the OS routing table for
/// the external interface that would be used to reach the server.
pub fn generate_matching_interface_address(server: &str, network: InterfaceNetwork) -> String {
    match network {
        InterfaceNetwork::Local => {
            if is_ipv6(server) {
                "::1".to_string()
            } else {
                "127.0.0.1".to_string()
            }
        }
        InterfaceNetwork::All => {
            if is_ipv6(server) {
                "::".to_string()
            } else {
                "0.0.0.0".to_string()
            }
        }
        InterfaceNetwork::Ipv4 => local_external_address(server, false),
        InterfaceNetwork::Ipv6 => local_external_address(server, true),
    }
}

/// The local address the routing table selects for the target server.
///
/// A connected UDP socket never transmits; connecting only asks the OS which
/// local interface would carry traffic to the target.
fn local_external_address(server: &str, v6: bool) -> String {
    let fallback = if v6 { "::1" } else { "127.0.0.1" };
    let host = host_part(server);
    if host.is_empty() {
        return fallback.to_string();
    }
    let (_, port) = extract_interface_and_port(&strip_protocol(server));
    let port = if port > 0 { port as u16 } else { 80 };
    let bind = if v6 { "[::]:0" } else { "0.0.0.0:0" };
    let target = if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    let resolved = UdpSocket::bind(bind).and_then(|socket| {
        socket.connect(target.as_str())?;
        socket.local_addr()
    });
    match resolved {
        Ok(addr) => addr.ip().to_string(),
        Err(_) => fallback.to_string(),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
