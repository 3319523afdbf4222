//! Listen-specifier resolution and socket binding.
//!
//! A listen specifier is `[ip%zone]:port` with every part optional:
//! `[::]:547`, `:67`, `192.0.2.1`, `[fe80::1%eth0]`, `%eth0`. The zone must
//! stay inside the brackets whenever a port is present. Link-local and
//! interface-local multicast groups given without a zone expand to one bind
//! target per interface that can carry them.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};

pub const DHCPV4_SERVER_PORT: u16 = 67;
pub const DHCPV4_CLIENT_PORT: u16 = 68;
pub const DHCPV6_SERVER_PORT: u16 = 547;
pub const DHCPV6_CLIENT_PORT: u16 = 546;

/// All DHCP Relay Agents and Servers (link scope).
pub const ALL_RELAY_AGENTS_AND_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 1, 2);
/// All DHCP Servers (site scope).
pub const ALL_DHCP_SERVERS: Ipv6Addr = Ipv6Addr::new(0xff05, 0, 0, 0, 0, 0, 1, 3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V4,
    V6,
}

impl ProtocolVersion {
    pub fn default_port(self) -> u16 {
        match self {
            Self::V4 => DHCPV4_SERVER_PORT,
            Self::V6 => DHCPV6_SERVER_PORT,
        }
    }

    fn wildcard(self) -> IpAddr {
        match self {
            Self::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V4 => write!(f, "v4"),
            Self::V6 => write!(f, "v6"),
        }
    }
}

/// One concrete address to bind: IP, port and optional interface zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindTarget {
    pub ip: IpAddr,
    pub port: u16,
    pub zone: Option<String>,
}

impl std::fmt::Display for BindTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.zone {
            Some(zone) => write!(f, "[{}%{}]:{}", self.ip, zone, self.port),
            None => write!(f, "[{}]:{}", self.ip, self.port),
        }
    }
}

/// True for multicast groups that only make sense on a specific link
/// (v4 224.0.0.0/24, v6 ff01::/16 and ff02::/16).
fn is_link_scoped_multicast(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            octets[0] == 224 && octets[1] == 0 && octets[2] == 0
        }
        IpAddr::V6(v6) => {
            let scope = v6.segments()[0];
            scope & 0xff00 == 0xff00 && matches!(scope & 0x000f, 1 | 2)
        }
    }
}

/// Splits `spec` into host and optional port per the bracket rules.
fn split_host_port(spec: &str) -> Result<(&str, Option<&str>)> {
    if let Some(inside) = spec.strip_prefix('[') {
        let close = inside
            .find(']')
            .ok_or_else(|| Error::InvalidListen(format!("unclosed bracket in '{}'", spec)))?;
        let host = &inside[..close];
        let rest = &inside[close + 1..];
        if rest.is_empty() {
            return Ok((host, None));
        }
        if let Some(port) = rest.strip_prefix(':') {
            return Ok((host, Some(port)));
        }
        return Err(Error::InvalidListen(format!(
            "unexpected '{}' after bracket in '{}' (the zone belongs inside the brackets)",
            rest, spec
        )));
    }

    // A bare address, possibly zoned, never carries a port unless it is an
    // unambiguous single-colon host:port form.
    if spec.parse::<IpAddr>().is_ok() || !spec.contains(':') {
        return Ok((spec, None));
    }
    if spec.matches(':').count() > 1 {
        return Err(Error::InvalidListen(format!(
            "'{}' needs brackets to combine an IPv6 address with a port",
            spec
        )));
    }
    let (host, port) = spec.split_once(':').unwrap();
    if host.contains('%') {
        return Err(Error::InvalidListen(format!(
            "zone outside brackets is not supported in '{}', use [ip%zone]:port",
            spec
        )));
    }
    Ok((host, Some(port)))
}

/// Parses a single listen specifier into a bind target, filling in the
/// version's wildcard address and default port.
pub fn parse_listen(spec: &str, version: ProtocolVersion) -> Result<BindTarget> {
    let (host, port_str) = split_host_port(spec.trim())?;

    let (ip_str, zone) = match host.rsplit_once('%') {
        Some((ip, zone)) if !zone.is_empty() => (ip, Some(zone.to_string())),
        Some((ip, _)) => (ip, None),
        None => (host, None),
    };

    let ip = if ip_str.is_empty() {
        version.wildcard()
    } else {
        ip_str
            .parse::<IpAddr>()
            .map_err(|_| Error::InvalidListen(format!("invalid IP address '{}'", ip_str)))?
    };

    match (version, ip) {
        (ProtocolVersion::V4, IpAddr::V6(_)) => {
            return Err(Error::InvalidListen(format!(
                "'{}' is not an IPv4 address",
                ip_str
            )));
        }
        (ProtocolVersion::V6, IpAddr::V4(_)) => {
            return Err(Error::InvalidListen(format!(
                "'{}' is not an IPv6 address",
                ip_str
            )));
        }
        (ProtocolVersion::V6, IpAddr::V6(v6)) if v6.to_ipv4_mapped().is_some() => {
            return Err(Error::InvalidListen(format!(
                "'{}' embeds an IPv4 address",
                ip_str
            )));
        }
        _ => {}
    }

    let port = match port_str {
        None | Some("") => version.default_port(),
        Some(port) => port
            .parse::<u16>()
            .map_err(|_| Error::InvalidListen(format!("invalid port '{}'", port)))?,
    };

    Ok(BindTarget { ip, port, zone })
}

/// Expands an unzoned link-scoped multicast target across the given
/// interface names.
fn expand_over_interfaces(target: &BindTarget, interfaces: Vec<String>) -> Result<Vec<BindTarget>> {
    if interfaces.is_empty() {
        return Err(Error::InvalidListen(format!(
            "no suitable interface found for multicast listener {}",
            target.ip
        )));
    }
    Ok(interfaces
        .into_iter()
        .map(|name| BindTarget {
            ip: target.ip,
            port: target.port,
            zone: Some(name),
        })
        .collect())
}

#[cfg(unix)]
fn multicast_interfaces(need_broadcast: bool) -> Result<Vec<String>> {
    use nix::net::if_::InterfaceFlags;

    let addrs = nix::ifaddrs::getifaddrs()
        .map_err(|error| Error::Socket(format!("could not list network interfaces: {}", error)))?;
    let mut names: Vec<String> = Vec::new();
    for ifaddr in addrs {
        if !ifaddr.flags.contains(InterfaceFlags::IFF_MULTICAST) {
            continue;
        }
        if need_broadcast && !ifaddr.flags.contains(InterfaceFlags::IFF_BROADCAST) {
            continue;
        }
        if !names.contains(&ifaddr.interface_name) {
            names.push(ifaddr.interface_name);
        }
    }
    Ok(names)
}

#[cfg(not(unix))]
fn multicast_interfaces(_need_broadcast: bool) -> Result<Vec<String>> {
    Err(Error::Socket(
        "interface enumeration is not supported on this platform".to_string(),
    ))
}

fn expand_multicast(target: BindTarget, version: ProtocolVersion) -> Result<Vec<BindTarget>> {
    let interfaces = multicast_interfaces(version == ProtocolVersion::V4)?;
    expand_over_interfaces(&target, interfaces)
}

/// Resolves a list of listen specifiers into concrete bind targets,
/// expanding unzoned link-scoped multicast groups over all qualifying
/// interfaces.
pub fn resolve_listeners(specs: &[String], version: ProtocolVersion) -> Result<Vec<BindTarget>> {
    let mut targets = Vec::new();
    for spec in specs {
        let target = parse_listen(spec, version)?;
        if target.zone.is_none() && is_link_scoped_multicast(target.ip) {
            targets.extend(expand_multicast(target, version)?);
        } else {
            targets.push(target);
        }
    }
    Ok(targets)
}

/// The listeners used when the configuration gives none: the v4 wildcard on
/// port 67, or the v6 relay/server groups on port 547.
pub fn default_listeners(version: ProtocolVersion) -> Result<Vec<BindTarget>> {
    match version {
        ProtocolVersion::V4 => Ok(vec![BindTarget {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DHCPV4_SERVER_PORT,
            zone: None,
        }]),
        ProtocolVersion::V6 => {
            let mut targets = expand_multicast(
                BindTarget {
                    ip: IpAddr::V6(ALL_RELAY_AGENTS_AND_SERVERS),
                    port: DHCPV6_SERVER_PORT,
                    zone: None,
                },
                version,
            )?;
            targets.push(BindTarget {
                ip: IpAddr::V6(ALL_DHCP_SERVERS),
                port: DHCPV6_SERVER_PORT,
                zone: None,
            });
            Ok(targets)
        }
    }
}

#[cfg(unix)]
fn zone_to_index(zone: &str) -> Result<u32> {
    nix::net::if_::if_nametoindex(zone)
        .map(|index| index as u32)
        .map_err(|error| Error::Socket(format!("interface '{}' not found: {}", zone, error)))
}

#[cfg(not(unix))]
fn zone_to_index(zone: &str) -> Result<u32> {
    Err(Error::Socket(format!(
        "interface zones are not supported on this platform: '{}'",
        zone
    )))
}

/// Creates and binds the UDP socket for one target, returning it ready for
/// async I/O.
pub fn bind(target: &BindTarget, version: ProtocolVersion) -> Result<UdpSocket> {
    let domain = match version {
        ProtocolVersion::V4 => Domain::IPV4,
        ProtocolVersion::V6 => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|error| Error::Socket(format!("failed to create socket: {}", error)))?;

    socket
        .set_reuse_address(true)
        .map_err(|error| Error::Socket(format!("failed to set SO_REUSEADDR: {}", error)))?;

    match (version, target.ip) {
        (ProtocolVersion::V4, IpAddr::V4(ip)) => {
            socket
                .set_broadcast(true)
                .map_err(|error| Error::Socket(format!("failed to set SO_BROADCAST: {}", error)))?;

            if let Some(zone) = &target.zone {
                bind_to_device(&socket, zone)?;
            }
            if ip.is_multicast() {
                socket
                    .join_multicast_v4(&ip, &Ipv4Addr::UNSPECIFIED)
                    .map_err(|error| {
                        Error::Socket(format!("failed to join group {}: {}", ip, error))
                    })?;
            }
            let addr = SocketAddrV4::new(ip, target.port);
            socket
                .bind(&addr.into())
                .map_err(|error| Error::Socket(format!("failed to bind to {}: {}", addr, error)))?;
        }
        (ProtocolVersion::V6, IpAddr::V6(ip)) => {
            socket
                .set_only_v6(true)
                .map_err(|error| Error::Socket(format!("failed to set IPV6_V6ONLY: {}", error)))?;

            let scope = match &target.zone {
                Some(zone) => zone_to_index(zone)?,
                None => 0,
            };
            if ip.is_multicast() {
                socket.join_multicast_v6(&ip, scope).map_err(|error| {
                    Error::Socket(format!("failed to join group {}: {}", ip, error))
                })?;
            }
            let addr = SocketAddrV6::new(ip, target.port, 0, scope);
            socket
                .bind(&addr.into())
                .map_err(|error| Error::Socket(format!("failed to bind to {}: {}", addr, error)))?;
        }
        _ => {
            return Err(Error::Socket(format!(
                "address {} does not match protocol {}",
                target.ip, version
            )));
        }
    }

    socket
        .set_nonblocking(true)
        .map_err(|error| Error::Socket(format!("failed to set non-blocking: {}", error)))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
        .map_err(|error| Error::Socket(format!("failed to convert to tokio socket: {}", error)))
}

#[cfg(target_os = "linux")]
fn bind_to_device(socket: &Socket, zone: &str) -> Result<()> {
    socket
        .bind_device(Some(zone.as_bytes()))
        .map_err(|error| Error::Socket(format!("failed to bind to device '{}': {}", zone, error)))
}

#[cfg(not(target_os = "linux"))]
fn bind_to_device(_socket: &Socket, zone: &str) -> Result<()> {
    tracing::warn!("ignoring interface '{}': device binding requires Linux", zone);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4(spec: &str) -> Result<BindTarget> {
        parse_listen(spec, ProtocolVersion::V4)
    }

    fn v6(spec: &str) -> Result<BindTarget> {
        parse_listen(spec, ProtocolVersion::V6)
    }

    #[test]
    fn test_wildcard_v6() {
        let target = v6("[::]").unwrap();
        assert_eq!(target.ip, IpAddr::V6(Ipv6Addr::UNSPECIFIED));
        assert_eq!(target.port, DHCPV6_SERVER_PORT);
        assert_eq!(target.zone, None);
    }

    #[test]
    fn test_port_only_v4() {
        let target = v4(":67").unwrap();
        assert_eq!(target.ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(target.port, 67);
    }

    #[test]
    fn test_zoned_link_local_with_port() {
        let target = v6("[fe80::1%eth0]:547").unwrap();
        assert_eq!(target.ip, "fe80::1".parse::<IpAddr>().unwrap());
        assert_eq!(target.port, 547);
        assert_eq!(target.zone.as_deref(), Some("eth0"));
    }

    #[test]
    fn test_bare_ipv4_with_port() {
        let target = v4("192.0.2.1:6767").unwrap();
        assert_eq!(target.ip, "192.0.2.1".parse::<IpAddr>().unwrap());
        assert_eq!(target.port, 6767);
    }

    #[test]
    fn test_bare_multicast_group_defaults() {
        let target = v6("ff02::1:2").unwrap();
        assert_eq!(target.ip, IpAddr::V6(ALL_RELAY_AGENTS_AND_SERVERS));
        assert_eq!(target.port, DHCPV6_SERVER_PORT);
        assert_eq!(target.zone, None);
        assert!(is_link_scoped_multicast(target.ip));
    }

    #[test]
    fn test_zone_alias_form() {
        let target = v4("%eth1").unwrap();
        assert_eq!(target.ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(target.port, DHCPV4_SERVER_PORT);
        assert_eq!(target.zone.as_deref(), Some("eth1"));
    }

    #[test]
    fn test_zone_outside_brackets_with_port_rejected() {
        assert!(v4("192.0.2.1%eth0:67").is_err());
        assert!(v6("[fe80::1]%eth0:547").is_err());
        assert!(v6("[fe80::1]%eth0").is_err());
    }

    #[test]
    fn test_wrong_family_rejected() {
        assert!(v4("[::1]:67").is_err());
        assert!(v6("192.0.2.1").is_err());
        assert!(v6("[::ffff:192.0.2.1]:547").is_err());
    }

    #[test]
    fn test_malformed_specs_rejected() {
        assert!(v6("[::1").is_err());
        assert!(v4("192.0.2.1:notaport").is_err());
        assert!(v4("nonsense^").is_err());
        assert!(v6("fe80::1:547").is_ok()); // parses as a plain address
        assert!(v6("[fe80::1]:70000").is_err());
    }

    #[test]
    fn test_link_scope_predicate() {
        assert!(is_link_scoped_multicast("224.0.0.1".parse().unwrap()));
        assert!(!is_link_scoped_multicast("239.1.1.1".parse().unwrap()));
        assert!(is_link_scoped_multicast("ff02::1:2".parse().unwrap()));
        assert!(is_link_scoped_multicast("ff01::1".parse().unwrap()));
        assert!(!is_link_scoped_multicast("ff05::1:3".parse().unwrap()));
        assert!(!is_link_scoped_multicast("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_expand_over_interfaces() {
        let target = v6("ff02::1:2").unwrap();
        let expanded =
            expand_over_interfaces(&target, vec!["eth0".to_string(), "eth1".to_string()]).unwrap();
        assert_eq!(expanded.len(), 2);
        assert!(expanded.iter().all(|t| t.ip == target.ip && t.port == 547));
        assert_eq!(expanded[0].zone.as_deref(), Some("eth0"));
        assert_eq!(expanded[1].zone.as_deref(), Some("eth1"));

        assert!(expand_over_interfaces(&target, Vec::new()).is_err());
    }

    #[test]
    fn test_default_listeners_v4() {
        let targets = default_listeners(ProtocolVersion::V4).unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(targets[0].port, 67);
    }
}
