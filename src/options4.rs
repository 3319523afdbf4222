use std::net::Ipv4Addr;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    Pad = 0,
    SubnetMask = 1,
    Router = 3,
    DnsServer = 6,
    DomainName = 15,
    InterfaceMtu = 26,
    BroadcastAddress = 28,
    RequestedIpAddress = 50,
    LeaseTime = 51,
    MessageType = 53,
    ServerIdentifier = 54,
    ParameterRequestList = 55,
    RenewalTime = 58,
    RebindingTime = 59,
    ClientIdentifier = 61,
    RelayAgentInfo = 82,
    ClasslessStaticRoute = 121,
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DnsServer),
            15 => Ok(Self::DomainName),
            26 => Ok(Self::InterfaceMtu),
            28 => Ok(Self::BroadcastAddress),
            50 => Ok(Self::RequestedIpAddress),
            51 => Ok(Self::LeaseTime),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            55 => Ok(Self::ParameterRequestList),
            58 => Ok(Self::RenewalTime),
            59 => Ok(Self::RebindingTime),
            61 => Ok(Self::ClientIdentifier),
            82 => Ok(Self::RelayAgentInfo),
            121 => Ok(Self::ClasslessStaticRoute),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Discover = 1,
    Offer = 2,
    Request = 3,
    Decline = 4,
    Ack = 5,
    Nak = 6,
    Release = 7,
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// One classless static route (destination prefix plus gateway), encoded
/// into option 121 with the variable-length destination form of RFC 3442.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub dest: Ipv4Addr,
    pub prefix_len: u8,
    pub gateway: Ipv4Addr,
}

impl Route {
    fn significant_octets(&self) -> usize {
        (self.prefix_len as usize).div_ceil(8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    SubnetMask(Ipv4Addr),
    Router(Vec<Ipv4Addr>),
    DnsServer(Vec<Ipv4Addr>),
    DomainName(String),
    BroadcastAddress(Ipv4Addr),
    RequestedIpAddress(Ipv4Addr),
    LeaseTime(u32),
    MessageType(MessageType),
    ServerIdentifier(Ipv4Addr),
    ParameterRequestList(Vec<u8>),
    RenewalTime(u32),
    RebindingTime(u32),
    ClientIdentifier(Vec<u8>),
    InterfaceMtu(u16),
    RelayAgentInfo(Vec<u8>),
    StaticRoutes(Vec<Route>),
    Unknown(u8, Vec<u8>),
}

fn read_ipv4(data: &[u8], what: &str) -> Result<Ipv4Addr> {
    if data.len() != 4 {
        return Err(Error::InvalidPacket(format!("Invalid {} length", what)));
    }
    Ok(Ipv4Addr::new(data[0], data[1], data[2], data[3]))
}

fn read_ipv4_list(data: &[u8], what: &str) -> Result<Vec<Ipv4Addr>> {
    if data.len() % 4 != 0 || data.is_empty() {
        return Err(Error::InvalidPacket(format!("Invalid {} length", what)));
    }
    Ok(data
        .chunks_exact(4)
        .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .collect())
}

fn read_u32(data: &[u8], what: &str) -> Result<u32> {
    if data.len() != 4 {
        return Err(Error::InvalidPacket(format!("Invalid {} length", what)));
    }
    Ok(u32::from_be_bytes([data[0], data[1], data[2], data[3]]))
}

impl DhcpOption {
    /// The wire code this option encodes to.
    pub fn code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DnsServer(_) => OptionCode::DnsServer as u8,
            Self::DomainName(_) => OptionCode::DomainName as u8,
            Self::BroadcastAddress(_) => OptionCode::BroadcastAddress as u8,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::ParameterRequestList(_) => OptionCode::ParameterRequestList as u8,
            Self::RenewalTime(_) => OptionCode::RenewalTime as u8,
            Self::RebindingTime(_) => OptionCode::RebindingTime as u8,
            Self::ClientIdentifier(_) => OptionCode::ClientIdentifier as u8,
            Self::InterfaceMtu(_) => OptionCode::InterfaceMtu as u8,
            Self::RelayAgentInfo(_) => OptionCode::RelayAgentInfo as u8,
            Self::StaticRoutes(_) => OptionCode::ClasslessStaticRoute as u8,
            Self::Unknown(code, _) => *code,
        }
    }

    pub fn parse(code: u8, data: &[u8]) -> Result<Self> {
        match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => Ok(Self::SubnetMask(read_ipv4(data, "subnet mask")?)),
            Ok(OptionCode::Router) => Ok(Self::Router(read_ipv4_list(data, "router option")?)),
            Ok(OptionCode::DnsServer) => {
                Ok(Self::DnsServer(read_ipv4_list(data, "DNS server option")?))
            }
            Ok(OptionCode::DomainName) => {
                Ok(Self::DomainName(String::from_utf8_lossy(data).to_string()))
            }
            Ok(OptionCode::BroadcastAddress) => {
                Ok(Self::BroadcastAddress(read_ipv4(data, "broadcast address")?))
            }
            Ok(OptionCode::RequestedIpAddress) => Ok(Self::RequestedIpAddress(read_ipv4(
                data,
                "requested IP address",
            )?)),
            Ok(OptionCode::LeaseTime) => Ok(Self::LeaseTime(read_u32(data, "lease time")?)),
            Ok(OptionCode::MessageType) => {
                if data.len() != 1 {
                    return Err(Error::InvalidPacket(
                        "Invalid message type length".to_string(),
                    ));
                }
                let msg_type = MessageType::try_from(data[0]).map_err(|value| {
                    Error::InvalidPacket(format!("Unknown message type: {}", value))
                })?;
                Ok(Self::MessageType(msg_type))
            }
            Ok(OptionCode::ServerIdentifier) => {
                Ok(Self::ServerIdentifier(read_ipv4(data, "server identifier")?))
            }
            Ok(OptionCode::ParameterRequestList) => Ok(Self::ParameterRequestList(data.to_vec())),
            Ok(OptionCode::RenewalTime) => Ok(Self::RenewalTime(read_u32(data, "renewal time")?)),
            Ok(OptionCode::RebindingTime) => {
                Ok(Self::RebindingTime(read_u32(data, "rebinding time")?))
            }
            Ok(OptionCode::ClientIdentifier) => Ok(Self::ClientIdentifier(data.to_vec())),
            Ok(OptionCode::InterfaceMtu) => {
                if data.len() != 2 {
                    return Err(Error::InvalidPacket("Invalid MTU length".to_string()));
                }
                Ok(Self::InterfaceMtu(u16::from_be_bytes([data[0], data[1]])))
            }
            Ok(OptionCode::RelayAgentInfo) => Ok(Self::RelayAgentInfo(data.to_vec())),
            Ok(OptionCode::ClasslessStaticRoute) => Self::parse_routes(data),
            Ok(OptionCode::Pad) | Ok(OptionCode::End) => Err(Error::InvalidPacket(
                "Pad/End should not be parsed as options".to_string(),
            )),
            Err(unknown_code) => Ok(Self::Unknown(unknown_code, data.to_vec())),
        }
    }

    fn parse_routes(data: &[u8]) -> Result<Self> {
        let mut routes = Vec::new();
        let mut index = 0;
        while index < data.len() {
            let prefix_len = data[index];
            if prefix_len > 32 {
                return Err(Error::InvalidPacket(format!(
                    "Invalid route prefix length: {}",
                    prefix_len
                )));
            }
            let octets = (prefix_len as usize).div_ceil(8);
            if index + 1 + octets + 4 > data.len() {
                return Err(Error::InvalidPacket("Route data truncated".to_string()));
            }
            let mut dest = [0u8; 4];
            dest[..octets].copy_from_slice(&data[index + 1..index + 1 + octets]);
            let gw = &data[index + 1 + octets..index + 1 + octets + 4];
            routes.push(Route {
                dest: Ipv4Addr::from(dest),
                prefix_len,
                gateway: Ipv4Addr::new(gw[0], gw[1], gw[2], gw[3]),
            });
            index += 1 + octets + 4;
        }
        Ok(Self::StaticRoutes(routes))
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::SubnetMask(addr) => encode_ipv4(OptionCode::SubnetMask, *addr),
            Self::Router(addrs) => encode_ipv4_list(OptionCode::Router, addrs),
            Self::DnsServer(addrs) => encode_ipv4_list(OptionCode::DnsServer, addrs),
            Self::DomainName(name) => encode_bytes(OptionCode::DomainName, name.as_bytes()),
            Self::BroadcastAddress(addr) => encode_ipv4(OptionCode::BroadcastAddress, *addr),
            Self::RequestedIpAddress(addr) => encode_ipv4(OptionCode::RequestedIpAddress, *addr),
            Self::LeaseTime(time) => encode_u32(OptionCode::LeaseTime, *time),
            Self::MessageType(msg_type) => {
                vec![OptionCode::MessageType as u8, 1, *msg_type as u8]
            }
            Self::ServerIdentifier(addr) => encode_ipv4(OptionCode::ServerIdentifier, *addr),
            Self::ParameterRequestList(params) => {
                encode_bytes(OptionCode::ParameterRequestList, params)
            }
            Self::RenewalTime(time) => encode_u32(OptionCode::RenewalTime, *time),
            Self::RebindingTime(time) => encode_u32(OptionCode::RebindingTime, *time),
            Self::ClientIdentifier(data) => encode_bytes(OptionCode::ClientIdentifier, data),
            Self::InterfaceMtu(mtu) => {
                let mut result = vec![OptionCode::InterfaceMtu as u8, 2];
                result.extend_from_slice(&mtu.to_be_bytes());
                result
            }
            Self::RelayAgentInfo(data) => encode_bytes(OptionCode::RelayAgentInfo, data),
            Self::StaticRoutes(routes) => {
                let mut payload = Vec::new();
                for route in routes {
                    payload.push(route.prefix_len);
                    payload
                        .extend_from_slice(&route.dest.octets()[..route.significant_octets()]);
                    payload.extend_from_slice(&route.gateway.octets());
                }
                encode_bytes(OptionCode::ClasslessStaticRoute, &payload)
            }
            Self::Unknown(code, data) => {
                let mut result = vec![*code, data.len() as u8];
                result.extend_from_slice(data);
                result
            }
        }
    }
}

fn encode_ipv4(code: OptionCode, addr: Ipv4Addr) -> Vec<u8> {
    let mut result = vec![code as u8, 4];
    result.extend_from_slice(&addr.octets());
    result
}

fn encode_ipv4_list(code: OptionCode, addrs: &[Ipv4Addr]) -> Vec<u8> {
    let mut result = vec![code as u8, (addrs.len() * 4) as u8];
    for addr in addrs {
        result.extend_from_slice(&addr.octets());
    }
    result
}

fn encode_bytes(code: OptionCode, data: &[u8]) -> Vec<u8> {
    let mut result = vec![code as u8, data.len() as u8];
    result.extend_from_slice(data);
    result
}

fn encode_u32(code: OptionCode, value: u32) -> Vec<u8> {
    let mut result = vec![code as u8, 4];
    result.extend_from_slice(&value.to_be_bytes());
    result
}
