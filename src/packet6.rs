//! DHCPv6 wire format: client/server messages, relay envelopes, options.
//!
//! Relay-Forward chains are parsed eagerly, so a relayed packet is a nested
//! structure and the dispatcher can hand plugins the whole thing while they
//! use [`Packet6::inner_message`] to reach the client message. Building a
//! reply re-walks the same chain and emits a Relay-Reply per hop.

use std::net::Ipv6Addr;

use macaddr::MacAddr6;

use crate::error::{Error, Result};

/// Maximum relay nesting accepted while parsing. RFC 8415 relays stop
/// forwarding at hop count 32, anything deeper is hostile input.
const MAX_RELAY_DEPTH: usize = 32;

const HWTYPE_ETHERNET: u16 = 1;

pub const OPT_CLIENT_ID: u16 = 1;
pub const OPT_SERVER_ID: u16 = 2;
pub const OPT_IA_NA: u16 = 3;
pub const OPT_IA_ADDRESS: u16 = 5;
pub const OPT_ORO: u16 = 6;
pub const OPT_ELAPSED_TIME: u16 = 8;
pub const OPT_RELAY_MESSAGE: u16 = 9;
pub const OPT_STATUS_CODE: u16 = 13;
pub const OPT_RAPID_COMMIT: u16 = 14;
pub const OPT_INTERFACE_ID: u16 = 18;
pub const OPT_DNS_SERVERS: u16 = 23;
pub const OPT_CLIENT_LINK_LAYER_ADDR: u16 = 79;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Solicit = 1,
    Advertise = 2,
    Request = 3,
    Confirm = 4,
    Renew = 5,
    Rebind = 6,
    Reply = 7,
    Release = 8,
    Decline = 9,
    Reconfigure = 10,
    InformationRequest = 11,
    RelayForward = 12,
    RelayReply = 13,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Solicit),
            2 => Ok(Self::Advertise),
            3 => Ok(Self::Request),
            4 => Ok(Self::Confirm),
            5 => Ok(Self::Renew),
            6 => Ok(Self::Rebind),
            7 => Ok(Self::Reply),
            8 => Ok(Self::Release),
            9 => Ok(Self::Decline),
            10 => Ok(Self::Reconfigure),
            11 => Ok(Self::InformationRequest),
            12 => Ok(Self::RelayForward),
            13 => Ok(Self::RelayReply),
            other => Err(other),
        }
    }
}

impl MessageType {
    /// Message types a client (or a relay on its behalf) may send to a
    /// server.
    pub fn is_client_originated(self) -> bool {
        matches!(
            self,
            Self::Solicit
                | Self::Request
                | Self::Confirm
                | Self::Renew
                | Self::Rebind
                | Self::Release
                | Self::Decline
                | Self::InformationRequest
                | Self::RelayForward
        )
    }
}

/// DHCP unique identifier of a client or server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Duid {
    LinkLayerTime { hw_type: u16, time: u32, addr: Vec<u8> },
    LinkLayer { hw_type: u16, addr: Vec<u8> },
    Other { duid_type: u16, data: Vec<u8> },
}

impl Duid {
    pub fn link_layer(mac: MacAddr6) -> Self {
        Self::LinkLayer {
            hw_type: HWTYPE_ETHERNET,
            addr: mac.as_bytes().to_vec(),
        }
    }

    pub fn link_layer_time(mac: MacAddr6, time: u32) -> Self {
        Self::LinkLayerTime {
            hw_type: HWTYPE_ETHERNET,
            time,
            addr: mac.as_bytes().to_vec(),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(Error::InvalidPacket("DUID too short".to_string()));
        }
        let duid_type = u16::from_be_bytes([data[0], data[1]]);
        match duid_type {
            1 => {
                if data.len() < 8 {
                    return Err(Error::InvalidPacket("DUID-LLT too short".to_string()));
                }
                Ok(Self::LinkLayerTime {
                    hw_type: u16::from_be_bytes([data[2], data[3]]),
                    time: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
                    addr: data[8..].to_vec(),
                })
            }
            3 => {
                if data.len() < 4 {
                    return Err(Error::InvalidPacket("DUID-LL too short".to_string()));
                }
                Ok(Self::LinkLayer {
                    hw_type: u16::from_be_bytes([data[2], data[3]]),
                    addr: data[4..].to_vec(),
                })
            }
            _ => Ok(Self::Other {
                duid_type,
                data: data[2..].to_vec(),
            }),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::LinkLayerTime { hw_type, time, addr } => {
                let mut out = 1u16.to_be_bytes().to_vec();
                out.extend_from_slice(&hw_type.to_be_bytes());
                out.extend_from_slice(&time.to_be_bytes());
                out.extend_from_slice(addr);
                out
            }
            Self::LinkLayer { hw_type, addr } => {
                let mut out = 3u16.to_be_bytes().to_vec();
                out.extend_from_slice(&hw_type.to_be_bytes());
                out.extend_from_slice(addr);
                out
            }
            Self::Other { duid_type, data } => {
                let mut out = duid_type.to_be_bytes().to_vec();
                out.extend_from_slice(data);
                out
            }
        }
    }

    /// The embedded Ethernet address, for link-layer DUID forms.
    pub fn mac(&self) -> Option<MacAddr6> {
        let (hw_type, addr) = match self {
            Self::LinkLayerTime { hw_type, addr, .. } => (*hw_type, addr),
            Self::LinkLayer { hw_type, addr } => (*hw_type, addr),
            Self::Other { .. } => return None,
        };
        if hw_type != HWTYPE_ETHERNET || addr.len() != 6 {
            return None;
        }
        let mut octets = [0u8; 6];
        octets.copy_from_slice(addr);
        Some(MacAddr6::from(octets))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IaAddress {
    pub addr: Ipv6Addr,
    pub preferred_lifetime: u32,
    pub valid_lifetime: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IaNa {
    pub iaid: u32,
    pub t1: u32,
    pub t2: u32,
    pub addresses: Vec<IaAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dhcp6Option {
    ClientId(Duid),
    ServerId(Duid),
    IaNa(IaNa),
    Oro(Vec<u16>),
    ElapsedTime(u16),
    RelayMessage(Box<Packet6>),
    StatusCode { code: u16, message: String },
    RapidCommit,
    InterfaceId(Vec<u8>),
    DnsServers(Vec<Ipv6Addr>),
    ClientLinkLayerAddr { hw_type: u16, addr: Vec<u8> },
    Unknown(u16, Vec<u8>),
}

impl Dhcp6Option {
    pub fn code(&self) -> u16 {
        match self {
            Self::ClientId(_) => OPT_CLIENT_ID,
            Self::ServerId(_) => OPT_SERVER_ID,
            Self::IaNa(_) => OPT_IA_NA,
            Self::Oro(_) => OPT_ORO,
            Self::ElapsedTime(_) => OPT_ELAPSED_TIME,
            Self::RelayMessage(_) => OPT_RELAY_MESSAGE,
            Self::StatusCode { .. } => OPT_STATUS_CODE,
            Self::RapidCommit => OPT_RAPID_COMMIT,
            Self::InterfaceId(_) => OPT_INTERFACE_ID,
            Self::DnsServers(_) => OPT_DNS_SERVERS,
            Self::ClientLinkLayerAddr { .. } => OPT_CLIENT_LINK_LAYER_ADDR,
            Self::Unknown(code, _) => *code,
        }
    }

    fn parse(code: u16, data: &[u8], depth: usize) -> Result<Self> {
        match code {
            OPT_CLIENT_ID => Ok(Self::ClientId(Duid::parse(data)?)),
            OPT_SERVER_ID => Ok(Self::ServerId(Duid::parse(data)?)),
            OPT_IA_NA => {
                if data.len() < 12 {
                    return Err(Error::InvalidPacket("IA_NA too short".to_string()));
                }
                let iaid = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                let t1 = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
                let t2 = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
                let mut addresses = Vec::new();
                for (sub_code, sub_data) in OptionIter::new(&data[12..]) {
                    let sub_data = sub_data?;
                    if sub_code == OPT_IA_ADDRESS {
                        if sub_data.len() < 24 {
                            return Err(Error::InvalidPacket("IA address too short".to_string()));
                        }
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(&sub_data[..16]);
                        addresses.push(IaAddress {
                            addr: Ipv6Addr::from(octets),
                            preferred_lifetime: u32::from_be_bytes([
                                sub_data[16],
                                sub_data[17],
                                sub_data[18],
                                sub_data[19],
                            ]),
                            valid_lifetime: u32::from_be_bytes([
                                sub_data[20],
                                sub_data[21],
                                sub_data[22],
                                sub_data[23],
                            ]),
                        });
                    }
                }
                Ok(Self::IaNa(IaNa { iaid, t1, t2, addresses }))
            }
            OPT_ORO => {
                if data.len() % 2 != 0 {
                    return Err(Error::InvalidPacket("Odd ORO length".to_string()));
                }
                Ok(Self::Oro(
                    data.chunks_exact(2)
                        .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                        .collect(),
                ))
            }
            OPT_ELAPSED_TIME => {
                if data.len() != 2 {
                    return Err(Error::InvalidPacket("Invalid elapsed time".to_string()));
                }
                Ok(Self::ElapsedTime(u16::from_be_bytes([data[0], data[1]])))
            }
            OPT_RELAY_MESSAGE => Ok(Self::RelayMessage(Box::new(Packet6::parse_at_depth(
                data,
                depth + 1,
            )?))),
            OPT_STATUS_CODE => {
                if data.len() < 2 {
                    return Err(Error::InvalidPacket("Status code too short".to_string()));
                }
                Ok(Self::StatusCode {
                    code: u16::from_be_bytes([data[0], data[1]]),
                    message: String::from_utf8_lossy(&data[2..]).to_string(),
                })
            }
            OPT_RAPID_COMMIT => {
                if !data.is_empty() {
                    return Err(Error::InvalidPacket("Rapid commit with payload".to_string()));
                }
                Ok(Self::RapidCommit)
            }
            OPT_INTERFACE_ID => Ok(Self::InterfaceId(data.to_vec())),
            OPT_DNS_SERVERS => {
                if data.len() % 16 != 0 {
                    return Err(Error::InvalidPacket("Invalid DNS server list".to_string()));
                }
                Ok(Self::DnsServers(
                    data.chunks_exact(16)
                        .map(|chunk| {
                            let mut octets = [0u8; 16];
                            octets.copy_from_slice(chunk);
                            Ipv6Addr::from(octets)
                        })
                        .collect(),
                ))
            }
            OPT_CLIENT_LINK_LAYER_ADDR => {
                if data.len() < 2 {
                    return Err(Error::InvalidPacket(
                        "Client link-layer address too short".to_string(),
                    ));
                }
                Ok(Self::ClientLinkLayerAddr {
                    hw_type: u16::from_be_bytes([data[0], data[1]]),
                    addr: data[2..].to_vec(),
                })
            }
            other => Ok(Self::Unknown(other, data.to_vec())),
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Self::ClientId(duid) | Self::ServerId(duid) => duid.encode(),
            Self::IaNa(ia) => {
                let mut out = Vec::new();
                out.extend_from_slice(&ia.iaid.to_be_bytes());
                out.extend_from_slice(&ia.t1.to_be_bytes());
                out.extend_from_slice(&ia.t2.to_be_bytes());
                for address in &ia.addresses {
                    let mut sub = Vec::with_capacity(24);
                    sub.extend_from_slice(&address.addr.octets());
                    sub.extend_from_slice(&address.preferred_lifetime.to_be_bytes());
                    sub.extend_from_slice(&address.valid_lifetime.to_be_bytes());
                    out.extend_from_slice(&OPT_IA_ADDRESS.to_be_bytes());
                    out.extend_from_slice(&(sub.len() as u16).to_be_bytes());
                    out.extend_from_slice(&sub);
                }
                out
            }
            Self::Oro(codes) => codes.iter().flat_map(|code| code.to_be_bytes()).collect(),
            Self::ElapsedTime(time) => time.to_be_bytes().to_vec(),
            Self::RelayMessage(inner) => inner.encode(),
            Self::StatusCode { code, message } => {
                let mut out = code.to_be_bytes().to_vec();
                out.extend_from_slice(message.as_bytes());
                out
            }
            Self::RapidCommit => Vec::new(),
            Self::InterfaceId(data) => data.clone(),
            Self::DnsServers(addrs) => addrs.iter().flat_map(|addr| addr.octets()).collect(),
            Self::ClientLinkLayerAddr { hw_type, addr } => {
                let mut out = hw_type.to_be_bytes().to_vec();
                out.extend_from_slice(addr);
                out
            }
            Self::Unknown(_, data) => data.clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let mut out = self.code().to_be_bytes().to_vec();
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&payload);
        out
    }
}

/// Iterates `(code, payload)` pairs over a DHCPv6 option region.
struct OptionIter<'a> {
    data: &'a [u8],
    index: usize,
    failed: bool,
}

impl<'a> OptionIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, index: 0, failed: false }
    }
}

impl<'a> Iterator for OptionIter<'a> {
    type Item = (u16, Result<&'a [u8]>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= self.data.len() {
            return None;
        }
        if self.index + 4 > self.data.len() {
            self.failed = true;
            return Some((
                0,
                Err(Error::InvalidPacket("Option header truncated".to_string())),
            ));
        }
        let code = u16::from_be_bytes([self.data[self.index], self.data[self.index + 1]]);
        let length =
            u16::from_be_bytes([self.data[self.index + 2], self.data[self.index + 3]]) as usize;
        if self.index + 4 + length > self.data.len() {
            self.failed = true;
            return Some((
                code,
                Err(Error::InvalidPacket("Option data truncated".to_string())),
            ));
        }
        let payload = &self.data[self.index + 4..self.index + 4 + length];
        self.index += 4 + length;
        Some((code, Ok(payload)))
    }
}

fn parse_options(data: &[u8], depth: usize) -> Result<Vec<Dhcp6Option>> {
    let mut options = Vec::new();
    for (code, payload) in OptionIter::new(data) {
        options.push(Dhcp6Option::parse(code, payload?, depth)?);
    }
    Ok(options)
}

/// A client/server DHCPv6 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message6 {
    pub msg_type: MessageType,
    pub xid: [u8; 3],
    pub options: Vec<Dhcp6Option>,
}

impl Message6 {
    pub fn new(msg_type: MessageType, xid: [u8; 3]) -> Self {
        Self {
            msg_type,
            xid,
            options: Vec::new(),
        }
    }

    pub fn client_id(&self) -> Option<&Duid> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::ClientId(duid) => Some(duid),
            _ => None,
        })
    }

    pub fn server_id(&self) -> Option<&Duid> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::ServerId(duid) => Some(duid),
            _ => None,
        })
    }

    pub fn one_ia_na(&self) -> Option<&IaNa> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::IaNa(ia) => Some(ia),
            _ => None,
        })
    }

    pub fn rapid_commit(&self) -> bool {
        self.has_option(OPT_RAPID_COMMIT)
    }

    /// True when `code` appears in the client's option request option.
    pub fn is_option_requested(&self, code: u16) -> bool {
        self.options.iter().any(|option| match option {
            Dhcp6Option::Oro(codes) => codes.contains(&code),
            _ => false,
        })
    }

    pub fn has_option(&self, code: u16) -> bool {
        self.options.iter().any(|option| option.code() == code)
    }

    pub fn add_option(&mut self, option: Dhcp6Option) {
        self.options.push(option);
    }

    /// Inserts the option, replacing any existing option with the same code.
    pub fn update_option(&mut self, option: Dhcp6Option) {
        let code = option.code();
        self.options.retain(|existing| existing.code() != code);
        self.options.push(option);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.msg_type as u8];
        out.extend_from_slice(&self.xid);
        for option in &self.options {
            out.extend_from_slice(&option.encode());
        }
        out
    }
}

/// A Relay-Forward or Relay-Reply envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage6 {
    pub msg_type: MessageType,
    pub hop_count: u8,
    pub link_addr: Ipv6Addr,
    pub peer_addr: Ipv6Addr,
    pub options: Vec<Dhcp6Option>,
}

impl RelayMessage6 {
    pub fn relayed_packet(&self) -> Option<&Packet6> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::RelayMessage(inner) => Some(inner.as_ref()),
            _ => None,
        })
    }

    pub fn interface_id(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|option| match option {
            Dhcp6Option::InterfaceId(id) => Some(id.as_slice()),
            _ => None,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.msg_type as u8, self.hop_count];
        out.extend_from_slice(&self.link_addr.octets());
        out.extend_from_slice(&self.peer_addr.octets());
        for option in &self.options {
            out.extend_from_slice(&option.encode());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet6 {
    Message(Message6),
    Relay(RelayMessage6),
}

impl Packet6 {
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_at_depth(data, 0)
    }

    fn parse_at_depth(data: &[u8], depth: usize) -> Result<Self> {
        if depth > MAX_RELAY_DEPTH {
            return Err(Error::InvalidPacket("Relay chain too deep".to_string()));
        }
        if data.is_empty() {
            return Err(Error::InvalidPacket("Empty DHCPv6 packet".to_string()));
        }
        let msg_type = MessageType::try_from(data[0])
            .map_err(|value| Error::InvalidPacket(format!("Unknown message type: {}", value)))?;

        match msg_type {
            MessageType::RelayForward | MessageType::RelayReply => {
                if data.len() < 34 {
                    return Err(Error::InvalidPacket("Relay message too short".to_string()));
                }
                let mut link = [0u8; 16];
                link.copy_from_slice(&data[2..18]);
                let mut peer = [0u8; 16];
                peer.copy_from_slice(&data[18..34]);
                Ok(Self::Relay(RelayMessage6 {
                    msg_type,
                    hop_count: data[1],
                    link_addr: Ipv6Addr::from(link),
                    peer_addr: Ipv6Addr::from(peer),
                    options: parse_options(&data[34..], depth)?,
                }))
            }
            _ => {
                if data.len() < 4 {
                    return Err(Error::InvalidPacket("Message too short".to_string()));
                }
                Ok(Self::Message(Message6 {
                    msg_type,
                    xid: [data[1], data[2], data[3]],
                    options: parse_options(&data[4..], depth)?,
                }))
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Message(message) => message.encode(),
            Self::Relay(relay) => relay.encode(),
        }
    }

    pub fn msg_type(&self) -> MessageType {
        match self {
            Self::Message(message) => message.msg_type,
            Self::Relay(relay) => relay.msg_type,
        }
    }

    /// Unwraps any Relay-Forward nesting and returns the client message.
    pub fn inner_message(&self) -> Result<&Message6> {
        let mut current = self;
        loop {
            match current {
                Self::Message(message) => return Ok(message),
                Self::Relay(relay) => {
                    current = relay.relayed_packet().ok_or_else(|| {
                        Error::InvalidPacket("Relay message without payload".to_string())
                    })?;
                }
            }
        }
    }

    /// Number of relay envelopes around the client message.
    pub fn relay_depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self;
        while let Self::Relay(relay) = current {
            depth += 1;
            match relay.relayed_packet() {
                Some(inner) => current = inner,
                None => break,
            }
        }
        depth
    }

    /// Builds the reply skeleton for this request: an Advertise for a
    /// Solicit (a Reply when rapid commit was requested), a Reply for every
    /// other client message, with the transaction id carried over.
    pub fn reply_skeleton(&self) -> Result<Message6> {
        let inner = self.inner_message()?;
        let reply_type = match inner.msg_type {
            MessageType::Solicit if !inner.rapid_commit() => MessageType::Advertise,
            MessageType::Solicit
            | MessageType::Request
            | MessageType::Confirm
            | MessageType::Renew
            | MessageType::Rebind
            | MessageType::Release
            | MessageType::Decline
            | MessageType::InformationRequest => MessageType::Reply,
            other => {
                return Err(Error::InvalidPacket(format!(
                    "No reply defined for {:?}",
                    other
                )));
            }
        };
        Ok(Message6::new(reply_type, inner.xid))
    }

    /// Wraps `reply` in a Relay-Reply chain mirroring this request: same
    /// depth, same per-hop link and peer addresses, Interface-Id echoed.
    pub fn wrap_reply(&self, reply: Message6) -> Packet6 {
        match self {
            Self::Message(_) => Packet6::Message(reply),
            Self::Relay(relay) => {
                let inner = match relay.relayed_packet() {
                    Some(inner) => inner.wrap_reply(reply),
                    None => Packet6::Message(reply),
                };
                let mut options = vec![Dhcp6Option::RelayMessage(Box::new(inner))];
                if let Some(interface_id) = relay.interface_id() {
                    options.push(Dhcp6Option::InterfaceId(interface_id.to_vec()));
                }
                Packet6::Relay(RelayMessage6 {
                    msg_type: MessageType::RelayReply,
                    hop_count: relay.hop_count,
                    link_addr: relay.link_addr,
                    peer_addr: relay.peer_addr,
                    options,
                })
            }
        }
    }

    /// Best-effort client MAC: the innermost relay's client link-layer
    /// address option when relayed, otherwise the link-layer client DUID.
    pub fn extract_mac(&self) -> Result<MacAddr6> {
        let mut innermost_relay = None;
        let mut current = self;
        while let Self::Relay(relay) = current {
            innermost_relay = Some(relay);
            match relay.relayed_packet() {
                Some(inner) => current = inner,
                None => break,
            }
        }

        if let Some(relay) = innermost_relay {
            let lladdr = relay.options.iter().find_map(|option| match option {
                Dhcp6Option::ClientLinkLayerAddr { hw_type, addr }
                    if *hw_type == HWTYPE_ETHERNET && addr.len() == 6 =>
                {
                    let mut octets = [0u8; 6];
                    octets.copy_from_slice(addr);
                    Some(MacAddr6::from(octets))
                }
                _ => None,
            });
            if let Some(mac) = lladdr {
                return Ok(mac);
            }
        }

        self.inner_message()?
            .client_id()
            .and_then(Duid::mac)
            .ok_or_else(|| Error::InvalidPacket("No client MAC available".to_string()))
    }
}
