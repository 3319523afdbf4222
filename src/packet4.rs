use std::net::Ipv4Addr;

use macaddr::MacAddr6;

use crate::error::{Error, Result};
use crate::options4::{DhcpOption, MessageType, OptionCode};

const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
pub const BOOTREQUEST: u8 = 1;
pub const BOOTREPLY: u8 = 2;
pub const HTYPE_ETHERNET: u8 = 1;
pub const HLEN_ETHERNET: u8 = 6;

#[derive(Debug, Clone)]
pub struct Packet4 {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Vec<DhcpOption>,
}

impl Packet4 {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 240 {
            return Err(Error::InvalidPacket(format!(
                "Packet too short: {} bytes (minimum 240)",
                data.len()
            )));
        }

        let magic_cookie = &data[236..240];
        if magic_cookie != DHCP_MAGIC_COOKIE {
            return Err(Error::InvalidPacket("Invalid magic cookie".to_string()));
        }

        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];

        let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let secs = u16::from_be_bytes([data[8], data[9]]);
        let flags = u16::from_be_bytes([data[10], data[11]]);

        let ciaddr = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let yiaddr = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
        let siaddr = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
        let giaddr = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);

        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);

        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        let options = Self::parse_options(&data[240..])?;

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            sname,
            file,
            options,
        })
    }

    fn parse_options(data: &[u8]) -> Result<Vec<DhcpOption>> {
        let mut options = Vec::new();
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            if index + 1 >= data.len() {
                return Err(Error::InvalidPacket("Option length missing".to_string()));
            }

            let length = data[index + 1] as usize;

            if index + 2 + length > data.len() {
                return Err(Error::InvalidPacket("Option data truncated".to_string()));
            }

            let option_data = &data[index + 2..index + 2 + length];
            options.push(DhcpOption::parse(code, option_data)?);

            index += 2 + length;
        }

        Ok(options)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(576);

        packet.push(self.op);
        packet.push(self.htype);
        packet.push(self.hlen);
        packet.push(self.hops);

        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());

        packet.extend_from_slice(&self.ciaddr.octets());
        packet.extend_from_slice(&self.yiaddr.octets());
        packet.extend_from_slice(&self.siaddr.octets());
        packet.extend_from_slice(&self.giaddr.octets());

        packet.extend_from_slice(&self.chaddr);
        packet.extend_from_slice(&self.sname);
        packet.extend_from_slice(&self.file);

        packet.extend_from_slice(&DHCP_MAGIC_COOKIE);

        for option in &self.options {
            packet.extend_from_slice(&option.encode());
        }

        packet.push(OptionCode::End as u8);

        while packet.len() < 300 {
            packet.push(0);
        }

        packet
    }

    pub fn message_type(&self) -> Option<MessageType> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::MessageType(msg_type) => Some(*msg_type),
            _ => None,
        })
    }

    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::RequestedIpAddress(ip) => Some(*ip),
            _ => None,
        })
    }

    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::ServerIdentifier(ip) => Some(*ip),
            _ => None,
        })
    }

    pub fn relay_agent_info(&self) -> Option<&[u8]> {
        self.options.iter().find_map(|option| match option {
            DhcpOption::RelayAgentInfo(info) => Some(info.as_slice()),
            _ => None,
        })
    }

    /// The client hardware address (Ethernet form of `chaddr`).
    pub fn mac_address(&self) -> MacAddr6 {
        let mut octets = [0u8; 6];
        octets.copy_from_slice(&self.chaddr[..6]);
        MacAddr6::from(octets)
    }

    pub fn is_broadcast(&self) -> bool {
        (self.flags & 0x8000) != 0
    }

    /// True when the client asked for `code` in its parameter request list.
    pub fn is_option_requested(&self, code: OptionCode) -> bool {
        self.options.iter().any(|option| match option {
            DhcpOption::ParameterRequestList(params) => params.contains(&(code as u8)),
            _ => false,
        })
    }

    pub fn has_option(&self, code: OptionCode) -> bool {
        self.options.iter().any(|option| option.code() == code as u8)
    }

    /// Inserts the option, replacing any existing option with the same code.
    pub fn update_option(&mut self, option: DhcpOption) {
        let code = option.code();
        self.options.retain(|existing| existing.code() != code);
        self.options.push(option);
    }

    /// Builds the reply skeleton for `request`: BOOTREPLY with the
    /// transaction id, flags, hardware address and gateway address carried
    /// over, everything else zeroed. Plugins fill in the rest.
    pub fn reply_to(request: &Packet4) -> Self {
        Self {
            op: BOOTREPLY,
            htype: HTYPE_ETHERNET,
            hlen: HLEN_ETHERNET,
            hops: 0,
            xid: request.xid,
            secs: 0,
            flags: request.flags,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_discover_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 300];

        packet[0] = BOOTREQUEST;
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[3] = 0;

        packet[4..8].copy_from_slice(&0x12345678u32.to_be_bytes());
        packet[8..10].copy_from_slice(&0u16.to_be_bytes());
        packet[10..12].copy_from_slice(&0x8000u16.to_be_bytes());

        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);

        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        packet[240] = OptionCode::MessageType as u8;
        packet[241] = 1;
        packet[242] = MessageType::Discover as u8;

        packet[243] = OptionCode::ParameterRequestList as u8;
        packet[244] = 2;
        packet[245] = OptionCode::DnsServer as u8;
        packet[246] = OptionCode::Router as u8;

        packet[247] = OptionCode::End as u8;

        packet
    }

    #[test]
    fn test_parse_discover_packet() {
        let data = create_test_discover_packet();
        let packet = Packet4::parse(&data).unwrap();

        assert_eq!(packet.op, BOOTREQUEST);
        assert_eq!(packet.htype, HTYPE_ETHERNET);
        assert_eq!(packet.hlen, HLEN_ETHERNET);
        assert_eq!(packet.xid, 0x12345678);
        assert!(packet.is_broadcast());
        assert_eq!(packet.message_type(), Some(MessageType::Discover));
        assert_eq!(
            packet.mac_address(),
            MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff)
        );
    }

    #[test]
    fn test_packet_roundtrip() {
        let original_data = create_test_discover_packet();
        let packet = Packet4::parse(&original_data).unwrap();
        let encoded = packet.encode();

        let reparsed = Packet4::parse(&encoded).unwrap();
        assert_eq!(reparsed.op, packet.op);
        assert_eq!(reparsed.xid, packet.xid);
        assert_eq!(reparsed.mac_address(), packet.mac_address());
        assert_eq!(reparsed.message_type(), packet.message_type());
    }

    #[test]
    fn test_reply_skeleton() {
        let discover_data = create_test_discover_packet();
        let discover = Packet4::parse(&discover_data).unwrap();

        let reply = Packet4::reply_to(&discover);
        assert_eq!(reply.op, BOOTREPLY);
        assert_eq!(reply.xid, discover.xid);
        assert_eq!(reply.flags, discover.flags);
        assert_eq!(reply.chaddr, discover.chaddr);
        assert_eq!(reply.yiaddr, Ipv4Addr::UNSPECIFIED);
        assert!(reply.options.is_empty());
    }

    #[test]
    fn test_option_requested() {
        let data = create_test_discover_packet();
        let packet = Packet4::parse(&data).unwrap();

        assert!(packet.is_option_requested(OptionCode::DnsServer));
        assert!(packet.is_option_requested(OptionCode::Router));
        assert!(!packet.is_option_requested(OptionCode::InterfaceMtu));
    }

    #[test]
    fn test_update_option_replaces() {
        let data = create_test_discover_packet();
        let mut packet = Packet4::parse(&data).unwrap();

        packet.update_option(DhcpOption::LeaseTime(60));
        packet.update_option(DhcpOption::LeaseTime(3600));

        let times: Vec<_> = packet
            .options
            .iter()
            .filter(|option| matches!(option, DhcpOption::LeaseTime(_)))
            .collect();
        assert_eq!(times.len(), 1);
        assert_eq!(times[0], &DhcpOption::LeaseTime(3600));
    }

    #[test]
    fn test_packet_too_short() {
        let data = vec![0u8; 100];
        assert!(Packet4::parse(&data).is_err());
    }

    #[test]
    fn test_invalid_magic_cookie() {
        let mut data = vec![0u8; 300];
        data[236..240].copy_from_slice(&[0, 0, 0, 0]);
        assert!(Packet4::parse(&data).is_err());
    }
}
