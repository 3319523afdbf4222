//! The `dns` plugin answers DNS server requests for both protocols.
//!
//! Arguments: one or more DNS server addresses, matching the protocol
//! version the plugin is configured under.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::options4::{DhcpOption, OptionCode};
use crate::packet4::Packet4;
use crate::packet6::{Dhcp6Option, Message6, OPT_DNS_SERVERS, Packet6};
use crate::plugin::{Handler4, Handler6, Plugin};

const NAME: &str = "dns";

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        setup4: Some(setup4),
        setup6: Some(setup6),
    }
}

struct DnsV4 {
    servers: Vec<Ipv4Addr>,
}

#[async_trait]
impl Handler4 for DnsV4 {
    async fn handle(&self, req: &Packet4, mut resp: Packet4) -> (Option<Packet4>, bool) {
        if req.is_option_requested(OptionCode::DnsServer) {
            resp.update_option(DhcpOption::DnsServer(self.servers.clone()));
        }
        (Some(resp), false)
    }
}

struct DnsV6 {
    servers: Vec<Ipv6Addr>,
}

#[async_trait]
impl Handler6 for DnsV6 {
    async fn handle(&self, req: &Packet6, mut resp: Message6) -> (Option<Message6>, bool) {
        let inner = match req.inner_message() {
            Ok(inner) => inner,
            Err(err) => {
                error!("could not decapsulate relayed message: {}", err);
                return (None, true);
            }
        };
        if inner.is_option_requested(OPT_DNS_SERVERS) {
            resp.update_option(Dhcp6Option::DnsServers(self.servers.clone()));
        }
        (Some(resp), false)
    }
}

fn setup4(args: &[String]) -> Result<Arc<dyn Handler4>> {
    if args.is_empty() {
        return Err(Error::setup(NAME, "need at least one DNS server"));
    }
    let servers = args
        .iter()
        .map(|arg| {
            arg.parse::<Ipv4Addr>()
                .map_err(|_| Error::setup(NAME, format!("expected a DNS server address, got: {}", arg)))
        })
        .collect::<Result<Vec<_>>>()?;
    info!("loaded {} DNS servers", servers.len());
    Ok(Arc::new(DnsV4 { servers }))
}

fn setup6(args: &[String]) -> Result<Arc<dyn Handler6>> {
    if args.is_empty() {
        return Err(Error::setup(NAME, "need at least one DNS server"));
    }
    let servers = args
        .iter()
        .map(|arg| {
            arg.parse::<Ipv6Addr>()
                .map_err(|_| Error::setup(NAME, format!("expected a DNS server address, got: {}", arg)))
        })
        .collect::<Result<Vec<_>>>()?;
    info!("loaded {} DNS servers", servers.len());
    Ok(Arc::new(DnsV6 { servers }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet4::BOOTREQUEST;
    use crate::packet6::MessageType;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn request_with_prl(codes: &[OptionCode]) -> Packet4 {
        Packet4 {
            op: BOOTREQUEST,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 1,
            secs: 0,
            flags: 0,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0; 16],
            sname: [0; 64],
            file: [0; 128],
            options: vec![DhcpOption::ParameterRequestList(
                codes.iter().map(|code| *code as u8).collect(),
            )],
        }
    }

    #[test]
    fn test_setup_validation() {
        assert!(setup4(&[]).is_err());
        assert!(setup4(&args(&["not-an-ip"])).is_err());
        assert!(setup4(&args(&["8.8.8.8", "::1"])).is_err());
        assert!(setup4(&args(&["8.8.8.8", "8.8.4.4"])).is_ok());

        assert!(setup6(&[]).is_err());
        assert!(setup6(&args(&["8.8.8.8"])).is_err());
        assert!(setup6(&args(&["2001:4860:4860::8888"])).is_ok());
    }

    #[tokio::test]
    async fn test_v4_sets_servers_when_requested() {
        let handler = setup4(&args(&["8.8.8.8"])).unwrap();
        let req = request_with_prl(&[OptionCode::DnsServer]);
        let (resp, stop) = handler.handle(&req, Packet4::reply_to(&req)).await;
        assert!(!stop);
        let resp = resp.unwrap();
        assert!(
            resp.options
                .iter()
                .any(|option| matches!(option, DhcpOption::DnsServer(list) if list.len() == 1))
        );
    }

    #[tokio::test]
    async fn test_v4_skips_unrequested() {
        let handler = setup4(&args(&["8.8.8.8"])).unwrap();
        let req = request_with_prl(&[OptionCode::Router]);
        let (resp, _) = handler.handle(&req, Packet4::reply_to(&req)).await;
        assert!(!resp.unwrap().has_option(OptionCode::DnsServer));
    }

    #[tokio::test]
    async fn test_v6_answers_oro() {
        let handler = setup6(&args(&["2001:db8::53"])).unwrap();
        let mut solicit = Message6::new(MessageType::Solicit, [0, 0, 1]);
        solicit.add_option(Dhcp6Option::Oro(vec![OPT_DNS_SERVERS]));
        let req = Packet6::Message(solicit);
        let resp = req.reply_skeleton().unwrap();
        let (resp, stop) = handler.handle(&req, resp).await;
        assert!(!stop);
        assert!(resp.unwrap().has_option(OPT_DNS_SERVERS));
    }
}
