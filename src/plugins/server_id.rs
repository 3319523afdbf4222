//! The `server_id` plugin stamps the server identity on replies and drops
//! requests addressed to a different server.
//!
//! DHCPv4 takes the server IPv4 address as its only argument. DHCPv6 takes a
//! DUID type (`ll` or `llt`) and an Ethernet MAC; `en`, `uuid` and opaque
//! DUID types are rejected at setup.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use macaddr::MacAddr6;
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::options4::DhcpOption;
use crate::packet4::{BOOTREQUEST, Packet4};
use crate::packet6::{Dhcp6Option, Duid, Message6, MessageType, Packet6};
use crate::plugin::{Handler4, Handler6, Plugin};

const NAME: &str = "server_id";

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        setup4: Some(setup4),
        setup6: Some(setup6),
    }
}

struct ServerIdV4 {
    server_id: Ipv4Addr,
}

#[async_trait]
impl Handler4 for ServerIdV4 {
    async fn handle(&self, req: &Packet4, mut resp: Packet4) -> (Option<Packet4>, bool) {
        if req.op != BOOTREQUEST {
            return (Some(resp), false);
        }
        if let Some(requested) = req.server_identifier()
            && requested != self.server_id
        {
            info!(
                "requested server ID does not match this server's ID. Got {}, want {}",
                requested, self.server_id
            );
            return (None, true);
        }
        resp.siaddr = self.server_id;
        resp.update_option(DhcpOption::ServerIdentifier(self.server_id));
        (Some(resp), false)
    }
}

struct ServerIdV6 {
    server_id: Duid,
}

#[async_trait]
impl Handler6 for ServerIdV6 {
    async fn handle(&self, req: &Packet6, mut resp: Message6) -> (Option<Message6>, bool) {
        let inner = match req.inner_message() {
            Ok(inner) => inner,
            Err(err) => {
                error!("could not decapsulate relayed message: {}", err);
                return (None, true);
            }
        };

        if let Some(requested) = inner.server_id() {
            // RFC 8415 wants these discarded when they name any server at
            // all, matching or not.
            if matches!(
                inner.msg_type,
                MessageType::Solicit | MessageType::Confirm | MessageType::Rebind
            ) {
                return (None, true);
            }
            if *requested != self.server_id {
                info!(
                    "requested server ID does not match this server's ID. Got {:?}, want {:?}",
                    requested, self.server_id
                );
                return (None, true);
            }
        } else if matches!(
            inner.msg_type,
            MessageType::Request | MessageType::Renew | MessageType::Decline | MessageType::Release
        ) {
            // And these are only valid when addressed to a specific server.
            return (None, true);
        }

        resp.update_option(Dhcp6Option::ServerId(self.server_id.clone()));
        (Some(resp), false)
    }
}

fn setup4(args: &[String]) -> Result<Arc<dyn Handler4>> {
    if args.is_empty() {
        return Err(Error::setup(NAME, "need an IPv4 address"));
    }
    let server_id: Ipv4Addr = args[0]
        .parse()
        .map_err(|_| Error::setup(NAME, format!("invalid IPv4 address: {}", args[0])))?;
    info!("using server ID {}", server_id);
    Ok(Arc::new(ServerIdV4 { server_id }))
}

fn setup6(args: &[String]) -> Result<Arc<dyn Handler6>> {
    if args.len() < 2 {
        return Err(Error::setup(NAME, "need a DUID type and value"));
    }
    let mac: MacAddr6 = args[1]
        .parse()
        .map_err(|_| Error::setup(NAME, format!("invalid hardware address: {}", args[1])))?;
    let server_id = match args[0].to_lowercase().as_str() {
        "ll" | "duid-ll" | "duid_ll" => Duid::link_layer(mac),
        "llt" | "duid-llt" | "duid_llt" => Duid::link_layer_time(mac, 0),
        "en" | "uuid" => {
            return Err(Error::setup(NAME, "EN/UUID DUID type not supported"));
        }
        other => {
            return Err(Error::setup(
                NAME,
                format!("opaque DUID type not supported: {}", other),
            ));
        }
    };
    info!("using {} {}", args[0], args[1]);
    Ok(Arc::new(ServerIdV6 { server_id }))
}
