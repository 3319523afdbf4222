//! Dispatch engines and server lifecycle.
//!
//! One dispatcher exists per protocol version, holding the instantiated
//! plugin chain. Every bound socket runs its own receive loop and every
//! datagram is handled on its own task, so packets are processed in
//! parallel while the chain for a single packet always runs sequentially.
//!
//! A response is transmitted only when some handler returned `stop=true`
//! together with a response. Option-annotating plugins that merely pass the
//! response along never cause a transmission on their own.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::listener::{self, DHCPV4_CLIENT_PORT, DHCPV4_SERVER_PORT, ProtocolVersion};
use crate::options4::{DhcpOption, MessageType};
use crate::packet4::{BOOTREQUEST, Packet4};
use crate::packet6::{Message6, Packet6};
use crate::plugin::{ChainLink4, ChainLink6, PluginRegistry, build_chain4, build_chain6};

const RECV_BUFFER_SIZE: usize = 1500;

pub struct Dispatcher4 {
    chain: Vec<ChainLink4>,
}

impl Dispatcher4 {
    pub fn new(chain: Vec<ChainLink4>) -> Self {
        Self { chain }
    }

    /// Runs the plugin chain over `req`. Returns the response to transmit,
    /// or `None` when the packet is to be dropped.
    pub async fn run_chain(&self, req: &Packet4) -> Option<Packet4> {
        let mut resp = Packet4::reply_to(req);
        match req.message_type() {
            Some(MessageType::Discover) => {
                resp.update_option(DhcpOption::MessageType(MessageType::Offer));
            }
            Some(MessageType::Request) | Some(MessageType::Inform) => {
                resp.update_option(DhcpOption::MessageType(MessageType::Ack));
            }
            other => {
                debug!(message_type = ?other, "no reply type for message, plugins decide");
            }
        }

        for link in &self.chain {
            let (next, stop) = link
                .handler
                .handle(req, resp)
                .instrument(link.span.clone())
                .await;
            match next {
                None => {
                    debug!(plugin = %link.name, "handler dropped the packet");
                    return None;
                }
                Some(next) => {
                    resp = next;
                    if stop {
                        return Some(resp);
                    }
                }
            }
        }

        debug!("no plugin completed the response, dropping packet");
        None
    }

    async fn handle_datagram(&self, data: &[u8], peer: SocketAddr, socket: &UdpSocket) {
        let req = match Packet4::parse(data) {
            Ok(req) => req,
            Err(error) => {
                warn!(%peer, "failed to decode DHCPv4 packet: {}", error);
                return;
            }
        };
        if req.op != BOOTREQUEST {
            debug!(%peer, op = req.op, "ignoring non-BOOTREQUEST packet");
            return;
        }

        let mac = req.mac_address();
        if let Some(message_type) = req.message_type() {
            info!("{} from {} ({})", message_type, mac, peer);
        }

        let Some(resp) = self.run_chain(&req).await else {
            return;
        };

        let destination = reply_destination4(&req);
        match socket.send_to(&resp.encode(), destination).await {
            Ok(_) => debug!(%destination, "sent DHCPv4 reply to {}", mac),
            Err(error) => error!(%destination, "failed to send DHCPv4 reply: {}", error),
        }
    }
}

/// Where a DHCPv4 reply goes: a relay if one forwarded the request, the
/// client's current address on a renewal, otherwise limited broadcast (the
/// client has no usable unicast address yet).
pub(crate) fn reply_destination4(req: &Packet4) -> SocketAddr {
    if req.giaddr != Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(IpAddr::V4(req.giaddr), DHCPV4_SERVER_PORT)
    } else if req.ciaddr != Ipv4Addr::UNSPECIFIED {
        SocketAddr::new(IpAddr::V4(req.ciaddr), DHCPV4_CLIENT_PORT)
    } else {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DHCPV4_CLIENT_PORT)
    }
}

pub struct Dispatcher6 {
    chain: Vec<ChainLink6>,
}

impl Dispatcher6 {
    pub fn new(chain: Vec<ChainLink6>) -> Self {
        Self { chain }
    }

    pub async fn run_chain(&self, req: &Packet6) -> Option<Message6> {
        let mut resp = match req.reply_skeleton() {
            Ok(resp) => resp,
            Err(error) => {
                warn!("cannot build reply skeleton: {}", error);
                return None;
            }
        };

        for link in &self.chain {
            let (next, stop) = link
                .handler
                .handle(req, resp)
                .instrument(link.span.clone())
                .await;
            match next {
                None => {
                    debug!(plugin = %link.name, "handler dropped the packet");
                    return None;
                }
                Some(next) => {
                    resp = next;
                    if stop {
                        return Some(resp);
                    }
                }
            }
        }

        debug!("no plugin completed the response, dropping packet");
        None
    }

    async fn handle_datagram(&self, data: &[u8], peer: SocketAddr, socket: &UdpSocket) {
        let req = match Packet6::parse(data) {
            Ok(req) => req,
            Err(error) => {
                warn!(%peer, "failed to decode DHCPv6 packet: {}", error);
                return;
            }
        };
        if !req.msg_type().is_client_originated() {
            debug!(%peer, msg_type = ?req.msg_type(), "ignoring server-originated message");
            return;
        }
        match req.inner_message() {
            Ok(inner) if inner.msg_type.is_client_originated() => {
                info!("{:?} from {}", inner.msg_type, peer);
            }
            Ok(inner) => {
                debug!(%peer, msg_type = ?inner.msg_type, "ignoring relayed server message");
                return;
            }
            Err(error) => {
                warn!(%peer, "malformed relay message: {}", error);
                return;
            }
        }

        let Some(resp) = self.run_chain(&req).await else {
            return;
        };

        // The reply travels the same relay path the request took, so the
        // datagram source (client or outermost relay) is the destination.
        let out = req.wrap_reply(resp);
        match socket.send_to(&out.encode(), peer).await {
            Ok(_) => debug!(%peer, "sent DHCPv6 reply"),
            Err(error) => error!(%peer, "failed to send DHCPv6 reply: {}", error),
        }
    }
}

enum BoundListener {
    V4(Arc<Dispatcher4>, UdpSocket),
    V6(Arc<Dispatcher6>, UdpSocket),
}

/// A running server: one receive loop per bound socket.
pub struct Server {
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Builds the chains, binds every listener and launches the receive
    /// loops. Any failure is returned before a single loop is spawned; the
    /// already-bound sockets are closed on drop.
    pub async fn start(config: &Config, registry: &PluginRegistry) -> Result<Self> {
        let mut listeners = Vec::new();

        if let Some(server4) = &config.server4 {
            let dispatcher = Arc::new(Dispatcher4::new(build_chain4(registry, server4)?));
            for target in &server4.addresses {
                let socket = listener::bind(target, ProtocolVersion::V4)?;
                info!(listener = %target, "DHCPv4 listener bound");
                listeners.push(BoundListener::V4(Arc::clone(&dispatcher), socket));
            }
        }

        if let Some(server6) = &config.server6 {
            let dispatcher = Arc::new(Dispatcher6::new(build_chain6(registry, server6)?));
            for target in &server6.addresses {
                let socket = listener::bind(target, ProtocolVersion::V6)?;
                info!(listener = %target, "DHCPv6 listener bound");
                listeners.push(BoundListener::V6(Arc::clone(&dispatcher), socket));
            }
        }

        let tasks = listeners
            .into_iter()
            .map(|bound| match bound {
                BoundListener::V4(dispatcher, socket) => {
                    tokio::spawn(receive_loop4(dispatcher, Arc::new(socket)))
                }
                BoundListener::V6(dispatcher, socket) => {
                    tokio::spawn(receive_loop6(dispatcher, Arc::new(socket)))
                }
            })
            .collect();

        Ok(Self { tasks })
    }

    /// Blocks until every receive loop has exited, which only happens on a
    /// fatal socket error.
    pub async fn wait(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn receive_loop4(dispatcher: Arc<Dispatcher4>, socket: Arc<UdpSocket>) {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((size, peer)) => {
                let data = buffer[..size].to_vec();
                let dispatcher = Arc::clone(&dispatcher);
                let socket = Arc::clone(&socket);
                tokio::spawn(async move {
                    dispatcher.handle_datagram(&data, peer, &socket).await;
                });
            }
            Err(error) => {
                error!("DHCPv4 receive loop terminated: {}", error);
                return;
            }
        }
    }
}

async fn receive_loop6(dispatcher: Arc<Dispatcher6>, socket: Arc<UdpSocket>) {
    let mut buffer = [0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((size, peer)) => {
                let data = buffer[..size].to_vec();
                let dispatcher = Arc::clone(&dispatcher);
                let socket = Arc::clone(&socket);
                tokio::spawn(async move {
                    dispatcher.handle_datagram(&data, peer, &socket).await;
                });
            }
            Err(error) => {
                error!("DHCPv6 receive loop terminated: {}", error);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet6::MessageType as MessageType6;
    use crate::plugin::{Handler4, Handler6};
    use async_trait::async_trait;
    use std::sync::Mutex;

    enum Action {
        Continue,
        Stop,
        Drop,
    }

    struct Recording {
        name: &'static str,
        action: Action,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Handler4 for Recording {
        async fn handle(&self, _req: &Packet4, resp: Packet4) -> (Option<Packet4>, bool) {
            self.log.lock().unwrap().push(self.name);
            match self.action {
                Action::Continue => (Some(resp), false),
                Action::Stop => (Some(resp), true),
                Action::Drop => (None, true),
            }
        }
    }

    fn chain(
        specs: Vec<(&'static str, Action)>,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Dispatcher4 {
        Dispatcher4::new(
            specs
                .into_iter()
                .map(|(name, action)| ChainLink4 {
                    name: name.to_string(),
                    span: tracing::info_span!("plugin", plugin = name),
                    handler: Arc::new(Recording {
                        name,
                        action,
                        log: Arc::clone(log),
                    }) as Arc<dyn Handler4>,
                })
                .collect(),
        )
    }

    fn discover() -> Packet4 {
        Packet4 {
            op: BOOTREQUEST,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0xabcd,
            secs: 0,
            flags: 0x8000,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [
                0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            ],
            sname: [0; 64],
            file: [0; 128],
            options: vec![DhcpOption::MessageType(MessageType::Discover)],
        }
    }

    #[tokio::test]
    async fn test_handlers_run_in_declaration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = chain(
            vec![
                ("first", Action::Continue),
                ("second", Action::Continue),
                ("third", Action::Stop),
            ],
            &log,
        );
        let resp = dispatcher.run_chain(&discover()).await;
        assert!(resp.is_some());
        assert_eq!(*log.lock().unwrap(), ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_no_stop_means_no_send() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = chain(
            vec![("first", Action::Continue), ("second", Action::Continue)],
            &log,
        );
        assert!(dispatcher.run_chain(&discover()).await.is_none());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_skips_rest_of_chain() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = chain(
            vec![("first", Action::Stop), ("second", Action::Continue)],
            &log,
        );
        assert!(dispatcher.run_chain(&discover()).await.is_some());
        assert_eq!(*log.lock().unwrap(), ["first"]);
    }

    #[tokio::test]
    async fn test_drop_stops_traversal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = chain(vec![("first", Action::Drop), ("second", Action::Stop)], &log);
        assert!(dispatcher.run_chain(&discover()).await.is_none());
        assert_eq!(*log.lock().unwrap(), ["first"]);
    }

    #[tokio::test]
    async fn test_discover_skeleton_is_offer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = chain(vec![("only", Action::Stop)], &log);
        let resp = dispatcher.run_chain(&discover()).await.unwrap();
        assert_eq!(resp.message_type(), Some(MessageType::Offer));
        assert_eq!(resp.xid, 0xabcd);
    }

    #[test]
    fn test_reply_destination_relay() {
        let mut req = discover();
        req.giaddr = Ipv4Addr::new(10, 1, 1, 1);
        req.ciaddr = Ipv4Addr::new(192, 0, 2, 50);
        assert_eq!(
            reply_destination4(&req),
            "10.1.1.1:67".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_reply_destination_renewal() {
        let mut req = discover();
        req.ciaddr = Ipv4Addr::new(192, 0, 2, 50);
        assert_eq!(
            reply_destination4(&req),
            "192.0.2.50:68".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_reply_destination_broadcast() {
        let req = discover();
        assert_eq!(
            reply_destination4(&req),
            "255.255.255.255:68".parse::<SocketAddr>().unwrap()
        );
    }

    struct Stopper6;

    #[async_trait]
    impl Handler6 for Stopper6 {
        async fn handle(&self, _req: &Packet6, resp: Message6) -> (Option<Message6>, bool) {
            (Some(resp), true)
        }
    }

    #[tokio::test]
    async fn test_v6_chain_builds_skeleton_from_inner() {
        let dispatcher = Dispatcher6::new(vec![ChainLink6 {
            name: "stopper".to_string(),
            span: tracing::info_span!("plugin", plugin = "stopper"),
            handler: Arc::new(Stopper6) as Arc<dyn Handler6>,
        }]);
        let solicit = Message6::new(MessageType6::Solicit, [7, 8, 9]);
        let resp = dispatcher
            .run_chain(&Packet6::Message(solicit))
            .await
            .unwrap();
        assert_eq!(resp.msg_type, MessageType6::Advertise);
        assert_eq!(resp.xid, [7, 8, 9]);
    }
}
