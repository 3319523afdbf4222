//! End-to-end chain behavior over the public API: configuration parsing,
//! chain construction and dispatch semantics for both protocols.

use std::net::Ipv4Addr;

use macaddr::MacAddr6;

use dhcpflow::config::Config;
use dhcpflow::options4::{DhcpOption, MessageType, OptionCode};
use dhcpflow::packet4::{BOOTREQUEST, Packet4};
use dhcpflow::packet6::{
    Dhcp6Option, Duid, Message6, MessageType as MessageType6, Packet6, RelayMessage6,
};
use dhcpflow::plugin::{PluginRegistry, build_chain4, build_chain6};
use dhcpflow::plugins::register_builtin;
use dhcpflow::server::{Dispatcher4, Dispatcher6};

struct TestGuard(Vec<String>);
impl Drop for TestGuard {
    fn drop(&mut self) {
        for path in &self.0 {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn registry() -> PluginRegistry {
    let mut registry = PluginRegistry::new();
    register_builtin(&mut registry).unwrap();
    registry
}

fn client_mac() -> MacAddr6 {
    MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff)
}

fn discover(mac: MacAddr6, requested: &[OptionCode]) -> Packet4 {
    let mut chaddr = [0u8; 16];
    chaddr[..6].copy_from_slice(mac.as_bytes());
    Packet4 {
        op: BOOTREQUEST,
        htype: 1,
        hlen: 6,
        hops: 0,
        xid: 0x1234_5678,
        secs: 0,
        flags: 0x8000,
        ciaddr: Ipv4Addr::UNSPECIFIED,
        yiaddr: Ipv4Addr::UNSPECIFIED,
        siaddr: Ipv4Addr::UNSPECIFIED,
        giaddr: Ipv4Addr::UNSPECIFIED,
        chaddr,
        sname: [0; 64],
        file: [0; 128],
        options: vec![
            DhcpOption::MessageType(MessageType::Discover),
            DhcpOption::ParameterRequestList(requested.iter().map(|code| *code as u8).collect()),
        ],
    }
}

#[tokio::test]
async fn static_file_chain_produces_full_offer() {
    let leases = "test_e2e_static_leases.txt";
    std::fs::write(leases, "aa:bb:cc:dd:ee:ff 192.0.2.50\n").unwrap();
    let _guard = TestGuard(vec![leases.to_string()]);

    let yaml = format!(
        r#"
server4:
  listen: '127.0.0.1:6767'
  plugins:
    - server_id: 192.0.2.1
    - dns: 8.8.8.8
    - router: 192.0.2.254
    - file: {leases}
"#
    );
    let config = Config::parse("e2e", &yaml).unwrap();
    let chain = build_chain4(&registry(), config.server4.as_ref().unwrap()).unwrap();
    let dispatcher = Dispatcher4::new(chain);

    let req = discover(client_mac(), &[OptionCode::DnsServer, OptionCode::Router]);
    let resp = dispatcher.run_chain(&req).await.expect("expected an OFFER");

    assert_eq!(resp.message_type(), Some(MessageType::Offer));
    assert_eq!(resp.xid, req.xid);
    assert_eq!(resp.yiaddr, Ipv4Addr::new(192, 0, 2, 50));
    assert_eq!(resp.server_identifier(), Some(Ipv4Addr::new(192, 0, 2, 1)));
    assert!(resp.options.iter().any(|option| {
        matches!(option, DhcpOption::DnsServer(list) if list == &[Ipv4Addr::new(8, 8, 8, 8)])
    }));
    assert!(resp.options.iter().any(|option| {
        matches!(option, DhcpOption::Router(list) if list == &[Ipv4Addr::new(192, 0, 2, 254)])
    }));
}

#[tokio::test]
async fn chain_without_authoritative_plugin_drops() {
    let yaml = r#"
server4:
  listen: '127.0.0.1:6767'
  plugins:
    - server_id: 192.0.2.1
    - dns: 8.8.8.8
    - router: 192.0.2.254
"#;
    let config = Config::parse("annotate-only", yaml).unwrap();
    let chain = build_chain4(&registry(), config.server4.as_ref().unwrap()).unwrap();
    let dispatcher = Dispatcher4::new(chain);

    let req = discover(client_mac(), &[OptionCode::DnsServer]);
    assert!(dispatcher.run_chain(&req).await.is_none());
}

#[tokio::test]
async fn range_chain_allocates_in_sequence_and_drops_on_exhaustion() {
    let journal = "test_e2e_range_journal.txt";
    let _ = std::fs::remove_file(journal);
    let _guard = TestGuard(vec![journal.to_string()]);

    let yaml = format!(
        r#"
server4:
  listen: '127.0.0.1:6767'
  plugins:
    - server_id: 192.0.2.1
    - range: {journal} 10.0.0.10 10.0.0.12 1h
"#
    );
    let config = Config::parse("range", &yaml).unwrap();
    let chain = build_chain4(&registry(), config.server4.as_ref().unwrap()).unwrap();
    let dispatcher = Dispatcher4::new(chain);

    let macs: Vec<MacAddr6> = (1..=4)
        .map(|index| MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, index))
        .collect();

    for (mac, expected) in macs.iter().zip([
        Ipv4Addr::new(10, 0, 0, 10),
        Ipv4Addr::new(10, 0, 0, 11),
        Ipv4Addr::new(10, 0, 0, 12),
    ]) {
        let resp = dispatcher
            .run_chain(&discover(*mac, &[]))
            .await
            .expect("expected an OFFER");
        assert_eq!(resp.yiaddr, expected);
        assert!(resp.options.contains(&DhcpOption::LeaseTime(3600)));
    }

    // Fourth unknown client: the allocator is out of addresses and the
    // packet is dropped.
    assert!(dispatcher.run_chain(&discover(macs[3], &[])).await.is_none());

    // The first client renews and keeps its address; the journal gained a
    // fresh line for the same binding.
    let resp = dispatcher
        .run_chain(&discover(macs[0], &[]))
        .await
        .expect("expected an ACK-able response");
    assert_eq!(resp.yiaddr, Ipv4Addr::new(10, 0, 0, 10));

    let contents = std::fs::read_to_string(journal).unwrap();
    let first_mac_lines = contents
        .lines()
        .filter(|line| line.to_lowercase().starts_with("aa:bb:cc:dd:ee:01"))
        .count();
    assert!(first_mac_lines >= 2);
}

fn solicit6(server_id: Option<Duid>) -> Message6 {
    let mut message = Message6::new(MessageType6::Solicit, [1, 2, 3]);
    message.add_option(Dhcp6Option::ClientId(Duid::link_layer(client_mac())));
    message.add_option(Dhcp6Option::IaNa(dhcpflow::packet6::IaNa {
        iaid: 1,
        t1: 0,
        t2: 0,
        addresses: Vec::new(),
    }));
    if let Some(duid) = server_id {
        message.add_option(Dhcp6Option::ServerId(duid));
    }
    message
}

fn v6_chain(leases: &str) -> Dispatcher6 {
    let yaml = format!(
        r#"
server6:
  listen: '[::1]:6547'
  plugins:
    - server_id: ll aa:bb:cc:dd:ee:01
    - file: {leases}
"#
    );
    let config = Config::parse("v6", &yaml).unwrap();
    let chain = build_chain6(&registry(), config.server6.as_ref().unwrap()).unwrap();
    Dispatcher6::new(chain)
}

#[tokio::test]
async fn v6_solicit_with_server_id_is_dropped() {
    let leases = "test_e2e_v6_drop_leases.txt";
    std::fs::write(leases, "aa:bb:cc:dd:ee:ff 2001:db8::50\n").unwrap();
    let _guard = TestGuard(vec![leases.to_string()]);
    let dispatcher = v6_chain(leases);

    let own_id = Duid::link_layer(MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01));
    let req = Packet6::Message(solicit6(Some(own_id)));
    assert!(dispatcher.run_chain(&req).await.is_none());
}

#[tokio::test]
async fn v6_request_without_server_id_is_dropped() {
    let leases = "test_e2e_v6_req_leases.txt";
    std::fs::write(leases, "aa:bb:cc:dd:ee:ff 2001:db8::50\n").unwrap();
    let _guard = TestGuard(vec![leases.to_string()]);
    let dispatcher = v6_chain(leases);

    let mut request = solicit6(None);
    request.msg_type = MessageType6::Request;
    assert!(
        dispatcher
            .run_chain(&Packet6::Message(request))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn v6_relayed_solicit_round_trips_through_relay_chain() {
    let leases = "test_e2e_v6_relay_leases.txt";
    std::fs::write(leases, "aa:bb:cc:dd:ee:ff 2001:db8::50\n").unwrap();
    let _guard = TestGuard(vec![leases.to_string()]);
    let dispatcher = v6_chain(leases);

    let relay = Packet6::Relay(RelayMessage6 {
        msg_type: MessageType6::RelayForward,
        hop_count: 0,
        link_addr: "2001:db8::1".parse().unwrap(),
        peer_addr: "fe80::2".parse().unwrap(),
        options: vec![
            Dhcp6Option::RelayMessage(Box::new(Packet6::Message(solicit6(None)))),
            Dhcp6Option::InterfaceId(b"port7".to_vec()),
        ],
    });

    let resp = dispatcher
        .run_chain(&relay)
        .await
        .expect("expected an ADVERTISE");
    assert_eq!(resp.msg_type, MessageType6::Advertise);
    let ia = resp.one_ia_na().expect("static lease should be assigned");
    assert_eq!(ia.addresses[0].addr, "2001:db8::50".parse::<std::net::Ipv6Addr>().unwrap());

    let wrapped = relay.wrap_reply(resp);
    assert_eq!(wrapped.relay_depth(), 1);
    let Packet6::Relay(hop) = &wrapped else {
        panic!("expected a relay envelope");
    };
    assert_eq!(hop.msg_type, MessageType6::RelayReply);
    assert_eq!(hop.link_addr, "2001:db8::1".parse::<std::net::Ipv6Addr>().unwrap());
    assert_eq!(hop.peer_addr, "fe80::2".parse::<std::net::Ipv6Addr>().unwrap());
    assert_eq!(hop.interface_id(), Some(b"port7".as_slice()));
    assert_eq!(
        wrapped.inner_message().unwrap().msg_type,
        MessageType6::Advertise
    );
}

#[tokio::test]
async fn unknown_plugin_fails_startup() {
    let yaml = r#"
server4:
  listen: '127.0.0.1:6767'
  plugins:
    - imaginary: foo
"#;
    let config = Config::parse("unknown", yaml).unwrap();
    let result = build_chain4(&registry(), config.server4.as_ref().unwrap());
    assert!(result.is_err());
}

#[tokio::test]
async fn v4_only_plugin_rejected_in_v6_chain() {
    // lease_time has no v6 setup; referencing it under server6 must fail.
    let yaml = r#"
server6:
  listen: '[::1]:6547'
  plugins:
    - lease_time: 1h
"#;
    let config = Config::parse("wrongproto", yaml).unwrap();
    let result = build_chain6(&registry(), config.server6.as_ref().unwrap());
    assert!(result.is_err());
}
