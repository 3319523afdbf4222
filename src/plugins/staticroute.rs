//! The `staticroute` plugin advertises classless static routes (option 121).
//!
//! Arguments are `destination,gateway` pairs, e.g.
//! `10.0.0.0/8,192.168.1.1 0.0.0.0/0,192.168.1.254`.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use ipnet::Ipv4Net;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::options4::{DhcpOption, Route};
use crate::packet4::Packet4;
use crate::plugin::{Handler4, Plugin};

const NAME: &str = "staticroute";

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        setup4: Some(setup4),
        setup6: None,
    }
}

struct StaticRoutes {
    routes: Vec<Route>,
}

#[async_trait]
impl Handler4 for StaticRoutes {
    async fn handle(&self, _req: &Packet4, mut resp: Packet4) -> (Option<Packet4>, bool) {
        if !self.routes.is_empty() {
            resp.update_option(DhcpOption::StaticRoutes(self.routes.clone()));
        }
        (Some(resp), false)
    }
}

fn parse_route(arg: &str) -> Result<Route> {
    let (dest, gateway) = arg
        .split_once(',')
        .ok_or_else(|| Error::setup(NAME, format!("expected a destination,gateway pair, got: {}", arg)))?;
    let network: Ipv4Net = dest
        .parse()
        .map_err(|_| Error::setup(NAME, format!("expected a destination subnet, got: {}", dest)))?;
    let gateway: Ipv4Addr = gateway
        .parse()
        .map_err(|_| Error::setup(NAME, format!("expected a gateway address, got: {}", gateway)))?;
    Ok(Route {
        dest: network.network(),
        prefix_len: network.prefix_len(),
        gateway,
    })
}

fn setup4(args: &[String]) -> Result<Arc<dyn Handler4>> {
    if args.is_empty() {
        return Err(Error::setup(NAME, "need at least one static route"));
    }
    let mut routes = Vec::with_capacity(args.len());
    for arg in args {
        let route = parse_route(arg)?;
        debug!("adding static route {}/{} via {}", route.dest, route.prefix_len, route.gateway);
        routes.push(route);
    }
    info!("loaded {} static routes", routes.len());
    Ok(Arc::new(StaticRoutes { routes }))
}
