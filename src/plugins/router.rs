//! The `router` plugin sets the default gateway list (option 3).

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::options4::DhcpOption;
use crate::packet4::Packet4;
use crate::plugin::{Handler4, Plugin};

const NAME: &str = "router";

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        setup4: Some(setup4),
        setup6: None,
    }
}

struct Router {
    routers: Vec<Ipv4Addr>,
}

#[async_trait]
impl Handler4 for Router {
    async fn handle(&self, _req: &Packet4, mut resp: Packet4) -> (Option<Packet4>, bool) {
        resp.update_option(DhcpOption::Router(self.routers.clone()));
        (Some(resp), false)
    }
}

fn setup4(args: &[String]) -> Result<Arc<dyn Handler4>> {
    if args.is_empty() {
        return Err(Error::setup(NAME, "need at least one router IP address"));
    }
    let routers = args
        .iter()
        .map(|arg| {
            arg.parse::<Ipv4Addr>()
                .map_err(|_| Error::setup(NAME, format!("expected a router IP address, got: {}", arg)))
        })
        .collect::<Result<Vec<_>>>()?;
    info!("loaded {} router IP addresses", routers.len());
    Ok(Arc::new(Router { routers }))
}
