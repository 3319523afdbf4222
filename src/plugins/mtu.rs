//! The `mtu` plugin answers interface MTU requests (option 26).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::options4::{DhcpOption, OptionCode};
use crate::packet4::Packet4;
use crate::plugin::{Handler4, Plugin};

const NAME: &str = "mtu";

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        setup4: Some(setup4),
        // DHCPv6 has no MTU option.
        setup6: None,
    }
}

struct Mtu {
    mtu: u16,
}

#[async_trait]
impl Handler4 for Mtu {
    async fn handle(&self, req: &Packet4, mut resp: Packet4) -> (Option<Packet4>, bool) {
        if req.is_option_requested(OptionCode::InterfaceMtu) {
            resp.update_option(DhcpOption::InterfaceMtu(self.mtu));
        }
        (Some(resp), false)
    }
}

fn setup4(args: &[String]) -> Result<Arc<dyn Handler4>> {
    if args.len() != 1 {
        return Err(Error::setup(NAME, "need one mtu value"));
    }
    let mtu: u16 = args[0]
        .parse()
        .map_err(|_| Error::setup(NAME, format!("invalid mtu: {}", args[0])))?;
    info!("loaded mtu {}", mtu);
    Ok(Arc::new(Mtu { mtu }))
}
