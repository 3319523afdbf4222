//! The `netmask` plugin sets the subnet mask (option 1).

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::options4::DhcpOption;
use crate::packet4::Packet4;
use crate::plugin::{Handler4, Plugin};

const NAME: &str = "netmask";

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        setup4: Some(setup4),
        setup6: None,
    }
}

struct Netmask {
    netmask: Ipv4Addr,
}

#[async_trait]
impl Handler4 for Netmask {
    async fn handle(&self, _req: &Packet4, mut resp: Packet4) -> (Option<Packet4>, bool) {
        resp.update_option(DhcpOption::SubnetMask(self.netmask));
        (Some(resp), false)
    }
}

/// A mask is valid when its set bits are contiguous from the top.
fn is_valid_netmask(mask: Ipv4Addr) -> bool {
    let bits = u32::from(mask);
    let inverted = !bits;
    inverted.wrapping_add(1) & inverted == 0
}

fn setup4(args: &[String]) -> Result<Arc<dyn Handler4>> {
    if args.len() != 1 {
        return Err(Error::setup(NAME, "need exactly one netmask"));
    }
    let netmask: Ipv4Addr = args[0]
        .parse()
        .map_err(|_| Error::setup(NAME, format!("expected a netmask, got: {}", args[0])))?;
    if netmask == Ipv4Addr::UNSPECIFIED || !is_valid_netmask(netmask) {
        return Err(Error::setup(NAME, format!("netmask is not valid: {}", args[0])));
    }
    Ok(Arc::new(Netmask { netmask }))
}
