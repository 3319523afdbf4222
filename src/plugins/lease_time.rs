//! The `lease_time` plugin sets a default lease duration (option 51) when
//! no earlier plugin has.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::parse_duration;
use crate::error::{Error, Result};
use crate::options4::{DhcpOption, OptionCode};
use crate::packet4::{BOOTREQUEST, Packet4};
use crate::plugin::{Handler4, Plugin};

const NAME: &str = "lease_time";

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        setup4: Some(setup4),
        // currently not supported for DHCPv6
        setup6: None,
    }
}

struct LeaseTime {
    lease_time: Duration,
}

#[async_trait]
impl Handler4 for LeaseTime {
    async fn handle(&self, req: &Packet4, mut resp: Packet4) -> (Option<Packet4>, bool) {
        if req.op != BOOTREQUEST {
            return (Some(resp), false);
        }
        // Earlier plugins (an allocator, typically) take precedence.
        if !resp.has_option(OptionCode::LeaseTime) {
            resp.update_option(DhcpOption::LeaseTime(self.lease_time.as_secs() as u32));
        }
        (Some(resp), false)
    }
}

fn setup4(args: &[String]) -> Result<Arc<dyn Handler4>> {
    if args.len() != 1 {
        return Err(Error::setup(NAME, "need a default lease duration"));
    }
    let lease_time = parse_duration(&args[0])
        .map_err(|_| Error::setup(NAME, format!("invalid duration: {}", args[0])))?;
    Ok(Arc::new(LeaseTime { lease_time }))
}
