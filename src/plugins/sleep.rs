//! The `sleep` plugin delays the chain by a fixed duration.
//!
//! Useful to simulate a slow server. The delay runs inside the packet's
//! handler task, so concurrent packets are still served in parallel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::parse_duration;
use crate::error::{Error, Result};
use crate::packet4::Packet4;
use crate::packet6::{Message6, Packet6};
use crate::plugin::{Handler4, Handler6, Plugin};

const NAME: &str = "sleep";

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        setup4: Some(setup4),
        setup6: Some(setup6),
    }
}

struct Sleep {
    delay: Duration,
}

#[async_trait]
impl Handler4 for Sleep {
    async fn handle(&self, _req: &Packet4, resp: Packet4) -> (Option<Packet4>, bool) {
        debug!("delaying response by {:?}", self.delay);
        tokio::time::sleep(self.delay).await;
        (Some(resp), false)
    }
}

#[async_trait]
impl Handler6 for Sleep {
    async fn handle(&self, _req: &Packet6, resp: Message6) -> (Option<Message6>, bool) {
        debug!("delaying response by {:?}", self.delay);
        tokio::time::sleep(self.delay).await;
        (Some(resp), false)
    }
}

fn parse_args(args: &[String]) -> Result<Duration> {
    if args.len() != 1 {
        return Err(Error::setup(
            NAME,
            format!("want exactly one argument, got {}", args.len()),
        ));
    }
    parse_duration(&args[0]).map_err(|error| Error::setup(NAME, error))
}

fn setup4(args: &[String]) -> Result<Arc<dyn Handler4>> {
    Ok(Arc::new(Sleep {
        delay: parse_args(args)?,
    }))
}

fn setup6(args: &[String]) -> Result<Arc<dyn Handler6>> {
    Ok(Arc::new(Sleep {
        delay: parse_args(args)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet4::BOOTREQUEST;
    use std::net::Ipv4Addr;
    use std::time::Instant;

    fn request() -> Packet4 {
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
            options: Vec::new(),
        }
    }

    #[test]
    fn test_setup_validation() {
        assert!(setup4(&[]).is_err());
        assert!(setup4(&["100ms".to_string(), "extra".to_string()]).is_err());
        assert!(setup4(&["100ms".to_string()]).is_ok());
    }

    #[tokio::test]
    async fn test_delays_at_least_configured_duration() {
        let handler = setup4(&["50ms".to_string()]).unwrap();
        let req = request();
        let started = Instant::now();
        let (resp, stop) = handler.handle(&req, Packet4::reply_to(&req)).await;
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(resp.is_some());
        assert!(!stop);
    }

    #[tokio::test]
    async fn test_concurrent_requests_sleep_in_parallel() {
        let handler = setup4(&["100ms".to_string()]).unwrap();
        let req = request();
        let started = Instant::now();
        let (first, second) = tokio::join!(
            handler.handle(&req, Packet4::reply_to(&req)),
            handler.handle(&req, Packet4::reply_to(&req)),
        );
        let elapsed = started.elapsed();
        assert!(first.0.is_some());
        assert!(second.0.is_some());
        assert!(elapsed >= Duration::from_millis(100));
        // Both delays overlap instead of queueing.
        assert!(elapsed < Duration::from_millis(190));
    }
}
