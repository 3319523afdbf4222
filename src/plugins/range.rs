//! The `range` plugin leases IPv4 addresses out of a contiguous range.
//!
//! Arguments: `<journal file> <start IP> <end IP> <lease duration>`.
//!
//! Assignments survive restarts through the lease journal: every new
//! binding and every expiry extension is appended and fsynced before the
//! reply leaves the chain. At startup the journal is replayed and each
//! surviving lease re-reserved in the allocator, so a configuration whose
//! range no longer covers the persisted leases refuses to start.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use macaddr::MacAddr6;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::allocator::RangeAllocator;
use crate::config::parse_duration;
use crate::error::{Error, Result};
use crate::journal::{LeaseJournal, LeaseRecord};
use crate::options4::DhcpOption;
use crate::packet4::Packet4;
use crate::plugin::{Handler4, Plugin};

const NAME: &str = "range";

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        setup4: Some(setup4),
        setup6: None,
    }
}

struct RangeState {
    records: HashMap<MacAddr6, LeaseRecord>,
    allocator: RangeAllocator,
    journal: LeaseJournal,
}

struct Range {
    // One lock over records, allocator and journal: the journal line order
    // must match the order bindings were committed in.
    state: Mutex<RangeState>,
    lease_time: Duration,
}

#[async_trait]
impl Handler4 for Range {
    async fn handle(&self, req: &Packet4, mut resp: Packet4) -> (Option<Packet4>, bool) {
        let mac = req.mac_address();
        let mut state = self.state.lock().await;

        let ip = match state.records.get(&mac).copied() {
            None => {
                info!("MAC address {} is new, leasing new IPv4 address", mac);
                let ip = match state.allocator.allocate(None) {
                    Ok(ip) => ip,
                    Err(err) => {
                        error!("could not allocate IP for MAC {}: {}", mac, err);
                        return (None, true);
                    }
                };
                let record = LeaseRecord::new(mac, ip, self.lease_time);
                if let Err(err) = state.journal.append(&record).await {
                    error!("could not persist lease for MAC {}: {}", mac, err);
                }
                state.records.insert(mac, record);
                ip
            }
            Some(record) => {
                // Extend the lease at least past what this reply promises,
                // never shorten a longer one.
                let refreshed = LeaseRecord::new(mac, record.ip, self.lease_time);
                if record.expires_at <= refreshed.expires_at {
                    if let Err(err) = state.journal.append(&refreshed).await {
                        error!("could not persist lease for MAC {}: {}", mac, err);
                    }
                    state.records.insert(mac, refreshed);
                }
                record.ip
            }
        };

        resp.yiaddr = ip;
        resp.update_option(DhcpOption::LeaseTime(self.lease_time.as_secs() as u32));
        debug!("found IP address {} for MAC {}", ip, mac);
        (Some(resp), true)
    }
}

fn setup4(args: &[String]) -> Result<Arc<dyn Handler4>> {
    if args.len() < 4 {
        return Err(Error::setup(
            NAME,
            format!(
                "invalid number of arguments, want: 4 (file name, start IP, end IP, lease time), got: {}",
                args.len()
            ),
        ));
    }
    let filename = &args[0];
    if filename.is_empty() {
        return Err(Error::setup(NAME, "file name cannot be empty"));
    }
    let start: Ipv4Addr = args[1]
        .parse()
        .map_err(|_| Error::setup(NAME, format!("invalid IPv4 address: {}", args[1])))?;
    let end: Ipv4Addr = args[2]
        .parse()
        .map_err(|_| Error::setup(NAME, format!("invalid IPv4 address: {}", args[2])))?;
    let mut allocator =
        RangeAllocator::new(start, end).map_err(|err| Error::setup(NAME, err))?;
    let lease_time = parse_duration(&args[3])
        .map_err(|_| Error::setup(NAME, format!("invalid lease duration: {}", args[3])))?;

    let (journal, records) =
        LeaseJournal::open(filename).map_err(|err| Error::setup(NAME, err))?;
    info!("loaded {} DHCPv4 leases from {}", records.len(), filename);

    for record in records.values() {
        allocator.allocate(Some(record.ip)).map_err(|err| {
            Error::setup(
                NAME,
                format!("failed to re-allocate leased IP {}: {}", record.ip, err),
            )
        })?;
    }

    Ok(Arc::new(Range {
        state: Mutex::new(RangeState {
            records,
            allocator,
            journal,
        }),
        lease_time,
    }))
}
