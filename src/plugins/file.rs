//! The `file` plugin serves static MAC to IP mappings from a text file.
//!
//! Each line holds two whitespace-separated fields, a hardware address and
//! an IP address of the protocol version the plugin runs under:
//!
//!   00:11:22:33:44:55 10.0.0.1
//!   01:23:45:67:89:01 10.0.10.10
//!
//! Lines starting with `#` are comments. With the optional `autorefresh`
//! argument the file is watched and the mapping swapped atomically whenever
//! it changes; readers always see a complete snapshot.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use macaddr::MacAddr6;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::packet4::Packet4;
use crate::packet6::{Dhcp6Option, IaAddress, IaNa, Message6, Packet6};
use crate::plugin::{Handler4, Handler6, Plugin};

const NAME: &str = "file";
const AUTO_REFRESH_ARG: &str = "autorefresh";

/// Lifetimes handed out with static v6 assignments.
const STATIC_LIFETIME_SECS: u32 = 3600;

pub fn plugin() -> Plugin {
    Plugin {
        name: NAME,
        setup4: Some(setup4),
        setup6: Some(setup6),
    }
}

fn parse_records<T: std::str::FromStr>(contents: &str, what: &str) -> Result<HashMap<MacAddr6, T>> {
    let mut records = HashMap::new();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 2 {
            return Err(Error::InvalidConfig(format!(
                "malformed line {}: want 2 fields, got {}",
                number + 1,
                fields.len()
            )));
        }
        let mac: MacAddr6 = fields[0].parse().map_err(|_| {
            Error::InvalidConfig(format!("malformed hardware address: {}", fields[0]))
        })?;
        let ip: T = fields[1].parse().map_err(|_| {
            Error::InvalidConfig(format!("expected an {} address, got: {}", what, fields[1]))
        })?;
        records.insert(mac, ip);
    }
    Ok(records)
}

fn load_records<T: std::str::FromStr>(
    path: &Path,
    what: &str,
) -> Result<HashMap<MacAddr6, T>> {
    let contents = std::fs::read_to_string(path)?;
    parse_records(&contents, what)
}

type SharedRecords<T> = Arc<RwLock<HashMap<MacAddr6, T>>>;

/// Watches the lease file and swaps the whole map on every change event.
/// The watcher is the only writer; the handlers only take the read lock.
fn watch_records<T>(
    path: &Path,
    what: &'static str,
    records: SharedRecords<T>,
) -> Result<RecommendedWatcher>
where
    T: std::str::FromStr + Send + Sync + 'static,
{
    let watched = path.to_path_buf();
    let reload_path = watched.clone();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        match event {
            Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                match load_records::<T>(&reload_path, what) {
                    Ok(new_records) => {
                        let count = new_records.len();
                        *records.write().unwrap() = new_records;
                        info!("updated to {} leases from {}", count, reload_path.display());
                    }
                    Err(err) => {
                        warn!("failed to refresh from {}: {}", reload_path.display(), err);
                    }
                }
            }
            Ok(_) => {}
            Err(err) => warn!("watch error: {}", err),
        }
    })
    .map_err(|err| Error::setup(NAME, format!("failed to create watcher: {}", err)))?;
    watcher
        .watch(&watched, RecursiveMode::NonRecursive)
        .map_err(|err| Error::setup(NAME, format!("failed to watch {}: {}", watched.display(), err)))?;
    Ok(watcher)
}

struct FileV4 {
    records: SharedRecords<Ipv4Addr>,
    _watcher: Option<RecommendedWatcher>,
}

#[async_trait]
impl Handler4 for FileV4 {
    async fn handle(&self, req: &Packet4, mut resp: Packet4) -> (Option<Packet4>, bool) {
        let mac = req.mac_address();
        let found = self.records.read().unwrap().get(&mac).copied();
        match found {
            Some(ip) => {
                debug!("found IP address {} for MAC {}", ip, mac);
                resp.yiaddr = ip;
                (Some(resp), true)
            }
            None => {
                debug!("MAC address {} is unknown", mac);
                (Some(resp), false)
            }
        }
    }
}

struct FileV6 {
    records: SharedRecords<Ipv6Addr>,
    _watcher: Option<RecommendedWatcher>,
}

#[async_trait]
impl Handler6 for FileV6 {
    async fn handle(&self, req: &Packet6, mut resp: Message6) -> (Option<Message6>, bool) {
        let inner = match req.inner_message() {
            Ok(inner) => inner,
            Err(err) => {
                error!("could not decapsulate relayed message: {}", err);
                return (None, true);
            }
        };

        let Some(ia) = inner.one_ia_na() else {
            debug!("no address requested");
            return (Some(resp), false);
        };

        let mac = match req.extract_mac() {
            Ok(mac) => mac,
            Err(_) => {
                warn!("could not find client MAC, passing");
                return (Some(resp), false);
            }
        };

        let found = self.records.read().unwrap().get(&mac).copied();
        match found {
            Some(ip) => {
                debug!("found IP address {} for MAC {}", ip, mac);
                resp.add_option(Dhcp6Option::IaNa(IaNa {
                    iaid: ia.iaid,
                    t1: 0,
                    t2: 0,
                    addresses: vec![IaAddress {
                        addr: ip,
                        preferred_lifetime: STATIC_LIFETIME_SECS,
                        valid_lifetime: STATIC_LIFETIME_SECS,
                    }],
                }));
                (Some(resp), true)
            }
            None => {
                debug!("MAC address {} is unknown", mac);
                (Some(resp), false)
            }
        }
    }
}

fn setup_args(args: &[String]) -> Result<(&Path, bool)> {
    if args.is_empty() || args[0].is_empty() {
        return Err(Error::setup(NAME, "need a file name"));
    }
    let autorefresh = args.len() > 1 && args[1] == AUTO_REFRESH_ARG;
    Ok((Path::new(&args[0]), autorefresh))
}

fn setup4(args: &[String]) -> Result<Arc<dyn Handler4>> {
    let (path, autorefresh) = setup_args(args)?;
    let records = load_records::<Ipv4Addr>(path, "IPv4")
        .map_err(|err| Error::setup(NAME, format!("failed to load records: {}", err)))?;
    info!("loaded {} leases from {}", records.len(), path.display());

    let records = Arc::new(RwLock::new(records));
    let watcher = if autorefresh {
        Some(watch_records(path, "IPv4", Arc::clone(&records))?)
    } else {
        None
    };
    Ok(Arc::new(FileV4 {
        records,
        _watcher: watcher,
    }))
}

fn setup6(args: &[String]) -> Result<Arc<dyn Handler6>> {
    let (path, autorefresh) = setup_args(args)?;
    let records = load_records::<Ipv6Addr>(path, "IPv6")
        .map_err(|err| Error::setup(NAME, format!("failed to load records: {}", err)))?;
    info!("loaded {} leases from {}", records.len(), path.display());

    let records = Arc::new(RwLock::new(records));
    let watcher = if autorefresh {
        Some(watch_records(path, "IPv6", Arc::clone(&records))?)
    } else {
        None
    };
    Ok(Arc::new(FileV6 {
        records,
        _watcher: watcher,
    }))
}
