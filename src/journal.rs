//! Persistent lease journal.
//!
//! The journal is an append-only UTF-8 text file, one record per line:
//!
//!   aa:bb:cc:dd:ee:ff 10.0.0.12 1735689600
//!
//! Fields are whitespace-separated: hardware address, IPv4 address, lease
//! expiry as unix seconds. Lines starting with `#` are comments. A renewal
//! appends another line for the same MAC; during replay the last line per
//! MAC wins. Malformed lines are an error, the journal is the durable record
//! of who owns which address and a broken one must not be silently skipped.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use macaddr::MacAddr6;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// A lease binding between a client hardware address and an IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRecord {
    pub mac: MacAddr6,
    pub ip: Ipv4Addr,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    /// Builds a record expiring `lease_time` from now, truncated to whole
    /// seconds so that the value round-trips through the journal.
    pub fn new(mac: MacAddr6, ip: Ipv4Addr, lease_time: std::time::Duration) -> Self {
        let expires = Utc::now().timestamp() + lease_time.as_secs() as i64;
        Self {
            mac,
            ip,
            expires_at: DateTime::from_timestamp(expires, 0).unwrap_or_default(),
        }
    }
}

/// Parses full journal contents into the live record set, last line per MAC
/// winning.
pub fn parse_records(contents: &str) -> Result<HashMap<MacAddr6, LeaseRecord>> {
    let mut records = HashMap::new();
    for (number, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 3 {
            return Err(Error::MalformedLease(format!(
                "line {}: want 3 fields, got {}",
                number + 1,
                fields.len()
            )));
        }
        let mac: MacAddr6 = fields[0].parse().map_err(|_| {
            Error::MalformedLease(format!("line {}: bad hardware address {}", number + 1, fields[0]))
        })?;
        let ip: Ipv4Addr = fields[1].parse().map_err(|_| {
            Error::MalformedLease(format!("line {}: bad IPv4 address {}", number + 1, fields[1]))
        })?;
        let expiry: i64 = fields[2].parse().map_err(|_| {
            Error::MalformedLease(format!("line {}: bad expiry {}", number + 1, fields[2]))
        })?;
        let expires_at = DateTime::from_timestamp(expiry, 0).ok_or_else(|| {
            Error::MalformedLease(format!("line {}: expiry {} out of range", number + 1, expiry))
        })?;
        records.insert(mac, LeaseRecord { mac, ip, expires_at });
    }
    Ok(records)
}

/// Append handle over the journal file.
#[derive(Debug)]
pub struct LeaseJournal {
    file: tokio::fs::File,
    path: PathBuf,
}

impl LeaseJournal {
    /// Opens (creating if needed) the journal and replays its contents.
    ///
    /// Synchronous on purpose, this runs during plugin setup before any
    /// dispatcher exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<(Self, HashMap<MacAddr6, LeaseRecord>)> {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read_to_string(&path) {
            Ok(contents) => parse_records(&contents)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(error) => return Err(error.into()),
        };
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok((
            Self {
                file: tokio::fs::File::from_std(file),
                path,
            },
            records,
        ))
    }

    /// Appends one record and makes it durable (flush + fsync) before
    /// returning.
    pub async fn append(&mut self, record: &LeaseRecord) -> Result<()> {
        let line = format!(
            "{} {} {}\n",
            record.mac,
            record.ip,
            record.expires_at.timestamp()
        );
        self.file.write_all(line.as_bytes()).await?;
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestGuard(String);
    impl Drop for TestGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn mac(last: u8) -> MacAddr6 {
        MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, last)
    }

    #[test]
    fn test_replay_last_wins() {
        let contents = "\
# leases
aa:bb:cc:dd:ee:01 10.0.0.10 1000
aa:bb:cc:dd:ee:02 10.0.0.11 2000

aa:bb:cc:dd:ee:01 10.0.0.10 3000
";
        let records = parse_records(contents).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[&mac(1)].expires_at.timestamp(), 3000);
        assert_eq!(records[&mac(2)].ip, Ipv4Addr::new(10, 0, 0, 11));
    }

    #[test]
    fn test_malformed_line_is_fatal() {
        assert!(parse_records("aa:bb:cc:dd:ee:01 10.0.0.10").is_err());
        assert!(parse_records("not-a-mac 10.0.0.10 1000").is_err());
        assert!(parse_records("aa:bb:cc:dd:ee:01 not-an-ip 1000").is_err());
        assert!(parse_records("aa:bb:cc:dd:ee:01 10.0.0.10 soon").is_err());
    }

    #[test]
    fn test_trailing_blank_lines_tolerated() {
        let records = parse_records("aa:bb:cc:dd:ee:01 10.0.0.10 1000\n\n\n").unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_append_then_replay() {
        let path = "test_journal_append.txt".to_string();
        let _guard = TestGuard(path.clone());

        let (mut journal, records) = LeaseJournal::open(&path).unwrap();
        assert!(records.is_empty());

        let first = LeaseRecord::new(mac(1), Ipv4Addr::new(10, 0, 0, 10), std::time::Duration::from_secs(3600));
        journal.append(&first).await.unwrap();

        let mut renewed = first;
        renewed.expires_at = DateTime::from_timestamp(first.expires_at.timestamp() + 600, 0).unwrap();
        journal.append(&renewed).await.unwrap();

        let (_journal, replayed) = LeaseJournal::open(&path).unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[&mac(1)], renewed);
    }
}
