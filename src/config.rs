//! Server configuration.
//!
//! A configuration file is named `<server-name>.config.yml` and holds a
//! `server4` and/or `server6` section:
//!
//! ```yaml
//! server4:
//!   listen: ':67'
//!   plugins:
//!     - lease_time: 1h
//!     - server_id: 192.0.2.1
//!     - dns: 8.8.8.8 8.8.4.4
//!     - router: 192.0.2.254
//!     - range: leases4.txt 192.0.2.10 192.0.2.100 1h
//! ```
//!
//! Plugin entries are single-key maps; the value is a whitespace-separated
//! argument string whose meaning is private to the plugin. The entry order
//! is the chain order. `listen` takes one specifier or a list; the
//! deprecated `interface` key is shorthand for `listen: '%<name>'` and
//! cannot be combined with it.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::listener::{self, BindTarget, ProtocolVersion};

const CONFIG_SUFFIX: &str = ".config.yml";

/// One plugin reference from the configuration: a registered name plus its
/// uninterpreted arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInstance {
    pub name: String,
    pub args: Vec<String>,
}

/// Configuration of one protocol version: where to listen and which chain
/// to run.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addresses: Vec<BindTarget>,
    pub plugins: Vec<PluginInstance>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub server4: Option<ServerConfig>,
    pub server6: Option<ServerConfig>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    server4: Option<RawServer>,
    server6: Option<RawServer>,
}

#[derive(Debug, Deserialize)]
struct RawServer {
    listen: Option<StringOrList>,
    interface: Option<String>,
    plugins: Option<Vec<serde_yaml::Mapping>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(spec) => vec![spec],
            Self::Many(specs) => specs,
        }
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Result<String> {
    match value {
        serde_yaml::Value::Null => Ok(String::new()),
        serde_yaml::Value::String(text) => Ok(text.clone()),
        serde_yaml::Value::Number(number) => Ok(number.to_string()),
        serde_yaml::Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(Error::InvalidConfig(format!(
            "plugin arguments must be a scalar, got {:?}",
            other
        ))),
    }
}

fn parse_plugins(
    entries: Vec<serde_yaml::Mapping>,
    version: ProtocolVersion,
) -> Result<Vec<PluginInstance>> {
    if entries.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "dhcp{}: no plugin specified",
            version
        )));
    }
    let mut plugins = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        if entry.len() != 1 {
            return Err(Error::InvalidConfig(format!(
                "dhcp{}: plugin #{} must have exactly one name",
                version,
                index + 1
            )));
        }
        let (key, value) = entry.iter().next().unwrap();
        let name = key
            .as_str()
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "dhcp{}: plugin #{} name is not a string",
                    version,
                    index + 1
                ))
            })?
            .to_string();
        let args = scalar_to_string(value)?
            .split_whitespace()
            .map(str::to_string)
            .collect();
        plugins.push(PluginInstance { name, args });
    }
    Ok(plugins)
}

fn convert_server(raw: RawServer, version: ProtocolVersion) -> Result<ServerConfig> {
    let listen = match (raw.listen, raw.interface) {
        (Some(_), Some(_)) => {
            return Err(Error::InvalidConfig(
                "interface is a deprecated alias for listen, both cannot be used at the same \
                 time. Choose one and remove the other."
                    .to_string(),
            ));
        }
        (Some(listen), None) => Some(listen.into_vec()),
        (None, Some(interface)) => Some(vec![format!("%{}", interface)]),
        (None, None) => None,
    };

    let addresses = match listen {
        Some(specs) => listener::resolve_listeners(&specs, version)?,
        None => listener::default_listeners(version)?,
    };

    let plugins = parse_plugins(raw.plugins.unwrap_or_default(), version)?;

    Ok(ServerConfig { addresses, plugins })
}

/// Derives the server name from a `<name>.config.yml` path.
pub fn server_name(path: &Path) -> Result<String> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidConfig(format!("invalid config path: {}", path.display())))?;
    let name = filename.strip_suffix(CONFIG_SUFFIX).ok_or_else(|| {
        Error::InvalidConfig(format!(
            "incorrect config name '{}', correct: <server-name>{}",
            filename, CONFIG_SUFFIX
        ))
    })?;
    if name.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "incorrect config name '{}', correct: <server-name>{}",
            filename, CONFIG_SUFFIX
        )));
    }
    Ok(name.to_string())
}

impl Config {
    /// Parses configuration from YAML text. At least one server section must
    /// be present.
    pub fn parse(name: &str, yaml: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(yaml)?;
        let server4 = raw
            .server4
            .map(|server| convert_server(server, ProtocolVersion::V4))
            .transpose()?;
        let server6 = raw
            .server6
            .map(|server| convert_server(server, ProtocolVersion::V6))
            .transpose()?;
        if server4.is_none() && server6.is_none() {
            return Err(Error::InvalidConfig(
                "need at least one valid config section for DHCPv6 or DHCPv4".to_string(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            server4,
            server6,
        })
    }

    /// Loads and parses a `<name>.config.yml` file.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = server_name(path)?;
        let contents = tokio::fs::read_to_string(path).await?;
        Self::parse(&name, &contents)
    }
}

/// Parses a duration argument of the form `<integer><unit>` with unit one of
/// `ms`, `s`, `m`, `h`, `d`. A bare integer is taken as seconds.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid duration '{}'", text)))?;
    let millis = match unit {
        "ms" => value,
        "" | "s" => value * 1_000,
        "m" => value * 60_000,
        "h" => value * 3_600_000,
        "d" => value * 86_400_000,
        _ => {
            return Err(Error::InvalidConfig(format!(
                "invalid duration unit in '{}'",
                text
            )));
        }
    };
    Ok(Duration::from_millis(millis))
}
