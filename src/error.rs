use std::net::Ipv4Addr;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid listen address: {0}")]
    InvalidListen(String),

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Plugin {plugin} failed to initialize: {reason}")]
    PluginSetup { plugin: String, reason: String },

    #[error("Invalid DHCP packet: {0}")]
    InvalidPacket(String),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("No available IP addresses in range")]
    RangeExhausted,

    #[error("Address {0} is already allocated")]
    AlreadyAllocated(Ipv4Addr),

    #[error("Address {0} is outside the configured range")]
    AddressOutOfRange(Ipv4Addr),

    #[error("Malformed lease journal: {0}")]
    MalformedLease(String),
}

impl Error {
    pub fn setup(plugin: &str, reason: impl std::fmt::Display) -> Self {
        Self::PluginSetup {
            plugin: plugin.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
