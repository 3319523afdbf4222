pub mod allocator;
pub mod config;
pub mod error;
pub mod journal;
pub mod listener;
pub mod options4;
pub mod packet4;
pub mod packet6;
pub mod plugin;
pub mod plugins;
pub mod server;

pub use allocator::RangeAllocator;
pub use config::{Config, PluginInstance, ServerConfig};
pub use error::{Error, Result};
pub use journal::{LeaseJournal, LeaseRecord};
pub use listener::{BindTarget, ProtocolVersion};
pub use packet4::Packet4;
pub use packet6::Packet6;
pub use plugin::{Handler4, Handler6, Plugin, PluginRegistry};
pub use server::Server;
