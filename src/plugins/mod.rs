//! Built-in plugins.
//!
//! Each submodule exports a `plugin()` descriptor; [`register_builtin`] puts
//! all of them into a registry. A plugin still has to be referenced from the
//! configuration to run.

pub mod dns;
pub mod file;
pub mod lease_time;
pub mod mtu;
pub mod netmask;
pub mod range;
pub mod router;
pub mod server_id;
pub mod sleep;
pub mod staticroute;

use crate::error::Result;
use crate::plugin::PluginRegistry;

/// Registers every built-in plugin into `registry`.
pub fn register_builtin(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(dns::plugin())?;
    registry.register(file::plugin())?;
    registry.register(lease_time::plugin())?;
    registry.register(mtu::plugin())?;
    registry.register(netmask::plugin())?;
    registry.register(range::plugin())?;
    registry.register(router::plugin())?;
    registry.register(server_id::plugin())?;
    registry.register(sleep::plugin())?;
    registry.register(staticroute::plugin())?;
    Ok(())
}
