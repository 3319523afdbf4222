//! Plugin descriptors, the name-unique registry and chain construction.
//!
//! A plugin declares a name and up to two setup functions, one per protocol
//! version. Setup runs once at server startup with the arguments from the
//! configuration and returns the handler that will see every packet. The
//! chain is the ordered list of handlers for one server section; order in
//! the configuration is evaluation order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::Span;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::packet4::Packet4;
use crate::packet6::{Message6, Packet6};

/// A DHCPv4 chain handler.
///
/// `resp` is the response accumulated by earlier handlers. The return value
/// is the response to hand to the next handler (or `None` to drop the
/// packet) and a stop flag. Returning `stop=true` ends the chain: the
/// server transmits the returned response, or drops the packet when it is
/// `None`. A chain that completes without any handler stopping transmits
/// nothing.
#[async_trait]
pub trait Handler4: Send + Sync {
    async fn handle(&self, req: &Packet4, resp: Packet4) -> (Option<Packet4>, bool);
}

/// A DHCPv6 chain handler. The request may still carry its relay envelopes;
/// the response is always the plain client-facing message, the dispatcher
/// re-wraps it before sending.
#[async_trait]
pub trait Handler6: Send + Sync {
    async fn handle(&self, req: &Packet6, resp: Message6) -> (Option<Message6>, bool);
}

pub type Setup4 = fn(&[String]) -> Result<Arc<dyn Handler4>>;
pub type Setup6 = fn(&[String]) -> Result<Arc<dyn Handler6>>;

/// Registration record for one plugin. A `None` setup means the protocol
/// version is not supported by this plugin.
pub struct Plugin {
    pub name: &'static str,
    pub setup4: Option<Setup4>,
    pub setup6: Option<Setup6>,
}

/// Name-unique table of plugins, populated once before the server starts.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<&'static str, Plugin>,
    order: Vec<&'static str>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin. Duplicate names are a startup-fatal error.
    pub fn register(&mut self, plugin: Plugin) -> Result<()> {
        if self.plugins.contains_key(plugin.name) {
            return Err(Error::InvalidConfig(format!(
                "plugin '{}' is already registered",
                plugin.name
            )));
        }
        self.order.push(plugin.name);
        self.plugins.insert(plugin.name, plugin);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.plugins.get(name)
    }

    /// Plugin names in registration order.
    pub fn names(&self) -> &[&'static str] {
        &self.order
    }
}

/// One position in an instantiated chain: the handler plus the span the
/// dispatcher enters for every invocation.
pub struct ChainLink4 {
    pub name: String,
    pub span: Span,
    pub handler: Arc<dyn Handler4>,
}

pub struct ChainLink6 {
    pub name: String,
    pub span: Span,
    pub handler: Arc<dyn Handler6>,
}

fn setup_error(plugin: &str, error: Error) -> Error {
    match error {
        already @ Error::PluginSetup { .. } => already,
        other => Error::setup(plugin, other),
    }
}

/// Instantiates the DHCPv4 chain for a server section, in declaration
/// order. Fails on the first unknown plugin, missing v4 support or setup
/// error, naming the offending plugin.
pub fn build_chain4(registry: &PluginRegistry, config: &ServerConfig) -> Result<Vec<ChainLink4>> {
    let mut chain = Vec::with_capacity(config.plugins.len());
    for instance in &config.plugins {
        let plugin = registry
            .get(&instance.name)
            .ok_or_else(|| Error::UnknownPlugin(instance.name.clone()))?;
        let setup = plugin
            .setup4
            .ok_or_else(|| Error::setup(&instance.name, "plugin does not support DHCPv4"))?;
        let span = tracing::info_span!("plugin", plugin = %instance.name, protocol = "v4");
        let handler = {
            let _guard = span.enter();
            setup(&instance.args).map_err(|error| setup_error(&instance.name, error))?
        };
        chain.push(ChainLink4 {
            name: instance.name.clone(),
            span,
            handler,
        });
    }
    Ok(chain)
}

/// DHCPv6 counterpart of [`build_chain4`].
pub fn build_chain6(registry: &PluginRegistry, config: &ServerConfig) -> Result<Vec<ChainLink6>> {
    let mut chain = Vec::with_capacity(config.plugins.len());
    for instance in &config.plugins {
        let plugin = registry
            .get(&instance.name)
            .ok_or_else(|| Error::UnknownPlugin(instance.name.clone()))?;
        let setup = plugin
            .setup6
            .ok_or_else(|| Error::setup(&instance.name, "plugin does not support DHCPv6"))?;
        let span = tracing::info_span!("plugin", plugin = %instance.name, protocol = "v6");
        let handler = {
            let _guard = span.enter();
            setup(&instance.args).map_err(|error| setup_error(&instance.name, error))?
        };
        chain.push(ChainLink6 {
            name: instance.name.clone(),
            span,
            handler,
        });
    }
    Ok(chain)
}
