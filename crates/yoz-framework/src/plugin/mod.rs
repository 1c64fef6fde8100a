//! Plugin interface, descriptors and manifests.

mod core;
mod descriptor;
mod manifest;

pub use self::core::{PLUGIN_FACTORIES, Plugin, PluginContext, PluginFactory};
pub use descriptor::{HookState, PluginDescriptor};
pub(crate) use descriptor::{CommandRecord, ListenerRecord};
pub use manifest::Manifest;
