//! Live plugin descriptor.

use std::path::{Path, PathBuf};

use yoz_core::Scope;

use super::Manifest;
use crate::handler::BoxedHandler;

/// Whether a plugin's registrations are currently applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    Hooked,
    Unhooked,
}

#[derive(Clone)]
pub(crate) struct CommandRecord {
    pub scope: Scope,
    pub command: String,
    pub handler: BoxedHandler,
}

#[derive(Clone)]
pub(crate) struct ListenerRecord {
    pub event: String,
    pub handler: BoxedHandler,
}

/// Everything the registry knows about one loaded plugin.
///
/// Besides the manifest, a descriptor remembers every command and listener
/// the plugin registered so they can be removed on unhook and re-applied on
/// hook. A reload replaces the descriptor wholesale.
#[derive(Clone)]
pub struct PluginDescriptor {
    manifest: Manifest,
    module_path: String,
    directory: PathBuf,
    pub(crate) commands: Vec<CommandRecord>,
    pub(crate) listeners: Vec<ListenerRecord>,
    pub(crate) state: HookState,
}

impl PluginDescriptor {
    /// Creates a hooked descriptor with no registrations yet.
    pub fn new(manifest: Manifest, module_path: impl Into<String>, directory: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            module_path: module_path.into(),
            directory: directory.into(),
            commands: Vec::new(),
            listeners: Vec::new(),
            state: HookState::Hooked,
        }
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Dotted module path, e.g. `module.forest`.
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    /// Directory the manifest was read from.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn state(&self) -> HookState {
        self.state
    }

    pub fn is_hooked(&self) -> bool {
        self.state == HookState::Hooked
    }

    /// Registered commands in registration order.
    pub fn commands(&self) -> impl Iterator<Item = (Scope, &str)> {
        self.commands.iter().map(|r| (r.scope, r.command.as_str()))
    }

    /// Event names with at least one listener, in first-registration order.
    pub fn listener_events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = Vec::new();
        for record in &self.listeners {
            if !events.contains(&record.event.as_str()) {
                events.push(&record.event);
            }
        }
        events
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.iter().filter(|r| r.event == event).count()
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.manifest.name)
            .field("module_path", &self.module_path)
            .field("state", &self.state)
            .field("commands", &self.commands().collect::<Vec<_>>())
            .field("listeners", &self.listener_events())
            .finish()
    }
}
