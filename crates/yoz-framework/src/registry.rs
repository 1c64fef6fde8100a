//! Command, listener and redirect registry.
//!
//! One [`Registry`] instance is shared by the dispatcher, the plugin manager
//! and every plugin. All of its tables sit behind a single lock: dispatch
//! reads, registration and lifecycle operations write. Every registration is
//! authorized against the namespace trie and either applies completely or
//! leaves the registry untouched.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use yoz_core::{InboundEvent, Scope};

use crate::error::{LifecycleError, LifecycleResult, RegistryError, RegistryResult};
use crate::handler::BoxedHandler;
use crate::namespace::NamespaceTree;
use crate::plugin::{CommandRecord, HookState, ListenerRecord, PluginDescriptor};
use crate::redirect::{RedirectEntry, RedirectPredicate};
use crate::session::SessionStore;

/// A command resolved for an incoming text.
#[derive(Clone)]
pub struct CommandMatch {
    pub command: String,
    pub module: String,
    pub handler: BoxedHandler,
}

/// A listener selected for fan-out.
#[derive(Clone)]
pub struct ListenerMatch {
    pub module: String,
    pub handler: BoxedHandler,
}

/// A redirect that captured an event.
#[derive(Clone)]
pub struct RedirectMatch {
    pub guid: String,
    pub module: String,
    pub handler: BoxedHandler,
}

/// Everything a module currently owns in the live tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ownership {
    /// Sorted `(scope, command)` pairs.
    pub commands: Vec<(Scope, String)>,
    /// Sorted `(event, handler count)` pairs.
    pub listeners: Vec<(String, usize)>,
    /// Redirect guids in match order.
    pub redirects: Vec<String>,
}

impl Ownership {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.listeners.is_empty() && self.redirects.is_empty()
    }
}

#[derive(Clone)]
struct CommandEntry {
    module: String,
    handler: BoxedHandler,
}

#[derive(Default)]
struct RegistryState {
    plugins: NamespaceTree<PluginDescriptor>,
    commands: HashMap<Scope, HashMap<String, CommandEntry>>,
    /// event name -> owning module -> handlers in registration order
    listeners: HashMap<String, HashMap<String, Vec<BoxedHandler>>>,
    /// Earlier entries win when several match.
    redirects: Vec<RedirectEntry>,
}

impl RegistryState {
    /// Resolves `caller` to the hooked plugin that owns it.
    fn authorize(&mut self, caller: &str) -> RegistryResult<String> {
        match self.plugins.search(caller) {
            Some((module, descriptor)) if descriptor.is_hooked() => Ok(module),
            Some((module, _)) => Err(RegistryError::PluginUnhooked { module }),
            None => Err(RegistryError::UnauthorizedRegistration {
                module: caller.to_string(),
            }),
        }
    }

    fn command_owner(&self, scope: Scope, command: &str) -> Option<&str> {
        self.commands
            .get(&scope)?
            .get(command)
            .map(|entry| entry.module.as_str())
    }

    /// Removes every live entry owned by `module`.
    fn detach(&mut self, module: &str, descriptor: &PluginDescriptor) {
        for record in &descriptor.commands {
            if let Some(table) = self.commands.get_mut(&record.scope)
                && table
                    .get(&record.command)
                    .is_some_and(|entry| entry.module == module)
            {
                table.remove(&record.command);
            }
        }
        self.listeners.retain(|_, owners| {
            owners.remove(module);
            !owners.is_empty()
        });
        self.redirects.retain(|entry| entry.module != module);
    }
}

/// Shared registry of plugins and their handlers.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,
    sessions: SessionStore,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    // ─── Plugins ─────────────────────────────────────────────────────────────

    /// Stores a descriptor at its module path, returning the one it replaced.
    pub fn insert_plugin(&self, descriptor: PluginDescriptor) -> Option<PluginDescriptor> {
        let path = descriptor.module_path().to_string();
        self.state.write().plugins.insert(&path, descriptor)
    }

    /// Returns a copy of the descriptor at `module`.
    pub fn plugin(&self, module: &str) -> Option<PluginDescriptor> {
        self.state.read().plugins.get(module).cloned()
    }

    /// Deletes the descriptor at `module` along with everything it owns.
    pub fn remove_plugin(&self, module: &str) -> Option<PluginDescriptor> {
        let descriptor = {
            let mut state = self.state.write();
            let descriptor = state.plugins.delete(module)?;
            state.detach(module, &descriptor);
            descriptor
        };
        self.sessions.close_module(module);
        debug!(module, "Plugin removed from registry");
        Some(descriptor)
    }

    /// Resolves a module path to the plugin it belongs to.
    pub fn resolve(&self, caller: &str) -> Option<String> {
        self.state
            .write()
            .plugins
            .search(caller)
            .map(|(module, _)| module)
    }

    /// All loaded plugins keyed by module path.
    pub fn plugins(&self) -> Arc<BTreeMap<String, PluginDescriptor>> {
        self.state.write().plugins.snapshot()
    }

    // ─── Registration ────────────────────────────────────────────────────────

    /// Registers `command` in `scope` on behalf of the plugin owning `caller`.
    pub fn register_command(
        &self,
        caller: &str,
        scope: Scope,
        command: &str,
        handler: BoxedHandler,
    ) -> RegistryResult<()> {
        let mut state = self.state.write();
        let module = state.authorize(caller)?;
        if let Some(owner) = state.command_owner(scope, command) {
            return Err(RegistryError::RegistrationConflict {
                command: command.to_string(),
                scope,
                owner: owner.to_string(),
            });
        }

        state.commands.entry(scope).or_default().insert(
            command.to_string(),
            CommandEntry {
                module: module.clone(),
                handler: handler.clone(),
            },
        );
        if let Some(descriptor) = state.plugins.get_mut(&module) {
            descriptor.commands.push(CommandRecord {
                scope,
                command: command.to_string(),
                handler,
            });
        }
        debug!(module = %module, command, scope = %scope, "Command registered");
        Ok(())
    }

    /// Appends a listener for `event` on behalf of the plugin owning `caller`.
    pub fn register_listener(
        &self,
        caller: &str,
        event: &str,
        handler: BoxedHandler,
    ) -> RegistryResult<()> {
        let mut state = self.state.write();
        let module = state.authorize(caller)?;

        state
            .listeners
            .entry(event.to_string())
            .or_default()
            .entry(module.clone())
            .or_default()
            .push(handler.clone());
        if let Some(descriptor) = state.plugins.get_mut(&module) {
            descriptor.listeners.push(ListenerRecord {
                event: event.to_string(),
                handler,
            });
        }
        debug!(module = %module, event, "Listener registered");
        Ok(())
    }

    /// Installs a redirect. An existing redirect with the same guid is
    /// replaced in place when the caller's plugin owns it.
    pub fn redirect(
        &self,
        caller: &str,
        guid: &str,
        predicate: RedirectPredicate,
        handler: BoxedHandler,
    ) -> RegistryResult<()> {
        let mut state = self.state.write();
        let module = state.authorize(caller)?;
        let slot = state.redirects.iter().position(|e| e.guid == guid);
        if let Some(at) = slot
            && state.redirects[at].module != module
        {
            return Err(RegistryError::RedirectConflict {
                guid: guid.to_string(),
                owner: state.redirects[at].module.clone(),
            });
        }
        debug!(module = %module, guid, ?predicate, "Redirect installed");

        let entry = RedirectEntry {
            guid: guid.to_string(),
            module,
            predicate,
            handler,
        };
        match slot {
            Some(at) => state.redirects[at] = entry,
            None => state.redirects.push(entry),
        }
        Ok(())
    }

    /// Removes the redirect `guid` if the caller's plugin owns it.
    pub fn unredirect(&self, caller: &str, guid: &str) -> bool {
        let mut state = self.state.write();
        let Some((module, _)) = state.plugins.search(caller) else {
            return false;
        };
        let before = state.redirects.len();
        state
            .redirects
            .retain(|e| !(e.guid == guid && e.module == module));
        let removed = state.redirects.len() != before;
        if removed {
            debug!(module = %module, guid, "Redirect removed");
        }
        removed
    }

    /// Removes the caller's redirects whose predicate is identical to
    /// `predicate`.
    pub fn unredirect_predicate(&self, caller: &str, predicate: &RedirectPredicate) -> usize {
        let mut state = self.state.write();
        let Some((module, _)) = state.plugins.search(caller) else {
            return 0;
        };
        let before = state.redirects.len();
        state
            .redirects
            .retain(|e| e.module != module || !e.predicate.same_as(predicate));
        before - state.redirects.len()
    }

    pub fn has_redirect(&self, guid: &str) -> bool {
        self.state.read().redirects.iter().any(|e| e.guid == guid)
    }

    // ─── Lookup ──────────────────────────────────────────────────────────────

    /// Finds the first redirect that captures `event`.
    ///
    /// Filters run outside the registry lock, so a filter may itself call
    /// back into the registry.
    pub fn match_redirect(&self, event: &InboundEvent) -> Option<RedirectMatch> {
        let redirects = self.state.read().redirects.clone();
        redirects
            .into_iter()
            .find(|entry| entry.predicate.matches(event))
            .map(|entry| RedirectMatch {
                guid: entry.guid,
                module: entry.module,
                handler: entry.handler,
            })
    }

    /// Selects the longest command in `scope` that is a prefix of `text`.
    ///
    /// Of several equally long candidates the first one found wins.
    pub fn match_command(&self, scope: Scope, text: &str) -> Option<CommandMatch> {
        let state = self.state.read();
        let mut best: Option<(&String, &CommandEntry)> = None;
        for (command, entry) in state.commands.get(&scope)? {
            if text.starts_with(command.as_str())
                && best.is_none_or(|(current, _)| command.len() > current.len())
            {
                best = Some((command, entry));
            }
        }
        best.map(|(command, entry)| CommandMatch {
            command: command.clone(),
            module: entry.module.clone(),
            handler: entry.handler.clone(),
        })
    }

    /// Every listener for `event`, grouped by module in registration order.
    ///
    /// The order of modules relative to each other is unspecified.
    pub fn listeners(&self, event: &str) -> Vec<ListenerMatch> {
        let state = self.state.read();
        let Some(owners) = state.listeners.get(event) else {
            return Vec::new();
        };
        owners
            .iter()
            .flat_map(|(module, handlers)| {
                handlers.iter().map(move |handler| ListenerMatch {
                    module: module.clone(),
                    handler: handler.clone(),
                })
            })
            .collect()
    }

    /// Registered command strings in `scope`, sorted.
    pub fn command_names(&self, scope: Scope) -> Vec<String> {
        let state = self.state.read();
        let mut names: Vec<String> = state
            .commands
            .get(&scope)
            .map(|table| table.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Everything `module` owns in the live tables.
    pub fn owned_by(&self, module: &str) -> Ownership {
        let state = self.state.read();
        let mut commands: Vec<(Scope, String)> = state
            .commands
            .iter()
            .flat_map(|(scope, table)| {
                table
                    .iter()
                    .filter(|(_, entry)| entry.module == module)
                    .map(|(command, _)| (*scope, command.clone()))
            })
            .collect();
        commands.sort_by(|a, b| (a.0 as u8, &a.1).cmp(&(b.0 as u8, &b.1)));

        let mut listeners: Vec<(String, usize)> = state
            .listeners
            .iter()
            .filter_map(|(event, owners)| owners.get(module).map(|h| (event.clone(), h.len())))
            .collect();
        listeners.sort();

        let redirects = state
            .redirects
            .iter()
            .filter(|e| e.module == module)
            .map(|e| e.guid.clone())
            .collect();

        Ownership {
            commands,
            listeners,
            redirects,
        }
    }

    // ─── Hook / unhook ───────────────────────────────────────────────────────

    /// Re-applies an unhooked plugin's commands and listeners.
    ///
    /// Fails without changing anything if the plugin is hooked already or if
    /// one of its commands has since been taken by another plugin.
    pub fn hook(&self, module: &str) -> LifecycleResult<()> {
        let mut state = self.state.write();
        let descriptor = state
            .plugins
            .get(module)
            .ok_or_else(|| LifecycleError::UnknownModule {
                module: module.to_string(),
            })?;
        if descriptor.is_hooked() {
            return Err(LifecycleError::AlreadyHooked {
                module: module.to_string(),
            });
        }
        let commands = descriptor.commands.clone();
        let listeners = descriptor.listeners.clone();

        for record in &commands {
            if let Some(owner) = state.command_owner(record.scope, &record.command) {
                return Err(RegistryError::RegistrationConflict {
                    command: record.command.clone(),
                    scope: record.scope,
                    owner: owner.to_string(),
                }
                .into());
            }
        }

        for record in commands {
            state.commands.entry(record.scope).or_default().insert(
                record.command,
                CommandEntry {
                    module: module.to_string(),
                    handler: record.handler,
                },
            );
        }
        for record in listeners {
            state
                .listeners
                .entry(record.event)
                .or_default()
                .entry(module.to_string())
                .or_default()
                .push(record.handler);
        }
        if let Some(descriptor) = state.plugins.get_mut(module) {
            descriptor.state = HookState::Hooked;
        }
        info!(module, "Plugin hooked");
        Ok(())
    }

    /// Removes every command, listener, redirect and session owned by the
    /// plugin and marks it unhooked. The descriptor keeps its records.
    pub fn unhook(&self, module: &str) -> LifecycleResult<()> {
        {
            let mut state = self.state.write();
            let descriptor = state
                .plugins
                .get(module)
                .cloned()
                .ok_or_else(|| LifecycleError::UnknownModule {
                    module: module.to_string(),
                })?;
            if !descriptor.is_hooked() {
                return Err(LifecycleError::NotHooked {
                    module: module.to_string(),
                });
            }
            state.detach(module, &descriptor);
            if let Some(descriptor) = state.plugins.get_mut(module) {
                descriptor.state = HookState::Unhooked;
            }
        }
        self.sessions.close_module(module);
        info!(module, "Plugin unhooked");
        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Registry")
            .field(
                "commands",
                &state.commands.values().map(HashMap::len).sum::<usize>(),
            )
            .field("listeners", &state.listeners.len())
            .field("redirects", &state.redirects.len())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
