use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;
use serde::de::DeserializeOwned;
use tower::BoxError;
use yoz_core::{Scheduler, Scope};

use crate::dispatcher::BotSettings;
use crate::error::{LifecycleError, LifecycleResult, RegistryResult};
use crate::handler::BoxedHandler;
use crate::redirect::RedirectPredicate;
use crate::registry::Registry;
use crate::session::SessionStore;

// ─── Plugin ───────────────────────────────────────────────────────────────────

/// A loadable unit of bot behaviour.
///
/// `on_load` runs once per (re)load and registers everything the plugin
/// needs through the [`PluginContext`]. If it fails, every registration it
/// made is rolled back and the plugin is not loaded.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError>;

    /// Called when the plugin is unloaded or replaced by a reload.
    async fn on_unload(&self) {}
}

// ─── PluginFactory ────────────────────────────────────────────────────────────

/// Constructs a plugin by manifest name.
#[derive(Debug, Clone, Copy)]
pub struct PluginFactory {
    /// Must equal the `name` field of the plugin's manifest.
    pub name: &'static str,
    pub create: fn() -> Box<dyn Plugin>,
}

/// Factories linked into the binary. Populated with [`export_plugin!`].
///
/// [`export_plugin!`]: crate::export_plugin
#[distributed_slice]
pub static PLUGIN_FACTORIES: [PluginFactory];

/// Adds a `Default`-constructible plugin type to [`PLUGIN_FACTORIES`].
///
/// ```rust,ignore
/// #[derive(Default)]
/// struct Forest;
///
/// yoz_framework::export_plugin!("forest", Forest);
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($name:literal, $plugin:ty) => {
        const _: () = {
            #[$crate::linkme::distributed_slice($crate::plugin::PLUGIN_FACTORIES)]
            #[linkme(crate = $crate::linkme)]
            static FACTORY: $crate::plugin::PluginFactory = $crate::plugin::PluginFactory {
                name: $name,
                create: || -> ::std::boxed::Box<dyn $crate::plugin::Plugin> {
                    ::std::boxed::Box::new(<$plugin as ::std::default::Default>::default())
                },
            };
        };
    };
}

// ─── PluginContext ────────────────────────────────────────────────────────────

/// Per-plugin resources handed to [`Plugin::on_load`].
///
/// All registrations made through the context are attributed to the plugin's
/// module path. A context kept after its plugin is unloaded is rejected with
/// `UnauthorizedRegistration`.
#[derive(Clone)]
pub struct PluginContext {
    name: String,
    module_path: String,
    registry: Arc<Registry>,
    scheduler: Scheduler,
    bot: Arc<BotSettings>,
    plugin_config: Arc<serde_json::Value>,
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl PluginContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        module_path: String,
        registry: Arc<Registry>,
        scheduler: Scheduler,
        bot: Arc<BotSettings>,
        plugin_config: Arc<serde_json::Value>,
        config_dir: PathBuf,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            name,
            module_path,
            registry,
            scheduler,
            bot,
            plugin_config,
            config_dir,
            data_dir,
        }
    }

    /// Plugin name from the manifest.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    /// Registers a command in `scope`.
    pub fn command(&self, scope: Scope, command: &str, handler: BoxedHandler) -> RegistryResult<()> {
        self.registry
            .register_command(&self.module_path, scope, command, handler)
    }

    pub fn group_command(&self, command: &str, handler: BoxedHandler) -> RegistryResult<()> {
        self.command(Scope::Group, command, handler)
    }

    pub fn contact_command(&self, command: &str, handler: BoxedHandler) -> RegistryResult<()> {
        self.command(Scope::Contact, command, handler)
    }

    /// Registers a listener for an event name such as `GroupMessage`.
    pub fn listen(&self, event: &str, handler: BoxedHandler) -> RegistryResult<()> {
        self.registry
            .register_listener(&self.module_path, event, handler)
    }

    pub fn redirect(
        &self,
        guid: &str,
        predicate: RedirectPredicate,
        handler: BoxedHandler,
    ) -> RegistryResult<()> {
        self.registry
            .redirect(&self.module_path, guid, predicate, handler)
    }

    pub fn redirect_member(
        &self,
        guid: &str,
        group: i64,
        member: i64,
        handler: BoxedHandler,
    ) -> RegistryResult<()> {
        self.redirect(guid, RedirectPredicate::Member { group, member }, handler)
    }

    pub fn redirect_contact(&self, guid: &str, contact: i64, handler: BoxedHandler) -> RegistryResult<()> {
        self.redirect(guid, RedirectPredicate::Contact(contact), handler)
    }

    pub fn unredirect(&self, guid: &str) -> bool {
        self.registry.unredirect(&self.module_path, guid)
    }

    /// Removes this plugin's redirects whose predicate is identical to
    /// `predicate`.
    pub fn unredirect_predicate(&self, predicate: &RedirectPredicate) -> usize {
        self.registry
            .unredirect_predicate(&self.module_path, predicate)
    }

    pub fn sessions(&self) -> &SessionStore {
        self.registry.sessions()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn bot_settings(&self) -> &BotSettings {
        &self.bot
    }

    /// Deserialises this plugin's settings section into `T`.
    ///
    /// An absent section is an empty object, so `#[serde(default)]` structs
    /// always succeed.
    pub fn config<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(self.plugin_config.as_ref())
    }

    /// Per-plugin configuration directory, created on first use.
    pub async fn config_dir(&self) -> LifecycleResult<PathBuf> {
        ensure_dir(&self.config_dir).await
    }

    /// Per-plugin data directory, created on first use.
    pub async fn data_dir(&self) -> LifecycleResult<PathBuf> {
        ensure_dir(&self.data_dir).await
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("module_path", &self.module_path)
            .finish()
    }
}

async fn ensure_dir(path: &Path) -> LifecycleResult<PathBuf> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| LifecycleError::io(path, e))?;
    Ok(path.to_path_buf())
}
