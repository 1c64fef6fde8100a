//! Plugin lifecycle management.
//!
//! [`PluginManager`] discovers plugin directories, turns their manifests into
//! [`PluginDescriptor`]s, runs each plugin's `on_load` and drives hook,
//! unhook, unload and reload.
//!
//! A plugin directory looks like:
//!
//! ```text
//! module/
//! └── forest/
//!     └── manifest.json   {"name": "forest", "version": "1.0"}
//! ```
//!
//! and is loaded at module path `module.forest` using the factory registered
//! under the manifest's `name`. Failures are scoped to one plugin: a bad
//! manifest, a missing factory or a failing `on_load` is logged and the
//! remaining plugins still load.
//!
//! Each plugin gets its own [`Scheduler`] named after its module path. Its
//! pending timers are dropped on unhook and the timeline stops on unload.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};
use yoz_core::{Scheduler, TaskExecutor};

use crate::dispatcher::BotSettings;
use crate::error::{LifecycleError, LifecycleResult};
use crate::plugin::{Manifest, PLUGIN_FACTORIES, Plugin, PluginContext, PluginDescriptor, PluginFactory};
use crate::registry::Registry;

/// Where plugins keep their files and settings.
#[derive(Debug, Clone)]
pub struct PluginSettings {
    /// Manifest file name inside each plugin directory.
    pub manifest_file: String,
    /// Base of per-plugin configuration directories.
    pub config_dir: PathBuf,
    /// Base of per-plugin data directories.
    pub data_dir: PathBuf,
    /// Free-form settings sections keyed by plugin name.
    pub sections: HashMap<String, Value>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            manifest_file: "manifest.json".to_string(),
            config_dir: PathBuf::from("config"),
            data_dir: PathBuf::from("data"),
            sections: HashMap::new(),
        }
    }
}

/// Result of scanning a plugin root directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Module paths loaded successfully.
    pub loaded: Vec<String>,
    /// Plugin directories that failed, with the reason.
    pub failed: Vec<(PathBuf, LifecycleError)>,
}

/// Owns plugin instances and drives their lifecycle.
pub struct PluginManager {
    registry: Arc<Registry>,
    executor: TaskExecutor,
    bot: Arc<BotSettings>,
    settings: PluginSettings,
    factories: RwLock<HashMap<String, PluginFactory>>,
    /// Per-plugin timelines by module path.
    timelines: RwLock<HashMap<String, Scheduler>>,
    /// Live instances by module path. Also serialises lifecycle operations.
    instances: AsyncMutex<HashMap<String, Box<dyn Plugin>>>,
}

impl PluginManager {
    /// Creates a manager seeded with every factory in [`PLUGIN_FACTORIES`].
    pub fn new(
        registry: Arc<Registry>,
        executor: TaskExecutor,
        bot: Arc<BotSettings>,
        settings: PluginSettings,
    ) -> Self {
        let factories = PLUGIN_FACTORIES
            .iter()
            .map(|factory| (factory.name.to_string(), *factory))
            .collect();
        Self {
            registry,
            executor,
            bot,
            settings,
            factories: RwLock::new(factories),
            timelines: RwLock::new(HashMap::new()),
            instances: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Makes a factory available by name, replacing any previous one.
    pub fn register_factory(&self, factory: PluginFactory) {
        if self
            .factories
            .write()
            .insert(factory.name.to_string(), factory)
            .is_some()
        {
            warn!(plugin = factory.name, "Plugin factory replaced");
        }
    }

    /// The timeline of the plugin loaded at `module`.
    pub fn scheduler(&self, module: &str) -> Option<Scheduler> {
        self.timelines.read().get(module).cloned()
    }

    /// Names of all known factories, sorted.
    pub fn factory_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// All loaded plugins keyed by module path.
    pub fn descriptors(&self) -> Arc<BTreeMap<String, PluginDescriptor>> {
        self.registry.plugins()
    }

    /// Loads every plugin directory under `root`.
    ///
    /// Subdirectories without a manifest are skipped. Only an unreadable
    /// `root` is an error; per-plugin failures are collected in the report.
    pub async fn load_all(&self, root: &Path) -> LifecycleResult<LoadReport> {
        let root_name = root
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LifecycleError::manifest(root, "plugin root has no usable name"))?
            .to_string();

        let mut entries = tokio::fs::read_dir(root)
            .await
            .map_err(|e| LifecycleError::io(root, e))?;
        let mut dirs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LifecycleError::io(root, e))?
        {
            let path = entry.path();
            if path.is_dir() && path.join(&self.settings.manifest_file).is_file() {
                dirs.push(path);
            }
        }
        dirs.sort();

        let mut report = LoadReport::default();
        for dir in dirs {
            match self.load_dir(&root_name, &dir).await {
                Ok(module) => report.loaded.push(module),
                Err(e) => {
                    error!(path = %dir.display(), error = %e, "Failed to load plugin");
                    report.failed.push((dir, e));
                }
            }
        }
        info!(
            root = %root.display(),
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Plugins loaded"
        );
        Ok(report)
    }

    /// Loads the plugin in `dir` at module path `<root_name>.<dir name>`.
    pub async fn load_dir(&self, root_name: &str, dir: &Path) -> LifecycleResult<String> {
        let manifest = Manifest::read(&dir.join(&self.settings.manifest_file)).await?;
        let dir_name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| LifecycleError::manifest(dir, "plugin directory has no usable name"))?;
        let descriptor = PluginDescriptor::new(manifest, format!("{root_name}.{dir_name}"), dir);
        self.install(descriptor).await
    }

    /// Installs a descriptor: replaces whatever is loaded at its module
    /// path, then constructs the plugin and runs `on_load`.
    ///
    /// On failure everything the new plugin registered is rolled back.
    pub async fn install(&self, descriptor: PluginDescriptor) -> LifecycleResult<String> {
        let name = descriptor.name().to_string();
        let module = descriptor.module_path().to_string();
        let factory = self
            .factories
            .read()
            .get(&name)
            .copied()
            .ok_or_else(|| LifecycleError::PluginNotFound { name: name.clone() })?;

        let mut instances = self.instances.lock().await;
        if self.registry.plugin(&module).is_some() {
            debug!(module = %module, "Replacing loaded plugin");
            self.retire(&module, &mut instances).await;
        }

        self.registry.insert_plugin(descriptor);
        let plugin = (factory.create)();
        let timeline = Scheduler::new(module.clone(), self.executor.clone());
        let ctx = self.context(&name, &module, timeline.clone());
        match plugin.on_load(&ctx).await {
            Ok(()) => {
                instances.insert(module.clone(), plugin);
                self.timelines.write().insert(module.clone(), timeline);
                let loaded = self.registry.plugin(&module);
                info!(
                    plugin = %name,
                    module = %module,
                    commands = loaded.as_ref().map_or(0, |d| d.commands().count()),
                    "Plugin loaded"
                );
                Ok(module)
            }
            Err(source) => {
                timeline.shutdown();
                self.registry.remove_plugin(&module);
                Err(LifecycleError::Load { module, source })
            }
        }
    }

    /// Re-applies an unhooked plugin's registrations.
    pub fn hook(&self, module: &str) -> LifecycleResult<()> {
        self.registry.hook(module)
    }

    /// Withdraws a plugin's registrations without unloading it and drops
    /// its pending timers.
    pub fn unhook(&self, module: &str) -> LifecycleResult<()> {
        self.registry.unhook(module)?;
        if let Some(timeline) = self.timelines.read().get(module) {
            timeline.clear();
        }
        Ok(())
    }

    /// Unhooks a plugin, runs `on_unload` and deletes its descriptor.
    pub async fn unload(&self, module: &str) -> LifecycleResult<()> {
        let mut instances = self.instances.lock().await;
        if self.registry.plugin(module).is_none() {
            return Err(LifecycleError::UnknownModule {
                module: module.to_string(),
            });
        }
        self.retire(module, &mut instances).await;
        info!(module, "Plugin unloaded");
        Ok(())
    }

    /// Re-reads a loaded plugin's manifest and installs it afresh.
    pub async fn reload(&self, module: &str) -> LifecycleResult<String> {
        let current = self
            .registry
            .plugin(module)
            .ok_or_else(|| LifecycleError::UnknownModule {
                module: module.to_string(),
            })?;
        let dir = current.directory().to_path_buf();
        let manifest = Manifest::read(&dir.join(&self.settings.manifest_file)).await?;
        self.install(PluginDescriptor::new(manifest, module, dir)).await
    }

    /// Unloads every plugin.
    pub async fn shutdown(&self) {
        let modules: Vec<String> = self.descriptors().keys().cloned().collect();
        for module in modules {
            if let Err(e) = self.unload(&module).await {
                warn!(module = %module, error = %e, "Failed to unload plugin");
            }
        }
    }

    async fn retire(&self, module: &str, instances: &mut HashMap<String, Box<dyn Plugin>>) {
        if self.registry.plugin(module).is_some_and(|d| d.is_hooked())
            && let Err(e) = self.registry.unhook(module)
        {
            warn!(module, error = %e, "Unhook failed during retire");
        }
        if let Some(timeline) = self.timelines.write().remove(module) {
            timeline.shutdown();
        }
        if let Some(plugin) = instances.remove(module) {
            plugin.on_unload().await;
        }
        self.registry.remove_plugin(module);
    }

    fn context(&self, name: &str, module: &str, timeline: Scheduler) -> PluginContext {
        let section = self
            .settings
            .sections
            .get(name)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()));
        PluginContext::new(
            name.to_string(),
            module.to_string(),
            Arc::clone(&self.registry),
            timeline,
            Arc::clone(&self.bot),
            Arc::new(section),
            self.settings.config_dir.join(name),
            self.settings.data_dir.join(name),
        )
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("factories", &self.factory_names())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tower::BoxError;
    use yoz_core::{Scope, TaskExecutor};

    use super::*;
    use crate::export_plugin;
    use crate::handler::{BoxedHandler, handler_fn};
    use crate::plugin::HookState;
    use crate::registry::Ownership;

    fn noop() -> BoxedHandler {
        handler_fn(|_ctx| async { Ok(()) })
    }

    #[derive(Default)]
    struct Forest;

    #[async_trait]
    impl Plugin for Forest {
        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.group_command("种树", noop())?;
            ctx.group_command("种树苗", noop())?;
            ctx.listen("GroupMessage", noop())?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct ForestV2;

    #[async_trait]
    impl Plugin for ForestV2 {
        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.group_command("种树", noop())?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Broken;

    #[async_trait]
    impl Plugin for Broken {
        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.group_command("broken", noop())?;
            ctx.listen("FriendMessage", noop())?;
            Err("bad config".into())
        }
    }

    #[derive(Default)]
    struct Greedy;

    #[async_trait]
    impl Plugin for Greedy {
        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.contact_command("mine", noop())?;
            ctx.group_command("种树", noop())?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Probe;

    #[derive(Deserialize)]
    struct ProbeConfig {
        #[serde(default = "default_greeting")]
        greeting: String,
    }

    fn default_greeting() -> String {
        "hello".into()
    }

    #[async_trait]
    impl Plugin for Probe {
        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            let config: ProbeConfig = ctx.config()?;
            ctx.contact_command(&config.greeting, noop())?;
            ctx.data_dir().await?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Exported;

    #[async_trait]
    impl Plugin for Exported {
        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.listen("GroupRecallEvent", noop())?;
            Ok(())
        }
    }

    export_plugin!("exported", Exported);

    /// Schedules a tick for member 5 of group 100 an hour after loading.
    struct Ticker(&'static AtomicUsize);

    #[async_trait]
    impl Plugin for Ticker {
        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            let ticks = self.0;
            ctx.scheduler().add("100.5", HOUR, move || async move {
                ticks.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BoxError>(())
            });
            Ok(())
        }
    }

    /// Uses the same timer id as [`Ticker`] for its own bookkeeping.
    #[derive(Default)]
    struct Duel;

    #[async_trait]
    impl Plugin for Duel {
        async fn on_load(&self, ctx: &PluginContext) -> Result<(), BoxError> {
            ctx.scheduler()
                .add("100.5", HOUR, || async { Ok::<(), BoxError>(()) });
            if !ctx.scheduler().remove("100.5") {
                return Err("own timer missing".into());
            }
            Ok(())
        }
    }

    const HOUR: Duration = Duration::from_secs(3600);

    fn factory(name: &'static str, create: fn() -> Box<dyn Plugin>) -> PluginFactory {
        PluginFactory { name, create }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        base: PathBuf,
        manager: PluginManager,
    }

    impl Fixture {
        fn new(sections: HashMap<String, Value>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let base = dir.path().to_path_buf();
            let root = base.join("module");
            std::fs::create_dir_all(&root).unwrap();

            let registry = Arc::new(Registry::new());
            let executor = TaskExecutor::default();
            let settings = PluginSettings {
                config_dir: base.join("config"),
                data_dir: base.join("data"),
                sections,
                ..PluginSettings::default()
            };
            let manager = PluginManager::new(registry, executor, Arc::default(), settings);
            manager.register_factory(factory("forest", || Box::new(Forest)));
            manager.register_factory(factory("broken", || Box::new(Broken)));
            manager.register_factory(factory("greedy", || Box::new(Greedy)));
            manager.register_factory(factory("probe", || Box::new(Probe)));
            Self {
                _dir: dir,
                root,
                base,
                manager,
            }
        }

        fn plugin_dir(&self, dir: &str, manifest: Value) -> PathBuf {
            let path = self.root.join(dir);
            std::fs::create_dir_all(&path).unwrap();
            std::fs::write(path.join("manifest.json"), manifest.to_string()).unwrap();
            path
        }

        fn owned(&self, module: &str) -> Ownership {
            self.manager.registry().owned_by(module)
        }
    }

    #[tokio::test]
    async fn test_load_all_isolates_failures() {
        let fx = Fixture::new(HashMap::new());
        fx.plugin_dir("forest", json!({"name": "forest", "version": "1.0"}));
        fx.plugin_dir("nameless", json!({"version": "1.0"}));
        fx.plugin_dir("ghost", json!({"name": "ghost"}));
        fx.plugin_dir("broken", json!({"name": "broken"}));
        std::fs::create_dir_all(fx.root.join("assets")).unwrap();

        let report = fx.manager.load_all(&fx.root).await.unwrap();
        assert_eq!(report.loaded, ["module.forest"]);
        assert_eq!(report.failed.len(), 3);
        let failure = |dir: &str| {
            &report
                .failed
                .iter()
                .find(|(path, _)| path.ends_with(dir))
                .unwrap()
                .1
        };
        assert!(matches!(failure("nameless"), LifecycleError::Manifest { .. }));
        assert!(matches!(failure("ghost"), LifecycleError::PluginNotFound { .. }));
        assert!(matches!(failure("broken"), LifecycleError::Load { .. }));

        // the failed on_load left nothing behind
        assert!(fx.owned("module.broken").is_empty());
        assert!(fx.manager.registry().plugin("module.broken").is_none());

        let descriptors = fx.manager.descriptors();
        assert_eq!(descriptors.keys().collect::<Vec<_>>(), ["module.forest"]);
        let forest = &descriptors["module.forest"];
        assert_eq!(forest.manifest().version.as_deref(), Some("1.0"));
        assert_eq!(forest.commands().count(), 2);
        assert_eq!(forest.state(), HookState::Hooked);
    }

    #[tokio::test]
    async fn test_conflicting_plugin_is_rolled_back() {
        let fx = Fixture::new(HashMap::new());
        fx.plugin_dir("a_forest", json!({"name": "forest"}));
        fx.plugin_dir("b_greedy", json!({"name": "greedy"}));

        let report = fx.manager.load_all(&fx.root).await.unwrap();
        assert_eq!(report.loaded, ["module.a_forest"]);
        assert!(matches!(report.failed[0].1, LifecycleError::Load { .. }));
        // the command registered before the conflict was removed again
        assert!(fx.owned("module.b_greedy").is_empty());
        assert!(
            fx.manager
                .registry()
                .match_command(Scope::Contact, "mine")
                .is_none()
        );
        assert_eq!(
            fx.manager
                .registry()
                .match_command(Scope::Group, "种树")
                .unwrap()
                .module,
            "module.a_forest"
        );
    }

    #[tokio::test]
    async fn test_reload_leaves_no_orphans() {
        let fx = Fixture::new(HashMap::new());
        fx.plugin_dir("forest", json!({"name": "forest", "version": "1.0"}));
        fx.manager.load_all(&fx.root).await.unwrap();
        assert_eq!(fx.owned("module.forest").commands.len(), 2);

        fx.manager
            .register_factory(factory("forest", || Box::new(ForestV2)));
        fx.plugin_dir("forest", json!({"name": "forest", "version": "2.0"}));
        fx.manager.reload("module.forest").await.unwrap();

        let owned = fx.owned("module.forest");
        assert_eq!(owned.commands, [(Scope::Group, "种树".to_string())]);
        assert!(owned.listeners.is_empty());
        let matched = fx
            .manager
            .registry()
            .match_command(Scope::Group, "种树苗")
            .unwrap();
        assert_eq!(matched.command, "种树");
        let descriptor = fx.manager.registry().plugin("module.forest").unwrap();
        assert_eq!(descriptor.manifest().version.as_deref(), Some("2.0"));
    }

    #[tokio::test]
    async fn test_hook_unhook_unload() {
        let fx = Fixture::new(HashMap::new());
        fx.plugin_dir("forest", json!({"name": "forest"}));
        fx.manager.load_all(&fx.root).await.unwrap();
        let before = fx.owned("module.forest");

        fx.manager.unhook("module.forest").unwrap();
        assert!(fx.owned("module.forest").is_empty());
        assert!(fx.manager.unhook("module.forest").is_err());

        fx.manager.hook("module.forest").unwrap();
        assert_eq!(fx.owned("module.forest"), before);

        fx.manager.unload("module.forest").await.unwrap();
        assert!(fx.owned("module.forest").is_empty());
        assert!(fx.manager.descriptors().is_empty());
        assert!(matches!(
            fx.manager.unload("module.forest").await,
            Err(LifecycleError::UnknownModule { .. })
        ));
    }

    #[tokio::test]
    async fn test_plugin_settings_and_directories() {
        let sections = HashMap::from([("probe".to_string(), json!({"greeting": "早上好"}))]);
        let fx = Fixture::new(sections);
        fx.plugin_dir("probe", json!({"name": "probe"}));

        fx.manager.load_all(&fx.root).await.unwrap();
        assert_eq!(
            fx.owned("module.probe").commands,
            [(Scope::Contact, "早上好".to_string())]
        );
        assert!(fx.base.join("data").join("probe").is_dir());
    }

    #[tokio::test]
    async fn test_exported_factory_is_discovered() {
        let fx = Fixture::new(HashMap::new());
        assert!(fx.manager.factory_names().contains(&"exported".to_string()));
        fx.plugin_dir("recall", json!({"name": "exported"}));

        fx.manager.load_all(&fx.root).await.unwrap();
        assert_eq!(fx.manager.registry().listeners("GroupRecallEvent").len(), 1);

        fx.manager.shutdown().await;
        assert!(fx.manager.descriptors().is_empty());
    }

    #[tokio::test]
    async fn test_stale_context_cannot_register() {
        let fx = Fixture::new(HashMap::new());
        fx.plugin_dir("forest", json!({"name": "forest"}));
        fx.manager.load_all(&fx.root).await.unwrap();

        let timeline = fx.manager.scheduler("module.forest").unwrap();
        let ctx = fx.manager.context("forest", "module.forest", timeline);
        fx.manager.unload("module.forest").await.unwrap();
        assert!(matches!(
            ctx.group_command("late", noop()),
            Err(crate::error::RegistryError::UnauthorizedRegistration { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plugin_timers_are_isolated() {
        static TICKS: AtomicUsize = AtomicUsize::new(0);
        let fx = Fixture::new(HashMap::new());
        fx.manager
            .register_factory(factory("ticker", || Box::new(Ticker(&TICKS))));
        fx.manager.register_factory(factory("duel", || Box::new(Duel)));
        fx.plugin_dir("a_ticker", json!({"name": "ticker"}));
        fx.plugin_dir("b_duel", json!({"name": "duel"}));

        let report = fx.manager.load_all(&fx.root).await.unwrap();
        assert_eq!(report.loaded, ["module.a_ticker", "module.b_duel"]);
        let ticker = fx.manager.scheduler("module.a_ticker").unwrap();
        assert_eq!(ticker.name(), "module.a_ticker");
        assert!(ticker.contains("100.5"));
        assert!(fx.manager.scheduler("module.b_duel").unwrap().is_empty());

        tokio::time::sleep(2 * HOUR).await;
        assert_eq!(TICKS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retired_plugin_timers_never_fire() {
        static TICKS: AtomicUsize = AtomicUsize::new(0);
        let fx = Fixture::new(HashMap::new());
        fx.manager
            .register_factory(factory("ticker", || Box::new(Ticker(&TICKS))));
        fx.plugin_dir("ticker", json!({"name": "ticker"}));
        fx.manager.load_all(&fx.root).await.unwrap();

        // unhook drops pending timers but keeps the timeline usable
        fx.manager.unhook("module.ticker").unwrap();
        let timeline = fx.manager.scheduler("module.ticker").unwrap();
        assert!(timeline.is_empty());
        fx.manager.hook("module.ticker").unwrap();

        // reload schedules afresh on a new timeline, the old one is stopped
        fx.manager.reload("module.ticker").await.unwrap();
        timeline.add("stale", Duration::from_secs(1), || async {
            TICKS.fetch_add(100, Ordering::SeqCst);
            Ok::<(), BoxError>(())
        });
        fx.manager.shutdown().await;
        assert!(fx.manager.scheduler("module.ticker").is_none());

        tokio::time::sleep(2 * HOUR).await;
        assert_eq!(TICKS.load(Ordering::SeqCst), 0);
    }
}
