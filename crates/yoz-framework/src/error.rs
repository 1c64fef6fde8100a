//! Error types for the yoz framework.

use std::path::PathBuf;

use thiserror::Error;
use tower::BoxError;
use yoz_core::Scope;

/// Errors raised by registration calls.
///
/// A failed registration leaves the registry exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The `(command, scope)` pair is already owned by a plugin.
    #[error("command '{command}' is already registered in {scope} scope by '{owner}'")]
    RegistrationConflict {
        command: String,
        scope: Scope,
        owner: String,
    },

    /// The caller's module path resolves to no loaded plugin.
    #[error("module '{module}' does not belong to any loaded plugin")]
    UnauthorizedRegistration { module: String },

    /// The redirect guid is held by another plugin.
    #[error("redirect '{guid}' is owned by '{owner}'")]
    RedirectConflict { guid: String, owner: String },

    /// The owning plugin is unhooked and accepts no registrations.
    #[error("plugin '{module}' is unhooked")]
    PluginUnhooked { module: String },
}

/// Result type for registration operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised while discovering, loading, hooking or unloading plugins.
///
/// Every variant is scoped to one plugin; the manager keeps going with the
/// others.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The manifest is missing, unreadable as JSON, or lacks `name`.
    #[error("invalid manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// Filesystem error while scanning or preparing plugin directories.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No factory is registered under the manifest's name.
    #[error("no plugin factory named '{name}'")]
    PluginNotFound { name: String },

    /// `hook` was called on a plugin that is already hooked.
    #[error("plugin '{module}' is already hooked")]
    AlreadyHooked { module: String },

    /// `unhook` was called on a plugin that is not hooked.
    #[error("plugin '{module}' is not hooked")]
    NotHooked { module: String },

    /// No plugin is loaded at the module path.
    #[error("no plugin loaded at '{module}'")]
    UnknownModule { module: String },

    /// The plugin's `on_load` hook failed.
    #[error("plugin '{module}' failed to load: {source}")]
    Load {
        module: String,
        #[source]
        source: BoxError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LifecycleError {
    pub(crate) fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;
