//! Backend registry configuration
//!
//! Parses and validates the registry file at `~/.config/jobctl/backends.toml`.
//! Each `[[backend]]` entry names a backend, its kind, and how to reach it.
//! When the file is absent a built-in registry with one `local` and one
//! `slurm` entry is used.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{
    Backend, BackendDescriptor, BackendHandle, BackendKind, LocalBackend, SlurmBackend, SlurmConfig,
};
use crate::identity;

/// Current registry schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Backend registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRegistry {
    /// Schema version for forward compatibility
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default, rename = "backend")]
    pub backends: Vec<BackendEntry>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

/// A single backend entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendEntry {
    /// Unique name; also the custom attribute namespace
    pub name: String,

    pub kind: BackendKind,

    /// Namespace custom attributes on submit. Defaults by kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespaces_custom_attributes: Option<bool>,

    /// Queue used when a spec names none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_queue: Option<String>,

    /// Directory holding scheduler binaries (slurm)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<String>,

    /// Per-command binary paths (slurm)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bin_overrides: BTreeMap<String, String>,

    /// Login host to run scheduler commands on (slurm)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_host: Option<String>,

    #[serde(default = "default_strict_host_checking")]
    pub strict_host_checking: bool,

    /// Cluster passed as `-M` (slurm)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,

    /// Job state directory (local). Defaults to `~/.local/state/jobctl/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<String>,
}

fn default_strict_host_checking() -> bool {
    true
}

/// Errors that can occur when loading the registry or resolving a backend
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read backend registry: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Backend registry not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported registry schema_version {0} (expected 1)")]
    UnsupportedSchema(u32),

    #[error("Duplicate backend name: '{0}'")]
    DuplicateName(String),

    #[error("Backend '{name}': invalid name: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Unknown backend '{name}' (available: {available})")]
    UnknownBackend { name: String, available: String },

    #[error("Cannot determine home directory")]
    NoHome,
}

impl BackendRegistry {
    /// Load the registry from the default location, or the built-in one
    /// when no file exists there.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path()?;
        if !path.exists() {
            debug!(path = %path.display(), "no backend registry, using built-in backends");
            return Ok(Self::builtin());
        }
        Self::load(&path)
    }

    /// Load from `path` when given, else as [`load_default`](Self::load_default).
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        }
    }

    /// Get the default registry file path
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = identity::home_dir().ok_or(ConfigError::NoHome)?;
        Ok(home.join(".config/jobctl/backends.toml"))
    }

    /// Load the registry from a specific path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        let registry = Self::parse(&content)?;
        debug!(path = %path.display(), backends = registry.len(), "loaded backend registry");
        Ok(registry)
    }

    /// Parse the registry from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let registry: BackendRegistry = toml::from_str(content)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Registry used when no file exists
    pub fn builtin() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            backends: vec![
                BackendEntry::new("local", BackendKind::Local),
                BackendEntry::new("slurm", BackendKind::Slurm),
            ],
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedSchema(self.schema_version));
        }

        let mut seen_names = HashSet::new();
        for backend in &self.backends {
            backend.validate()?;
            if !seen_names.insert(&backend.name) {
                return Err(ConfigError::DuplicateName(backend.name.clone()));
            }
        }

        Ok(())
    }

    /// Get a backend entry by name
    pub fn get(&self, name: &str) -> Option<&BackendEntry> {
        self.backends.iter().find(|b| b.name == name)
    }

    /// Names of all configured backends, in file order
    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name.as_str()).collect()
    }

    /// Build a live backend for `name`
    pub fn resolve(&self, name: &str) -> Result<BackendHandle, ConfigError> {
        let entry = self.get(name).ok_or_else(|| ConfigError::UnknownBackend {
            name: name.to_string(),
            available: self.names().join(", "),
        })?;
        entry.build()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl BackendEntry {
    /// Entry with every optional field at its default
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            namespaces_custom_attributes: None,
            default_queue: None,
            bin: None,
            bin_overrides: BTreeMap::new(),
            submit_host: None,
            strict_host_checking: true,
            cluster: None,
            state_dir: None,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidName {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty"));
        }
        // the name becomes an attribute prefix ending in '.'
        if self.name.contains('.') {
            return Err(invalid("name cannot contain '.'"));
        }
        if self.name.chars().any(char::is_whitespace) {
            return Err(invalid("name cannot contain whitespace"));
        }

        Ok(())
    }

    /// Name and capabilities of this backend
    pub fn descriptor(&self) -> BackendDescriptor {
        let namespacing = self
            .namespaces_custom_attributes
            .unwrap_or_else(|| self.kind.namespaces_by_default());
        BackendDescriptor::new(&self.name, self.kind)
            .with_namespacing(namespacing)
            .with_default_queue(self.default_queue.clone())
    }

    /// Local state directory, with `~` expanded
    pub fn resolved_state_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.state_dir {
            Some(dir) => Ok(PathBuf::from(identity::expand_user(dir))),
            None => {
                let home = identity::home_dir().ok_or(ConfigError::NoHome)?;
                Ok(home.join(".local/state/jobctl").join(&self.name))
            }
        }
    }

    /// Scheduler connection settings for slurm entries
    pub fn slurm_config(&self) -> SlurmConfig {
        SlurmConfig {
            bin: self.bin.as_deref().map(|b| PathBuf::from(identity::expand_user(b))),
            bin_overrides: self.bin_overrides.clone(),
            submit_host: self.submit_host.clone(),
            strict_host_checking: self.strict_host_checking,
            cluster: self.cluster.clone(),
        }
    }

    /// Build a live backend from this entry
    pub fn build(&self) -> Result<BackendHandle, ConfigError> {
        let backend: Box<dyn Backend> = match self.kind {
            BackendKind::Local => Box::new(LocalBackend::new(self.resolved_state_dir()?)),
            BackendKind::Slurm => Box::new(SlurmBackend::new(&self.name, self.slurm_config())),
        };
        debug!(backend = %self.name, kind = %self.kind, "resolved backend");
        Ok(BackendHandle::new(self.descriptor(), backend))
    }
}
