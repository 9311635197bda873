//! Service manifest loading.
//!
//! A manifest names a service, its default runtime and the functions it
//! contains. Handler source and the optional dependency file are read from
//! the manifest's directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use kubefn_types::{EventDescriptor, FunctionDefinition};

pub const DEFAULT_MANIFEST: &str = "kubefn.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub service: ServiceSection,

    #[serde(default)]
    pub functions: BTreeMap<String, FunctionSection>,

    /// Directory handler and dependency files are resolved against
    #[serde(skip)]
    base_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    pub name: String,
    pub runtime: String,
    pub namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionSection {
    pub handler: String,
    /// Overrides the service runtime
    pub runtime: Option<String>,
    pub description: Option<String>,
    pub memory: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub events: BTreeMap<String, EventSetting>,
}

/// Value of one `events` entry: either a bare topic or a table
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum EventSetting {
    Topic(String),
    Table(EventTable),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventTable {
    pub path: Option<String>,
    pub hostname: Option<String>,
    pub topic: Option<String>,
}

impl EventSetting {
    fn descriptor(&self, kind: &str) -> EventDescriptor {
        let kind = kind.to_string();
        match self {
            Self::Topic(topic) => EventDescriptor {
                kind,
                topic: Some(topic.clone()),
                ..Default::default()
            },
            Self::Table(table) => EventDescriptor {
                kind,
                path: table.path.clone(),
                hostname: table.hostname.clone(),
                topic: table.topic.clone(),
            },
        }
    }
}

/// Source file extension and dependency file for a runtime
fn runtime_files(runtime: &str) -> Option<(&'static str, &'static str)> {
    if runtime.starts_with("python") {
        Some(("py", "requirements.txt"))
    } else if runtime.starts_with("nodejs") {
        Some(("js", "package.json"))
    } else if runtime.starts_with("ruby") {
        Some(("rb", "Gemfile"))
    } else {
        None
    }
}

/// File holding the handler module, e.g. `handler.hello` + python → `handler.py`
pub fn handler_file_name(handler: &str, runtime: &str) -> Result<String> {
    let (extension, _) = runtime_files(runtime)
        .with_context(|| format!("Unsupported runtime '{}'", runtime))?;
    let module = match handler.split_once('.') {
        Some((module, entrypoint)) if !module.is_empty() && !entrypoint.is_empty() => module,
        _ => anyhow::bail!(
            "Handler '{}' must have the form <module>.<function>",
            handler
        ),
    };
    Ok(format!("{}.{}", module, extension))
}

pub fn read_handler_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("Failed to read handler file {}", path.display()))
}

/// Read a dependency file; a missing file is not an error
pub fn read_dependency_manifest(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e)
            .with_context(|| format!("Failed to read dependency file {}", path.display())),
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let mut manifest: Manifest = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))?;

        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(manifest)
    }

    /// Build definitions for every function, or only `only` when given
    pub fn definitions(&self, only: Option<&str>) -> Result<Vec<FunctionDefinition>> {
        if let Some(name) = only {
            if !self.functions.contains_key(name) {
                anyhow::bail!(
                    "Function '{}' is not defined in service '{}'",
                    name,
                    self.service.name
                );
            }
        }

        self.functions
            .iter()
            .filter(|(name, _)| only.is_none_or(|o| o == name.as_str()))
            .map(|(name, section)| self.definition(name, section))
            .collect()
    }

    fn definition(&self, name: &str, section: &FunctionSection) -> Result<FunctionDefinition> {
        let runtime = section.runtime.as_deref().unwrap_or(&self.service.runtime);
        let handler_path = self
            .base_dir
            .join(handler_file_name(&section.handler, runtime)?);
        let source = read_handler_file(&handler_path)?;

        let events = section
            .events
            .iter()
            .map(|(kind, setting)| setting.descriptor(kind))
            .collect();
        let mut def = FunctionDefinition::new(name, runtime, &section.handler, &source)
            .with_events(events)
            .with_context(|| format!("Invalid events for function '{}'", name))?;

        if let Some((_, deps_file)) = runtime_files(runtime) {
            def.dependencies = read_dependency_manifest(&self.base_dir.join(deps_file))?;
        }
        def.namespace = self.service.namespace.clone();
        def.description = section.description.clone();
        def.memory = section.memory.clone();
        def.labels = section.labels.clone();
        def.environment = section.environment.clone();
        Ok(def)
    }
}
