//! Feature-module manifests (models/*.toml)
//!
//! Each file declares one feature module and the entities it contributes:
//!
//! ```toml
//! module = "blog-cms"
//!
//! [[entities]]
//! name = "blog_post"
//!
//! [[entities.fields]]
//! name = "id"
//! type = "id"
//! ```

use crate::registry::{FeatureModule, ModelRegistry, RegistryError};
use crate::schema::EntityDefinition;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A feature module loaded from a manifest file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Module name
    pub module: String,

    /// Contributed entities
    #[serde(default)]
    pub entities: Vec<EntityDefinition>,

    /// File the manifest was read from
    #[serde(skip)]
    pub path: PathBuf,
}

impl ModuleManifest {
    /// Parse a manifest from TOML text
    pub fn from_toml(toml: &str) -> Result<Self, ManifestError> {
        toml::from_str(toml).map_err(|e| ManifestError::ParseError {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    /// Read a manifest file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ManifestError::IoError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut manifest: ModuleManifest =
            toml::from_str(&contents).map_err(|e| ManifestError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        manifest.path = path.to_path_buf();
        Ok(manifest)
    }

    /// Read every `*.toml` manifest below `dir`, in path order
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>, ManifestError> {
        if !dir.is_dir() {
            return Err(ManifestError::IoError {
                path: dir.to_path_buf(),
                message: "models directory not found".to_string(),
            });
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry.map_err(|e| ManifestError::IoError {
                path: dir.to_path_buf(),
                message: e.to_string(),
            })?;
            let path = entry.path();
            if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "toml") {
                paths.push(path.to_path_buf());
            }
        }

        paths.iter().map(|p| Self::from_file(p)).collect()
    }
}

impl FeatureModule for ModuleManifest {
    fn name(&self) -> &str {
        &self.module
    }

    fn entities(&self) -> Vec<EntityDefinition> {
        self.entities.clone()
    }
}

/// Build a registry from every manifest below `dir`
pub fn load_registry(dir: &Path) -> Result<ModelRegistry, ManifestError> {
    let mut registry = ModelRegistry::new();
    for manifest in ModuleManifest::load_dir(dir)? {
        registry
            .load_module(&manifest)
            .map_err(|source| ManifestError::Registry {
                path: manifest.path.clone(),
                source,
            })?;
        tracing::debug!(module = %manifest.module, entities = manifest.entities.len(), "loaded feature module");
    }
    Ok(registry)
}

/// Manifest loading errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("IO error reading {path}: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("Parse error in {path}: {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("Registry error in {path}: {source}")]
    Registry {
        path: PathBuf,
        #[source]
        source: RegistryError,
    },
}
