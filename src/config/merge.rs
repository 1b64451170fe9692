//! MergeService: orchestrates sources, applies defaults, deserializes to SyncConfig.

use super::sources::{environment, files};
use super::SyncConfig;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, File};
use std::path::Path;

/// Builder seeded with the serialized defaults, so partial files only override
/// the keys they set.
fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let defaults = Config::try_from(&SyncConfig::default())?;
    Ok(Config::builder().add_source(defaults))
}

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Load config from workspace and standard sources.
    /// Precedence: global file (lowest) -> workspace file -> environment (highest).
    pub fn load(workspace_root: &Path) -> Result<SyncConfig, ConfigError> {
        let builder = builder_with_defaults()?;
        let builder = files::add_global_file(builder)?;
        let builder = files::add_workspace_file(builder, workspace_root)?;
        let builder = environment::add_to_builder(builder)?;

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load config from a specific file with environment overlay.
    pub fn load_from_file(path: &Path) -> Result<SyncConfig, ConfigError> {
        let path_str = path.to_str().ok_or_else(|| {
            ConfigError::Message(format!("Config path is not valid UTF-8: {:?}", path))
        })?;

        let builder = builder_with_defaults()?;
        let builder = builder.add_source(File::with_name(path_str));
        let builder = environment::add_to_builder(builder)?;

        let config = builder.build()?;
        config.try_deserialize()
    }
}
