//! Environment variable source: EMBEDSYNC_* prefix with __ separator

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::Environment;

/// Add environment variable overlay to builder.
/// Uses EMBEDSYNC_ prefix and __ as separator for nested keys,
/// e.g. `EMBEDSYNC_SCHEDULER__DEBOUNCE_MS=2000`.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let builder = builder.add_source(
        Environment::with_prefix("EMBEDSYNC")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    Ok(builder)
}
