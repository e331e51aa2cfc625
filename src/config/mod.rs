mod settings;

use config::{Config, ConfigError, Environment, File};

use crate::config::settings::PartialSettings;

pub use settings::{BrokerSettings, LogSettings, ServerSettings, Settings};

/// Environment variables use this prefix and `__` between nested keys, e.g.
/// `PUBLINE_SERVER__PORT=9000` or `PUBLINE_BROKER__OUTBOUND_LIMIT=256`.
pub const ENV_PREFIX: &str = "PUBLINE";

/// Loads the configuration from `config/default` and environment variables,
/// merged over the defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Like [`load_config`], reading the optional file at `path` (any format the
/// `config` crate recognises by extension).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
