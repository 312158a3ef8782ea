mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{BrokerSettings, LogSettings, ProducerSettings, ServerSettings, Settings};

/// Prefix of the environment variables that override configuration,
/// e.g. `DISPATCHQ__BROKER__MODE=command`.
pub const ENV_PREFIX: &str = "DISPATCHQ";

/// Loads the configuration from `config/default` and environment variables
/// Merges the configuration with default values
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as `load_config`, reading the optional file at `path` (any format
/// the `config` crate recognizes by extension).
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("broker.commands")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
