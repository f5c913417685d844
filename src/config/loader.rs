use anyhow::{Context, Result};

use super::runtime::EngineConfig;

/// Loads the immutable `EngineConfig` from a layered source: built-in
/// defaults, then an optional TOML file, then environment variables
/// prefixed `ENGINE__` (double underscore as the nesting separator, e.g.
/// `ENGINE__RISK__MAX_POSITIONS=3`). `.env` is loaded first via `dotenvy`
/// so exchange/LLM credentials can live outside the TOML file.
pub fn load_config(path: &str) -> Result<EngineConfig> {
    let _ = dotenvy::dotenv();

    let defaults = EngineConfig::default();
    let defaults_json =
        serde_json::to_value(&defaults).context("serializing default engine config")?;

    let mut builder = config::Config::builder()
        .add_source(config::Config::try_from(&defaults_json).context("loading built-in defaults")?);

    if std::path::Path::new(path).exists() {
        builder = builder.add_source(config::File::with_name(path));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ENGINE")
            .separator("__")
            .try_parsing(true),
    );

    let settings = builder.build().context("building layered configuration")?;
    let mut engine_config: EngineConfig = settings
        .try_deserialize()
        .context("deserializing engine configuration")?;

    if engine_config.exchange.api_key.is_none() {
        engine_config.exchange.api_key = std::env::var("BINANCE_API_KEY").ok();
    }
    if engine_config.exchange.secret_key.is_none() {
        engine_config.exchange.secret_key = std::env::var("BINANCE_SECRET_KEY").ok();
    }
    if engine_config.llm.api_key.is_none() {
        engine_config.llm.api_key = std::env::var("LLM_API_KEY").ok();
    }

    engine_config
        .validate()
        .map_err(|errors| anyhow::anyhow!("invalid configuration: {}", errors.join(", ")))?;

    Ok(engine_config)
}
