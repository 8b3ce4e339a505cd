use std::path::PathBuf;
use std::time::Duration;

use mdp_runtime::RuntimeOptions;
use serde::Deserialize;

/// Server settings: built-in defaults, then `mdp.toml` if present, then
/// `MDP_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub listen: String,
    pub config_dir: PathBuf,
    pub http_timeout_secs: u64,
    pub producer_timeout_secs: u64,
    pub channel_capacity: usize,
    pub max_in_flight: usize,
}

impl Settings {
    pub fn load(file: Option<&str>) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .set_default("listen", "0.0.0.0:8000")?
            .set_default("config_dir", ".")?
            .set_default("http_timeout_secs", 30)?
            .set_default("producer_timeout_secs", 5)?
            .set_default("channel_capacity", 64)?
            .set_default("max_in_flight", 64)?
            .add_source(config::File::with_name(file.unwrap_or("mdp")).required(file.is_some()))
            .add_source(config::Environment::with_prefix("MDP"))
            .build()?
            .try_deserialize()
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            producer_timeout: Duration::from_secs(self.producer_timeout_secs),
            channel_capacity: self.channel_capacity.max(1),
            max_in_flight: self.max_in_flight.max(1),
        }
    }
}
