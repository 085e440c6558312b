use serde::Deserialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct InverterConfig {
    pub addr: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,
}

impl InverterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8086".to_string(),
            user: "root".to_string(),
            password: "root".to_string(),
            database: "solarpower".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub sample_secs: u64,
    pub max_attempts: u32,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            sample_secs: 60,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub inverter: InverterConfig,
    #[serde(default)]
    pub influx: InfluxConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_fetch_timeout_ms() -> u64 {
    2000
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("COLLECTOR_CONFIG").unwrap_or_else(|_| "collector-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        let cfg: AppConfig = toml::from_str(&contents)?;
        Ok(cfg)
    }
}
