use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub dataset: DatasetConfig,
    pub llm: LlmConfig,
    pub executor: ExecutorConfig,
    pub resolver: ResolverConfig,
    pub normalizer: NormalizerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    pub data_dir: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Empty when no gateway is configured
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    pub timeout_ms: u64,
    pub max_intermediate_rows: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolverConfig {
    pub similarity_threshold: f64,
    pub default_top_n: usize,
    pub min_leaderboard_balls: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NormalizerConfig {
    pub row_cap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("dataset.data_dir", "./data")?
            .set_default("dataset.version", "local")?
            .set_default("llm.gateway_url", "")?
            .set_default("llm.model", "default")?
            .set_default("llm.timeout_secs", 20)?
            .set_default("llm.max_retries", 2)?
            .set_default("executor.timeout_ms", 5000)?
            .set_default("executor.max_intermediate_rows", 2_000_000)?
            .set_default("resolver.similarity_threshold", 0.9)?
            .set_default("resolver.default_top_n", 10)?
            .set_default("resolver.min_leaderboard_balls", 60)?
            .set_default("normalizer.row_cap", 50)?
            .set_default("storage.url", "./interactions.db")?
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?;

        let overrides = [
            ("HOST", "server.host"),
            ("PORT", "server.port"),
            ("DATA_DIR", "dataset.data_dir"),
            ("DATASET_VERSION", "dataset.version"),
            ("LLM_GATEWAY_URL", "llm.gateway_url"),
            ("LLM_MODEL", "llm.model"),
            ("LLM_TIMEOUT_SECS", "llm.timeout_secs"),
            ("LLM_MAX_RETRIES", "llm.max_retries"),
            ("EXECUTOR_TIMEOUT_MS", "executor.timeout_ms"),
            ("EXECUTOR_MAX_ROWS", "executor.max_intermediate_rows"),
            ("RESOLVER_SIMILARITY_THRESHOLD", "resolver.similarity_threshold"),
            ("RESULT_ROW_CAP", "normalizer.row_cap"),
            ("INTERACTION_DB_URL", "storage.url"),
            ("RUST_LOG", "logging.level"),
            ("RUST_LOG_STYLE", "logging.style"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        if let Ok(api_key) = env::var("LLM_API_KEY") {
            builder = builder.set_override("llm.api_key", Some(api_key))?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
