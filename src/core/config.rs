use std::env;

use thiserror::Error;

const DEFAULT_CORS_ORIGINS: &[&str] =
    &["http://localhost:5173", "http://localhost:3000", "http://localhost:8501"];

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    server: ServerSettings,
    runtime: RuntimeSettings,
    api: ApiSettings,
    cors: CorsSettings,
    database: DatabaseSettings,
    scoring: ScoringSettings,
    fact_check: FactCheckSettings,
    vision: VisionSettings,
    storage: StorageSettings,
    pipeline: PipelineSettings,
    telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct ServerSettings {
    host: ServerHost,
    port: ServerPort,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiSettings {
    pub(crate) project_name: String,
    pub(crate) version: String,
    pub(crate) api_v1_str: String,
}

#[derive(Debug, Clone)]
pub(crate) struct CorsSettings {
    pub(crate) origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct DatabaseSettings {
    pub(crate) postgres_server: String,
    pub(crate) postgres_port: u16,
    pub(crate) postgres_user: String,
    pub(crate) postgres_password: String,
    pub(crate) postgres_db: String,
    pub(crate) database_url: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ScoringSettings {
    pub(crate) provider: ProviderMode,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    pub(crate) temperature: f64,
    pub(crate) request_timeout: u64,
    pub(crate) stub_seed: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct FactCheckSettings {
    pub(crate) provider: ProviderMode,
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) model: String,
    pub(crate) max_tokens: u32,
    pub(crate) request_timeout: u64,
    pub(crate) batch_size: usize,
    pub(crate) batch_delay_ms: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct VisionSettings {
    pub(crate) provider: ProviderMode,
    pub(crate) base_url: String,
    pub(crate) request_timeout: u64,
    pub(crate) confidence_threshold: f64,
    pub(crate) grid_min_area: f64,
    pub(crate) grid_max_area: f64,
    pub(crate) max_skew_degrees: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct StorageSettings {
    pub(crate) upload_dir: String,
    pub(crate) max_upload_size_mb: u64,
    pub(crate) allowed_image_extensions: Vec<String>,
    pub(crate) max_images_per_submission: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct PipelineSettings {
    pub(crate) worker_concurrency: usize,
    pub(crate) preprocess_batch_size: usize,
    pub(crate) stale_processing_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Test => "test",
        }
    }

    fn is_production(self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// How an external capability is fulfilled: a live API call or the
/// deterministic stub. Chosen by configuration only, never by probing
/// for credentials at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProviderMode {
    Live,
    Stub,
}

impl ProviderMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ProviderMode::Live => "live",
            ProviderMode::Stub => "stub",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerHost(String);

#[derive(Debug, Clone, Copy)]
pub(crate) struct ServerPort(u16);

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid server host: {0}")]
    InvalidHost(String),
    #[error("invalid server port: {0}")]
    InvalidPort(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("invalid cors origins: {0}")]
    InvalidCors(String),
    #[error("missing required secret for {0}")]
    MissingSecret(&'static str),
}

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EDUGRADE_HOST", "0.0.0.0");
        let port = env_or_default("EDUGRADE_PORT", "8000");

        let environment =
            parse_environment(env_optional("EDUGRADE_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("EDUGRADE_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "EduGrade API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "edugrade");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "edugrade_db");
        let database_url = env_optional("DATABASE_URL");

        let scoring = ScoringSettings {
            provider: parse_provider_mode(
                "SCORING_PROVIDER",
                env_or_default("SCORING_PROVIDER", "stub"),
            )?,
            api_key: env_or_default("SCORING_API_KEY", ""),
            base_url: env_or_default("SCORING_BASE_URL", ""),
            model: env_or_default("SCORING_MODEL", "gemini-1.5-flash"),
            max_tokens: parse_u32(
                "SCORING_MAX_TOKENS",
                env_or_default("SCORING_MAX_TOKENS", "1024"),
            )?,
            temperature: parse_f64(
                "SCORING_TEMPERATURE",
                env_or_default("SCORING_TEMPERATURE", "0.1"),
            )?,
            request_timeout: parse_u64(
                "SCORING_REQUEST_TIMEOUT",
                env_or_default("SCORING_REQUEST_TIMEOUT", "120"),
            )?,
            stub_seed: parse_u64("SCORING_STUB_SEED", env_or_default("SCORING_STUB_SEED", "42"))?,
        };

        let fact_check = FactCheckSettings {
            provider: parse_provider_mode(
                "FACTCHECK_PROVIDER",
                env_or_default("FACTCHECK_PROVIDER", "stub"),
            )?,
            api_key: env_or_default("FACTCHECK_API_KEY", ""),
            base_url: env_or_default("FACTCHECK_BASE_URL", "https://api.perplexity.ai"),
            model: env_or_default("FACTCHECK_MODEL", "llama-3.1-sonar-small-128k-online"),
            max_tokens: parse_u32(
                "FACTCHECK_MAX_TOKENS",
                env_or_default("FACTCHECK_MAX_TOKENS", "500"),
            )?,
            request_timeout: parse_u64(
                "FACTCHECK_REQUEST_TIMEOUT",
                env_or_default("FACTCHECK_REQUEST_TIMEOUT", "60"),
            )?,
            batch_size: parse_usize(
                "FACTCHECK_BATCH_SIZE",
                env_or_default("FACTCHECK_BATCH_SIZE", "5"),
            )?,
            batch_delay_ms: parse_u64(
                "FACTCHECK_BATCH_DELAY_MS",
                env_or_default("FACTCHECK_BATCH_DELAY_MS", "1000"),
            )?,
        };

        let vision = VisionSettings {
            provider: parse_provider_mode(
                "VISION_PROVIDER",
                env_or_default("VISION_PROVIDER", "stub"),
            )?,
            base_url: env_or_default("VISION_BASE_URL", ""),
            request_timeout: parse_u64(
                "VISION_REQUEST_TIMEOUT",
                env_or_default("VISION_REQUEST_TIMEOUT", "60"),
            )?,
            confidence_threshold: parse_f64(
                "DETECTION_CONFIDENCE_THRESHOLD",
                env_or_default("DETECTION_CONFIDENCE_THRESHOLD", "0.5"),
            )?,
            grid_min_area: parse_f64("GRID_MIN_AREA", env_or_default("GRID_MIN_AREA", "1000"))?,
            grid_max_area: parse_f64("GRID_MAX_AREA", env_or_default("GRID_MAX_AREA", "50000"))?,
            max_skew_degrees: parse_f64(
                "MAX_SKEW_DEGREES",
                env_or_default("MAX_SKEW_DEGREES", "15"),
            )?,
        };

        let storage = StorageSettings {
            upload_dir: env_or_default("UPLOAD_DIR", "data/uploads"),
            max_upload_size_mb: parse_u64(
                "MAX_UPLOAD_SIZE_MB",
                env_or_default("MAX_UPLOAD_SIZE_MB", "10"),
            )?,
            allowed_image_extensions: parse_string_list(
                env_optional("ALLOWED_IMAGE_EXTENSIONS"),
                &["jpg", "jpeg", "png"],
            ),
            max_images_per_submission: parse_u64(
                "MAX_IMAGES_PER_SUBMISSION",
                env_or_default("MAX_IMAGES_PER_SUBMISSION", "5"),
            )?,
        };

        let pipeline = PipelineSettings {
            worker_concurrency: parse_usize(
                "PIPELINE_WORKER_CONCURRENCY",
                env_or_default("PIPELINE_WORKER_CONCURRENCY", "3"),
            )?,
            preprocess_batch_size: parse_usize(
                "PREPROCESS_BATCH_SIZE",
                env_or_default("PREPROCESS_BATCH_SIZE", "4"),
            )?,
            stale_processing_timeout_secs: parse_u64(
                "STALE_PROCESSING_TIMEOUT_SECS",
                env_or_default("STALE_PROCESSING_TIMEOUT_SECS", "1800"),
            )?,
        };

        let log_level = env_or_default("EDUGRADE_LOG_LEVEL", "info");
        let json = env_optional("EDUGRADE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            scoring,
            fact_check,
            vision,
            storage,
            pipeline,
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn scoring(&self) -> &ScoringSettings {
        &self.scoring
    }

    pub(crate) fn fact_check(&self) -> &FactCheckSettings {
        &self.fact_check
    }

    pub(crate) fn vision(&self) -> &VisionSettings {
        &self.vision
    }

    pub(crate) fn storage(&self) -> &StorageSettings {
        &self.storage
    }

    pub(crate) fn pipeline(&self) -> &PipelineSettings {
        &self.pipeline
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.allowed_image_extensions.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ALLOWED_IMAGE_EXTENSIONS",
                value: String::from("<empty>"),
            });
        }
        for extension in &self.storage.allowed_image_extensions {
            if !is_supported_image_extension(extension) {
                return Err(ConfigError::InvalidValue {
                    field: "ALLOWED_IMAGE_EXTENSIONS",
                    value: extension.clone(),
                });
            }
        }

        if self.fact_check.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "FACTCHECK_BATCH_SIZE",
                value: String::from("0"),
            });
        }

        if self.vision.grid_min_area >= self.vision.grid_max_area {
            return Err(ConfigError::InvalidValue {
                field: "GRID_MIN_AREA/GRID_MAX_AREA",
                value: format!("{}..{}", self.vision.grid_min_area, self.vision.grid_max_area),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }

        if self.scoring.provider == ProviderMode::Live {
            if self.scoring.api_key.is_empty() {
                return Err(ConfigError::MissingSecret("SCORING_API_KEY"));
            }
            if self.scoring.base_url.is_empty() {
                return Err(ConfigError::MissingSecret("SCORING_BASE_URL"));
            }
        }

        if self.fact_check.provider == ProviderMode::Live && self.fact_check.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("FACTCHECK_API_KEY"));
        }

        if self.vision.provider == ProviderMode::Live && self.vision.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("VISION_BASE_URL"));
        }

        Ok(())
    }
}

impl DatabaseSettings {
    pub(crate) fn database_url(&self) -> String {
        if let Some(url) = &self.database_url {
            return url.clone();
        }
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.postgres_user,
            self.postgres_password,
            self.postgres_server,
            self.postgres_port,
            self.postgres_db
        )
    }
}

impl ServerHost {
    fn parse(value: String) -> Result<Self, ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::InvalidHost(value));
        }
        Ok(Self(value))
    }
}

impl ServerPort {
    fn parse(value: String) -> Result<Self, ConfigError> {
        let parsed: u16 = value.parse().map_err(|_| ConfigError::InvalidPort(value.clone()))?;
        if parsed == 0 {
            return Err(ConfigError::InvalidPort(value));
        }
        Ok(Self(parsed))
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_u16(field: &'static str, value: String) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_usize(field: &'static str, value: String) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_f64(field: &'static str, value: String) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

fn parse_provider_mode(field: &'static str, value: String) -> Result<ProviderMode, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "live" => Ok(ProviderMode::Live),
        "stub" | "mock" => Ok(ProviderMode::Stub),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

fn parse_cors_origins(value: Option<String>) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = value else {
        return Ok(DEFAULT_CORS_ORIGINS.iter().map(|item| item.to_string()).collect());
    };

    if raw.trim().is_empty() {
        return Ok(DEFAULT_CORS_ORIGINS.iter().map(|item| item.to_string()).collect());
    }

    if raw.trim_start().starts_with('[') {
        let parsed: Vec<String> =
            serde_json::from_str(&raw).map_err(|_| ConfigError::InvalidCors(raw.clone()))?;
        if parsed.is_empty() {
            return Ok(DEFAULT_CORS_ORIGINS.iter().map(|item| item.to_string()).collect());
        }
        return Ok(parsed);
    }

    let items: Vec<String> = raw
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();

    if items.is_empty() {
        return Ok(DEFAULT_CORS_ORIGINS.iter().map(|item| item.to_string()).collect());
    }

    Ok(items)
}

fn parse_string_list(value: Option<String>, defaults: &[&str]) -> Vec<String> {
    match value {
        Some(raw) => raw
            .split(',')
            .map(|item| item.trim().to_ascii_lowercase())
            .filter(|item| !item.is_empty())
            .collect(),
        None => defaults.iter().map(|item| item.to_string()).collect(),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|val| val.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

fn is_supported_image_extension(extension: &str) -> bool {
    matches!(extension, "jpg" | "jpeg" | "png" | "webp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cors_origins_json() {
        let raw = "[\"http://a\",\"http://b\"]".to_string();
        let parsed = parse_cors_origins(Some(raw)).expect("cors json");
        assert_eq!(parsed, vec!["http://a".to_string(), "http://b".to_string()]);
    }

    #[test]
    fn parse_cors_origins_csv() {
        let raw = "http://a, http://b".to_string();
        let parsed = parse_cors_origins(Some(raw)).expect("cors csv");
        assert_eq!(parsed, vec!["http://a".to_string(), "http://b".to_string()]);
    }

    #[test]
    fn parse_cors_origins_defaults_on_empty() {
        let parsed = parse_cors_origins(Some(" ".to_string())).expect("cors empty");
        let defaults: Vec<String> =
            DEFAULT_CORS_ORIGINS.iter().map(|item| item.to_string()).collect();
        assert_eq!(parsed, defaults);
    }

    #[test]
    fn parse_provider_mode_variants() {
        assert_eq!(parse_provider_mode("X", "live".to_string()).unwrap(), ProviderMode::Live);
        assert_eq!(parse_provider_mode("X", "STUB".to_string()).unwrap(), ProviderMode::Stub);
        assert_eq!(parse_provider_mode("X", "mock".to_string()).unwrap(), ProviderMode::Stub);
        assert!(parse_provider_mode("X", "auto".to_string()).is_err());
    }

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn parse_environment_variants() {
        assert_eq!(parse_environment(Some("prod".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("staging".to_string())), Environment::Staging);
        assert_eq!(parse_environment(Some("testing".to_string())), Environment::Test);
        assert_eq!(parse_environment(None), Environment::Development);
    }
}
