use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Smallest part S3 and GCS accept for every part but the last
pub const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Errors raised while validating a loaded configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Main configuration for the relay service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Generative model configuration
    pub gemini: GeminiConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Document store configuration
    pub firestore: FirestoreConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Expose a Prometheus scrape endpoint
    #[serde(default)]
    pub metrics_enabled: bool,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any origin)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Gemini generateContent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GeminiConfig {
    /// API key sent as `x-goog-api-key`
    #[serde(default)]
    pub api_key: String,
    /// API base URL, without trailing slash
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    /// Model used for try-on image synthesis
    #[serde(default = "default_image_model")]
    pub image_model: String,
    /// Model used for text recommendations
    #[serde(default = "default_text_model")]
    pub text_model: String,
    /// Whole-request timeout in seconds
    #[serde(default = "default_gemini_timeout_secs")]
    pub timeout_secs: u64,
}

/// Object storage configuration (S3-compatible XML API)
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket that receives generated artifacts
    #[serde(default)]
    pub bucket: String,
    /// S3-compatible endpoint
    #[serde(default = "default_storage_endpoint")]
    pub endpoint_url: String,
    /// Base URL for public object links
    #[serde(default = "default_storage_endpoint")]
    pub public_base_url: String,
    /// Signing region
    #[serde(default = "default_region")]
    pub region: String,
    /// HMAC access key (default credential chain when absent)
    pub access_key_id: Option<String>,
    /// HMAC secret
    pub secret_access_key: Option<String>,
    /// Force path-style access
    #[serde(default = "default_true")]
    pub force_path_style: bool,
    /// Write objects with the public-read canned ACL
    #[serde(default = "default_true")]
    pub public_read: bool,
    /// Path prefix for generated objects
    #[serde(default = "default_object_prefix")]
    pub object_prefix: String,
    /// Multipart upload threshold in bytes
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
    /// Per-operation timeout in seconds, retries included
    #[serde(default = "default_storage_timeout_secs")]
    pub timeout_secs: u64,
}

/// Firestore REST configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FirestoreConfig {
    /// Google Cloud project ID
    #[serde(default)]
    pub project_id: String,
    /// Database ID
    #[serde(default = "default_database_id")]
    pub database_id: String,
    /// REST base URL (point at the emulator for local runs)
    #[serde(default = "default_firestore_base_url")]
    pub base_url: String,
    /// OAuth bearer token
    pub access_token: Option<String>,
    /// Top-level collection holding user documents
    #[serde(default = "default_users_collection")]
    pub users_collection: String,
    /// Per-user wardrobe subcollection
    #[serde(default = "default_closet_collection")]
    pub closet_collection: String,
    /// Field used for newest-first ordering
    #[serde(default = "default_order_field")]
    pub order_field: String,
    /// Number of wardrobe items fed into a recommendation
    #[serde(default = "default_recent_item_limit")]
    pub recent_item_limit: usize,
    /// Whole-request timeout in seconds
    #[serde(default = "default_firestore_timeout_secs")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_service_name() -> String {
    "codipop-relay".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024 // 20MB
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_image_model() -> String {
    "gemini-2.5-flash-image-preview".to_string()
}

fn default_text_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_gemini_timeout_secs() -> u64 {
    60
}

fn default_storage_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_object_prefix() -> String {
    "results".to_string()
}

fn default_multipart_threshold() -> usize {
    8 * 1024 * 1024 // 8MB
}

fn default_part_size() -> usize {
    8 * 1024 * 1024 // 8MB
}

fn default_storage_timeout_secs() -> u64 {
    60
}

fn default_database_id() -> String {
    "(default)".to_string()
}

fn default_firestore_base_url() -> String {
    "https://firestore.googleapis.com".to_string()
}

fn default_users_collection() -> String {
    "users".to_string()
}

fn default_closet_collection() -> String {
    "closet".to_string()
}

fn default_order_field() -> String {
    "createdAt".to_string()
}

fn default_recent_item_limit() -> usize {
    5
}

fn default_firestore_timeout_secs() -> u64 {
    30
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        Self::from_sources(
            std::env::var("GEMINI_API_KEY").ok(),
            vec![
                config::File::with_name("config/relay").required(false),
                config::File::with_name("/etc/codipop/relay").required(false),
            ],
            // CODIPOP__STORAGE__BUCKET -> storage.bucket
            config::Environment::with_prefix("CODIPOP")
                .separator("__")
                .try_parsing(true),
        )
    }

    /// Layer defaults, files and environment, lowest priority first
    fn from_sources(
        gemini_api_key: Option<String>,
        files: Vec<config::File<config::FileSourceFile, config::FileFormat>>,
        environment: config::Environment,
    ) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("service.name", "codipop-relay")?
            .set_default("service.log_level", "info")?;

        // The conventional variable ranks below CODIPOP__GEMINI__API_KEY
        if let Some(api_key) = gemini_api_key {
            builder = builder.set_default("gemini.api_key", api_key)?;
        }

        for file in files {
            builder = builder.add_source(file);
        }

        let config = builder.add_source(environment).build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the adapters cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gemini.api_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired("gemini.api_key".to_string()));
        }

        if self.storage.bucket.trim().is_empty() {
            return Err(ConfigError::MissingRequired("storage.bucket".to_string()));
        }

        if self.firestore.project_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "firestore.project_id".to_string(),
            ));
        }

        if self.storage.access_key_id.is_some() != self.storage.secret_access_key.is_some() {
            return Err(ConfigError::InvalidValue {
                key: "storage.access_key_id".to_string(),
                message: "access key and secret must be set together".to_string(),
            });
        }

        for (key, value) in [
            ("gemini.timeout_secs", self.gemini.timeout_secs),
            ("firestore.timeout_secs", self.firestore.timeout_secs),
            ("storage.timeout_secs", self.storage.timeout_secs),
            ("firestore.recent_item_limit", self.firestore.recent_item_limit as u64),
            ("storage.part_size_bytes", self.storage.part_size_bytes as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        // Every part but the last must meet the S3/GCS minimum
        if self.storage.part_size_bytes < MIN_PART_SIZE_BYTES {
            return Err(ConfigError::InvalidValue {
                key: "storage.part_size_bytes".to_string(),
                message: format!("must be at least {MIN_PART_SIZE_BYTES} bytes"),
            });
        }

        if self.storage.multipart_threshold_bytes < self.storage.part_size_bytes {
            return Err(ConfigError::InvalidValue {
                key: "storage.multipart_threshold_bytes".to_string(),
                message: "must not be smaller than storage.part_size_bytes".to_string(),
            });
        }

        Ok(())
    }
}

impl GeminiConfig {
    /// Get Gemini request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StorageConfig {
    /// Get storage operation timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl FirestoreConfig {
    /// Get Firestore request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_enabled: false,
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    const MINIMAL: &str = r#"
        [gemini]
        api_key = "test-key"

        [storage]
        bucket = "codipop-test"

        [firestore]
        project_id = "codipop-test"
    "#;

    #[test]
    fn test_default_values() {
        assert_eq!(default_api_port(), 3000);
        assert_eq!(default_recent_item_limit(), 5);
        assert_eq!(default_object_prefix(), "results");
        assert_eq!(default_image_model(), "gemini-2.5-flash-image-preview");
    }

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = parse(MINIMAL);

        assert!(config.validate().is_ok());
        assert_eq!(config.service.name, "codipop-relay");
        assert_eq!(config.api.port, 3000);
        assert!(config.api.cors_enabled);
        assert!(config.api.cors_origins.is_empty());
        assert_eq!(config.storage.public_base_url, "https://storage.googleapis.com");
        assert!(config.storage.public_read);
        assert_eq!(config.firestore.closet_collection, "closet");
        assert_eq!(config.firestore.order_field, "createdAt");
        assert_eq!(config.gemini.timeout(), Duration::from_secs(60));
        assert_eq!(config.storage.timeout(), Duration::from_secs(60));
        assert_eq!(config.firestore.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let mut config = parse(MINIMAL);
        config.gemini.api_key = "  ".to_string();

        match config.validate() {
            Err(ConfigError::MissingRequired(key)) => assert_eq!(key, "gemini.api_key"),
            other => panic!("expected MissingRequired, got {:?}", other),
        }
    }

    #[test]
    fn test_half_hmac_pair_rejected() {
        let mut config = parse(MINIMAL);
        config.storage.access_key_id = Some("GOOG1E".to_string());

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = parse(MINIMAL);
        config.gemini.timeout_secs = 0;

        match config.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "gemini.timeout_secs"),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_small_part_size_rejected() {
        let mut config = parse(MINIMAL);
        config.storage.part_size_bytes = 1024 * 1024;

        match config.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, "storage.part_size_bytes")
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_threshold_below_part_size_rejected() {
        let mut config = parse(MINIMAL);
        config.storage.part_size_bytes = 16 * 1024 * 1024;

        match config.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, "storage.multipart_threshold_bytes")
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }

        config.storage.multipart_threshold_bytes = 16 * 1024 * 1024;
        assert!(config.validate().is_ok());
    }

    fn environment(vars: &[(&str, &str)]) -> config::Environment {
        let source = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        config::Environment::with_prefix("CODIPOP")
            .separator("__")
            .try_parsing(true)
            .source(Some(source))
    }

    const REQUIRED_VARS: [(&str, &str); 2] = [
        ("CODIPOP__STORAGE__BUCKET", "codipop-test"),
        ("CODIPOP__FIRESTORE__PROJECT_ID", "codipop-test"),
    ];

    #[test]
    fn test_gemini_api_key_variable_seeds_key() {
        let config = Config::from_sources(
            Some("from-conventional-var".to_string()),
            Vec::new(),
            environment(&REQUIRED_VARS),
        )
        .unwrap();

        assert_eq!(config.gemini.api_key, "from-conventional-var");
        assert_eq!(config.storage.bucket, "codipop-test");
    }

    #[test]
    fn test_prefixed_api_key_overrides_seed() {
        let mut vars = REQUIRED_VARS.to_vec();
        vars.push(("CODIPOP__GEMINI__API_KEY", "from-prefixed-var"));

        let config = Config::from_sources(
            Some("from-conventional-var".to_string()),
            Vec::new(),
            environment(&vars),
        )
        .unwrap();

        assert_eq!(config.gemini.api_key, "from-prefixed-var");
    }

    #[test]
    fn test_missing_api_key_fails_load() {
        let result = Config::from_sources(None, Vec::new(), environment(&REQUIRED_VARS));

        assert!(result.is_err());
    }
}
