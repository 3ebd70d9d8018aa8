//! Configuration for the credential exchange service

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Web server host
    pub host: String,

    /// Web server port
    pub port: u16,

    /// Mapping store URL
    pub database_url: String,

    /// Largest accepted request body
    pub body_limit_bytes: usize,

    /// Identity provider signing settings
    pub provider: ProviderConfig,

    /// Per-client request limiting
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub project_id: String,

    /// Service account email, used as issuer and subject of custom tokens
    pub client_email: String,

    /// Key id placed in the token header when signing with `private_key`
    pub private_key_id: Option<String>,

    /// PEM encoded RSA private key of the service account
    pub private_key: Option<String>,

    /// Shared secret used when no private key is configured
    pub signing_secret: String,

    /// Custom token lifetime, clamped to one hour
    pub token_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per client and window; 0 disables limiting
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            database_url: "sqlite://fingerprints.db".to_string(),
            body_limit_bytes: 64 * 1024,
            provider: ProviderConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            project_id: "fingerprint-auth".to_string(),
            client_email: "fingerprint-auth@localhost".to_string(),
            private_key_id: None,
            private_key: None,
            signing_secret: generate_secret(),
            token_ttl: Duration::from_secs(60 * 60),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
        }
    }
}

fn generate_secret() -> String {
    use base64::{engine::general_purpose, Engine as _};
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
    general_purpose::STANDARD.encode(bytes)
}

pub struct ExchangeConfigBuilder {
    config: ExchangeConfig,
}

impl ExchangeConfig {
    pub fn builder() -> ExchangeConfigBuilder {
        ExchangeConfigBuilder {
            config: ExchangeConfig::default(),
        }
    }

    /// Address the HTTP listener binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ExchangeConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn body_limit_bytes(mut self, limit: usize) -> Self {
        self.config.body_limit_bytes = limit;
        self
    }

    pub fn provider(mut self, provider: ProviderConfig) -> Self {
        self.config.provider = provider;
        self
    }

    pub fn signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.provider.signing_secret = secret.into();
        self
    }

    pub fn token_ttl(mut self, ttl: Duration) -> Self {
        self.config.provider.token_ttl = ttl;
        self
    }

    pub fn rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.config.rate_limit = RateLimitConfig {
            max_requests,
            window,
        };
        self
    }

    pub fn build(self) -> ExchangeConfig {
        self.config
    }
}

impl ExchangeConfig {
    /// Load configuration from defaults, `.env`, environment and `fingerprint-auth.toml`
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Missing .env is fine, the process environment still applies
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&ExchangeConfig::default())?)
            .add_source(
                config::Environment::with_prefix("FINGERPRINT_AUTH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if Path::new("fingerprint-auth.toml").exists() {
            builder = builder.add_source(config::File::with_name("fingerprint-auth"));
        }

        // Plain PORT wins, matching common hosting conventions
        if let Ok(port) = std::env::var("PORT") {
            builder = builder.set_override("port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Replace provider settings with the contents of a service account file
    pub fn with_service_account(mut self, account: &ServiceAccount) -> Self {
        self.provider.project_id = account.project_id.clone();
        self.provider.client_email = account.client_email.clone();
        self.provider.private_key_id = Some(account.private_key_id.clone());
        self.provider.private_key = Some(account.private_key.clone());
        self
    }
}

/// Identity provider service account key file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key_id: String,
    pub private_key: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_x509_cert_url: Option<String>,
}

impl ServiceAccount {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Environment variable assignments equivalent to this key file
    pub fn env_exports(&self) -> Vec<(String, String)> {
        vec![
            ("FINGERPRINT_AUTH_PROVIDER__PROJECT_ID".to_string(), self.project_id.clone()),
            ("FINGERPRINT_AUTH_PROVIDER__CLIENT_EMAIL".to_string(), self.client_email.clone()),
            ("FINGERPRINT_AUTH_PROVIDER__PRIVATE_KEY_ID".to_string(), self.private_key_id.clone()),
            (
                "FINGERPRINT_AUTH_PROVIDER__PRIVATE_KEY".to_string(),
                self.private_key.replace('\n', "\\n"),
            ),
        ]
    }
}
