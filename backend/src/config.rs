use crate::models::{Amount, ProviderEndpoint, QueryMode};
use crate::noise::{DEFAULT_EPSILON, DEFAULT_SENSITIVITY};
use crate::protocol::QuorumPolicy;
use paillier::constants::{DEFAULT_KEY_BITS, MIN_KEY_BITS};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    pub exchange: ExchangeSection,
    #[serde(default)]
    pub privacy: PrivacySection,
    #[serde(default)]
    pub ledger: LedgerSection,
    pub providers: Vec<ProviderEndpoint>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct ExchangeSection {
    /// Ledger account that pays for queries.
    pub requestor: String,
    pub price_per_provider: u64,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub quorum: QuorumPolicy,
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
    #[serde(default = "default_key_bits")]
    pub key_bits: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct PrivacySection {
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,
}

impl Default for PrivacySection {
    fn default() -> Self {
        Self {
            epsilon: default_epsilon(),
            sensitivity: default_sensitivity(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct LedgerSection {
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

const fn default_round_timeout_ms() -> u64 {
    10_000
}

const fn default_key_bits() -> u64 {
    DEFAULT_KEY_BITS
}

const fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

const fn default_sensitivity() -> f64 {
    DEFAULT_SENSITIVITY
}

fn default_database() -> PathBuf {
    PathBuf::from("data/ledger.sqlite")
}

impl ExchangeSection {
    pub fn price(&self) -> Amount {
        Amount::from(self.price_per_provider)
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }
}

impl LedgerSection {
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database.to_string_lossy())
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.requestor.trim().is_empty() {
            return Err(ConfigError::Validation("requestor account must be set".into()));
        }
        if self.providers.is_empty() {
            return Err(ConfigError::Validation("at least one provider must be defined".into()));
        }

        let mut names = HashSet::new();
        for p in &self.providers {
            if p.name.is_empty() || p.url.is_empty() || p.account.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "provider '{}' needs a name, url and account",
                    p.name
                )));
            }
            if !names.insert(p.name.as_str()) {
                return Err(ConfigError::Validation(format!("duplicate provider '{}'", p.name)));
            }
        }

        if let QuorumPolicy::AtLeast(k) = self.exchange.quorum {
            if k == 0 || k > self.providers.len() {
                return Err(ConfigError::Validation(format!(
                    "quorum at-least {k} must be between 1 and {}",
                    self.providers.len()
                )));
            }
        }
        if self.exchange.round_timeout_ms == 0 {
            return Err(ConfigError::Validation("round-timeout-ms must be greater than zero".into()));
        }
        let bits = self.exchange.key_bits;
        if bits < MIN_KEY_BITS || bits % 2 != 0 {
            return Err(ConfigError::Validation(format!(
                "key-bits must be even and at least {MIN_KEY_BITS}, got {bits}"
            )));
        }
        if !(self.privacy.epsilon.is_finite() && self.privacy.epsilon > 0.0) {
            return Err(ConfigError::Validation("epsilon must be greater than zero".into()));
        }
        if !(self.privacy.sensitivity.is_finite() && self.privacy.sensitivity > 0.0) {
            return Err(ConfigError::Validation("sensitivity must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn sample() -> Self {
        let provider = |name: &str, port: u16| ProviderEndpoint {
            name: name.into(),
            url: format!("http://127.0.0.1:{port}"),
            account: format!("{name}-account"),
        };
        Self {
            exchange: ExchangeSection {
                requestor: "research-lab".into(),
                price_per_provider: 10,
                mode: QueryMode::Plain,
                quorum: QuorumPolicy::All,
                round_timeout_ms: default_round_timeout_ms(),
                key_bits: default_key_bits(),
            },
            privacy: PrivacySection::default(),
            ledger: LedgerSection::default(),
            providers: vec![provider("hospital-a", 8001), provider("hospital-b", 8002)],
        }
    }
}

pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(contents).map_err(|err| ConfigError::Parse(err.to_string()))?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toml_with_defaults() {
        let config = parse_config(
            r#"
            [exchange]
            requestor = "research-lab"
            price-per-provider = 10

            [[providers]]
            name = "hospital-a"
            url = "http://127.0.0.1:8001"
            account = "hospital-a-account"

            [[providers]]
            name = "hospital-b"
            url = "http://127.0.0.1:8002"
            account = "hospital-b-account"
            "#,
        )
        .unwrap();

        assert_eq!(config, Config::sample());
        assert_eq!(config.exchange.price(), 10);
        assert_eq!(config.exchange.round_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn parses_explicit_sections() {
        let config = parse_config(
            r#"
            [exchange]
            requestor = "lab"
            price-per-provider = 3
            mode = "encrypted"
            quorum = { at-least = 1 }
            round-timeout-ms = 500
            key-bits = 512

            [privacy]
            epsilon = 0.5

            [ledger]
            database = "/tmp/ledger.sqlite"

            [[providers]]
            name = "a"
            url = "http://a"
            account = "acct-a"
            "#,
        )
        .unwrap();

        assert_eq!(config.exchange.mode, QueryMode::Encrypted);
        assert_eq!(config.exchange.quorum, QuorumPolicy::AtLeast(1));
        assert_eq!(config.privacy.epsilon, 0.5);
        assert_eq!(config.privacy.sensitivity, 1.0);
        assert_eq!(config.ledger.database_url(), "sqlite:/tmp/ledger.sqlite?mode=rwc");
    }

    #[test]
    fn detects_invalid_settings() {
        let mut config = Config::sample();
        config.providers.clear();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::sample();
        config.providers[1].name = "hospital-a".into();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::sample();
        config.exchange.quorum = QuorumPolicy::AtLeast(3);
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::sample();
        config.privacy.epsilon = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::sample();
        config.exchange.key_bits = 33;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../exchange.toml");
        assert_eq!(load_config(&path).unwrap(), Config::sample());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config(Path::new("/nonexistent/exchange.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
