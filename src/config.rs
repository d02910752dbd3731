use crate::error::{RelayError, Result};
use serde::Deserialize;
use std::path::Path;

/// Default maximum message size: 25 MB.
const DEFAULT_MAX_MESSAGE_SIZE: usize = 26_214_400;

fn default_listen() -> String {
    "0.0.0.0:2525".to_string()
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub smtp: SmtpConfig,
    pub tls: TlsConfig,
    pub graph: GraphConfig,
    pub ses: SesConfig,
    /// Explicit provider selector: "stdout", "graph", "ses" or empty for
    /// auto-detection.
    pub provider: String,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub listen: String,
    pub username: String,
    pub password: String,
    pub max_message_size: usize,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            username: String::new(),
            password: String::new(),
            max_message_size: default_max_message_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub sender: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SesConfig {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub sender: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible
    /// defaults. Environment variables always take precedence.
    pub fn load() -> Result<Self> {
        let mut cfg = Config::default();
        cfg.apply_env_vars();
        Ok(cfg)
    }

    /// Load configuration from a YAML file as the base layer, then
    /// override with environment variables. Returns an error if the
    /// file cannot be read or parsed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())
            .map_err(|e| RelayError::Config(format!("failed to read config file: {}", e)))?;

        let mut cfg: Config = serde_yaml::from_str(&data)
            .map_err(|e| RelayError::Config(format!("failed to parse config file: {}", e)))?;

        cfg.apply_env_vars();
        Ok(cfg)
    }

    /// True if all four Graph API credentials are set.
    pub fn graph_configured(&self) -> bool {
        !self.graph.tenant_id.is_empty()
            && !self.graph.client_id.is_empty()
            && !self.graph.client_secret.is_empty()
            && !self.graph.sender.is_empty()
    }

    /// True if the SES region and sender are set.
    pub fn ses_configured(&self) -> bool {
        !self.ses.region.is_empty() && !self.ses.sender.is_empty()
    }

    /// True if both SMTP username and password are set.
    pub fn auth_enabled(&self) -> bool {
        !self.smtp.username.is_empty() && !self.smtp.password.is_empty()
    }

    /// Override configuration with environment variable values. Only
    /// non-empty variables override existing values.
    fn apply_env_vars(&mut self) {
        if let Some(v) = env_var("SMTP_LISTEN") {
            self.smtp.listen = v;
        }
        if let Some(v) = env_var("SMTP_USERNAME") {
            self.smtp.username = v;
        }
        if let Some(v) = env_var("SMTP_PASSWORD") {
            self.smtp.password = v;
        }
        if let Some(v) = env_var("SMTP_MAX_MESSAGE_SIZE") {
            // An unparseable value keeps the current setting.
            if let Ok(size) = v.parse::<usize>() {
                self.smtp.max_message_size = size;
            }
        }

        if let Some(v) = env_var("GRAPH_TENANT_ID") {
            self.graph.tenant_id = v;
        }
        if let Some(v) = env_var("GRAPH_CLIENT_ID") {
            self.graph.client_id = v;
        }
        if let Some(v) = env_var("GRAPH_CLIENT_SECRET") {
            self.graph.client_secret = v;
        }
        if let Some(v) = env_var("GRAPH_SENDER") {
            self.graph.sender = v;
        }

        if let Some(v) = env_var("SES_REGION") {
            self.ses.region = v;
        }
        if let Some(v) = env_var("SES_ACCESS_KEY_ID") {
            self.ses.access_key_id = v;
        }
        if let Some(v) = env_var("SES_SECRET_ACCESS_KEY") {
            self.ses.secret_access_key = v;
        }
        if let Some(v) = env_var("SES_SENDER") {
            self.ses.sender = v;
        }

        if let Some(v) = env_var("TLS_CERT_FILE") {
            self.tls.cert_file = v;
        }
        if let Some(v) = env_var("TLS_KEY_FILE") {
            self.tls.key_file = v;
        }

        if let Some(v) = env_var("PROVIDER") {
            self.provider = v;
        }
        if let Some(v) = env_var("LOG_LEVEL") {
            self.logging.level = v.to_lowercase();
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.smtp.listen, "0.0.0.0:2525");
        assert_eq!(cfg.smtp.max_message_size, 26_214_400);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.provider.is_empty());
        assert!(!cfg.auth_enabled());
        assert!(!cfg.graph_configured());
        assert!(!cfg.ses_configured());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
smtp:
  listen: "127.0.0.1:2600"
  username: relay
  password: secret
  max_message_size: 10485760
graph:
  tenant_id: tenant
  client_id: client
  client_secret: supersecret
  sender: sender@example.com
logging:
  level: debug
"#
        )
        .unwrap();

        let cfg = Config::load_from_file(file.path()).unwrap();
        assert_eq!(cfg.smtp.listen, "127.0.0.1:2600");
        assert_eq!(cfg.smtp.max_message_size, 10_485_760);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.auth_enabled());
        assert!(cfg.graph_configured());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
smtp:
  username: relay
  password: secret
"#
        )
        .unwrap();

        let cfg = Config::load_from_file(file.path()).unwrap();
        assert_eq!(cfg.smtp.listen, "0.0.0.0:2525");
        assert_eq!(cfg.smtp.max_message_size, 26_214_400);
        assert!(cfg.auth_enabled());
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = Config::load_from_file("/nonexistent/config.yaml");
        assert!(result.is_err());
    }

    #[test]
    fn test_graph_configured_requires_all_fields() {
        let mut cfg = Config::default();
        cfg.graph.tenant_id = "t".to_string();
        cfg.graph.client_id = "c".to_string();
        cfg.graph.client_secret = "s".to_string();
        assert!(!cfg.graph_configured());

        cfg.graph.sender = "sender@example.com".to_string();
        assert!(cfg.graph_configured());
    }

    #[test]
    fn test_ses_configured_requires_region_and_sender() {
        let mut cfg = Config::default();
        cfg.ses.region = "eu-west-1".to_string();
        assert!(!cfg.ses_configured());

        cfg.ses.sender = "sender@example.com".to_string();
        assert!(cfg.ses_configured());

        // Credentials are optional (default chain applies without them).
        assert!(cfg.ses.access_key_id.is_empty());
    }
}
