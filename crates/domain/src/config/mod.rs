mod llm;
mod observability;
mod server;
mod sessions;
mod stt;
mod streaming;

pub use llm::*;
pub use observability::*;
pub use server::*;
pub use sessions::*;
pub use stt::*;
pub use streaming::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sessions: SessionManagerConfig,
    #[serde(default)]
    pub stt: SttDriverConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            ConfigSeverity::Error => write!(f, "[ERROR] {}: {}", self.field, self.message),
            ConfigSeverity::Warning => write!(f, "[WARN] {}: {}", self.field, self.message),
        }
    }
}

impl Config {
    /// Validate the resolved config, returning every issue found rather
    /// than failing on the first one. Callers decide whether `Error`-level
    /// issues should abort startup (see `ConfigSeverity`).
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be non-zero".into(),
            });
        }
        if self.server.host.trim().is_empty() {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self
            .server
            .cors
            .allowed_origins
            .iter()
            .any(|o| o == "*")
        {
            issues.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard CORS origin allows any site to call the API from a browser"
                    .into(),
            });
        }

        if self.llm.providers.is_empty() {
            issues.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured; chat endpoints will return errors until \
                          one is added"
                    .into(),
            });
        }

        let mut seen_ids = std::collections::HashSet::new();
        for (i, pc) in self.llm.providers.iter().enumerate() {
            let field = format!("llm.providers[{i}]");
            if pc.id.trim().is_empty() {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("{field}.id"),
                    message: "provider id must not be empty".into(),
                });
            } else if !seen_ids.insert(pc.id.clone()) {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("{field}.id"),
                    message: format!("duplicate provider id '{}'", pc.id),
                });
            }
            if pc.base_url.trim().is_empty() {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("{field}.base_url"),
                    message: "base_url must not be empty".into(),
                });
            }
            let has_auth = pc.auth.key.is_some()
                || pc.auth.env.is_some()
                || !pc.auth.keys.is_empty()
                || (pc.auth.service.is_some() && pc.auth.account.is_some())
                || pc.auth.mode == AuthMode::None;
            if !has_auth {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("{field}.auth"),
                    message: "no key/env/keychain configured; provider will fail to initialize"
                        .into(),
                });
            }
        }

        if self.sessions.max_sessions == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.max_sessions".into(),
                message: "max_sessions must be non-zero".into(),
            });
        }
        if self.sessions.defaults.timeout_seconds == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "sessions.defaults.timeout_seconds".into(),
                message: "timeout_seconds must be non-zero".into(),
            });
        }

        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be non-zero".into(),
                });
            }
            if rl.burst_size == 0 {
                issues.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be non-zero".into(),
                });
            }
        }

        if self.streaming.output_queue_capacity == 0 {
            issues.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "streaming.output_queue_capacity".into(),
                message: "output_queue_capacity must be non-zero (unbounded queues defeat \
                          back-pressure)"
                    .into(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::default()
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|i| i.field.starts_with(field_prefix))
    }

    #[test]
    fn default_config_has_only_warnings() {
        let issues = valid_config().validate();
        assert!(issues.iter().all(|i| i.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn zero_port_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.port").expect("expected port issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn empty_host_is_error() {
        let mut cfg = valid_config();
        cfg.server.host = "".into();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "server.host").is_some());
    }

    #[test]
    fn wildcard_cors_is_warning() {
        let mut cfg = valid_config();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.cors").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn empty_providers_is_warning_not_error() {
        let cfg = valid_config();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn duplicate_provider_ids_is_error() {
        let mut cfg = valid_config();
        let p = ProviderConfig {
            id: "openai".into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: "https://api.openai.com/v1".into(),
            auth: AuthConfig {
                env: Some("OPENAI_API_KEY".into()),
                ..Default::default()
            },
            default_model: None,
        };
        cfg.llm.providers = vec![p.clone(), p];
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.field.ends_with(".id")));
    }

    #[test]
    fn provider_without_auth_is_warning() {
        let mut cfg = valid_config();
        cfg.llm.providers = vec![ProviderConfig {
            id: "openai".into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: "https://api.openai.com/v1".into(),
            auth: AuthConfig::default(),
            default_model: None,
        }];
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers[0].auth").unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn zero_max_sessions_is_error() {
        let mut cfg = valid_config();
        cfg.sessions.max_sessions = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "sessions.max_sessions").is_some());
    }

    #[test]
    fn zero_timeout_is_error() {
        let mut cfg = valid_config();
        cfg.sessions.defaults.timeout_seconds = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "sessions.defaults.timeout_seconds").is_some());
    }

    #[test]
    fn zero_output_queue_capacity_is_error() {
        let mut cfg = valid_config();
        cfg.streaming.output_queue_capacity = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "streaming.output_queue_capacity").is_some());
    }

    #[test]
    fn rate_limit_zero_rps_is_error() {
        let mut cfg = valid_config();
        cfg.server.rate_limit = Some(RateLimitConfig {
            requests_per_second: 0,
            burst_size: 10,
        });
        let issues = cfg.validate();
        assert!(find_issue(&issues, "server.rate_limit.requests_per_second").is_some());
    }

    #[test]
    fn rate_limit_zero_burst_is_error() {
        let mut cfg = valid_config();
        cfg.server.rate_limit = Some(RateLimitConfig {
            requests_per_second: 10,
            burst_size: 0,
        });
        let issues = cfg.validate();
        assert!(find_issue(&issues, "server.rate_limit.burst_size").is_some());
    }

    #[test]
    fn rate_limit_valid_values_no_error() {
        let mut cfg = valid_config();
        cfg.server.rate_limit = Some(RateLimitConfig {
            requests_per_second: 10,
            burst_size: 20,
        });
        let issues = cfg.validate();
        assert!(find_issue(&issues, "server.rate_limit").is_none());
    }

    #[test]
    fn rate_limit_none_no_error() {
        let mut cfg = valid_config();
        cfg.server.rate_limit = None;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "server.rate_limit").is_none());
    }

    #[test]
    fn config_error_display_format() {
        let issue = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be non-zero".into(),
        };
        assert_eq!(issue.to_string(), "[ERROR] server.port: port must be non-zero");
    }
}
