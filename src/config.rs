//! Configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig, RetryPolicy};
use crate::pipeline::PipelineConfig;
use crate::ratelimit::RateLimitConfig;

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o";
pub const DEFAULT_USERS_CONFIG: &str = "config/users.json";

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Enables the Telegram channel when set.
    pub telegram_token: Option<SecretString>,
    pub llm: LlmConfig,
    pub db_path: PathBuf,
    /// Allowlist JSON file.
    pub users_config: PathBuf,
    pub rate_limit: RateLimitConfig,
    /// Per-call deadline for Analyze, each Rewrite and chat turns.
    pub llm_timeout: Duration,
    /// Attempts per LLM call, including the first.
    pub llm_attempts: u32,
    /// Idle time before a user's queue worker is collected.
    pub queue_idle: Duration,
    /// User id the stdin channel acts as; `None` disables it.
    pub cli_user_id: Option<i64>,
    pub log_dir: Option<PathBuf>,
}

impl BotConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend: LlmBackend = get("LLM_PROVIDER")
            .as_deref()
            .unwrap_or("anthropic")
            .parse()?;
        let (key_var, model_var, default_model) = match backend {
            LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", "ANTHROPIC_MODEL", DEFAULT_ANTHROPIC_MODEL),
            LlmBackend::OpenAi => ("OPENAI_API_KEY", "OPENAI_MODEL", DEFAULT_OPENAI_MODEL),
        };
        let api_key = get(key_var).ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;
        let llm = LlmConfig {
            backend,
            api_key: SecretString::from(api_key),
            model: get(model_var).unwrap_or_else(|| default_model.to_string()),
        };

        let home = get("HOME");
        let db_path = match get("MEDIA_AGENT_DB_PATH") {
            Some(path) => expand_home(&path, home.as_deref()),
            None => expand_home("~/.media_agent/memory.db", home.as_deref()),
        };
        let users_config = get("MEDIA_AGENT_USERS_CONFIG")
            .map(|p| expand_home(&p, home.as_deref()))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_USERS_CONFIG));

        let rate_limit = RateLimitConfig {
            window: Duration::from_secs(parse_or(&get, "RATE_LIMIT_WINDOW_SECONDS", 60u64)?),
            pipeline_per_window: parse_or(&get, "RATE_LIMIT_PIPELINE_PER_WINDOW", 3usize)?,
            chat_per_window: parse_or(&get, "RATE_LIMIT_CHAT_PER_WINDOW", 20usize)?,
        };
        if rate_limit.window.is_zero() {
            return Err(invalid("RATE_LIMIT_WINDOW_SECONDS", "must be at least 1"));
        }

        let llm_timeout = Duration::from_secs(parse_or(&get, "MEDIA_AGENT_LLM_TIMEOUT_SECS", 120u64)?);
        if llm_timeout.is_zero() {
            return Err(invalid("MEDIA_AGENT_LLM_TIMEOUT_SECS", "must be at least 1"));
        }
        let llm_attempts = parse_or(&get, "MEDIA_AGENT_REWRITE_ATTEMPTS", 2u32)?;
        if llm_attempts == 0 {
            return Err(invalid("MEDIA_AGENT_REWRITE_ATTEMPTS", "must be at least 1"));
        }
        let queue_idle = Duration::from_secs(parse_or(&get, "MEDIA_AGENT_QUEUE_IDLE_SECS", 300u64)?);

        let cli_enabled = match get("MEDIA_AGENT_CLI") {
            Some(v) => parse_flag("MEDIA_AGENT_CLI", &v)?,
            None => false,
        };
        let cli_user_id = if cli_enabled {
            Some(parse_or(&get, "MEDIA_AGENT_CLI_USER_ID", 0i64)?)
        } else {
            None
        };

        let telegram_token = get("TELEGRAM_BOT_TOKEN").map(SecretString::from);
        if telegram_token.is_none() && cli_user_id.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "TELEGRAM_BOT_TOKEN".to_string(),
                hint: "Set a bot token, or MEDIA_AGENT_CLI=1 for a local stdin session.".to_string(),
            });
        }

        Ok(Self {
            telegram_token,
            llm,
            db_path,
            users_config,
            rate_limit,
            llm_timeout,
            llm_attempts,
            queue_idle,
            cli_user_id,
            log_dir: get("MEDIA_AGENT_LOG_DIR").map(|p| expand_home(&p, home.as_deref())),
        })
    }

    /// Orchestrator settings derived from this config.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            llm_deadline: self.llm_timeout,
            retry: RetryPolicy {
                max_attempts: self.llm_attempts,
                ..RetryPolicy::default()
            },
            ..PipelineConfig::default()
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e: T::Err| invalid(key, format!("'{raw}': {e}"))),
        None => Ok(default),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, format!("'{raw}' is not a boolean"))),
    }
}

fn expand_home(path: &str, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<BotConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|k| env.get(k).cloned())
    }

    const BASE: &[(&str, &str)] = &[
        ("TELEGRAM_BOT_TOKEN", "123:abc"),
        ("ANTHROPIC_API_KEY", "sk-ant-test"),
        ("HOME", "/home/ada"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        let mut pairs = BASE.to_vec();
        pairs.extend_from_slice(extra);
        pairs
    }

    #[test]
    fn defaults() {
        let config = load(BASE).unwrap();
        assert_eq!(config.llm.backend, LlmBackend::Anthropic);
        assert_eq!(config.llm.model, DEFAULT_ANTHROPIC_MODEL);
        assert_eq!(config.llm.api_key.expose_secret(), "sk-ant-test");
        assert_eq!(config.db_path, PathBuf::from("/home/ada/.media_agent/memory.db"));
        assert_eq!(config.users_config, PathBuf::from(DEFAULT_USERS_CONFIG));
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.rate_limit.pipeline_per_window, 3);
        assert_eq!(config.rate_limit.chat_per_window, 20);
        assert_eq!(config.llm_timeout, Duration::from_secs(120));
        assert_eq!(config.llm_attempts, 2);
        assert_eq!(config.queue_idle, Duration::from_secs(300));
        assert!(config.cli_user_id.is_none());
        assert!(config.log_dir.is_none());
        assert!(config.telegram_token.is_some());
    }

    #[test]
    fn openai_backend_uses_its_own_key() {
        let err = load(&with(&[("LLM_PROVIDER", "openai")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "OPENAI_API_KEY"));

        let config = load(&with(&[("LLM_PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-x")])).unwrap();
        assert_eq!(config.llm.backend, LlmBackend::OpenAi);
        assert_eq!(config.llm.model, DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn missing_api_key() {
        let err = load(&[("TELEGRAM_BOT_TOKEN", "t")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "ANTHROPIC_API_KEY"));
    }

    #[test]
    fn unknown_provider() {
        let err = load(&with(&[("LLM_PROVIDER", "copilot")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "LLM_PROVIDER"));
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = load(&with(&[("RATE_LIMIT_CHAT_PER_WINDOW", "lots")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "RATE_LIMIT_CHAT_PER_WINDOW"
        ));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = load(&with(&[("MEDIA_AGENT_REWRITE_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn no_channel_is_an_error() {
        let err = load(&[("ANTHROPIC_API_KEY", "k")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    fn cli_only() {
        let config = load(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("MEDIA_AGENT_CLI", "true"),
            ("MEDIA_AGENT_CLI_USER_ID", "42"),
        ])
        .unwrap();
        assert!(config.telegram_token.is_none());
        assert_eq!(config.cli_user_id, Some(42));
    }

    #[test]
    fn empty_values_are_unset() {
        let config = load(&with(&[("ANTHROPIC_MODEL", "  "), ("MEDIA_AGENT_LOG_DIR", "")])).unwrap();
        assert_eq!(config.llm.model, DEFAULT_ANTHROPIC_MODEL);
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn paths_expand_home() {
        let config = load(&with(&[
            ("MEDIA_AGENT_DB_PATH", "~/data/bot.db"),
            ("MEDIA_AGENT_LOG_DIR", "/var/log/media"),
        ]))
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/home/ada/data/bot.db"));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/media")));
    }

    #[test]
    fn pipeline_config_carries_deadline_and_attempts() {
        let config = load(&with(&[
            ("MEDIA_AGENT_LLM_TIMEOUT_SECS", "30"),
            ("MEDIA_AGENT_REWRITE_ATTEMPTS", "4"),
        ]))
        .unwrap();
        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.llm_deadline, Duration::from_secs(30));
        assert_eq!(pipeline.retry.max_attempts, 4);
    }
}
