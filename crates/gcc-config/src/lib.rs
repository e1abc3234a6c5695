//! Ambient configuration layer: environment-variable settings with explicit
//! default-then-override fallback chains, read once at startup.
//!
//! Grounded on `csa-config::paths`'s style of small, independently testable
//! fallback functions (rather than a derive-based env parser the teacher's
//! stack doesn't carry); field set grounded on
//! `original_source/src/config.py`'s `OllamaConfig`/`AgentConfig` split.

use std::env;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool_or(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// LLM collaborator connection settings, shared shape for the planner and
/// the optional fast-path reflex model (spec §6; `original_source/src/config.py`
/// `OllamaConfig`).
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub host: String,
    pub model: String,
    pub temperature: f32,
    pub context_size: u32,
    pub timeout_secs: u64,
}

impl LlmConfig {
    fn planner_from_env() -> Self {
        Self {
            host: env_or("OLLAMA_HOST", "http://localhost:11434"),
            model: env_or("OLLAMA_MODEL", "devstral:24b"),
            temperature: env_parsed_or("OLLAMA_TEMPERATURE", 0.3),
            context_size: env_parsed_or("OLLAMA_CONTEXT_SIZE", 32768),
            timeout_secs: env_parsed_or("OLLAMA_TIMEOUT", 120),
        }
    }

    fn reflex_from_env() -> Self {
        Self {
            host: env_or("FAST_PATH_HOST", "http://localhost:11434"),
            model: env_or("FAST_PATH_MODEL", "llama3.2:3b"),
            temperature: env_parsed_or("OLLAMA_TEMPERATURE", 0.3),
            context_size: env_parsed_or("OLLAMA_CONTEXT_SIZE", 32768),
            timeout_secs: env_parsed_or("OLLAMA_TIMEOUT", 120),
        }
    }
}

/// Optional tracing-backend keys (spec §6 "optional tracing keys"). Per
/// Non-goals these are never wired to an actual exporter; they are only
/// captured and logged present/absent at startup, mirroring
/// `original_source/src/intelligence/observability.py`'s graceful absence
/// handling.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TracingKeys {
    pub public_key: Option<String>,
    pub secret_key: Option<String>,
    pub host: String,
}

impl TracingKeys {
    fn from_env() -> Self {
        Self {
            public_key: env::var("LANGFUSE_PUBLIC_KEY").ok(),
            secret_key: env::var("LANGFUSE_SECRET_KEY").ok(),
            host: env_or("LANGFUSE_HOST", "http://localhost:3000"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.public_key.is_some() && self.secret_key.is_some()
    }
}

/// Full process configuration, read once at startup (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub struct GccConfig {
    pub gcc_base_path: String,
    pub skills_path: String,
    pub agent_name: String,
    pub log_level: String,
    pub command_timeout_secs: u64,
    pub fast_path_enabled: bool,
    pub planner: LlmConfig,
    pub reflex: LlmConfig,
    pub tracing: TracingKeys,
}

impl GccConfig {
    /// Read the full configuration from the process environment, applying
    /// every field's documented default when its variable is unset or
    /// unparsable.
    pub fn from_env() -> Self {
        let config = Self {
            gcc_base_path: env_or("GCC_BASE_PATH", "./.GCC"),
            skills_path: env_or("SKILLS_PATH", "./skills"),
            agent_name: env_or("AGENT_NAME", "devops-agent"),
            log_level: env_or("LOG_LEVEL", "info"),
            command_timeout_secs: env_parsed_or(
                "GCC_COMMAND_TIMEOUT_SECS",
                gcc_executor::DEFAULT_TIMEOUT_SECS,
            ),
            fast_path_enabled: env_bool_or("FAST_PATH_ENABLED", true),
            planner: LlmConfig::planner_from_env(),
            reflex: LlmConfig::reflex_from_env(),
            tracing: TracingKeys::from_env(),
        };

        if !config.tracing.is_configured() {
            tracing::info!("Langfuse keys missing. Tracing disabled.");
        }
        config
    }

    /// `RUST_LOG` takes priority when a caller has already set it; otherwise
    /// `log_level` (spec §6's own env var) drives the tracing subscriber so
    /// users aren't required to know the Rust-specific variable name.
    pub fn effective_rust_log(&self) -> String {
        env::var("RUST_LOG").unwrap_or_else(|_| self.log_level.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes env-mutating tests; `std::env::set_var` is process-global.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in ["GCC_BASE_PATH", "SKILLS_PATH", "AGENT_NAME", "LOG_LEVEL"] {
            unsafe { env::remove_var(key) };
        }
        let config = GccConfig::from_env();
        assert_eq!(config.gcc_base_path, "./.GCC");
        assert_eq!(config.skills_path, "./skills");
        assert_eq!(config.agent_name, "devops-agent");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.command_timeout_secs, gcc_executor::DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn env_var_overrides_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("AGENT_NAME", "test-agent") };
        let config = GccConfig::from_env();
        assert_eq!(config.agent_name, "test-agent");
        unsafe { env::remove_var("AGENT_NAME") };
    }

    #[test]
    fn unparsable_numeric_env_var_falls_back_to_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("GCC_COMMAND_TIMEOUT_SECS", "not-a-number") };
        let config = GccConfig::from_env();
        assert_eq!(config.command_timeout_secs, gcc_executor::DEFAULT_TIMEOUT_SECS);
        unsafe { env::remove_var("GCC_COMMAND_TIMEOUT_SECS") };
    }

    #[test]
    fn effective_rust_log_prefers_existing_rust_log() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::set_var("RUST_LOG", "debug") };
        unsafe { env::set_var("LOG_LEVEL", "warn") };
        let config = GccConfig::from_env();
        assert_eq!(config.effective_rust_log(), "debug");
        unsafe { env::remove_var("RUST_LOG") };
        unsafe { env::remove_var("LOG_LEVEL") };
    }

    #[test]
    fn tracing_keys_unconfigured_without_both_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        unsafe { env::remove_var("LANGFUSE_PUBLIC_KEY") };
        unsafe { env::remove_var("LANGFUSE_SECRET_KEY") };
        let keys = TracingKeys::from_env();
        assert!(!keys.is_configured());
    }

    #[test]
    fn fast_path_enabled_accepts_common_truthy_spellings() {
        let _guard = ENV_LOCK.lock().unwrap();
        for value in ["1", "true", "TRUE", "yes", "on"] {
            unsafe { env::set_var("FAST_PATH_ENABLED", value) };
            assert!(env_bool_or("FAST_PATH_ENABLED", false), "expected {value} to be truthy");
        }
        unsafe { env::remove_var("FAST_PATH_ENABLED") };
    }
}
