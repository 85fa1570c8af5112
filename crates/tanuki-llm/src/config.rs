//! Provider selection and per-provider settings.
//!
//! Read once at startup from the environment (plus the CLI overrides the
//! binary passes in) and immutable afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default Ollama-style endpoint.
pub const DEFAULT_LLAMA_ENDPOINT: &str = "http://localhost:11434";

/// Default local model.
pub const DEFAULT_LLAMA_MODEL: &str = "llama3.2";

/// Default hosted model.
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

/// Default hosted API base URL.
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default per-request timeout for process backends.
pub const DEFAULT_MCP_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors raised while resolving provider configuration. All are fatal at startup.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown provider '{0}' (expected llama, openai or mcp)")]
    UnknownProvider(String),

    #[error("{var} must be set for the {provider} provider")]
    MissingVar {
        var: &'static str,
        provider: ProviderKind,
    },

    #[error("invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },
}

/// Which backend family to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local model server speaking the Ollama generate API.
    #[default]
    Llama,
    /// Hosted chat-completions API.
    #[serde(rename = "openai")]
    OpenAi,
    /// Child process speaking line-delimited JSON-RPC.
    Mcp,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Llama => "llama",
            Self::OpenAi => "openai",
            Self::Mcp => "mcp",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "llama" | "ollama" => Ok(Self::Llama),
            "openai" => Ok(Self::OpenAi),
            "mcp" => Ok(Self::Mcp),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Settings for the Ollama-style backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlamaConfig {
    pub endpoint: String,
    pub model: String,
}

impl Default for LlamaConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LLAMA_ENDPOINT.to_string(),
            model: DEFAULT_LLAMA_MODEL.to_string(),
        }
    }
}

/// Settings for the hosted completions backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            base_url: None,
        }
    }

    /// Base URL with any trailing slash removed.
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or(DEFAULT_OPENAI_BASE_URL)
            .trim_end_matches('/')
    }
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Settings for the process-protocol backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpConfig {
    pub server_path: String,
    #[serde(default)]
    pub server_args: Vec<String>,
    pub timeout: Duration,
}

impl McpConfig {
    pub fn new(server_path: impl Into<String>) -> Self {
        Self {
            server_path: server_path.into(),
            server_args: Vec::new(),
            timeout: DEFAULT_MCP_TIMEOUT,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Process-wide provider configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderConfig {
    Llama(LlamaConfig),
    OpenAi(OpenAiConfig),
    Mcp(McpConfig),
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Llama(_) => ProviderKind::Llama,
            Self::OpenAi(_) => ProviderKind::OpenAi,
            Self::Mcp(_) => ProviderKind::Mcp,
        }
    }

    /// Resolve from the process environment.
    ///
    /// `provider` and `endpoint` are the `--provider` / `--endpoint` CLI values.
    pub fn from_env(
        provider: Option<ProviderKind>,
        endpoint: Option<&str>,
    ) -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok(), provider, endpoint)
    }

    /// Resolve using an arbitrary variable lookup.
    ///
    /// Selection order: explicit `provider`, then a legacy `endpoint` (which
    /// implies llama), then `AI_PROVIDER`, then llama. Empty variables count
    /// as unset.
    pub fn from_lookup<F>(
        lookup: F,
        provider: Option<ProviderKind>,
        endpoint: Option<&str>,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let kind = match (provider, endpoint) {
            (Some(kind), _) => kind,
            (None, Some(_)) => ProviderKind::Llama,
            (None, None) => match get("AI_PROVIDER") {
                Some(name) => name.parse()?,
                None => ProviderKind::default(),
            },
        };

        if endpoint.is_some() && kind != ProviderKind::Llama {
            tracing::warn!(
                provider = %kind,
                "--endpoint only applies to the llama provider; ignoring"
            );
        }

        match kind {
            ProviderKind::Llama => {
                let endpoint = endpoint
                    .map(str::to_string)
                    .or_else(|| get("LLAMA_ENDPOINT"))
                    .unwrap_or_else(|| DEFAULT_LLAMA_ENDPOINT.to_string());
                let model = get("LLAMA_MODEL").unwrap_or_else(|| DEFAULT_LLAMA_MODEL.to_string());
                Ok(Self::Llama(LlamaConfig { endpoint, model }))
            }
            ProviderKind::OpenAi => {
                let api_key = get("OPENAI_API_KEY").ok_or(ConfigError::MissingVar {
                    var: "OPENAI_API_KEY",
                    provider: kind,
                })?;
                Ok(Self::OpenAi(OpenAiConfig {
                    api_key,
                    model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                    base_url: get("OPENAI_BASE_URL"),
                }))
            }
            ProviderKind::Mcp => {
                let server_path = get("MCP_SERVER_PATH").ok_or(ConfigError::MissingVar {
                    var: "MCP_SERVER_PATH",
                    provider: kind,
                })?;
                let server_args = get("MCP_SERVER_ARGS")
                    .map(|args| args.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default();
                let timeout = match get("MCP_TIMEOUT") {
                    Some(raw) => match raw.trim().parse::<u64>() {
                        Ok(secs) if secs > 0 => Duration::from_secs(secs),
                        _ => {
                            return Err(ConfigError::InvalidValue {
                                var: "MCP_TIMEOUT",
                                value: raw,
                            });
                        }
                    },
                    None => DEFAULT_MCP_TIMEOUT,
                };
                Ok(Self::Mcp(McpConfig {
                    server_path,
                    server_args,
                    timeout,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_llama() {
        let config = ProviderConfig::from_lookup(env(&[]), None, None).unwrap();
        assert_eq!(config, ProviderConfig::Llama(LlamaConfig::default()));
    }

    #[test]
    fn test_ai_provider_env_selects_backend() {
        let config = ProviderConfig::from_lookup(
            env(&[("AI_PROVIDER", "OpenAI"), ("OPENAI_API_KEY", "sk-test")]),
            None,
            None,
        )
        .unwrap();
        match config {
            ProviderConfig::OpenAi(cfg) => {
                assert_eq!(cfg.api_key, "sk-test");
                assert_eq!(cfg.model, DEFAULT_OPENAI_MODEL);
                assert_eq!(cfg.base_url(), DEFAULT_OPENAI_BASE_URL);
            }
            other => panic!("expected openai, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_provider_is_error() {
        let err = ProviderConfig::from_lookup(env(&[("AI_PROVIDER", "bard")]), None, None)
            .unwrap_err();
        assert_eq!(err, ConfigError::UnknownProvider("bard".into()));
    }

    #[test]
    fn test_legacy_endpoint_implies_llama() {
        let config = ProviderConfig::from_lookup(
            env(&[("AI_PROVIDER", "mcp")]),
            None,
            Some("http://gpu-box:11434"),
        )
        .unwrap();
        assert_eq!(
            config,
            ProviderConfig::Llama(LlamaConfig {
                endpoint: "http://gpu-box:11434".into(),
                model: DEFAULT_LLAMA_MODEL.into(),
            })
        );
    }

    #[test]
    fn test_cli_provider_beats_env() {
        let config = ProviderConfig::from_lookup(
            env(&[("AI_PROVIDER", "openai"), ("LLAMA_MODEL", "qwen2.5")]),
            Some(ProviderKind::Llama),
            None,
        )
        .unwrap();
        match config {
            ProviderConfig::Llama(cfg) => assert_eq!(cfg.model, "qwen2.5"),
            other => panic!("expected llama, got {other:?}"),
        }
    }

    #[test]
    fn test_openai_requires_key() {
        let err = ProviderConfig::from_lookup(
            env(&[("OPENAI_API_KEY", "  ")]),
            Some(ProviderKind::OpenAi),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar { var: "OPENAI_API_KEY", .. }));
    }

    #[test]
    fn test_mcp_args_and_timeout() {
        let config = ProviderConfig::from_lookup(
            env(&[
                ("MCP_SERVER_PATH", "/usr/local/bin/shell-sim"),
                ("MCP_SERVER_ARGS", "--stdio  --quiet"),
                ("MCP_TIMEOUT", "12"),
            ]),
            Some(ProviderKind::Mcp),
            None,
        )
        .unwrap();
        assert_eq!(
            config,
            ProviderConfig::Mcp(McpConfig {
                server_path: "/usr/local/bin/shell-sim".into(),
                server_args: vec!["--stdio".into(), "--quiet".into()],
                timeout: Duration::from_secs(12),
            })
        );
    }

    #[test]
    fn test_mcp_bad_timeout() {
        let err = ProviderConfig::from_lookup(
            env(&[("MCP_SERVER_PATH", "sim"), ("MCP_TIMEOUT", "soon")]),
            Some(ProviderKind::Mcp),
            None,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "MCP_TIMEOUT",
                value: "soon".into()
            }
        );
    }

    #[test]
    fn test_api_key_redacted_in_debug() {
        let cfg = OpenAiConfig::new("sk-secret");
        assert!(!format!("{cfg:?}").contains("sk-secret"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let mut cfg = OpenAiConfig::new("k");
        cfg.base_url = Some("http://localhost:8080/v1/".into());
        assert_eq!(cfg.base_url(), "http://localhost:8080/v1");
    }
}
