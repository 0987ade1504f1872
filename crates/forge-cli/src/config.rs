use anyhow::{Context, Result};
use forge_core::{
    AgentDescriptor, AnalysisConfig, ModelDescriptor, OrchestratorConfig, RouterConfig,
    SearchConfig, WorkflowConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// Configuration shipped with the binary and written by `forge init`
pub const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgeConfig {
    /// Agent used when no specialist clears the routing threshold
    #[serde(default)]
    pub fallback_agent: Option<String>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Extra aliases on top of the ones declared by models
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Models added to (or replacing entries of) the builtin catalog
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
    #[serde(default)]
    pub agents: Vec<AgentDescriptor>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: Option<ProviderKeyConfig>,
    #[serde(default)]
    pub anthropic: Option<ProviderKeyConfig>,
    #[serde(default)]
    pub serpapi: Option<SerpApiConfig>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderKeyConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ProviderKeyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderKeyConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SerpApiConfig {
    #[serde(default)]
    pub api_key: String,
}

impl std::fmt::Debug for SerpApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerpApiConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .finish()
    }
}

/// A key is usable once it is non-empty and fully expanded
fn usable_key(key: &str) -> Option<&str> {
    let key = key.trim();
    (!key.is_empty() && !key.contains("${")).then_some(key)
}

impl ProviderKeyConfig {
    pub fn key(&self) -> Option<&str> {
        usable_key(&self.api_key)
    }
}

impl SerpApiConfig {
    pub fn key(&self) -> Option<&str> {
        usable_key(&self.api_key)
    }
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".forge")
}

impl ForgeConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        // The file may hold API keys
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(&path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `forge init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        config.warn_hardcoded_keys(&content);
        Ok(config)
    }

    /// Expand allowed environment variables, then parse TOML
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = toml::from_str(&expanded)?;
        Ok(config)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            router: self.router.clone(),
            workflow: self.workflow.clone(),
            search: self.search.clone(),
            analysis: self.analysis.clone(),
        }
    }

    /// Copy with every secret masked, for display
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for provider in [&mut copy.providers.openai, &mut copy.providers.anthropic]
            .into_iter()
            .flatten()
        {
            provider.api_key = mask_secret(&provider.api_key);
        }
        if let Some(serp) = &mut copy.providers.serpapi {
            serp.api_key = mask_secret(&serp.api_key);
        }
        copy
    }

    /// A key that appears verbatim in the file was not taken from the environment
    fn warn_hardcoded_keys(&self, raw: &str) {
        let keys = [
            ("OpenAI", self.providers.openai.as_ref().and_then(|p| p.key()), "OPENAI_API_KEY"),
            ("Anthropic", self.providers.anthropic.as_ref().and_then(|p| p.key()), "ANTHROPIC_API_KEY"),
            ("SerpApi", self.providers.serpapi.as_ref().and_then(|p| p.key()), "SERP_API_KEY"),
        ];
        for (name, key, var) in keys {
            if let Some(key) = key {
                if raw.contains(key) {
                    warn!(
                        "{} API key is hardcoded in config file. For security, use environment variables: api_key = \"${{{}}}\"",
                        name, var
                    );
                }
            }
        }
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "SERP_API_KEY",
    "FORGE_OPENAI_BASE_URL",
    "FORGE_ANTHROPIC_BASE_URL",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = std::env::var(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::ScoreNormalization;
    use std::io::Write;

    #[test]
    fn test_default_config_parses() {
        let config = ForgeConfig::parse(DEFAULT_CONFIG).unwrap();
        assert!(!config.agents.is_empty());
        let fallback = config.fallback_agent.as_deref().unwrap();
        assert!(config.agents.iter().any(|a| a.id == fallback));
        assert_eq!(config.workflow.max_revisions, 5);
        assert!(config.agents.iter().all(|a| !a.id.trim().is_empty()));
    }

    #[test]
    fn test_sections_default_when_missing() {
        let config = ForgeConfig::parse("").unwrap();
        assert!(config.agents.is_empty());
        assert!(config.providers.openai.is_none());
        assert_eq!(config.router.threshold, 0.5);
        assert_eq!(config.search.max_queries, 3);
    }

    #[test]
    fn test_parse_core_sections() {
        let config = ForgeConfig::parse(
            r#"
fallback_agent = "general"

[router]
threshold = 0.3
normalization = { mode = "saturate_at", matches = 2 }

[workflow]
max_revisions = 2

[aliases]
fast = "gpt-4o-mini"

[[agents]]
id = "general"
name = "General Assistant"
keywords = ["help"]
"#,
        )
        .unwrap();
        assert_eq!(config.router.threshold, 0.3);
        assert_eq!(
            config.router.normalization,
            ScoreNormalization::SaturateAt { matches: 2 }
        );
        let orch = config.orchestrator_config();
        assert_eq!(orch.workflow.max_revisions, 2);
        assert_eq!(config.aliases["fast"], "gpt-4o-mini");
        assert_eq!(config.agents[0].display_name, "General Assistant");
    }

    #[test]
    fn test_expand_env_vars_allowlist() {
        // SAFETY: test-only env mutation of a variable no other test reads
        unsafe { std::env::set_var("SERP_API_KEY", "serp-from-env") };
        let expanded = expand_env_vars("a = \"${SERP_API_KEY}\"\nb = \"${PATH}\"\nc = \"${UNCLOSED\"");
        assert!(expanded.contains("a = \"serp-from-env\""));
        assert!(expanded.contains("b = \"${PATH}\""));
        assert!(expanded.contains("${UNCLOSED"));
    }

    #[test]
    fn test_unexpanded_key_is_unusable() {
        let provider = ProviderKeyConfig {
            api_key: "${NOT_ALLOWED}".to_string(),
            base_url: None,
        };
        assert!(provider.key().is_none());
        let provider = ProviderKeyConfig {
            api_key: "  ".to_string(),
            base_url: None,
        };
        assert!(provider.key().is_none());
        let provider = ProviderKeyConfig {
            api_key: "sk-real".to_string(),
            base_url: None,
        };
        assert_eq!(provider.key(), Some("sk-real"));
    }

    #[test]
    fn test_debug_and_redacted_mask_keys() {
        let mut config = ForgeConfig::parse("").unwrap();
        config.providers.openai = Some(ProviderKeyConfig {
            api_key: "sk-abcdefghijklmnop".to_string(),
            base_url: None,
        });
        config.providers.serpapi = Some(SerpApiConfig {
            api_key: "serp-secret-value".to_string(),
        });

        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-abcdefghijklmnop"));
        assert!(!debug.contains("serp-secret-value"));

        let shown = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(shown.contains("sk-...mnop"));
        assert!(!shown.contains("serp-secret-value"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-1234567890"), "sk-...7890");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[providers.openai]\napi_key = \"sk-test-key-123\"\n\n[[agents]]\nid = \"a\"\nname = \"A\""
        )
        .unwrap();
        let config = ForgeConfig::load(&Some(file.path().to_path_buf())).unwrap();
        assert_eq!(
            config.providers.openai.as_ref().and_then(|p| p.key()),
            Some("sk-test-key-123")
        );
        assert_eq!(config.agents.len(), 1);
    }

    #[test]
    fn test_load_missing_file_mentions_init() {
        let dir = tempfile::tempdir().unwrap();
        let err = ForgeConfig::load(&Some(dir.path().join("absent.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("forge init"));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_rejects_world_readable_file() {
        use std::os::unix::fs::PermissionsExt;
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = ForgeConfig::load(&Some(file.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("chmod 600"));
    }
}
