//! File configuration for the proof loop.
//!
//! Every section is optional:
//!
//! ```toml
//! [session]
//! max_iterations = 5
//!
//! [checker]
//! workspace = "~/lean_workspace"     # relative paths resolve against this file
//! scratch_file = "TmpCheck.lean"
//! command = ["lake", "env", "lean"]
//! timeout_secs = 60
//!
//! [llm]
//! provider = "openai"                # or "anthropic"
//! api_key_env = "OPENAI_API_KEY"
//! request_timeout_secs = 120
//!
//! [planner]
//! model_name = "gpt-4o"              # provider default when unset
//! temperature = 0.3
//! max_tokens = 2048
//!
//! [prover]
//! model_name = "gpt-4o"
//! temperature = 0.2
//! max_tokens = 4096
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agents::{llm_stages, CheckerVerifier, StageModelConfig};
use crate::error::{Error, Result};
use crate::lean::CheckerConfig;
use crate::llm::{client_for, ClientConfig, LLMClient, ModelSpec, Provider, TrackedClient};
use crate::stage::Stages;

/// `[session]` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Maximum number of critique rounds before giving up.
    pub max_iterations: u32,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self { max_iterations: 5 }
    }
}

/// `[checker]` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerSection {
    pub workspace: String,
    pub scratch_file: String,
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub normalize_source: bool,
}

impl Default for CheckerSection {
    fn default() -> Self {
        let defaults = CheckerConfig::default();
        Self {
            workspace: defaults.workspace_root.to_string_lossy().into_owned(),
            scratch_file: defaults.scratch_file.to_string_lossy().into_owned(),
            command: defaults.command,
            timeout_secs: defaults.timeout.as_secs(),
            normalize_source: defaults.normalize_source,
        }
    }
}

/// `[llm]` settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub provider: Provider,
    /// Environment variable holding the API key; provider default when unset.
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key_env: None,
            base_url: None,
            request_timeout_secs: 120,
        }
    }
}

fn default_planner(provider: Provider) -> StageModelConfig {
    StageModelConfig::new(provider.default_model().id).with_temperature(0.3)
}

fn default_prover(provider: Provider) -> StageModelConfig {
    StageModelConfig::new(provider.default_model().id).with_max_tokens(4096)
}

fn default_critic(provider: Provider) -> StageModelConfig {
    StageModelConfig::new(provider.default_model().id).with_temperature(0.3)
}

/// A `[planner]`, `[prover]` or `[critic]` section as written.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct StageSection {
    model_name: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

impl StageSection {
    fn resolve(self, defaults: StageModelConfig) -> StageModelConfig {
        StageModelConfig {
            model_name: self.model_name.unwrap_or(defaults.model_name),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
        }
    }
}

/// File layout before stage defaults are filled in from the provider.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLoopConfig {
    session: SessionSection,
    checker: CheckerSection,
    llm: LlmSection,
    planner: StageSection,
    prover: StageSection,
    critic: StageSection,
}

impl From<RawLoopConfig> for LoopConfig {
    fn from(raw: RawLoopConfig) -> Self {
        let provider = raw.llm.provider;
        Self {
            session: raw.session,
            checker: raw.checker,
            llm: raw.llm,
            planner: raw.planner.resolve(default_planner(provider)),
            prover: raw.prover.resolve(default_prover(provider)),
            critic: raw.critic.resolve(default_critic(provider)),
            base_dir: None,
        }
    }
}

/// Top-level configuration file.
///
/// Stage sections that leave `model_name` unset use the provider's default
/// model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawLoopConfig")]
pub struct LoopConfig {
    pub session: SessionSection,
    pub checker: CheckerSection,
    pub llm: LlmSection,
    pub planner: StageModelConfig,
    pub prover: StageModelConfig,
    pub critic: StageModelConfig,
    /// Directory relative paths resolve against; the config file's directory
    /// when loaded from disk.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        RawLoopConfig::default().into()
    }
}

impl LoopConfig {
    /// Load and validate-parse a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Parse config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(format!("invalid config: {}", e)))
    }

    /// Load `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.session.max_iterations = max_iterations;
        self
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Check settings that would only fail later, mid-session.
    pub fn validate(&self) -> Result<()> {
        for (name, stage) in [
            ("planner", &self.planner),
            ("prover", &self.prover),
            ("critic", &self.critic),
        ] {
            if stage.model_name.trim().is_empty() {
                return Err(Error::config(format!("[{}] model_name is empty", name)));
            }
            if stage.max_tokens == 0 {
                return Err(Error::config(format!("[{}] max_tokens must be positive", name)));
            }
            if let Some(model) = ModelSpec::catalog()
                .into_iter()
                .find(|m| m.id == stage.model_name && m.provider != self.llm.provider)
            {
                return Err(Error::config(format!(
                    "[{}] model {} is a {} model but [llm] provider is {}",
                    name, model.id, model.provider, self.llm.provider
                )));
            }
            if !(0.0..=2.0).contains(&stage.temperature) {
                return Err(Error::config(format!(
                    "[{}] temperature {} is outside 0.0..=2.0",
                    name, stage.temperature
                )));
            }
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(Error::config("[llm] request_timeout_secs must be positive"));
        }
        self.checker_config()?.validate()
    }

    /// Resolve a possibly relative, possibly `~`-prefixed path.
    fn resolve_path(&self, raw: &str) -> Result<PathBuf> {
        let expanded = shellexpand::full(raw)
            .map_err(|e| Error::config(format!("cannot expand path {}: {}", raw, e)))?;
        let path = PathBuf::from(expanded.as_ref());
        Ok(match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path,
        })
    }

    /// Checker settings with paths resolved.
    pub fn checker_config(&self) -> Result<CheckerConfig> {
        Ok(CheckerConfig::with_workspace(self.resolve_path(&self.checker.workspace)?)
            .with_scratch_file(&self.checker.scratch_file)
            .with_command(self.checker.command.iter().cloned())
            .with_timeout(Duration::from_secs(self.checker.timeout_secs))
            .with_normalize_source(self.checker.normalize_source))
    }

    /// Name of the environment variable holding the API key.
    pub fn api_key_env(&self) -> &str {
        self.llm
            .api_key_env
            .as_deref()
            .unwrap_or_else(|| self.llm.provider.default_api_key_env())
    }

    /// Read the API key from the environment.
    pub fn api_key(&self) -> Result<String> {
        let var = self.api_key_env();
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(Error::config(format!(
                "API key not set: export {} or add it to .env",
                var
            ))),
        }
    }

    pub fn client_config(&self) -> Result<ClientConfig> {
        let mut config = ClientConfig::new(self.api_key()?)
            .with_default_model(self.prover.model_name.clone())
            .with_timeout(self.llm.request_timeout_secs);
        if let Some(url) = &self.llm.base_url {
            config = config.with_base_url(url.clone());
        }
        Ok(config)
    }

    /// Build the shared, cost-tracking LLM client.
    pub fn build_client(&self) -> Result<Arc<TrackedClient>> {
        let inner = client_for(self.llm.provider, self.client_config()?)?;
        Ok(Arc::new(TrackedClient::new(inner)))
    }

    /// Build stages around `client`; `slot` selects a per-worker scratch file.
    pub fn build_stages(&self, client: Arc<dyn LLMClient>, slot: Option<usize>) -> Result<Stages> {
        let checker = self.checker_config()?;
        let checker = match slot {
            Some(slot) => checker.for_slot(slot),
            None => checker,
        };
        let verifier = Arc::new(CheckerVerifier::from_config(checker)?);
        Ok(llm_stages(
            client,
            self.planner.clone(),
            self.prover.clone(),
            self.critic.clone(),
            verifier,
        ))
    }
}
