use std::{env, fmt, fs, path::Path, str::FromStr};

use anyhow::{Error, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant that provides clear, concise answers.";

/// Models that can be selected for a chat session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum Model {
    #[default]
    #[serde(rename = "claude-3-7-sonnet-20250219")]
    #[value(name = "claude-3-7-sonnet-20250219")]
    Claude37Sonnet,
    #[serde(rename = "claude-3-5-sonnet-20241022")]
    #[value(name = "claude-3-5-sonnet-20241022")]
    Claude35Sonnet,
}

impl Model {
    pub const ALL: [Model; 2] = [Model::Claude37Sonnet, Model::Claude35Sonnet];

    /// Identifier sent to the completion endpoint
    pub fn api_name(&self) -> &'static str {
        match self {
            Model::Claude37Sonnet => "claude-3-7-sonnet-20250219",
            Model::Claude35Sonnet => "claude-3-5-sonnet-20241022",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Model::Claude37Sonnet => "Claude 3.7 Sonnet",
            Model::Claude35Sonnet => "Claude 3.5 Sonnet",
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for Model {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Model::ALL
            .into_iter()
            .find(|m| m.api_name() == s.trim())
            .ok_or(anyhow!("Unknown model: {}", s))
    }
}

/// API key for the completion endpoint. The value never shows up in
/// `Debug` output so it can't leak into logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: &str) -> Self {
        Self(secret.trim().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Credential(****)")
    }
}

/// Everything a single chat session needs, loaded once when the
/// session starts.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub system_prompt: String,
    pub model: Model,
    pub api_key: Credential,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub anthropic_api_hostname: String,
    // Absent until supplied by the environment or the operator
    pub anthropic_api_key: Option<Credential>,
    pub model: Model,
    pub system_prompt_path: String,
    pub system_message: String,
}

impl AppConfig {
    pub fn session_config(&self, api_key: Credential) -> SessionConfig {
        SessionConfig {
            system_prompt: self.system_message.clone(),
            model: self.model,
            api_key,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let anthropic_api_hostname = env::var("WITTLY_ANTHROPIC_API_HOST")
            .unwrap_or_else(|_| "https://api.anthropic.com".to_string());
        let anthropic_api_key = env::var("ANTHROPIC_API_KEY")
            .ok()
            .map(|k| Credential::new(&k))
            .filter(|k| !k.is_empty());
        let model = env::var("WITTLY_MODEL")
            .ok()
            .and_then(|m| {
                m.parse()
                    .inspect_err(|e| tracing::warn!("Ignoring WITTLY_MODEL: {}", e))
                    .ok()
            })
            .unwrap_or_default();
        let system_prompt_path = env::var("WITTLY_SYSTEM_PROMPT_PATH")
            .unwrap_or_else(|_| "./system_prompt.txt".to_string());
        let system_message = load_system_prompt(&system_prompt_path);

        Self {
            anthropic_api_hostname,
            anthropic_api_key,
            model,
            system_prompt_path,
            system_message,
        }
    }
}

/// Reads the system prompt from `path`, falling back to a generic
/// assistant prompt when the file can't be read.
pub fn load_system_prompt(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    match fs::read_to_string(path) {
        Ok(prompt) => prompt.trim().to_string(),
        Err(e) => {
            tracing::debug!(
                "No system prompt at {}, using default: {}",
                path.display(),
                e
            );
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}
