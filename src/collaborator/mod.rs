//! Contract with the external script generator/repairer, and its LLM-backed
//! implementation.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    cache::RequestCache,
    config::Config,
    controller::classify::ErrorKind,
    llm::{ChatMessage, ChatOptions, LlmClient, Role},
    role::{default_role_text, DefaultRole},
    utils::strip_code_fences,
};

/// Everything the repairer sees about a failed attempt. Output is passed in
/// full; display limits never apply here.
#[derive(Debug, Clone, Serialize)]
pub struct RepairRequest<'a> {
    pub source: &'a str,
    pub error_kind: &'a ErrorKind,
    pub stderr: &'a str,
    pub stdout: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepairResponse {
    /// Local fix of the failing script.
    Simple {
        #[serde(default)]
        filename: Option<String>,
        source: String,
    },
    /// Rewrite of the script.
    Major {
        #[serde(default)]
        filename: Option<String>,
        source: String,
    },
    Refusal {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl RepairResponse {
    pub fn replacement(&self) -> Option<&str> {
        match self {
            Self::Simple { source, .. } | Self::Major { source, .. } => Some(source),
            Self::Refusal { .. } => None,
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            Self::Simple { filename, .. } | Self::Major { filename, .. } => filename.as_deref(),
            Self::Refusal { .. } => None,
        }
    }
}

/// Script generator and repairer. Implementations must not retry internally;
/// the controller's attempt budget is the only retry loop.
#[allow(async_fn_in_trait)]
pub trait ScriptCollaborator {
    async fn generate(&self, prompt: &str, schema_summary: &str) -> Result<String>;

    async fn repair(&self, request: &RepairRequest<'_>) -> Result<RepairResponse>;
}

pub struct LlmCollaborator {
    client: LlmClient,
    cache: Option<RequestCache>,
    generate_role: String,
    repair_role: String,
    options: ChatOptions,
}

impl LlmCollaborator {
    pub fn from_config(cfg: &Config, model: &str, caching: bool) -> Result<Self> {
        Ok(Self {
            client: LlmClient::from_config(cfg)?,
            cache: caching.then(|| RequestCache::from_config(cfg)),
            generate_role: default_role_text(cfg, DefaultRole::Generate),
            repair_role: default_role_text(cfg, DefaultRole::Repair),
            options: ChatOptions::from_config(cfg, model),
        })
    }
}

impl ScriptCollaborator for LlmCollaborator {
    async fn generate(&self, prompt: &str, schema_summary: &str) -> Result<String> {
        let key = self.cache.as_ref().map(|c| {
            c.key_for(self.client.base_url(), &self.options.model, prompt, schema_summary)
        });
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(source) = cache.get(key) {
                return Ok(source);
            }
        }

        let messages = vec![
            ChatMessage::new(Role::System, self.generate_role.clone()),
            ChatMessage::new(
                Role::User,
                format!("Dataset schema:\n{schema_summary}\n\nRequest: {prompt}"),
            ),
        ];
        let text = self
            .client
            .complete(messages, self.options.clone())
            .await
            .context("script generation failed")?;
        let source = strip_code_fences(&text);
        if source.trim().is_empty() {
            return Err(anyhow!("script generator returned an empty script"));
        }

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Err(err) = cache.set(key, &source) {
                warn!(%err, "failed to cache generated script");
            }
        }
        Ok(source)
    }

    async fn repair(&self, request: &RepairRequest<'_>) -> Result<RepairResponse> {
        let payload = serde_json::to_string_pretty(request)?;
        let messages = vec![
            ChatMessage::new(Role::System, self.repair_role.clone()),
            ChatMessage::new(Role::User, payload),
        ];
        let mut options = self.options.clone();
        options.json_response = true;
        let text = self
            .client
            .complete(messages, options)
            .await
            .context("script repair request failed")?;
        debug!(bytes = text.len(), "repair response received");
        parse_repair_response(&text)
    }
}

/// Decodes the repairer's JSON reply. Anything that is not a well-formed
/// response object is an error, never a guess.
pub fn parse_repair_response(text: &str) -> Result<RepairResponse> {
    let body = strip_code_fences(text);
    let response: RepairResponse = serde_json::from_str(body.trim())
        .with_context(|| format!("repair response is not a valid response object: {}", body.trim()))?;
    if let Some(source) = response.replacement() {
        if source.trim().is_empty() {
            return Err(anyhow!("repair response carried an empty script"));
        }
    }
    Ok(response)
}
