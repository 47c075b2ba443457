//! Language-model analysis of a message window.
//!
//! [`Analyzer::analyze`] builds the prompt, makes exactly one provider call and
//! turns the reply into an [`AnalysisResult`]. Provider failures surface as
//! [`Error::Provider`](crate::Error::Provider); a reply that is not valid JSON
//! never fails and degrades to a single placeholder topic instead.

pub mod client;
pub mod prompt;

pub use client::{
    ChatClient, ChatCompletion, ChatRequest, FailureKind, HttpChatClient, ProviderFailure,
};

use sha2::{Digest, Sha256};

use crate::config::ResolvedLlm;
use crate::types::{AnalysisResult, CanonicalMessage, TokenUsage, Topic};
use crate::window::TimeWindow;
use crate::Result;

/// Title of the placeholder topic produced for unparseable replies.
pub const UNPARSED_TITLE: &str = "Unparsed response";

/// Raw reply text kept in the placeholder topic, in characters.
const MAX_UNPARSED_CHARS: usize = 2000;

/// Sampling parameters for the analysis request.
///
/// Defaults: temperature 0.3, 4000 max tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AnalyzerOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 4000,
        }
    }
}

impl From<&ResolvedLlm> for AnalyzerOptions {
    fn from(llm: &ResolvedLlm) -> Self {
        Self {
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
        }
    }
}

/// How the reply was turned into a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseRecovery {
    /// The whole reply was valid JSON
    Direct,
    /// JSON was found between the first `{` and the last `}`
    BraceSlice,
    /// No JSON could be recovered; the result holds one placeholder topic
    Degraded,
}

/// Outcome of a successful provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub result: AnalysisResult,
    pub usage: Option<TokenUsage>,
    pub model: String,
    /// SHA-256 of the user prompt, hex encoded
    pub prompt_hash: String,
    pub recovered: ResponseRecovery,
}

/// Runs analyses against a [`ChatClient`].
pub struct Analyzer<'a> {
    client: &'a dyn ChatClient,
    options: AnalyzerOptions,
}

impl<'a> Analyzer<'a> {
    pub fn new(client: &'a dyn ChatClient, options: AnalyzerOptions) -> Self {
        Self { client, options }
    }

    /// Analyze `messages` from `window` with a single provider call. No retry.
    pub fn analyze(&self, messages: &[CanonicalMessage], window: &TimeWindow) -> Result<Analysis> {
        let user = prompt::build(messages, window);
        let prompt_hash = hash_prompt(&user);
        let request = ChatRequest {
            system: prompt::SYSTEM_PROMPT.to_string(),
            user,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };

        tracing::info!(
            provider = self.client.provider_name(),
            messages = messages.len().min(prompt::MAX_PROMPT_MESSAGES),
            prompt_hash = %prompt_hash,
            "Requesting analysis"
        );
        let completion = self.client.complete(&request)?;

        let (result, recovered) = parse_response(&completion.content);
        if recovered == ResponseRecovery::Degraded {
            tracing::warn!(
                provider = self.client.provider_name(),
                chars = completion.content.chars().count(),
                "Model reply was not valid JSON, using placeholder topic"
            );
        }
        tracing::info!(
            model = %completion.model,
            topics = result.topics.len(),
            recovered = ?recovered,
            total_tokens = completion.usage.map(|u| u.total_tokens).unwrap_or(0),
            "Analysis complete"
        );

        Ok(Analysis {
            result,
            usage: completion.usage,
            model: completion.model,
            prompt_hash,
            recovered,
        })
    }
}

/// Recover an [`AnalysisResult`] from model text. Never fails.
///
/// Tries the whole text, then the slice between the first `{` and the last
/// `}`, then falls back to one [`UNPARSED_TITLE`] topic carrying the raw text.
pub fn parse_response(raw: &str) -> (AnalysisResult, ResponseRecovery) {
    if let Ok(result) = serde_json::from_str::<AnalysisResult>(raw.trim()) {
        return (result, ResponseRecovery::Direct);
    }

    if let Some(slice) = extract_json_object(raw) {
        if let Ok(result) = serde_json::from_str::<AnalysisResult>(slice) {
            return (result, ResponseRecovery::BraceSlice);
        }
    }

    (degraded(raw), ResponseRecovery::Degraded)
}

fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn degraded(raw: &str) -> AnalysisResult {
    let discussion = if raw.chars().count() > MAX_UNPARSED_CHARS {
        let mut truncated: String = raw.chars().take(MAX_UNPARSED_CHARS).collect();
        truncated.push('…');
        truncated
    } else {
        raw.to_string()
    };
    AnalysisResult {
        topics: vec![Topic {
            title: UNPARSED_TITLE.to_string(),
            discussion,
            conclusion: String::new(),
            instruments: Some(vec![]),
        }],
    }
}

fn hash_prompt(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hex::encode(hasher.finalize())
}
