//! Analysis: turn the persisted OCR JSON into a template-shaped JSON document.
//!
//! Both inputs are read from disk, so this stage can run long after the OCR
//! stage, in a separate process. Their presence is checked before any request
//! is built: a missing file costs no tokens.
//!
//! ## Message Layout
//!
//! 1. **System message** — [`ANALYSIS_SYSTEM_PROMPT`]
//! 2. **User message** — OCR JSON and template JSON embedded verbatim
//!
//! The template is advisory. Nothing here validates the reply against it.

use crate::config::{AnalysisConfig, ChatBackend};
use crate::error::OcrPipelineError;
use crate::output::{AnalysisOutput, TokenUsage};
use crate::pipeline::postprocess::clean_reply;
use crate::prompts::{build_analysis_prompt, ANALYSIS_SYSTEM_PROMPT};
use crate::transport::error_body;
use edgequake_llm::{ChatMessage, CompletionOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Analysis result file name.
pub const ANALYSIS_OUTPUT_FILE: &str = "openai_analysis_output.json";

/// Raw text and usage counters of one chat reply.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
    pub usage: Option<TokenUsage>,
}

/// Run the analysis stage and write `openai_analysis_output.json` into `output_dir`.
pub async fn analyze(
    http: &reqwest::Client,
    ocr_json_path: impl AsRef<Path>,
    config: &AnalysisConfig,
    output_dir: impl AsRef<Path>,
) -> Result<AnalysisOutput, OcrPipelineError> {
    let ocr_json_path = ocr_json_path.as_ref();
    let template_path = config.template_path.as_path();

    ensure_exists(ocr_json_path).await?;
    ensure_exists(template_path).await?;

    let ocr_json = read_to_string(ocr_json_path).await?;
    let template_json = read_to_string(template_path).await?;
    let prompt = build_analysis_prompt(&ocr_json, &template_json);
    debug!(
        "Analysis prompt: {} chars (OCR {} / template {})",
        prompt.len(),
        ocr_json.len(),
        template_json.len()
    );

    let start = Instant::now();
    info!("Requesting analysis from model {}", config.model);
    let reply = chat(http, config, &prompt).await?;
    info!("Analysis reply received in {:?}", start.elapsed());
    if let Some(u) = reply.usage {
        info!(
            "Token usage: {} input / {} output / {} total",
            u.input_tokens, u.output_tokens, u.total_tokens
        );
    }

    let text = if config.strip_code_fences {
        clean_reply(&reply.content)
    } else {
        reply.content.clone()
    };

    let (result, is_valid_json, file_body) = match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(v) => {
            let pretty = serde_json::to_string_pretty(&v)
                .map_err(|e| OcrPipelineError::Internal(format!("serialise analysis: {e}")))?;
            (v, true, pretty)
        }
        Err(e) => {
            warn!("Analysis reply is not valid JSON ({}); saving it verbatim", e);
            (serde_json::Value::String(text.clone()), false, text)
        }
    };

    let dir = output_dir.as_ref();
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| OcrPipelineError::OutputWriteFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
    let output_path = dir.join(ANALYSIS_OUTPUT_FILE);
    tokio::fs::write(&output_path, file_body)
        .await
        .map_err(|e| OcrPipelineError::OutputWriteFailed {
            path: output_path.clone(),
            source: e,
        })?;
    info!("Analysis saved to: {}", output_path.display());

    Ok(AnalysisOutput {
        output_path,
        result,
        is_valid_json,
        usage: reply.usage,
    })
}

async fn ensure_exists(path: &Path) -> Result<(), OcrPipelineError> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        _ => Err(OcrPipelineError::MissingInput {
            path: path.to_path_buf(),
        }),
    }
}

async fn read_to_string(path: &Path) -> Result<String, OcrPipelineError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| OcrPipelineError::ReadFailed {
            path: PathBuf::from(path),
            source: e,
        })
}

/// Send the two-message conversation to the configured backend.
pub async fn chat(
    http: &reqwest::Client,
    config: &AnalysisConfig,
    prompt: &str,
) -> Result<ChatReply, OcrPipelineError> {
    match config.backend {
        ChatBackend::Compatible {
            ref base_url,
            ref api_key,
        } => chat_compatible(http, base_url, api_key.as_deref(), config, prompt).await,
        ChatBackend::Provider(ref provider) => {
            let messages = vec![
                ChatMessage::system(ANALYSIS_SYSTEM_PROMPT),
                ChatMessage::user(prompt),
            ];
            let options = CompletionOptions {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                ..Default::default()
            };
            let response = provider
                .chat(&messages, Some(&options))
                .await
                .map_err(|e| OcrPipelineError::Transport {
                    service: "Chat",
                    detail: e.to_string(),
                })?;
            if response.content.trim().is_empty() {
                return Err(OcrPipelineError::InvalidResponse {
                    service: "Chat",
                    detail: "reply has no text content".into(),
                });
            }
            let input = response.prompt_tokens as u64;
            let output = response.completion_tokens as u64;
            Ok(ChatReply {
                content: response.content,
                usage: Some(TokenUsage {
                    input_tokens: input,
                    output_tokens: output,
                    total_tokens: input + output,
                }),
            })
        }
    }
}

// ── OpenAI-compatible wire format ───────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [WireMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Partial view of a chat reply. Accepts the chat-completions shape
/// (`choices[0].message.content`), the content-block shape (`content[0].text`)
/// and the responses shape (`output[0].content[0].text` / `output_text`).
#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Default, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Default, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default, alias = "input_tokens")]
    prompt_tokens: Option<u64>,
    #[serde(default, alias = "output_tokens")]
    completion_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl ChatResponse {
    fn text(&self) -> Option<&str> {
        let from_choices = self
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_ref())
            .and_then(|c| c.as_str());
        let from_blocks = self.content.first().and_then(|b| b.text.as_deref());
        let from_output = self
            .output
            .iter()
            .flat_map(|o| o.content.iter())
            .find_map(|b| b.text.as_deref());
        from_choices
            .or(from_blocks)
            .or(from_output)
            .or(self.output_text.as_deref())
            .filter(|t| !t.trim().is_empty())
    }

    fn usage(&self) -> Option<TokenUsage> {
        let u = self.usage.as_ref()?;
        if u.prompt_tokens.is_none() && u.completion_tokens.is_none() && u.total_tokens.is_none() {
            return None;
        }
        let input = u.prompt_tokens.unwrap_or(0);
        let output = u.completion_tokens.unwrap_or(0);
        Some(TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: u.total_tokens.unwrap_or(input + output),
        })
    }
}

async fn chat_compatible(
    http: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
    config: &AnalysisConfig,
    prompt: &str,
) -> Result<ChatReply, OcrPipelineError> {
    let body = ChatRequest {
        model: &config.model,
        messages: [
            WireMessage {
                role: "system",
                content: ANALYSIS_SYSTEM_PROMPT,
            },
            WireMessage {
                role: "user",
                content: prompt,
            },
        ],
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    };

    let mut request = http
        .post(format!("{}/chat/completions", base_url.trim_end_matches('/')))
        .json(&body);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let response = request
        .send()
        .await
        .map_err(|e| OcrPipelineError::Transport {
            service: "Chat",
            detail: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = error_body(response).await;
        return Err(OcrPipelineError::Api {
            service: "Chat",
            status: status.as_u16(),
            body,
        });
    }

    let parsed: ChatResponse = response
        .json()
        .await
        .map_err(|e| OcrPipelineError::InvalidResponse {
            service: "Chat",
            detail: format!("unreadable reply: {e}"),
        })?;

    let content = parsed
        .text()
        .ok_or_else(|| OcrPipelineError::InvalidResponse {
            service: "Chat",
            detail: "reply has no text content".into(),
        })?
        .to_string();

    Ok(ChatReply {
        content,
        usage: parsed.usage(),
    })
}
