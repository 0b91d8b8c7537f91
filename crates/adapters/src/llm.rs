use std::time::Duration;

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use prose_core::config::{Config, ProviderConfig};
use prose_core::provider::{
    ProviderAdapter, ProviderCallError, QueryReply, QueryRequest, Role, Usage,
};

use crate::base_url::check_base_url;
use crate::error::AdapterError;

pub fn create_provider_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn ProviderAdapter>, AdapterError> {
    let profile = config.get_provider_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown provider profile `{}`", profile_name))
    })?;
    create_provider_adapter_from_profile(profile)
}

pub fn create_provider_adapter_from_profile(
    profile: &ProviderConfig,
) -> Result<Box<dyn ProviderAdapter>, AdapterError> {
    let fmt = profile.interface_format.trim().to_lowercase();
    let timeout = profile.timeout.max(1);

    match fmt.as_str() {
        "openai" => Ok(Box::new(OpenAiLikeAdapter::new(
            resolve_base_url(&profile.base_url, "https://api.openai.com/v1"),
            optional_string(&profile.api_key),
            profile.model_name.clone(),
            profile.max_tokens,
            profile.temperature,
            timeout,
        )?)),
        "deepseek" => Ok(Box::new(OpenAiLikeAdapter::new(
            resolve_base_url(&profile.base_url, "https://api.deepseek.com/v1"),
            optional_string(&profile.api_key),
            profile.model_name.clone(),
            profile.max_tokens,
            profile.temperature,
            timeout,
        )?)),
        "ollama" => Ok(Box::new(OpenAiLikeAdapter::new(
            resolve_base_url(&profile.base_url, "http://localhost:11434/v1"),
            optional_string(&profile.api_key),
            profile.model_name.clone(),
            profile.max_tokens,
            profile.temperature,
            timeout,
        )?)),
        "lm studio" => Ok(Box::new(OpenAiLikeAdapter::new(
            resolve_base_url(&profile.base_url, "http://localhost:1234/v1"),
            optional_string(&profile.api_key),
            profile.model_name.clone(),
            profile.max_tokens,
            profile.temperature,
            timeout,
        )?)),
        "azure openai" => Ok(Box::new(AzureOpenAiAdapter::new(
            profile.api_key.clone(),
            &profile.base_url,
            profile.max_tokens,
            profile.temperature,
            timeout,
        )?)),
        "gemini" => Ok(Box::new(GeminiAdapter::new(
            profile.api_key.clone(),
            &profile.base_url,
            &profile.model_name,
            profile.max_tokens,
            profile.temperature,
            timeout,
        )?)),
        other => Err(AdapterError::InvalidConfig(format!(
            "unknown interface_format: {}",
            other
        ))),
    }
}

fn optional_string(value: &str) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn resolve_base_url(base_url: &str, default: &str) -> String {
    let raw = if base_url.trim().is_empty() {
        default.to_string()
    } else {
        base_url.to_string()
    };
    check_base_url(&raw)
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
    }
}

struct OpenAiLikeAdapter {
    client: Client,
    url: String,
    api_key: Option<String>,
    model_name: String,
    max_tokens: Option<u32>,
    temperature: f32,
}

impl OpenAiLikeAdapter {
    fn new(
        base_url: String,
        api_key: Option<String>,
        model_name: String,
        max_tokens: u32,
        temperature: f32,
        timeout: u64,
    ) -> Result<Self, AdapterError> {
        if base_url.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }
        if model_name.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "model_name must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model_name,
            max_tokens: if max_tokens == 0 {
                None
            } else {
                Some(max_tokens)
            },
            temperature,
        })
    }
}

impl ProviderAdapter for OpenAiLikeAdapter {
    fn query(&self, request: &QueryRequest) -> Result<QueryReply, ProviderCallError> {
        let messages: Vec<ChatMessageRequest<'_>> = request
            .messages
            .iter()
            .map(|m| ChatMessageRequest {
                role: role_label(m.role),
                content: &m.content,
            })
            .collect();

        let body = ChatCompletionRequest {
            model: Some(self.model_name.as_str()),
            messages,
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
        };

        let mut http_request = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                http_request = http_request.bearer_auth(key);
            }
        }

        let response = http_request
            .json(&body)
            .send()
            .map_err(ProviderCallError::network)?;
        handle_chat_response(response)
    }
}

struct AzureOpenAiAdapter {
    client: Client,
    url: String,
    api_key: String,
    max_tokens: Option<u32>,
    temperature: f32,
}

impl AzureOpenAiAdapter {
    fn new(
        api_key: String,
        base_url: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: u64,
    ) -> Result<Self, AdapterError> {
        if api_key.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "Azure OpenAI api_key must not be empty".to_string(),
            ));
        }

        static AZURE_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(
                r"^https://([^/]+)/openai/deployments/([^/]+)/chat/completions\?api-version=([^/?&]+)"
            )
            .expect("valid azure url regex")
        });

        let base = base_url.trim();
        let captures = AZURE_RE.captures(base).ok_or_else(|| {
            AdapterError::InvalidConfig(
                "Invalid Azure OpenAI base_url format. Expected https://<resource>.openai.azure.com/openai/deployments/<deployment>/chat/completions?api-version=<version>"
                    .to_string(),
            )
        })?;

        let endpoint = format!("https://{}", &captures[1]);
        let deployment = captures[2].to_string();
        let api_version = captures[3].to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self {
            client,
            url: format!(
                "{endpoint}/openai/deployments/{deployment}/chat/completions?api-version={api_version}"
            ),
            api_key,
            max_tokens: if max_tokens == 0 {
                None
            } else {
                Some(max_tokens)
            },
            temperature,
        })
    }
}

impl ProviderAdapter for AzureOpenAiAdapter {
    fn query(&self, request: &QueryRequest) -> Result<QueryReply, ProviderCallError> {
        let messages: Vec<ChatMessageRequest<'_>> = request
            .messages
            .iter()
            .map(|m| ChatMessageRequest {
                role: role_label(m.role),
                content: &m.content,
            })
            .collect();

        let body = ChatCompletionRequest {
            model: None,
            messages,
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            "api-key",
            HeaderValue::from_str(&self.api_key).map_err(|err| {
                ProviderCallError::InvalidConfig(format!("invalid api key header: {}", err))
            })?,
        );

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(&body)
            .send()
            .map_err(ProviderCallError::network)?;
        handle_chat_response(response)
    }
}

struct GeminiAdapter {
    client: Client,
    url: String,
    temperature: f32,
    max_tokens: u32,
}

impl GeminiAdapter {
    fn new(
        api_key: String,
        base_url: &str,
        model_name: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: u64,
    ) -> Result<Self, AdapterError> {
        if api_key.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "Gemini api_key must not be empty".to_string(),
            ));
        }
        if model_name.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "Gemini model_name must not be empty".to_string(),
            ));
        }

        let base = if base_url.trim().is_empty() {
            "https://generativelanguage.googleapis.com/v1beta".to_string()
        } else {
            base_url.trim().trim_end_matches('/').to_string()
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self {
            client,
            url: format!(
                "{base}/models/{model}:generateContent?key={api}",
                model = model_name,
                api = api_key
            ),
            temperature,
            max_tokens,
        })
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn query(&self, request: &QueryRequest) -> Result<QueryReply, ProviderCallError> {
        // Gemini has no system role here; system content is folded into the
        // user turn.
        let mut combined = String::new();
        for message in &request.messages {
            if !combined.is_empty() {
                combined.push_str("\n\n");
            }
            combined.push_str(&message.content);
        }

        let body = GeminiRequest {
            contents: vec![GeminiRequestContent {
                role: "user",
                parts: vec![GeminiRequestPart { text: &combined }],
            }],
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.max_tokens,
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(ProviderCallError::network)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(ProviderCallError::HttpStatus { status, body });
        }

        let parsed: GeminiResponse = response
            .json()
            .map_err(|err| ProviderCallError::Malformed(err.to_string()))?;
        parse_gemini_response(parsed)
    }
}

fn handle_chat_response(
    response: reqwest::blocking::Response,
) -> Result<QueryReply, ProviderCallError> {
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        return Err(ProviderCallError::HttpStatus { status, body });
    }

    let parsed: ChatCompletionResponse = response
        .json()
        .map_err(|err| ProviderCallError::Malformed(err.to_string()))?;

    let usage = parsed
        .usage
        .as_ref()
        .map(UsageBody::to_usage)
        .unwrap_or_default();
    let text = extract_choice_content(parsed).ok_or(ProviderCallError::Empty)?;
    Ok(QueryReply { text, usage })
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<UsageBody>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UsageBody {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

impl UsageBody {
    fn to_usage(&self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            cached_tokens: self
                .prompt_tokens_details
                .as_ref()
                .map(|d| d.cached_tokens)
                .unwrap_or(0),
        }
    }
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    for choice in response.choices {
        if let Some(message) = choice.message {
            if let Some(content) = message.content {
                if !content.trim().is_empty() {
                    return Some(content);
                }
            }
        }
        if let Some(content) = choice.content {
            if !content.trim().is_empty() {
                return Some(content);
            }
        }
    }
    None
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiRequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiRequestContent<'a> {
    role: &'static str,
    parts: Vec<GeminiRequestPart<'a>>,
}

#[derive(Serialize)]
struct GeminiRequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata")]
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text { text: String },
    Other(serde_json::Value),
}

#[derive(Debug, Default, Deserialize)]
struct GeminiUsageMetadata {
    #[serde(rename = "promptTokenCount")]
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount")]
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(rename = "cachedContentTokenCount")]
    #[serde(default)]
    cached_content_token_count: u64,
}

fn parse_gemini_response(response: GeminiResponse) -> Result<QueryReply, ProviderCallError> {
    let usage = response
        .usage_metadata
        .map(|m| Usage {
            prompt_tokens: m.prompt_token_count,
            completion_tokens: m.candidates_token_count,
            cached_tokens: m.cached_content_token_count,
        })
        .unwrap_or_default();

    for candidate in response.candidates {
        if let Some(reason) = candidate.finish_reason.as_deref() {
            match reason {
                "MAX_TOKENS" => warn!("Gemini response truncated due to max_tokens limit"),
                "SAFETY" => warn!("Gemini response blocked by safety filters"),
                "RECITATION" => warn!("Gemini response blocked due to recitation concerns"),
                _ => {}
            }
        }

        if let Some(content) = candidate.content {
            let mut text = String::new();
            for part in content.parts {
                if let GeminiPart::Text { text: part_text } = part {
                    text.push_str(&part_text);
                }
            }
            if !text.trim().is_empty() {
                return Ok(QueryReply { text, usage });
            }
        }
    }

    Err(ProviderCallError::Empty)
}
