//! The model gateway: one prompt in, one reply out.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::{AgentError, Result};

/// Black-box language model reachable with a single round trip.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Send `prompt` and return the raw reply text.
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn name(&self) -> &str;
}

/// Supported gateway backends. Each arm owns its request shape and reply field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Ollama-style `/api/generate`: `{model, prompt, stream}` in, `{response}` out.
    Ollama { model: String },
    /// llama.cpp / llamafile `/completion`: sampling knobs in, `{content}` out.
    Llamafile,
    /// Google Generative Language `generateContent`.
    Gemini { model: String, api_key: String },
}

impl Backend {
    /// Pick the backend implied by the model identifier.
    pub fn select(model: &str, api_key: Option<&str>) -> Result<Self> {
        let lowered = model.to_ascii_lowercase();
        if lowered.starts_with("gemini") {
            let api_key = api_key
                .filter(|k| !k.is_empty())
                .ok_or_else(|| AgentError::Config(format!("model {model} needs LLM_API_KEY")))?;
            return Ok(Backend::Gemini {
                model: model.to_string(),
                api_key: api_key.to_string(),
            });
        }
        if lowered == "lamafile" || lowered == "llamafile" {
            return Ok(Backend::Llamafile);
        }
        Ok(Backend::Ollama {
            model: model.to_string(),
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Backend::Ollama { .. } => "ollama",
            Backend::Llamafile => "llamafile",
            Backend::Gemini { .. } => "gemini",
        }
    }

    fn request(&self, client: &Client, url: &str, prompt: &str) -> reqwest::RequestBuilder {
        match self {
            Backend::Ollama { model } => client.post(url).json(&json!({
                "model": model,
                "prompt": prompt,
                "stream": false,
            })),
            Backend::Llamafile => client.post(url).json(&json!({
                "prompt": prompt,
                "n_predict": 400,
                "temperature": 0.7,
                "top_k": 40,
                "top_p": 0.95,
                "min_p": 0.05,
                "repeat_last_n": 256,
                "repeat_penalty": 1.18,
                "stop": ["</s>", "Llama:", "User:"],
                "cache_prompt": true,
                "stream": false,
            })),
            Backend::Gemini { model, api_key } => {
                let endpoint = format!(
                    "{}/models/{}:generateContent",
                    url.trim_end_matches('/'),
                    model
                );
                client
                    .post(endpoint)
                    .header("x-goog-api-key", api_key)
                    .json(&json!({
                        "contents": [{"role": "user", "parts": [{"text": prompt}]}],
                        "generationConfig": {"temperature": 0.7},
                    }))
            }
        }
    }

    fn extract(&self, body: &Value) -> Result<String> {
        let text = match self {
            Backend::Ollama { .. } => body["response"].as_str(),
            Backend::Llamafile => body["content"].as_str(),
            Backend::Gemini { .. } => body["candidates"][0]["content"]["parts"][0]["text"].as_str(),
        };
        text.map(String::from).ok_or_else(|| {
            AgentError::InvalidModelReply(format!(
                "{} reply has no text field: {}",
                self.label(),
                truncate(&body.to_string(), 200)
            ))
        })
    }
}

/// HTTP client for the configured backend.
pub struct Brain {
    client: Client,
    url: String,
    backend: Backend,
}

impl Brain {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let backend = Backend::select(&config.model, config.api_key.as_deref())?;
        Ok(Self::with_backend(config.url.clone(), backend))
    }

    pub fn with_backend(url: impl Into<String>, backend: Backend) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            backend,
        }
    }
}

#[async_trait]
impl ModelGateway for Brain {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!(backend = self.backend.label(), chars = prompt.len(), "posting prompt");

        let response = self
            .backend
            .request(&self.client, &self.url, prompt)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            warn!(%status, "gateway returned an error status");
            return Err(AgentError::Network(format!(
                "gateway returned {}: {}",
                status,
                truncate(&text, 200)
            )));
        }

        let body: Value = serde_json::from_str(&text).map_err(|e| {
            AgentError::InvalidModelReply(format!("gateway body is not JSON: {e}"))
        })?;
        self.backend.extract(&body)
    }

    fn name(&self) -> &str {
        self.backend.label()
    }
}

/// Strip the markdown fences models like to wrap JSON in.
pub fn clean_reply(text: &str) -> &str {
    text.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Decode the JSON document nested inside a model reply.
pub fn parse_reply(text: &str) -> Result<Value> {
    let cleaned = clean_reply(text);
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        return Ok(value);
    }

    // Some models add prose around the object; fall back to the outermost braces.
    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => serde_json::from_str(&cleaned[start..=end])
            .map_err(|e| AgentError::InvalidModelReply(format!("{e}: {}", truncate(cleaned, 200)))),
        _ => Err(AgentError::InvalidModelReply(format!(
            "no JSON object in reply: {}",
            truncate(cleaned, 200)
        ))),
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

    #[test]
    fn selects_backend_by_model_name() {
        assert_eq!(
            Backend::select("llama3.2:latest", None).unwrap(),
            Backend::Ollama {
                model: "llama3.2:latest".into()
            }
        );
        assert_eq!(Backend::select("lamafile", None).unwrap(), Backend::Llamafile);
        assert!(matches!(
            Backend::select("gemini-2.5-flash", Some("k")).unwrap(),
            Backend::Gemini { .. }
        ));
    }

    #[test]
    fn gemini_without_key_is_a_config_error() {
        let err = Backend::select("gemini-2.5-flash", None).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn parse_reply_strips_fences() {
        let value = parse_reply("```json\n{\"goal\": \"x\"}\n```").unwrap();
        assert_eq!(value["goal"], "x");
    }

    #[test]
    fn parse_reply_finds_object_inside_prose() {
        let value = parse_reply("Sure! Here it is: {\"a\": 1} hope that helps").unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parse_reply_rejects_plain_text() {
        let err = parse_reply("Hello").unwrap_err();
        assert!(matches!(err, AgentError::InvalidModelReply(_)));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 5), "hi");
    }

    #[tokio::test]
    async fn ollama_round_trip() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/api/generate"))
            .and(matchers::body_partial_json(json!({
                "model": "llama3.2:latest",
                "prompt": "plan this",
                "stream": false,
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"response": "{\"goal\":\"g\"}"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let brain = Brain::with_backend(
            format!("{}/api/generate", server.uri()),
            Backend::Ollama {
                model: "llama3.2:latest".into(),
            },
        );
        let reply = brain.generate("plan this").await.unwrap();
        assert_eq!(reply, "{\"goal\":\"g\"}");
    }

    #[tokio::test]
    async fn gemini_reads_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/models/gemini-2.5-flash:generateContent"))
            .and(matchers::header("x-goog-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "{\"ok\": true}"}]}}]
            })))
            .mount(&server)
            .await;

        let brain = Brain::with_backend(
            server.uri(),
            Backend::Gemini {
                model: "gemini-2.5-flash".into(),
                api_key: "secret".into(),
            },
        );
        assert_eq!(brain.generate("hi").await.unwrap(), "{\"ok\": true}");
    }

    #[tokio::test]
    async fn llamafile_sends_completion_payload() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/completion"))
            .and(matchers::body_partial_json(json!({
                "prompt": "hi",
                "n_predict": 400,
                "cache_prompt": true,
                "stream": false,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": "{}"})))
            .expect(1)
            .mount(&server)
            .await;

        let brain = Brain::with_backend(format!("{}/completion", server.uri()), Backend::Llamafile);
        assert_eq!(brain.generate("hi").await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn error_status_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let brain = Brain::with_backend(server.uri(), Backend::Llamafile);
        let err = brain.generate("hi").await.unwrap_err();
        match err {
            AgentError::Network(msg) => assert!(msg.contains("503")),
            other => panic!("expected Network, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_reply_field_is_invalid_reply() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"done": true})))
            .mount(&server)
            .await;

        let brain = Brain::with_backend(
            server.uri(),
            Backend::Ollama {
                model: "m".into(),
            },
        );
        assert!(matches!(
            brain.generate("hi").await,
            Err(AgentError::InvalidModelReply(_))
        ));
    }
}
