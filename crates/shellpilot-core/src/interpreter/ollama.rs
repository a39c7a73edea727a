//! Blocking HTTP client for an Ollama endpoint.

use super::InterpreterError;
use serde::Deserialize;
use std::time::Duration;

/// Talks to an Ollama server over its REST API.
pub struct OllamaClient {
    agent: ureq::Agent,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaClient {
    /// Create a client for `base_url` (e.g. `http://localhost:11434`)
    /// using `model`, with a single timeout applied to each request.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one non-streaming completion and return the raw generated text.
    pub fn generate(&self, prompt: &str) -> Result<String, InterpreterError> {
        let url = format!("{}/api/generate", self.base_url);
        log::debug!("requesting completion from {} (model {})", url, self.model);

        let response = self
            .agent
            .post(&url)
            .send_json(ureq::json!({
                "model": self.model,
                "prompt": prompt,
                "stream": false,
            }))
            .map_err(map_ureq_error)?;

        let parsed: GenerateResponse = response
            .into_json()
            .map_err(|e| InterpreterError::MalformedResponse(e.to_string()))?;
        Ok(parsed.response)
    }

    /// Check the endpoint is reachable.
    pub fn test_connection(&self) -> Result<(), InterpreterError> {
        let url = format!("{}/api/tags", self.base_url);
        self.agent.get(&url).call().map_err(map_ureq_error)?;
        Ok(())
    }

    /// List model names available on the endpoint.
    pub fn list_models(&self) -> Result<Vec<String>, InterpreterError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.agent.get(&url).call().map_err(map_ureq_error)?;
        let parsed: TagsResponse = response
            .into_json()
            .map_err(|e| InterpreterError::MalformedResponse(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

fn map_ureq_error(err: ureq::Error) -> InterpreterError {
    match err {
        ureq::Error::Status(code, _) => {
            InterpreterError::Unreachable(format!("model endpoint returned HTTP {code}"))
        }
        ureq::Error::Transport(transport) => {
            let message = transport.to_string();
            if message.contains("timed out") || message.contains("timeout") {
                InterpreterError::Timeout(message)
            } else {
                InterpreterError::Unreachable(message)
            }
        }
    }
}
