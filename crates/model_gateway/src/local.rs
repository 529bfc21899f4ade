//! Adapter for a local inference server (Ollama-style HTTP API).

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use modelflow_core::{
    traits::{ChunkStream, ProviderAdapter},
    types::{
        GenerationRequest, GenerationResponse, ModelDescriptor, PricingPolicy, ProviderKind,
        StreamChunk, TokenUsage,
    },
    Error, Result,
};

/// Buffered chunks between the HTTP reader task and the consumer.
const STREAM_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GenerateReply {
    #[serde(default)]
    response: String,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

/// Local inference adapter. Models served locally are free and
/// streaming-capable.
pub struct LocalHttpAdapter {
    base_url: String,
    client: reqwest::Client,
}

impl LocalHttpAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn estimate_tokens(text: &str) -> u64 {
        (text.len() / 4) as u64
    }

    /// Context window by model family; local servers don't report this.
    fn max_context_for(name: &str) -> u32 {
        let base = name.split(':').next().unwrap_or(name);
        match base {
            "mistral" | "gemma" => 8192,
            "mixtral" => 32_768,
            "phi" => 2048,
            _ => 4096,
        }
    }

    fn payload(&self, model_id: &str, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        let mut options = serde_json::json!({
            "temperature": request.temperature.unwrap_or(0.7),
            "top_p": request.top_p.unwrap_or(1.0),
            "num_predict": request.max_tokens.unwrap_or(1000),
        });
        if let Some(top_k) = request.top_k {
            options["top_k"] = serde_json::json!(top_k);
        }

        serde_json::json!({
            "model": model_id,
            "prompt": request.prompt,
            "stream": stream,
            "options": options,
        })
    }
}

#[async_trait]
impl ProviderAdapter for LocalHttpAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn initialize(&self) -> Result<()> {
        let url = format!("{}/api/version", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::model_provider(format!("Local server unreachable: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::model_provider(format!(
                "Local server returned status {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::model_provider(format!("Error fetching local models: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::model_provider(format!(
                "Local API returned status {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::model_provider(format!("Bad tags payload: {}", e)))?;

        Ok(tags
            .models
            .into_iter()
            .map(|entry| {
                let max_context = Self::max_context_for(&entry.name);
                ModelDescriptor::new(
                    entry.name.clone(),
                    ProviderKind::Local,
                    entry.name,
                    max_context,
                    PricingPolicy::Free,
                )
                .with_streaming()
            })
            .collect())
    }

    async fn generate(
        &self,
        model_id: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse> {
        let url = format!("{}/api/generate", self.base_url);
        let payload = self.payload(model_id, request, false);

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::model_provider(format!("Local generate failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::model_provider(format!(
                "Local API error {}: {}",
                status, body
            )));
        }

        let reply: GenerateReply = response
            .json()
            .await
            .map_err(|e| Error::model_provider(format!("Bad generate payload: {}", e)))?;

        let input_tokens = reply
            .prompt_eval_count
            .unwrap_or_else(|| Self::estimate_tokens(&request.prompt));
        let output_tokens = reply
            .eval_count
            .unwrap_or_else(|| Self::estimate_tokens(&reply.response));

        Ok(GenerationResponse::from_provider(
            reply.response,
            TokenUsage::new(input_tokens, output_tokens),
        ))
    }

    async fn generate_stream(
        &self,
        model_id: &str,
        request: &GenerationRequest,
    ) -> Result<ChunkStream> {
        let url = format!("{}/api/generate", self.base_url);
        let payload = self.payload(model_id, request, true);

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::model_provider(format!("Local stream failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::model_provider(format!(
                "Local API error {}",
                response.status()
            )));
        }

        let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let prompt_len_estimate = Self::estimate_tokens(&request.prompt);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buffer = String::new();

            'read: while let Some(piece) = body.next().await {
                let bytes = match piece {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx
                            .send(Err(Error::model_provider(format!("Stream read error: {}", e))))
                            .await;
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // The local API streams one JSON object per line.
                while let Some(newline) = buffer.find('\n') {
                    let line: String = buffer.drain(..=newline).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let parsed: StreamLine = match serde_json::from_str(line) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping malformed stream line");
                            continue;
                        }
                    };

                    if parsed.done {
                        let input = parsed.prompt_eval_count.unwrap_or(prompt_len_estimate);
                        let output = parsed.eval_count.unwrap_or(0);
                        // The orchestrator stamps the model id on the final
                        // chunk; only totals matter here.
                        let terminal = StreamChunk {
                            is_final: true,
                            total_tokens: Some(input + output),
                            ..Default::default()
                        };
                        let _ = tx.send(Ok(terminal)).await;
                        break 'read;
                    }

                    let mut chunk = StreamChunk::content(parsed.response);
                    chunk.token_count = Some(1);
                    if tx.send(Ok(chunk)).await.is_err() {
                        // Consumer went away; dropping the body closes the
                        // connection.
                        break 'read;
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn check_health(&self, _model_id: &str) -> Result<bool> {
        let url = format!("{}/api/version", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    async fn configure(
        &self,
        model_id: &str,
        options: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        // A "pull" option asks the local server to fetch the model weights.
        if options.get("pull").is_some() {
            let url = format!("{}/api/pull", self.base_url);
            let response = self
                .client
                .post(&url)
                .json(&serde_json::json!({ "name": model_id }))
                .send()
                .await
                .map_err(|e| Error::model_provider(format!("Pull failed: {}", e)))?;

            return Ok(serde_json::json!({
                "model_id": model_id,
                "status": if response.status().is_success() { "pulled" } else { "pull_failed" },
            }));
        }

        Ok(serde_json::json!({
            "model_id": model_id,
            "status": "accepted",
            "applied": options,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_context_by_family() {
        assert_eq!(LocalHttpAdapter::max_context_for("mistral"), 8192);
        assert_eq!(LocalHttpAdapter::max_context_for("mixtral:8x7b"), 32_768);
        assert_eq!(LocalHttpAdapter::max_context_for("llama2:13b"), 4096);
    }

    #[test]
    fn test_payload_includes_optional_top_k() {
        let adapter = LocalHttpAdapter::new("http://localhost:11434/");
        assert_eq!(adapter.base_url, "http://localhost:11434");

        let mut request = GenerationRequest::new("hi");
        let payload = adapter.payload("mistral", &request, false);
        assert!(payload["options"].get("top_k").is_none());

        request.top_k = Some(40);
        let payload = adapter.payload("mistral", &request, true);
        assert_eq!(payload["options"]["top_k"], 40);
        assert_eq!(payload["stream"], true);
    }
}
