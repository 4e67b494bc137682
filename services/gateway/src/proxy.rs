use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::supervisor::Supervisor;

pub const NOT_READY_REPLY: &str = "Model is not ready yet.";
pub const INVALID_INPUT_REPLY: &str = "Please enter a valid message.";
pub const EMPTY_REPLY: &str = "No response generated.";

const COMPLETION_TIMEOUT: Duration = Duration::from_secs(90);
const N_PREDICT: u32 = 512;
const TEMPERATURE: f64 = 0.4;
const TOP_P: f64 = 0.85;
const REPEAT_PENALTY: f64 = 1.2;

const SYSTEM_PROMPT: &str = "\
You are OFinanceGPT, a professional financial assistant.

Answer questions about finance, banking, payments, savings,
investing, and money management.

Rules:
- Be accurate and factual.
- Correct wrong statements politely.
- Keep answers clear and simple.
- Use bullet points when helpful.
- If unsure, say you are unsure.

Tone:
- Professional and neutral.";

#[derive(Debug, PartialEq)]
pub enum ChatOutcome {
    Reply(String),
    InvalidInput,
    NotReady,
}

/// Forwards chat messages to the model server's completion endpoint.
/// Stateless across invocations; readiness is consulted before every call.
pub struct ChatProxy {
    client: reqwest::Client,
    completion_url: String,
}

impl ChatProxy {
    pub fn new(completion_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            completion_url,
        }
    }

    /// Wrap the user message in the LLaMA-3 chat template. The explicit role
    /// markers are what makes the model honor the system instruction.
    fn build_prompt(message: &str) -> String {
        format!(
            "<|begin_of_text|>\n\
             <|start_header_id|>system<|end_header_id|>\n\
             {SYSTEM_PROMPT}\n\
             <|eot_id|>\n\
             <|start_header_id|>user<|end_header_id|>\n\
             {message}\n\
             <|eot_id|>\n\
             <|start_header_id|>assistant<|end_header_id|>\n"
        )
    }

    pub async fn respond(&self, supervisor: &Supervisor, message: &str) -> ChatOutcome {
        let message = message.trim();
        if message.is_empty() {
            return ChatOutcome::InvalidInput;
        }

        // Best-effort gate: a replace can begin after this check, in which
        // case the downstream call fails and surfaces as an error reply.
        if !supervisor.is_ready() {
            return ChatOutcome::NotReady;
        }

        match self.complete(message).await {
            Ok(content) => {
                let reply = content.trim();
                if reply.is_empty() {
                    ChatOutcome::Reply(EMPTY_REPLY.to_string())
                } else {
                    ChatOutcome::Reply(reply.to_string())
                }
            }
            Err(e) => {
                warn!("completion call failed: {e:#}");
                ChatOutcome::Reply(format!("Model error: {e}"))
            }
        }
    }

    async fn complete(&self, message: &str) -> anyhow::Result<String> {
        let body = json!({
            "prompt": Self::build_prompt(message),
            "n_predict": N_PREDICT,
            "temperature": TEMPERATURE,
            "top_p": TOP_P,
            "repeat_penalty": REPEAT_PENALTY,
            "stream": false,
        });

        let resp = self
            .client
            .post(&self.completion_url)
            .json(&body)
            .timeout(COMPLETION_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let json: serde_json::Value = resp.json().await?;

        Ok(json["content"].as_str().unwrap_or("").to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::routing::post;
    use axum::{Json, Router};

    fn test_supervisor() -> Arc<Supervisor> {
        Arc::new(Supervisor::new(
            PathBuf::from("/nonexistent/launcher.sh"),
            std::env::temp_dir().join("gateway-proxy-test-logs"),
            "http://127.0.0.1:9/health".to_string(),
        ))
    }

    fn ready_supervisor() -> Arc<Supervisor> {
        let sup = test_supervisor();
        let gen = sup.bump_generation();
        assert!(sup.mark_ready(gen));
        sup
    }

    async fn spawn_completion_stub(content: &'static str) -> String {
        let app = Router::new().route(
            "/completion",
            post(move || async move { Json(json!({ "content": content })) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/completion")
    }

    #[tokio::test]
    async fn empty_and_whitespace_messages_are_invalid() {
        // Unroutable endpoint: any outbound call would error, not hang.
        let proxy = ChatProxy::new("http://127.0.0.1:9/completion".to_string());
        let sup = ready_supervisor();

        assert_eq!(proxy.respond(&sup, "").await, ChatOutcome::InvalidInput);
        assert_eq!(proxy.respond(&sup, "   ").await, ChatOutcome::InvalidInput);
    }

    #[tokio::test]
    async fn not_ready_short_circuits_without_network_call() {
        let proxy = ChatProxy::new("http://127.0.0.1:9/completion".to_string());
        let sup = test_supervisor();

        assert_eq!(proxy.respond(&sup, "What is APR?").await, ChatOutcome::NotReady);
    }

    #[tokio::test]
    async fn forwards_and_trims_model_reply() {
        let url = spawn_completion_stub("  APR is the annual percentage rate.  ").await;
        let proxy = ChatProxy::new(url);
        let sup = ready_supervisor();

        assert_eq!(
            proxy.respond(&sup, "What is APR?").await,
            ChatOutcome::Reply("APR is the annual percentage rate.".to_string())
        );
    }

    #[tokio::test]
    async fn empty_model_content_gets_fallback_reply() {
        let url = spawn_completion_stub("   ").await;
        let proxy = ChatProxy::new(url);
        let sup = ready_supervisor();

        assert_eq!(
            proxy.respond(&sup, "hello").await,
            ChatOutcome::Reply(EMPTY_REPLY.to_string())
        );
    }

    #[tokio::test]
    async fn transport_failure_becomes_error_reply() {
        let proxy = ChatProxy::new("http://127.0.0.1:9/completion".to_string());
        let sup = ready_supervisor();

        match proxy.respond(&sup, "hello").await {
            ChatOutcome::Reply(text) => assert!(text.starts_with("Model error:")),
            other => panic!("expected error reply, got {other:?}"),
        }
    }

    #[test]
    fn prompt_embeds_system_and_user_sections() {
        let prompt = ChatProxy::build_prompt("What is APR?");
        assert!(prompt.starts_with("<|begin_of_text|>"));
        assert!(prompt.contains("OFinanceGPT"));
        assert!(prompt.contains("What is APR?"));
        assert!(prompt.trim_end().ends_with("<|start_header_id|>assistant<|end_header_id|>"));
    }
}
