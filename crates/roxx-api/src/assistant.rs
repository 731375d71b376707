//! Chat assistant. A text message starting with `/ai` is forwarded to a
//! completion endpoint and the answer is posted back as a message from
//! [`ASSISTANT_UID`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use roxx_types::models::ASSISTANT_UID;

use crate::auth::AppState;
use crate::db::run_db;
use crate::messages::publish_posted;

const COMMAND: &str = "/ai";

const SYSTEM_PROMPT: &str = "You are a helpful and witty chat assistant. Keep responses brief and \
     conversational, suitable for a mobile chat app. If asked about facts, use common knowledge \
     or admit if unsure.";

/// Posted when the endpoint cannot be reached, so a prompt never goes unanswered.
pub const FALLBACK_REPLY: &str = "Sorry, I'm having a bit of trouble connecting right now.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("assistant request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("assistant endpoint returned {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait Assistant: Send + Sync {
    async fn reply(&self, prompt: &str) -> Result<String, AssistantError>;
}

pub type SharedAssistant = Arc<dyn Assistant>;

/// The prompt carried by an assistant command, or `None` for ordinary text.
pub fn prompt_of(text: &str) -> Option<&str> {
    let head = text.get(..COMMAND.len())?;
    if !head.eq_ignore_ascii_case(COMMAND) {
        return None;
    }
    Some(text[COMMAND.len()..].trim())
}

/// JSON completion endpoint: `POST {url}` with `{"system", "prompt"}`,
/// answered by `{"text"}`. The key, when set, goes in a bearer header.
pub struct HttpAssistant {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    system: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    text: String,
}

impl HttpAssistant {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl Assistant for HttpAssistant {
    async fn reply(&self, prompt: &str) -> Result<String, AssistantError> {
        let mut request = self.client.post(&self.url).json(&CompletionRequest {
            system: SYSTEM_PROMPT,
            prompt,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AssistantError::Status(response.status()));
        }
        let body: CompletionResponse = response.json().await?;
        Ok(body.text)
    }
}

/// Ask the assistant on behalf of `asker` and publish the stored answer.
/// Does nothing when no assistant is configured.
pub async fn answer(state: AppState, asker: String, chat_id: String, prompt: String) {
    let Some(assistant) = state.assistant.clone() else {
        return;
    };

    let text = match assistant.reply(&prompt).await {
        Ok(text) => text,
        Err(e) => {
            warn!(asker = %asker, "Assistant unavailable: {}", e);
            FALLBACK_REPLY.to_string()
        }
    };

    let stored = run_db(&state, move |db| {
        db.post_assistant_reply(&asker, &chat_id, &text, Utc::now())
    })
    .await;
    match stored {
        Ok(posted) => {
            debug!(chat_id = %posted.chat.id, sender = ASSISTANT_UID, "Assistant replied");
            publish_posted(&state, &posted).await;
        }
        Err(e) => warn!("Assistant reply dropped: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use roxx_db::{Database, Limits};
    use roxx_gateway::Dispatcher;
    use roxx_types::api::SendMessageRequest;
    use roxx_types::models::{MessageKind, MessageStatus, private_chat_id};

    use super::*;
    use crate::auth::AppStateInner;

    /// Answers every prompt with a fixed text, or fails.
    struct Canned(Option<&'static str>);

    #[async_trait]
    impl Assistant for Canned {
        async fn reply(&self, prompt: &str) -> Result<String, AssistantError> {
            match self.0 {
                Some(text) => Ok(format!("{text}: {prompt}")),
                None => Err(AssistantError::Status(reqwest::StatusCode::SERVICE_UNAVAILABLE)),
            }
        }
    }

    fn state(assistant: Option<SharedAssistant>) -> AppState {
        Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory(Limits::default()).unwrap()),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(),
            assistant,
        })
    }

    fn pair(state: &AppState) -> (String, String, String) {
        let a = state.db.register("ana@example.com", "password123", Some("ana"), Utc::now()).unwrap();
        let b = state.db.register("bea@example.com", "password123", Some("bea"), Utc::now()).unwrap();
        let posted = state
            .db
            .send(
                &a.uid,
                &SendMessageRequest {
                    recipient_id: b.uid.clone(),
                    text: "/ai what's up".into(),
                    kind: MessageKind::Text,
                    file_url: None,
                    file_name: None,
                    reply_to: None,
                },
                Utc::now(),
            )
            .unwrap();
        (a.uid, b.uid, posted.chat.id)
    }

    #[test]
    fn only_commands_carry_a_prompt() {
        assert_eq!(prompt_of("/ai  tell me a joke "), Some("tell me a joke"));
        assert_eq!(prompt_of("/AI hi"), Some("hi"));
        assert_eq!(prompt_of("/ai"), Some(""));
        assert_eq!(prompt_of("hello /ai"), None);
        assert_eq!(prompt_of("/a"), None);
        assert_eq!(prompt_of("ñ"), None);
    }

    #[tokio::test]
    async fn answer_lands_in_the_askers_assistant_thread() {
        let state = state(Some(Arc::new(Canned(Some("sure")))));
        let (a, b, chat_id) = pair(&state);

        answer(state.clone(), a.clone(), chat_id.clone(), "what's up".into()).await;

        let thread = private_chat_id(ASSISTANT_UID, &a);
        let messages = state.db.list_messages(&thread, &a).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_id, ASSISTANT_UID);
        assert_eq!(messages[0].text, "sure: what's up");
        assert_eq!(messages[0].status, MessageStatus::Seen);
        assert_eq!(state.db.list_messages(&chat_id, &b).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_assistant_still_answers() {
        let state = state(Some(Arc::new(Canned(None))));
        let (a, _, chat_id) = pair(&state);

        answer(state.clone(), a.clone(), chat_id, "anyone?".into()).await;

        let thread = private_chat_id(ASSISTANT_UID, &a);
        let messages = state.db.list_messages(&thread, &a).unwrap();
        assert_eq!(messages[0].text, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn no_assistant_means_no_reply() {
        let state = state(None);
        let (a, _, chat_id) = pair(&state);

        answer(state.clone(), a.clone(), chat_id, "hello".into()).await;

        let thread = private_chat_id(ASSISTANT_UID, &a);
        assert!(state.db.list_messages(&thread, &a).unwrap().is_empty());
    }
}
