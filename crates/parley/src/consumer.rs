//! Client side of the chat relay.
//!
//! A [`Consumer`] owns one conversation, submits it to the relay and folds the streamed reply
//! into the trailing assistant message. Every change is republished on a watch channel so a
//! UI can redraw from [`Consumer::subscribe`].
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::watch;
use url::Url;

use crate::models::conversation::Conversation;
use crate::models::message::Message;
use crate::stream::{FrameDecoder, StreamFrame};

const SEND_FAILED: &str = "Failed to send message";

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("{0}")]
    Stream(String),
}

/// Everything a view needs to render the chat
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub conversation: Conversation,
    pub loading: bool,
    pub error: Option<String>,
}

/// How a call to [`Consumer::submit`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Blank input, or another request was still in flight. Nothing was sent.
    Ignored,
    /// The relay finished the reply
    Completed,
    /// The body ended without a finish frame
    Truncated,
    /// The request or the stream failed; the message is also in [`ChatState::error`]
    Failed(String),
}

pub struct Consumer {
    client: Client,
    endpoint: Url,
    access_token: Option<String>,
    in_flight: AtomicBool,
    state: watch::Sender<ChatState>,
}

impl Consumer {
    pub fn new(endpoint: Url, access_token: Option<String>) -> Self {
        Self::with_history(endpoint, access_token, Vec::new())
    }

    /// Start from an existing transcript
    pub fn with_history(
        endpoint: Url,
        access_token: Option<String>,
        history: Vec<Message>,
    ) -> Self {
        let (state, _) = watch::channel(ChatState {
            conversation: Conversation::from(history),
            ..ChatState::default()
        });
        Self {
            client: Client::new(),
            endpoint,
            access_token,
            in_flight: AtomicBool::new(false),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn dismiss_error(&self) {
        self.state.send_if_modified(|state| state.error.take().is_some());
    }

    /// The tail of the conversation a transcript view should show
    pub fn visible_messages(&self) -> Vec<Message> {
        self.state.borrow().conversation.visible().to_vec()
    }

    /// Send `text` as the next user message and stream the reply into the conversation
    pub async fn submit(&self, text: &str) -> Submission {
        if text.trim().is_empty() {
            return Submission::Ignored;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Ignoring submit while a request is in flight");
            return Submission::Ignored;
        }
        let _in_flight = InFlight { consumer: self };

        let mut history = Vec::new();
        self.state.send_modify(|state| {
            state.conversation.push(Message::user(text));
            history = state.conversation.messages().to_vec();
            state.conversation.push(Message::assistant());
            state.loading = true;
            state.error = None;
        });

        let outcome = match self.exchange(history).await {
            Ok(true) => Submission::Completed,
            Ok(false) => {
                tracing::debug!("Reply ended without a finish frame");
                Submission::Truncated
            }
            Err(e) => {
                tracing::warn!("Chat request failed: {}", e);
                Submission::Failed(e.to_string())
            }
        };

        self.state.send_modify(|state| {
            state.loading = false;
            if let Submission::Failed(message) = &outcome {
                state.error = Some(message.clone());
            }
        });
        outcome
    }

    /// Post the history and fold the reply in. Returns whether a finish frame arrived.
    async fn exchange(&self, history: Vec<Message>) -> Result<bool, ConsumerError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&json!({ "messages": history }));
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|body| body.get("error").and_then(Value::as_str).map(String::from))
                .unwrap_or_else(|| SEND_FAILED.to_string());
            return Err(ConsumerError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let mut decoder = FrameDecoder::new();
        let mut body = response.bytes_stream();
        let mut finished = false;
        while let Some(chunk) = body.next().await {
            for frame in decoder.push(&chunk?) {
                finished |= self.apply(frame)?;
            }
        }
        if let Some(frame) = decoder.finish() {
            finished |= self.apply(frame)?;
        }
        Ok(finished)
    }

    fn apply(&self, frame: StreamFrame) -> Result<bool, ConsumerError> {
        match frame {
            StreamFrame::Finish(_) => Ok(true),
            StreamFrame::Error(message) => Err(ConsumerError::Stream(message)),
            frame => {
                if let Some(text) = frame.text() {
                    self.state.send_modify(|state| {
                        state.conversation.append_to_placeholder(&text);
                    });
                }
                Ok(false)
            }
        }
    }
}

/// Releases the in-flight flag when a submission ends, including when its future is dropped
struct InFlight<'a> {
    consumer: &'a Consumer,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.consumer
            .state
            .send_if_modified(|state| std::mem::take(&mut state.loading));
        self.consumer.in_flight.store(false, Ordering::Release);
    }
}
