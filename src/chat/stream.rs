//! Per-chat event fan-out.
//!
//! The orchestrator publishes chat events keyed by chatId; a connected
//! client consumes them as SSE through a subscriber stream. Without a
//! subscriber, events buffer in a bounded queue that drops the oldest
//! entry on overflow and injects a visible warning. Events for one chat
//! are delivered in generation order; across chats there is no ordering.

use crate::llm::provider::{ErrorCategory, FinishReason, Message, Usage};
use crate::tools::ask_user::ClarificationRequest;
use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

const BUFFER_CAPACITY: usize = 256;

/// Server -> client event taxonomy.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatEvent {
    /// Text delta
    Content { text: String },
    /// A full generated image
    Image {
        #[serde(rename = "mimeType")]
        mime_type: String,
        b64: String,
    },
    /// Progress marker: the model requested a tool
    ToolCall { id: String, name: String },
    /// Tool-emitted progress step
    Action {
        tool: String,
        step: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    /// ask_user question awaiting the next user message
    Clarification {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        request: ClarificationRequest,
    },
    Error {
        category: ErrorCategory,
        message: String,
    },
    /// Queue overflow and similar non-fatal conditions
    Warning { message: String },
    Done {
        #[serde(rename = "finishReason")]
        finish_reason: FinishReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        /// The conversation as the server last saw it
        messages: Vec<Message>,
    },
    Cancelled,
}

struct Channel {
    buffer: Mutex<VecDeque<ChatEvent>>,
    subscriber: Mutex<Option<mpsc::UnboundedSender<ChatEvent>>>,
    dropped: Mutex<usize>,
}

impl Channel {
    fn new() -> Self {
        Self {
            buffer: Mutex::new(VecDeque::new()),
            subscriber: Mutex::new(None),
            dropped: Mutex::new(0),
        }
    }
}

pub struct ChatEventBus {
    channels: DashMap<String, Arc<Channel>>,
    capacity: usize,
}

impl ChatEventBus {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity,
        }
    }

    fn channel(&self, chat_id: &str) -> Arc<Channel> {
        self.channels
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(Channel::new()))
            .clone()
    }

    /// Deliver an event to the chat's subscriber, or buffer it.
    pub fn publish(&self, chat_id: &str, event: ChatEvent) {
        let channel = self.channel(chat_id);

        {
            let subscriber = channel.subscriber.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(tx) = subscriber.as_ref() {
                if tx.send(event.clone()).is_ok() {
                    return;
                }
            }
        }

        let mut buffer = channel.buffer.lock().unwrap_or_else(|p| p.into_inner());
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            let mut dropped = channel.dropped.lock().unwrap_or_else(|p| p.into_inner());
            *dropped += 1;
            if *dropped == 1 {
                buffer.push_back(ChatEvent::Warning {
                    message: "event buffer overflow: oldest events were dropped".to_string(),
                });
            }
        }
        buffer.push_back(event);
    }

    /// Attach a subscriber, replaying anything buffered so far. Dropping
    /// the returned stream detaches it; later events buffer again.
    pub fn subscribe(&self, chat_id: &str) -> ChatEventStream {
        let channel = self.channel(chat_id);
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut buffer = channel.buffer.lock().unwrap_or_else(|p| p.into_inner());
            for event in buffer.drain(..) {
                let _ = tx.send(event);
            }
            let mut dropped = channel.dropped.lock().unwrap_or_else(|p| p.into_inner());
            *dropped = 0;
        }
        *channel.subscriber.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);

        ChatEventStream {
            channel,
            inner: UnboundedReceiverStream::new(rx),
        }
    }

    /// Drop the chat's channel entirely, ending any subscriber stream.
    pub fn close(&self, chat_id: &str) {
        if let Some((_, channel)) = self.channels.remove(chat_id) {
            channel
                .subscriber
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .take();
        }
    }

    /// Buffered-but-undelivered event count, for status probes.
    pub fn pending(&self, chat_id: &str) -> usize {
        self.channels
            .get(chat_id)
            .map(|c| c.buffer.lock().unwrap_or_else(|p| p.into_inner()).len())
            .unwrap_or(0)
    }
}

impl Default for ChatEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle given to tools for emitting action progress markers into their
/// chat's event stream.
#[derive(Clone)]
pub struct ActionSink {
    bus: Arc<ChatEventBus>,
    chat_id: String,
}

impl ActionSink {
    pub fn new(bus: Arc<ChatEventBus>, chat_id: impl Into<String>) -> Self {
        Self {
            bus,
            chat_id: chat_id.into(),
        }
    }

    pub fn emit(&self, tool: &str, step: &str, data: Option<serde_json::Value>) {
        self.bus.publish(
            &self.chat_id,
            ChatEvent::Action {
                tool: tool.to_string(),
                step: step.to_string(),
                data,
            },
        );
    }
}

impl std::fmt::Debug for ActionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSink")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Subscriber stream handed to the SSE layer. Detaches from the channel
/// when dropped so a disconnected client falls back to buffering.
#[pin_project::pin_project(PinnedDrop)]
pub struct ChatEventStream {
    channel: Arc<Channel>,
    #[pin]
    inner: UnboundedReceiverStream<ChatEvent>,
}

impl Stream for ChatEventStream {
    type Item = ChatEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

#[pin_project::pinned_drop]
impl PinnedDrop for ChatEventStream {
    fn drop(self: Pin<&mut Self>) {
        self.channel
            .subscriber
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
    }
}
