//! Progress event bus.
//!
//! Per-task bounded broadcast channels. Subscribers receive only events
//! emitted after they subscribed (no replay buffer); a subscriber that
//! falls behind the channel capacity loses the oldest events rather than
//! stalling the producer.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;

use crate::contract::ErrorInfo;
use crate::graph::StepId;
use crate::models::Task;

const DEFAULT_CAPACITY: usize = 256;

/// One observable moment of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StepStarted {
        step: StepId,
    },
    StepCompleted {
        step: StepId,
        output_excerpt: String,
    },
    /// Partial generated text during the writing step.
    Token {
        text: String,
    },
    Done {
        task: Box<Task>,
    },
    Error {
        detail: ErrorInfo,
    },
}

struct ProgressBusInner {
    channels: HashMap<String, broadcast::Sender<ProgressEvent>>,
}

/// Thread-safe registry of per-task progress channels.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<RwLock<ProgressBusInner>>,
    capacity: usize,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ProgressBusInner {
                channels: HashMap::new(),
            })),
            capacity,
        }
    }

    /// Publish an event for a task. A no-op when nobody ever subscribed
    /// and no channel exists yet is fine: emit creates the channel so
    /// ordering is stable once subscribers do attach.
    pub async fn emit(&self, task_id: &str, event: ProgressEvent) {
        let sender = self.sender(task_id).await;
        // Err means no active receivers; events are not buffered for
        // late subscribers.
        let _ = sender.send(event);
    }

    /// Subscribe to a task's progress. The stream yields events emitted
    /// after this call, read-once per listener.
    pub async fn subscribe(&self, task_id: &str) -> BroadcastStream<ProgressEvent> {
        let sender = self.sender(task_id).await;
        BroadcastStream::new(sender.subscribe())
    }

    /// Drop a finished task's channel; open subscriber streams end.
    pub async fn remove(&self, task_id: &str) {
        let mut inner = self.inner.write().await;
        inner.channels.remove(task_id);
    }

    async fn sender(&self, task_id: &str) -> broadcast::Sender<ProgressEvent> {
        {
            let inner = self.inner.read().await;
            if let Some(sender) = inner.channels.get(task_id) {
                return sender.clone();
            }
        }
        let mut inner = self.inner.write().await;
        inner
            .channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_subscriber_sees_only_later_events() {
        let bus = ProgressBus::new();
        bus.emit(
            "t1",
            ProgressEvent::StepStarted {
                step: StepId::Literature,
            },
        )
        .await;

        let mut stream = bus.subscribe("t1").await;
        bus.emit(
            "t1",
            ProgressEvent::StepCompleted {
                step: StepId::Literature,
                output_excerpt: "12 references".to_string(),
            },
        )
        .await;

        let event = stream.next().await.unwrap().unwrap();
        match event {
            ProgressEvent::StepCompleted { step, .. } => assert_eq!(step, StepId::Literature),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_get_events() {
        let bus = ProgressBus::new();
        let mut a = bus.subscribe("t1").await;
        let mut b = bus.subscribe("t1").await;

        bus.emit(
            "t1",
            ProgressEvent::Token {
                text: "hello".to_string(),
            },
        )
        .await;

        for stream in [&mut a, &mut b] {
            match stream.next().await.unwrap().unwrap() {
                ProgressEvent::Token { text } => assert_eq!(text, "hello"),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_tasks_are_isolated() {
        let bus = ProgressBus::new();
        let mut t2 = bus.subscribe("t2").await;
        bus.emit(
            "t1",
            ProgressEvent::Token {
                text: "for t1".to_string(),
            },
        )
        .await;
        bus.emit(
            "t2",
            ProgressEvent::Token {
                text: "for t2".to_string(),
            },
        )
        .await;
        match t2.next().await.unwrap().unwrap() {
            ProgressEvent::Token { text } => assert_eq!(text, "for t2"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_ends_streams() {
        let bus = ProgressBus::new();
        let mut stream = bus.subscribe("t1").await;
        bus.remove("t1").await;
        assert!(stream.next().await.is_none());
    }
}
