//! Reconnecting push-event subscription.
//!
//! One persistent server-push connection per client session feeds cache
//! invalidation. Transport drops recover automatically with exponential
//! backoff; they surface only as a connectivity status, never as a blocking
//! error. Heartbeats are filtered before dispatch.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use skilldeck_core::ResolveError;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Typed server-push frames. `heartbeat` is reserved and never forwarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum EventFrame {
    Heartbeat,
    /// A skill's declared schema changed; drop every cache for it.
    SchemaUpdate { skill: String },
    DataChange {
        skill: String,
        entity: String,
        /// all | id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<serde_json::Value>,
    },
    JobStatus {
        job_id: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
}

/// Exponential reconnect delay: base, doubling, capped; reset on success.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap, next: base }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (delay * 2).min(self.cap);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

const STATE_DISCONNECTED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;

/// One attempt at a push-event connection yielding a frame stream. A stream
/// item error means the connection dropped mid-flight.
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn connect(
        &self,
    ) -> Result<BoxStream<'static, Result<EventFrame, ResolveError>>, ResolveError>;
}

/// Server-sent-events transport: parses `data:` lines into frames.
pub struct SseTransport {
    url: String,
    http: reqwest::Client,
}

impl SseTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), http: reqwest::Client::new() }
    }
}

#[async_trait]
impl EventTransport for SseTransport {
    async fn connect(
        &self,
    ) -> Result<BoxStream<'static, Result<EventFrame, ResolveError>>, ResolveError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ResolveError::TransportFailure(e.to_string()))?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ResolveError::TransportFailure(e.to_string()));
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);
                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    match serde_json::from_str::<EventFrame>(payload.trim()) {
                        Ok(frame) => yield Ok(frame),
                        Err(e) => tracing::debug!(
                            target: "skilldeck::live",
                            error = %e,
                            "skipping unparseable event frame"
                        ),
                    }
                }
            }
        };
        Ok(stream.boxed())
    }
}

/// Fan-out of push events to any number of subscribers, independent of
/// connection state. Dispatch with zero subscribers is a no-op.
pub struct LiveUpdateChannel {
    transport: Arc<dyn EventTransport>,
    sender: broadcast::Sender<EventFrame>,
    backoff: Backoff,
    state: AtomicU8,
    stopped: AtomicBool,
}

impl LiveUpdateChannel {
    pub fn new(transport: Arc<dyn EventTransport>, backoff: Backoff) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            transport,
            sender,
            backoff,
            state: AtomicU8::new(STATE_DISCONNECTED),
            stopped: AtomicBool::new(false),
        }
    }

    /// Subscribers register and drop freely; the connection does not care.
    pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
        self.sender.subscribe()
    }

    pub fn state(&self) -> ChannelState {
        match self.state.load(Ordering::Acquire) {
            STATE_CONNECTED => ChannelState::Connected,
            STATE_CONNECTING => ChannelState::Connecting,
            _ => ChannelState::Disconnected,
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Connection loop: connect, dispatch, back off on any drop, repeat
    /// until stopped. Run this on its own task.
    pub async fn run(&self) {
        let mut backoff = self.backoff.clone();
        while !self.stopped.load(Ordering::Acquire) {
            self.set_state(STATE_CONNECTING);
            match self.transport.connect().await {
                Ok(mut frames) => {
                    self.set_state(STATE_CONNECTED);
                    backoff.reset();
                    while let Some(item) = frames.next().await {
                        if self.stopped.load(Ordering::Acquire) {
                            self.set_state(STATE_DISCONNECTED);
                            return;
                        }
                        match item {
                            Ok(EventFrame::Heartbeat) => continue,
                            Ok(frame) => {
                                // Err here only means nobody is listening.
                                let _ = self.sender.send(frame);
                            }
                            Err(e) => {
                                tracing::warn!(
                                    target: "skilldeck::live",
                                    error = %e,
                                    "push connection dropped"
                                );
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "skilldeck::live", error = %e, "push connect failed");
                }
            }
            self.set_state(STATE_DISCONNECTED);
            if self.stopped.load(Ordering::Acquire) {
                return;
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
        self.set_state(STATE_DISCONNECTED);
    }

    fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    #[test]
    fn backoff_doubles_caps_and_resets() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        for _ in 0..10 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(30));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn frames_use_tagged_kebab_case() {
        let frame: EventFrame =
            serde_json::from_value(json!({ "type": "schema-update", "skill": "selling" })).unwrap();
        assert_eq!(frame, EventFrame::SchemaUpdate { skill: "selling".into() });
        assert_eq!(
            serde_json::to_value(EventFrame::Heartbeat).unwrap(),
            json!({ "type": "heartbeat" })
        );
    }

    enum Step {
        Fail,
        Frames(Vec<EventFrame>),
    }

    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        attempts: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Self {
            Self { steps: Mutex::new(steps.into()), attempts: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl EventTransport for ScriptedTransport {
        async fn connect(
            &self,
        ) -> Result<BoxStream<'static, Result<EventFrame, ResolveError>>, ResolveError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Frames(frames)) => {
                    Ok(futures_util::stream::iter(frames.into_iter().map(Ok)).boxed())
                }
                _ => Err(ResolveError::TransportFailure("connection refused".into())),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_backoff_and_filters_heartbeats() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Step::Fail,
            Step::Fail,
            Step::Frames(vec![
                EventFrame::Heartbeat,
                EventFrame::SchemaUpdate { skill: "selling".into() },
                EventFrame::Heartbeat,
                EventFrame::DataChange {
                    skill: "selling".into(),
                    entity: "customer".into(),
                    scope: Some("all".into()),
                    id: None,
                },
            ]),
        ]));
        let channel = Arc::new(LiveUpdateChannel::new(transport.clone(), Backoff::default()));
        let mut events = channel.subscribe();

        let runner = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.run().await }
        });

        assert_eq!(
            events.recv().await.unwrap(),
            EventFrame::SchemaUpdate { skill: "selling".into() }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            EventFrame::DataChange {
                skill: "selling".into(),
                entity: "customer".into(),
                scope: Some("all".into()),
                id: None,
            }
        );
        // Two refused connects before the one that delivered.
        assert!(transport.attempts.load(Ordering::SeqCst) >= 3);

        channel.stop();
        tokio::time::timeout(Duration::from_secs(120), runner).await.unwrap().unwrap();
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_without_subscribers_is_a_no_op() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::Frames(vec![
            EventFrame::SchemaUpdate { skill: "gl".into() },
        ])]));
        let channel = Arc::new(LiveUpdateChannel::new(transport, Backoff::default()));
        let runner = tokio::spawn({
            let channel = Arc::clone(&channel);
            async move { channel.run().await }
        });
        // No subscriber exists; the frame is dropped silently and the loop
        // keeps cycling until stopped.
        tokio::time::sleep(Duration::from_secs(5)).await;
        channel.stop();
        tokio::time::timeout(Duration::from_secs(120), runner).await.unwrap().unwrap();
    }
}
