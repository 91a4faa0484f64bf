//! Scripted transport for exercising the client without a network.
//!
//! Each `open()` consumes the next queued [`Step`] (or the fallback once the
//! queue is empty). Accepted connections are driven through a
//! [`StreamController`].

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use scout_core::errors::TransportError;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

use crate::sse::Frame;
use crate::transport::{FrameStream, Transport};

/// Outcome of one `open()` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Handshake succeeds; frames come from a [`StreamController`].
    Accept,
    /// Handshake fails with this HTTP status.
    Reject(u16),
    /// Handshake never completes.
    Hang,
}

enum Control {
    Item(Result<Frame, TransportError>),
    Close,
}

/// Feeds frames into one accepted connection.
#[derive(Clone, Debug)]
pub struct StreamController {
    tx: mpsc::UnboundedSender<Control>,
}

impl StreamController {
    /// Deliver a frame. Returns `false` once the client dropped the stream.
    pub fn send(&self, frame: Frame) -> bool {
        self.tx.send(Control::Item(Ok(frame))).is_ok()
    }

    /// Deliver a labeled frame.
    pub fn send_event(&self, event_type: &str, data: &str) -> bool {
        self.send(Frame::new(event_type, data))
    }

    /// Fail the stream with a read error.
    pub fn fail(&self, reason: &str) -> bool {
        self.tx
            .send(Control::Item(Err(TransportError::Read(reason.to_string()))))
            .is_ok()
    }

    /// End the stream as if the server closed it.
    pub fn close(&self) -> bool {
        self.tx.send(Control::Close).is_ok()
    }

    /// Whether the client still holds the stream.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Item(Ok(frame)) => f.debug_tuple("Frame").field(frame).finish(),
            Self::Item(Err(e)) => f.debug_tuple("Error").field(e).finish(),
            Self::Close => f.write_str("Close"),
        }
    }
}

#[derive(Debug)]
struct Script {
    steps: VecDeque<Step>,
    fallback: Step,
    urls: Vec<Url>,
    connections: Vec<StreamController>,
}

/// [`Transport`] whose handshakes follow a script.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
}

impl ScriptedTransport {
    /// Accept every connection.
    pub fn new() -> Self {
        Self::with_fallback(Step::Accept)
    }

    /// Use `fallback` once the queued steps run out.
    pub fn with_fallback(fallback: Step) -> Self {
        Self {
            script: Mutex::new(Script {
                steps: VecDeque::new(),
                fallback,
                urls: Vec::new(),
                connections: Vec::new(),
            }),
        }
    }

    /// Queue steps for the next `open()` calls.
    pub fn push(&self, steps: impl IntoIterator<Item = Step>) {
        self.script.lock().steps.extend(steps);
    }

    /// Change the step used when the queue is empty.
    pub fn set_fallback(&self, fallback: Step) {
        self.script.lock().fallback = fallback;
    }

    /// Number of `open()` calls so far.
    pub fn open_count(&self) -> usize {
        self.script.lock().urls.len()
    }

    /// URLs passed to `open()`, in order.
    pub fn urls(&self) -> Vec<Url> {
        self.script.lock().urls.clone()
    }

    /// Controller of the most recently accepted connection.
    pub fn last_connection(&self) -> Option<StreamController> {
        self.script.lock().connections.last().cloned()
    }

    /// Number of accepted connections the client still holds.
    pub fn open_connections(&self) -> usize {
        self.script
            .lock()
            .connections
            .iter()
            .filter(|c| c.is_open())
            .count()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, url: &Url) -> Result<FrameStream, TransportError> {
        let step = {
            let mut script = self.script.lock();
            script.urls.push(url.clone());
            let fallback = script.fallback;
            script.steps.pop_front().unwrap_or(fallback)
        };

        match step {
            Step::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.script.lock().connections.push(StreamController { tx });
                let frames = UnboundedReceiverStream::new(rx).map_while(|control| match control {
                    Control::Item(item) => Some(item),
                    Control::Close => None,
                });
                Ok(Box::pin(frames))
            }
            Step::Reject(status) => Err(TransportError::Status {
                status,
                body: String::new(),
            }),
            Step::Hang => std::future::pending().await,
        }
    }
}
