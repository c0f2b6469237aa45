use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;

pub const MESSAGE_EVENT: &str = "message";

/// One outbound push event.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub event_id: Option<String>,
    pub data: String,
}

impl Frame {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            event_id: None,
            data: data.into(),
        }
    }

    pub fn with_id(mut self, event_id: Option<String>) -> Self {
        self.event_id = event_id;
        self
    }

    pub fn into_event(self) -> Event {
        let event = Event::default().event(MESSAGE_EVENT).data(self.data);
        match self.event_id {
            Some(id) => event.id(id),
            None => event,
        }
    }
}

/// Wrap a frame receiver as an SSE body. The body ends when every sender is
/// dropped.
pub fn sse_body(
    rx: mpsc::Receiver<Frame>,
    keep_alive: std::time::Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|frame| Ok(frame.into_event()));
    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive).text("keep-alive"))
}
