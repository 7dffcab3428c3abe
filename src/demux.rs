use crate::codec::FrameDecoder;
use crate::dispatcher::Dispatcher;
use crate::protocol::{classify, ParsedMessage};
use crate::subscription::HeosEvent;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Turns raw socket bytes into routed protocol messages.
///
/// Responses and failures go to the dispatcher's in-flight command, events go
/// to subscribers. A frame that fails to decode is logged and skipped.
pub(crate) struct Demux {
    decoder: FrameDecoder,
    dispatcher: Arc<Dispatcher>,
    events: broadcast::Sender<HeosEvent>,
}

impl Demux {
    pub fn new(dispatcher: Arc<Dispatcher>, events: broadcast::Sender<HeosEvent>) -> Self {
        Self {
            decoder: FrameDecoder::crlf(),
            dispatcher,
            events,
        }
    }

    /// Feed one socket read; every completed frame is routed before returning
    pub async fn feed(&mut self, bytes: &[u8]) {
        for frame in self.decoder.feed(bytes) {
            self.route(&frame).await;
        }
    }

    async fn route(&self, frame: &str) {
        if frame.trim().is_empty() {
            return;
        }
        tracing::debug!("Received: {}", frame);

        match classify(frame) {
            Ok(Some(ParsedMessage::Event(event))) => {
                let _ = self.events.send(HeosEvent::Device(event));
            }
            Ok(Some(message)) => {
                self.dispatcher.complete(message).await;
            }
            Ok(None) => {
                tracing::debug!("Command still under process");
            }
            Err(e) => {
                tracing::warn!("Skipping undecodable frame: {}", e);
            }
        }
    }
}
