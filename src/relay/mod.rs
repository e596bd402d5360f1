//! Chat relay: one upstream streaming call in, one SSE event stream out.
//!
//! The upstream body is cut into lines by [`decoder::LineDecoder`], each line
//! is interpreted by [`decoder::parse_line`], and non-empty deltas are pushed
//! downstream in read order. A failure anywhere ends the stream with a single
//! [`RelayEvent::Error`].

pub mod decoder;
pub mod error;

use futures::{ Stream, StreamExt };
use log::{ debug, error, info, warn };
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use self::decoder::{ parse_line, LineDecoder, StreamUnit };
use self::error::{ classify_message, RelayError };
use crate::llm::chat::ChatUpstream;
use crate::models::chat::ChatRequest;
use crate::models::events::RelayEvent;

const CHANNEL_CAPACITY: usize = 32;

pub type RelayStream = ReceiverStream<RelayEvent>;

#[derive(Debug, Clone)]
pub struct StreamRelay {
    upstream: ChatUpstream,
    timeout: Option<Duration>,
}

impl StreamRelay {
    /// `timeout` bounds the whole relay, connection included.
    pub fn new(upstream: ChatUpstream, timeout: Option<Duration>) -> Self {
        Self { upstream, timeout: timeout.filter(|d| !d.is_zero()) }
    }

    /// Validates a raw `/chat` body, then relays it. An invalid body yields a
    /// stream holding only the validation error; upstream is never contacted.
    pub fn relay_body(&self, body: &[u8]) -> RelayStream {
        match ChatRequest::from_body(body) {
            Ok(request) => self.relay(request),
            Err(err) => {
                warn!("Rejecting chat request: {}", err);
                single_error(&err)
            }
        }
    }

    pub fn relay(&self, request: ChatRequest) -> RelayStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let relay = self.clone();
        tokio::spawn(async move {
            relay.run(request, tx).await;
        });
        ReceiverStream::new(rx)
    }

    async fn run(self, request: ChatRequest, tx: mpsc::Sender<RelayEvent>) {
        let relay_id = Uuid::new_v4();
        info!(
            "Relay {} started: {} turns, user {}",
            relay_id,
            request.turns.len(),
            request.user_id.as_deref().unwrap_or("-")
        );

        // Dropping the pump future drops the upstream response with it.
        let outcome = tokio::select! {
            _ = tx.closed() => {
                info!("Relay {} stopped: client disconnected", relay_id);
                return;
            }
            outcome = self.pump_with_deadline(&request, &tx) => outcome,
        };

        match outcome {
            Ok(forwarded) => info!("Relay {} finished: {} deltas", relay_id, forwarded),
            Err(err) => {
                error!("Relay {} failed: {}", relay_id, err);
                if tx.send(RelayEvent::error(err.user_message())).await.is_err() {
                    debug!("Relay {}: client gone before the error could be sent", relay_id);
                }
            }
        }
    }

    async fn pump_with_deadline(
        &self,
        request: &ChatRequest,
        tx: &mpsc::Sender<RelayEvent>
    ) -> Result<usize, RelayError> {
        let Some(limit) = self.timeout else {
            return self.pump(request, tx, &mut false).await;
        };

        let mut opened = false;
        let result = tokio::time::timeout(limit, self.pump(request, tx, &mut opened)).await;
        result.unwrap_or_else(|_| {
            let detail = format!("no completion within {}s", limit.as_secs_f32());
            if opened {
                Err(RelayError::UpstreamInterrupted(detail))
            } else {
                Err(RelayError::UpstreamUnavailable {
                    url: self.upstream.base_url().to_string(),
                    detail,
                })
            }
        })
    }

    async fn pump(
        &self,
        request: &ChatRequest,
        tx: &mpsc::Sender<RelayEvent>,
        opened: &mut bool
    ) -> Result<usize, RelayError> {
        let response = self.upstream.open_stream(&request.turns).await?;
        *opened = true;
        forward(response.bytes_stream(), tx, self.upstream.model()).await
    }
}

fn single_error(err: &RelayError) -> RelayStream {
    let (tx, rx) = mpsc::channel(1);
    let _ = tx.try_send(RelayEvent::error(err.user_message()));
    ReceiverStream::new(rx)
}

enum Flow {
    Continue,
    Stop,
}

/// Decodes an upstream body and sends every non-empty delta to `tx`.
///
/// Returns the number of deltas forwarded. Stops early, without error, on an
/// end-of-stream unit or when the receiver is gone.
pub async fn forward<S, B, E>(
    body: S,
    tx: &mpsc::Sender<RelayEvent>,
    model: &str
) -> Result<usize, RelayError>
    where S: Stream<Item = Result<B, E>>, B: AsRef<[u8]>, E: fmt::Display
{
    futures::pin_mut!(body);
    let mut decoder = LineDecoder::new();
    let mut forwarded = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| RelayError::UpstreamInterrupted(e.to_string()))?;
        for line in decoder.push(chunk.as_ref()) {
            if let Flow::Stop = handle_line(&line, tx, model, &mut forwarded).await? {
                return Ok(forwarded);
            }
        }
    }

    if let Some(tail) = decoder.finish() {
        handle_line(&tail, tx, model, &mut forwarded).await?;
    }
    Ok(forwarded)
}

async fn handle_line(
    line: &[u8],
    tx: &mpsc::Sender<RelayEvent>,
    model: &str,
    forwarded: &mut usize
) -> Result<Flow, RelayError> {
    match parse_line(line) {
        None => Ok(Flow::Continue),
        Some(StreamUnit::End) => Ok(Flow::Stop),
        Some(StreamUnit::Error(message)) => Err(classify_message(None, &message, model)),
        Some(StreamUnit::Chunk { delta, done }) => {
            if let Some(content) = delta {
                if tx.send(RelayEvent::delta(content)).await.is_err() {
                    debug!("Receiver dropped, abandoning upstream stream");
                    return Ok(Flow::Stop);
                }
                *forwarded += 1;
            }
            Ok(if done { Flow::Stop } else { Flow::Continue })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmConfig;
    use futures::stream;
    use std::io;

    type Chunk = Result<&'static [u8], io::Error>;

    fn ok(bytes: &'static [u8]) -> Chunk {
        Ok(bytes)
    }

    async fn run_forward(chunks: Vec<Chunk>) -> (Result<usize, RelayError>, Vec<RelayEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let result = forward(stream::iter(chunks), &tx, "llama3").await;
        drop(tx);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    #[tokio::test]
    async fn forwards_deltas_in_order_until_done() {
        let (result, events) = run_forward(
            vec![
                ok(b"{\"message\":{\"content\":\"Hel\"},\"done\":false}\n{\"message\":{\"content\":\"lo\"},"),
                ok(b"\"done\":false}\n{\"done\":true}\n"),
                ok(b"{\"message\":{\"content\":\"after done\"}}\n")
            ]
        ).await;
        assert_eq!(result, Ok(2));
        assert_eq!(events, vec![RelayEvent::delta("Hel"), RelayEvent::delta("lo")]);
    }

    #[tokio::test]
    async fn malformed_line_between_deltas_is_skipped() {
        let (result, events) = run_forward(
            vec![ok(b"{\"message\":{\"content\":\"a\"}}\n{oops\n{\"message\":{\"content\":\"b\"}}\n")]
        ).await;
        assert_eq!(result, Ok(2));
        assert_eq!(events, vec![RelayEvent::delta("a"), RelayEvent::delta("b")]);
    }

    #[tokio::test]
    async fn read_error_after_deltas_is_an_interruption() {
        let (result, events) = run_forward(
            vec![
                ok(b"{\"message\":{\"content\":\"partial\"}}\n"),
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"))
            ]
        ).await;
        assert_eq!(events, vec![RelayEvent::delta("partial")]);
        assert_eq!(result, Err(RelayError::UpstreamInterrupted("connection reset".into())));
    }

    #[tokio::test]
    async fn error_unit_mid_stream_is_classified() {
        let (result, events) = run_forward(
            vec![
                ok(b"{\"message\":{\"content\":\"x\"}}\n"),
                ok(b"{\"error\":\"input exceeds the context length of the model\"}\n")
            ]
        ).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(result, Err(RelayError::ContextTooLong(_))));
    }

    #[tokio::test]
    async fn stops_when_receiver_is_gone() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let chunks: Vec<Chunk> = vec![ok(b"{\"message\":{\"content\":\"x\"}}\n")];
        let result = forward(stream::iter(chunks), &tx, "m").await;
        assert_eq!(result, Ok(0));
    }

    #[tokio::test]
    async fn invalid_body_yields_one_error_without_upstream() {
        let upstream = ChatUpstream::from_config(
            &(LlmConfig {
                base_url: "http://127.0.0.1:9".into(),
                ..Default::default()
            })
        ).unwrap();
        let relay = StreamRelay::new(upstream, None);
        let events: Vec<RelayEvent> = relay.relay_body(br#"{"messages":[]}"#).collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_error());
    }
}
