//! Event decoder: reads newline-delimited JSON events from the peer.
//!
//! A spawned task owns the input stream and feeds typed events into a
//! bounded channel, decoupling line reads from (slow) transfer handling.
//! Decoding is two-phase: probe the `event` discriminant first, then fully
//! decode the line into the matching variant. A line that fails either
//! phase is logged and skipped; only end-of-stream ends the sequence.

use crate::protocol::Event;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

/// Bound on decoded events queued ahead of the dispatch loop.
pub const EVENT_CHANNEL_SIZE: usize = 32;

/// Minimal probe shape exposing only the event discriminant.
#[derive(Deserialize)]
struct Probe {
    event: String,
}

/// Spawn the reader task and return the receiving end of the event conduit.
///
/// Events are delivered in input order. The channel closes when the input
/// stream reaches end-of-stream or the receiver is dropped.
pub fn spawn_event_reader<R>(input: R) -> mpsc::Receiver<Event>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

    tokio::spawn(async move {
        let mut lines = BufReader::new(input).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return,
                Err(err) => {
                    tracing::warn!("event stream read error: {err}");
                    continue;
                }
            };

            // Inbound wire echo for operators.
            tracing::debug!("<- {line}");

            let probe: Probe = match serde_json::from_str(&line) {
                Ok(probe) => probe,
                Err(err) => {
                    tracing::warn!("skipping malformed line: {err}");
                    continue;
                }
            };

            match probe.event.as_str() {
                "init" | "upload" | "download" | "terminate" => {}
                other => {
                    tracing::warn!(event = other, "skipping unknown event");
                    continue;
                }
            }

            let event: Event = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(event = %probe.event, "skipping undecodable event: {err}");
                    continue;
                }
            };

            if tx.send(event).await.is_err() {
                // Dispatch loop is gone; nothing left to decode for.
                return;
            }
        }
    });

    rx
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::path::PathBuf;

    async fn collect(input: &str) -> Vec<Event> {
        let mut rx = spawn_event_reader(Cursor::new(input.as_bytes().to_vec()));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_events_decoded_in_order() {
        let input = concat!(
            r#"{"event":"init","operation":"download","remote":"origin","concurrent":false,"concurrenttransfers":1}"#,
            "\n",
            r#"{"event":"upload","oid":"a1","size":10,"path":"/tmp/a1"}"#,
            "\n",
            r#"{"event":"download","oid":"b2","size":20}"#,
            "\n",
            r#"{"event":"terminate"}"#,
            "\n",
        );

        let events = collect(input).await;
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], Event::Init { .. }));
        assert_eq!(
            events[1],
            Event::Upload {
                oid: "a1".into(),
                size: 10,
                path: PathBuf::from("/tmp/a1"),
            }
        );
        assert_eq!(
            events[2],
            Event::Download {
                oid: "b2".into(),
                size: 20,
            }
        );
        assert_eq!(events[3], Event::Terminate);
    }

    #[tokio::test]
    async fn test_garbage_line_skipped() {
        let input = concat!(
            r#"{"event":"upload","oid":"a1","size":1,"path":"x"}"#,
            "\n",
            "this is not json\n",
            r#"{"event":"upload","oid":"a2","size":2,"path":"y"}"#,
            "\n",
        );

        let events = collect(input).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::Upload { oid, .. } if oid == "a1"));
        assert!(matches!(&events[1], Event::Upload { oid, .. } if oid == "a2"));
    }

    #[tokio::test]
    async fn test_unknown_event_skipped() {
        let input = concat!(
            r#"{"event":"download","oid":"a1","size":1}"#,
            "\n",
            r#"{"event":"frobnicate","oid":"zz"}"#,
            "\n",
            r#"{"event":"terminate"}"#,
            "\n",
        );

        let events = collect(input).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::Download { .. }));
        assert_eq!(events[1], Event::Terminate);
    }

    #[tokio::test]
    async fn test_known_event_with_bad_fields_skipped() {
        // Probe succeeds ("upload" is known) but the full decode fails.
        let input = concat!(
            r#"{"event":"upload","oid":12345}"#,
            "\n",
            r#"{"event":"terminate"}"#,
            "\n",
        );

        let events = collect(input).await;
        assert_eq!(events, vec![Event::Terminate]);
    }

    #[tokio::test]
    async fn test_end_of_stream_closes_channel() {
        let events = collect("").await;
        assert!(events.is_empty());
    }
}
