//! Read-through progress reporting.
//!
//! Wraps the byte source of a transfer and emits `progress` responses as
//! data flows through it, throttled to one response per interval with a
//! guaranteed final flush at end-of-stream. This bounds emission rate
//! regardless of transfer speed, while the peer always sees `bytesSoFar`
//! reach the transferred total.

use crate::protocol::{emitter::ResponseEmitter, Response};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, ReadBuf};

/// Default spacing between progress responses for one transfer.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Byte counter around any `AsyncRead` source.
///
/// Read errors pass through untouched and emit nothing; only the interval
/// timer and the end-of-stream read trigger a response.
pub struct ProgressRelay<R> {
    inner: R,
    oid: String,
    emitter: ResponseEmitter,
    interval: Duration,
    bytes_so_far: u64,
    bytes_since_last: u64,
    last_emit: Instant,
    finished: bool,
}

impl<R> ProgressRelay<R> {
    pub fn new(inner: R, oid: &str, emitter: ResponseEmitter) -> Self {
        Self::with_interval(inner, oid, emitter, PROGRESS_INTERVAL)
    }

    /// Relay with a custom throttle interval; tests use short ones.
    pub fn with_interval(
        inner: R,
        oid: &str,
        emitter: ResponseEmitter,
        interval: Duration,
    ) -> Self {
        Self {
            inner,
            oid: oid.to_string(),
            emitter,
            interval,
            bytes_so_far: 0,
            bytes_since_last: 0,
            last_emit: Instant::now(),
            finished: false,
        }
    }

    fn emit_progress(&mut self) {
        let response = Response::progress(&self.oid, self.bytes_so_far, self.bytes_since_last);
        if let Err(err) = self.emitter.emit(&response) {
            // The transfer itself may still succeed; the terminal response
            // will hit the same dead transport and fail the session there.
            tracing::warn!(oid = %self.oid, "progress emit failed: {err:#}");
        }
        self.last_emit = Instant::now();
        self.bytes_since_last = 0;
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressRelay<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let me = &mut *self;

        match Pin::new(&mut me.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = (buf.filled().len() - before) as u64;
                me.bytes_so_far += n;
                me.bytes_since_last += n;

                if !me.finished {
                    if n == 0 {
                        // End-of-stream: final flush, exactly once.
                        me.finished = true;
                        me.emit_progress();
                    } else if me.last_emit.elapsed() >= me.interval {
                        me.emit_progress();
                    }
                }

                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
