//! Serialized response writer.
//!
//! One emitter instance per session, cloned into every component that
//! writes responses (transfer handlers, progress relays). The write
//! critical section is a mutex so concurrent callers never interleave
//! partial lines.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Cloneable handle writing one JSON line per response.
///
/// Writes are synchronous: response lines are a few hundred bytes at most,
/// and a synchronous emitter can be driven from inside `poll_read`, which
/// keeps progress emission inline with the data path.
#[derive(Clone)]
pub struct ResponseEmitter {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl ResponseEmitter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
        }
    }

    /// Emitter over the process stdout, the protocol channel.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Serialize one response and write it as a single line.
    ///
    /// Returns an error when the transport is gone; the session loop stops
    /// on it rather than firing responses into a closed pipe.
    pub fn emit<T: Serialize>(&self, response: &T) -> Result<()> {
        let line = serde_json::to_string(response).context("serialize response")?;

        // Outbound wire echo for operators.
        tracing::debug!("-> {line}");

        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        out.write_all(line.as_bytes())
            .and_then(|()| out.write_all(b"\n"))
            .and_then(|()| out.flush())
            .context("write response")?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{InitAck, Response};

    /// Cloneable capture buffer for emitted lines.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().unwrap().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    #[test]
    fn test_one_line_per_emit() {
        let buf = SharedBuf::default();
        let emitter = ResponseEmitter::new(Box::new(buf.clone()));

        emitter.emit(&InitAck::ok()).unwrap();
        emitter.emit(&Response::upload_complete("abc")).unwrap();

        let lines = buf.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "{}");
        assert_eq!(lines[1], r#"{"event":"complete","oid":"abc"}"#);
    }

    #[test]
    fn test_concurrent_emits_never_interleave() {
        let buf = SharedBuf::default();
        let emitter = ResponseEmitter::new(Box::new(buf.clone()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let emitter = emitter.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let oid = format!("oid-{i}-{j}");
                        emitter.emit(&Response::progress(&oid, j, 1)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = buf.lines();
        assert_eq!(lines.len(), 8 * 50);
        for line in lines {
            // Every line must be a complete, independently parseable object.
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            assert_eq!(value["event"], "progress");
        }
    }

    #[test]
    fn test_write_failure_surfaces_as_error() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::other("pipe closed"))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let emitter = ResponseEmitter::new(Box::new(Broken));
        assert!(emitter.emit(&InitAck::ok()).is_err());
    }
}
