//! Wire types for the git-lfs custom transfer protocol.
//!
//! <https://github.com/git-lfs/git-lfs/blob/main/docs/custom-transfers.md>
//!
//! One JSON object per line in each direction. Inbound lines are
//! discriminated by the `event` field; outbound lines are either the
//! handshake acknowledgement or `complete`/`progress` records.

pub mod decoder;
pub mod emitter;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// Inbound events
// =============================================================================

/// Events the peer may send, one per line.
///
/// The client may attach fields we do not model (notably the optional
/// `action {href, header}` object on transfer requests); decoding ignores
/// unknown fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Event {
    /// Handshake, sent exactly once before any transfer request.
    Init {
        operation: String,
        remote: String,
        #[serde(default)]
        concurrent: bool,
        #[serde(default)]
        concurrenttransfers: u32,
    },
    /// Transfer the file at `path` into the store under `oid`.
    Upload {
        oid: String,
        size: u64,
        path: PathBuf,
    },
    /// Fetch the object stored under `oid`.
    Download { oid: String, size: u64 },
    /// End of session; no further events follow.
    Terminate,
}

// =============================================================================
// Outbound responses
// =============================================================================

/// Wire error object carried by init failures and failed completes.
/// The peer only displays the message; the code is fixed at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
}

impl WireError {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            code: 1,
            message: format!("{err:#}"),
        }
    }
}

/// Handshake acknowledgement: `{}` on success, `{"error":{...}}` on failure.
#[derive(Debug, Serialize)]
pub struct InitAck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl InitAck {
    pub fn ok() -> Self {
        Self { error: None }
    }

    pub fn failed(err: &anyhow::Error) -> Self {
        Self {
            error: Some(WireError::from_error(err)),
        }
    }
}

/// Per-transfer responses. For a given OID, zero or more `progress` lines
/// are emitted strictly before its single `complete` line.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Response {
    Complete {
        oid: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        oid: String,
        bytes_so_far: u64,
        bytes_since_last: u64,
    },
}

impl Response {
    pub fn upload_complete(oid: &str) -> Self {
        Response::Complete {
            oid: oid.to_string(),
            path: None,
            error: None,
        }
    }

    pub fn download_complete(oid: &str, path: &Path) -> Self {
        Response::Complete {
            oid: oid.to_string(),
            path: Some(path.to_path_buf()),
            error: None,
        }
    }

    pub fn transfer_error(oid: &str, err: &anyhow::Error) -> Self {
        Response::Complete {
            oid: oid.to_string(),
            path: None,
            error: Some(WireError::from_error(err)),
        }
    }

    pub fn progress(oid: &str, bytes_so_far: u64, bytes_since_last: u64) -> Self {
        Response::Progress {
            oid: oid.to_string(),
            bytes_so_far,
            bytes_since_last,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
