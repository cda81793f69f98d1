//! git-lfs custom transfer agent for S3-compatible object stores.
//!
//! The agent is spawned by git-lfs and speaks the custom transfer protocol
//! (newline-delimited JSON) over stdio:
//!
//! ```text
//! stdin --> decoder --> Event --> session --> blob store I/O
//!                                    |        (progress relay)
//! stdout <-- emitter <-- Response <--+
//! ```
//!
//! Module map: [`protocol`] carries the wire types plus the decoder and
//! emitter, [`progress`] the read-through progress decorator, [`store`] the
//! S3 collaborator, and [`session`] the dispatch loop tying them together.

pub mod progress;
pub mod protocol;
pub mod session;
pub mod store;
