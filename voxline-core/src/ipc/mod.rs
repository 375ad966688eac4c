//! Typed messages crossing the core's boundaries.
//!
//! - `protocol`: transport events exchanged with the assistant backend.
//! - `events`: lifecycle and conversation events emitted to the host.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them as JSON.

pub mod events;
pub mod protocol;
