//! The wire model shared by the xs edge and controller runtimes.
//!
//! Everything crossing the broker is UTF-8 JSON. This crate owns the topic
//! taxonomy (`xsedge/…` upstream, `xsctrl/…` downstream) and the payload
//! shapes, so the two runtimes cannot drift apart.

mod messages;
mod rules;
pub mod topics;

pub use messages::*;
pub use rules::*;
