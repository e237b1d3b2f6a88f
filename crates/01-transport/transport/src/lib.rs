//! Message-passing substrate underneath the world runtime.
//!
//! This crate exposes the pieces a process group needs from its transport:
//! * [`Universe`] – the fixed set of processes sharing one abort domain.
//! * [`Comm`] – a process's endpoint: rank/size, non-blocking sends, polled
//!   tag-matched receives.
//! * [`SendRequest`] – pollable completion handle for an outstanding send.
//! * [`Envelope`] – tag/version/flags metadata carried with each packet.
//! * [`TransportError`] – small error surface for addressing and aborts.

mod comm;
mod envelope;
mod error;

pub use comm::{Comm, Packet, Rank, SendRequest, Universe};
pub use envelope::Envelope;
pub use error::{TransportError, TransportResult};
