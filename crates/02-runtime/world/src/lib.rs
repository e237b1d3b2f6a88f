//! World runtime: process groups with active messages, a dependency-driven
//! task queue, collectives, a universe-wide object registry and deferred
//! cleanup, all driven by one cooperative progress engine per process.
//!
//! ```text
//! Runtime (per process)
//!   └─ World (per communicator)
//!        ├─ am()     handler table, send, delivery on poll
//!        ├─ taskq()  futures, ready queue
//!        ├─ gop()    fence, broadcast, reduce
//!        └─ registry, deferred cleanup, user state
//! ```

pub mod am;
pub mod config;
mod deferred;
pub mod error;
pub mod future;
pub mod gop;
pub mod id;
mod registry;
pub mod runtime;
pub mod taskq;
pub mod world;

pub use am::{ActiveMessages, AmMessage, HandlerId};
pub use config::RuntimeConfig;
pub use error::{TaskError, WorldError, WorldResult};
pub use future::{Dependency, Future};
pub use gop::GlobalOps;
pub use id::UniqueId;
pub use runtime::Runtime;
pub use taskq::{TaskId, TaskQueue, TaskState};
pub use world::{World, WorldStats};

pub use transport_codecs::{Wire, WorldRef};
