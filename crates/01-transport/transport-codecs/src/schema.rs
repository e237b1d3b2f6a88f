//! Wire schema for runtime traffic.
//!
//! Any backward-incompatible change to these types must bump
//! [`SCHEMA_VERSION_V1`]; receivers reject envelopes from other epochs.
#![allow(missing_docs)]

use rkyv::{Archive, Deserialize, Serialize};

/// Schema version for runtime frames.
pub const SCHEMA_VERSION_V1: u8 = 1;

/// Envelope tag for active messages.
pub const TAG_AM: u8 = 0x21;
/// Envelope tag for partial results travelling up a reduction tree.
pub const TAG_GOP_REDUCE: u8 = 0x22;
/// Envelope tag for values travelling down a broadcast tree.
pub const TAG_GOP_BCAST: u8 = 0x23;

/// Active-message frame: handler slot plus the encoded argument bytes.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `AmFrameV1`."),
    bytecheck()
)]
pub struct AmFrameV1 {
    /// Index into the receiving world's handler table.
    pub handler: u32,
    /// Handler argument bytes.
    pub body: Vec<u8>,
}

/// Serialized form of a world reference: just its universe-wide id.
///
/// Decoding is only meaningful on a process that is a member of the world;
/// the runtime resolves it against its list of active worlds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `WorldRef`."),
    bytecheck()
)]
pub struct WorldRef {
    pub world_id: u64,
}

impl WorldRef {
    pub const fn new(world_id: u64) -> Self {
        Self { world_id }
    }
}
