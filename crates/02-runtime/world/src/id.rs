use std::fmt;

use rkyv::{Archive, Deserialize, Serialize};

/// Universe-wide identifier of an object: (world id, per-world counter).
///
/// Object id 0 never names anything; [`UniqueId::default`] is that invalid id.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Archive, Serialize,
    Deserialize,
)]
#[rkyv(
    attr(allow(missing_docs), doc = "Archived representation of `UniqueId`."),
    bytecheck()
)]
pub struct UniqueId {
    world_id: u64,
    obj_id: u64,
}

impl UniqueId {
    pub const INVALID: UniqueId = UniqueId {
        world_id: 0,
        obj_id: 0,
    };

    pub(crate) const fn new(world_id: u64, obj_id: u64) -> Self {
        Self { world_id, obj_id }
    }

    pub fn world_id(&self) -> u64 {
        self.world_id
    }

    pub fn obj_id(&self) -> u64 {
        self.obj_id
    }

    pub fn is_valid(&self) -> bool {
        self.obj_id != 0
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}, {}}}", self.world_id, self.obj_id)
    }
}
