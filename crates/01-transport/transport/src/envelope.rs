/// Metadata travelling with each packet.
///
/// The envelope lets receivers match on message class (`tag`), enforce
/// schema compatibility (`ver`), and carry a small sequence or flag word
/// without touching the payload bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Envelope {
    /// Application-defined discriminant used for receive matching.
    pub tag: u8,
    /// Schema epoch associated with this payload.
    pub ver: u8,
    /// Free-form bits; collectives store their sequence number here.
    pub flags: u16,
}

impl Envelope {
    /// Constructs an envelope with the given tag and schema version.
    pub const fn new(tag: u8, ver: u8) -> Self {
        Self { tag, ver, flags: 0 }
    }

    /// Returns a copy carrying `flags`.
    pub const fn with_flags(self, flags: u16) -> Self {
        Self {
            tag: self.tag,
            ver: self.ver,
            flags,
        }
    }
}
