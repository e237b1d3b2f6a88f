//! Codecs for world runtime traffic.
//!
//! Frames and user values are archived with rkyv and validated with
//! bytecheck on the way in. [`Wire`] is implemented for every type rkyv can
//! archive, so active-message arguments and collective operands need no
//! hand-written codec.

use rkyv::{
    api::high::{from_bytes, to_bytes, HighSerializer, HighValidator},
    bytecheck::CheckBytes,
    de::Pool,
    rancor::{Error, Strategy},
    ser::allocator::ArenaHandle,
    util::AlignedVec,
    Archive, Deserialize, Serialize,
};
use thiserror::Error;
use transport::Envelope;

pub mod schema;

pub use schema::{
    AmFrameV1, WorldRef, SCHEMA_VERSION_V1, TAG_AM, TAG_GOP_BCAST, TAG_GOP_REDUCE,
};

pub type CodecResult<T> = Result<T, CodecError>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialize failure: {0}")]
    Serialize(String),

    #[error("validation failure: {0}")]
    Validate(String),

    #[error("unexpected envelope tag {found:#04x} (expected {expected:#04x})")]
    UnexpectedTag { found: u8, expected: u8 },

    #[error("schema version mismatch: {found} vs {expected}")]
    Version { found: u8, expected: u8 },
}

/// Value that can travel inside a frame.
pub trait Wire: Sized {
    fn to_wire(&self) -> CodecResult<Vec<u8>>;
    fn from_wire(bytes: &[u8]) -> CodecResult<Self>;
}

impl<T> Wire for T
where
    T: Archive,
    T: for<'a> Serialize<HighSerializer<AlignedVec, ArenaHandle<'a>, Error>>,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, Error>> + Deserialize<T, Strategy<Pool, Error>>,
{
    fn to_wire(&self) -> CodecResult<Vec<u8>> {
        to_bytes::<Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(|err| CodecError::Serialize(err.to_string()))
    }

    fn from_wire(bytes: &[u8]) -> CodecResult<Self> {
        // Payload buffers carry no alignment guarantee; validation needs one.
        let mut aligned: AlignedVec = AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        from_bytes::<T, Error>(&aligned).map_err(|err| CodecError::Validate(err.to_string()))
    }
}

/// Encodes an active-message frame.
pub fn encode_am(handler: u32, body: Vec<u8>) -> CodecResult<(Envelope, Vec<u8>)> {
    let frame = AmFrameV1 { handler, body };
    Ok((Envelope::new(TAG_AM, SCHEMA_VERSION_V1), frame.to_wire()?))
}

/// Decodes an active-message frame after checking its envelope.
pub fn decode_am(envelope: Envelope, payload: &[u8]) -> CodecResult<AmFrameV1> {
    ensure_tag(envelope, TAG_AM)?;
    AmFrameV1::from_wire(payload)
}

/// Checks that `envelope` carries `expected` under the current schema.
pub fn ensure_tag(envelope: Envelope, expected: u8) -> CodecResult<()> {
    if envelope.tag != expected {
        return Err(CodecError::UnexpectedTag {
            found: envelope.tag,
            expected,
        });
    }
    if envelope.ver != SCHEMA_VERSION_V1 {
        return Err(CodecError::Version {
            found: envelope.ver,
            expected: SCHEMA_VERSION_V1,
        });
    }
    Ok(())
}
