//! Wire protocol: envelope types, the JSON envelope codec, and per-channel
//! sequence validation.

mod envelope;
mod sequence;

pub use envelope::{Envelope, EnvelopeCodec, ResponseEnvelope, WireMessage};
pub(crate) use envelope::{family_of, operation_of};
pub use sequence::SequenceValidator;
