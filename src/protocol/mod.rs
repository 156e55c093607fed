/// Protocol types for RPC message correlation and serialization
///
/// This module defines the wire format for request/reply envelopes and the
/// codec used on both legs of a call.
mod codec;
mod envelope;

pub use codec::{decode, encode};
pub use envelope::{Envelope, ErrorDetail, ErrorPayload};
