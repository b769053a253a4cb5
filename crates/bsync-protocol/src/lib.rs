//! Wire types for bsync.
//!
//! Defines the build operations, the framed relink entry stream, the
//! transport-neutral request/response envelopes, and the structured build
//! result returned by the service.

pub mod codec;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod operation;
pub mod relink;
pub mod result;

pub use codec::RelinkCodec;
pub use endpoint::{content_types, endpoints, headers, params};
pub use envelope::{Method, TransportRequest, TransportResponse};
pub use error::{ProtocolError, ProtocolResult};
pub use operation::Operation;
pub use relink::{RelinkEntry, MAX_FRAME_SIZE};
pub use result::{Availability, BuildResult};
