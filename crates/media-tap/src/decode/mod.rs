//! Asynchronous decoding: sources, the backend contract, the session state
//! machine and the bundled symphonia backend.

pub mod backend;
pub mod queue;
pub mod session;
pub mod source;
pub mod symphonia;

pub use backend::{BackendMessage, DecodeBackend, DecodeRequest, DecodeSink};
pub use queue::BufferQueue;
pub use session::{DecodeEvent, DecodeSession};
pub use source::{DecodeSource, StreamHandle};
pub use symphonia::SymphoniaBackend;
