//! The newline delimited wire format streamed from the relay to the consumer, and the
//! line splitting shared with the provider event streams.
pub mod decoder;
pub mod frame;
pub mod lines;
pub mod protocol;

pub use decoder::FrameDecoder;
pub use frame::{FinishFrame, SseEvent, StreamFrame};
pub use lines::LineBuffer;
pub use protocol::ProtocolFormatter;
