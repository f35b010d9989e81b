pub mod envelope;
pub mod frames;
pub mod ids;
pub mod routing;

pub use envelope::{Envelope, EnvelopeError};
pub use frames::{ApiResponse, FrameError, InboundFrame, MessageType, OutboundFrame, Status};
pub use ids::{ConnectionId, SessionId};
pub use routing::ChannelName;
