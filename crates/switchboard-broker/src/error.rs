use switchboard_core::ChannelName;

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("unknown channel: {0}")]
    UnknownChannel(ChannelName),

    #[error("declare {channel} failed: {reason}")]
    Declare { channel: ChannelName, reason: String },

    #[error("publish to {channel} failed: {reason}")]
    Publish { channel: ChannelName, reason: String },

    #[error("consume from {channel} failed: {reason}")]
    Consume { channel: ChannelName, reason: String },

    #[error("broker closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BrokerError>;
