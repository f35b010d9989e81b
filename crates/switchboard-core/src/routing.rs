use std::fmt;

use crate::ids::SessionId;

/// Name of the shared inbound channel every connection publishes into.
pub const PULL_CHANNEL: &str = "pull";

/// Prefix of per-session delivery channels.
pub const PUSH_PREFIX: &str = "push.";

/// Name of a broker-side channel.
///
/// Names are derived deterministically: `pull` for the shared inbound channel
/// and `push.<session id>` for each session's delivery channel. Session ids are
/// hex digests, so two distinct ids never produce the same name.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn pull() -> Self {
        Self(PULL_CHANNEL.to_string())
    }

    pub fn push(session_id: &SessionId) -> Self {
        Self(format!("{PUSH_PREFIX}{session_id}"))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// AMQP exchange backing this channel.
    pub fn exchange(&self) -> String {
        format!("x.{}", self.0)
    }

    /// AMQP queue backing this channel.
    pub fn queue(&self) -> String {
        format!("q.{}", self.0)
    }

    pub fn is_push(&self) -> bool {
        self.0.starts_with(PUSH_PREFIX)
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
