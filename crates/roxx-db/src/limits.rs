use chrono::TimeDelta;

/// Retention and expiry settings for the bounded collections.
#[derive(Debug, Clone)]
pub struct Limits {
    /// Newest messages kept; older ones are trimmed on send.
    pub max_messages: usize,
    /// Newest stories kept; older ones are trimmed on post.
    pub max_stories: usize,
    /// How long a story stays visible.
    pub story_ttl: TimeDelta,
    /// A ringing call older than this is no longer offered to the receiver.
    pub ring_timeout: TimeDelta,
    /// Calls older than this are purged whatever their status.
    pub call_max_age: TimeDelta,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_messages: 500,
            max_stories: 50,
            story_ttl: TimeDelta::hours(24),
            ring_timeout: TimeDelta::seconds(60),
            call_max_age: TimeDelta::minutes(5),
        }
    }
}
