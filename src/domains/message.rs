use bytes::Bytes;

/// A single pub/sub frame. Used for both directions: inbound requests carry
/// the caller's reply inbox in `reply_to`, outbound responses leave it empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub reply_to: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            reply_to: String::new(),
            payload: payload.into(),
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = reply_to.into();
        self
    }
}
