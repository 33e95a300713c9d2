use bytes::Bytes;
use std::collections::VecDeque;

/// A stored value: either a single byte string or an ordered list of
/// byte strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
        }
    }
}

/// A stored value together with its absolute expiration.
///
/// `expires_at_ms == 0` means "no expiration"; any other value is an
/// absolute Unix-epoch millisecond timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Value,
    pub expires_at_ms: u64,
}

impl Entry {
    pub fn has_expiry(&self) -> bool {
        self.expires_at_ms > 0
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.has_expiry() && self.expires_at_ms <= now_ms
    }
}
