//! Newtype identifiers threaded through the intake pipeline.

use std::fmt;

/// 32-bit session identifier assigned by the plugin worker. `0` is reserved
/// to mean "corrupted / unknown" and must never be used as a live key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u32);

impl SessionId {
    pub const UNKNOWN: SessionId = SessionId(0);

    pub fn is_unknown(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(value: u32) -> Self {
        SessionId(value)
    }
}

/// Per-instance unique id a plugin worker presents on both the registration
/// and the per-worker handshake path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration scope shared by a group of plugin workers (typically per
/// container). The empty family id is a sentinel meaning "no family
/// tracking requested."
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FamilyId(pub String);

impl FamilyId {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_zero_is_unknown() {
        assert!(SessionId::UNKNOWN.is_unknown());
        assert!(SessionId(0).is_unknown());
        assert!(!SessionId(1).is_unknown());
    }
}
