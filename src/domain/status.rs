use std::fmt;

/// Lifecycle of a single retrieval.
///
/// Statuses only move forward. `Complete`, `Error` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrievalStatus {
    NotStarted,
    Started,
    Connecting,
    Reading,
    Complete,
    Error,
    Cancelled,
}

impl RetrievalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RetrievalStatus::Complete | RetrievalStatus::Error | RetrievalStatus::Cancelled
        )
    }

    fn rank(self) -> u8 {
        match self {
            RetrievalStatus::NotStarted => 0,
            RetrievalStatus::Started => 1,
            RetrievalStatus::Connecting => 2,
            RetrievalStatus::Reading => 3,
            RetrievalStatus::Complete | RetrievalStatus::Error | RetrievalStatus::Cancelled => 4,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    pub fn can_advance_to(self, next: RetrievalStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalStatus::NotStarted => "not-started",
            RetrievalStatus::Started => "started",
            RetrievalStatus::Connecting => "connecting",
            RetrievalStatus::Reading => "reading",
            RetrievalStatus::Complete => "complete",
            RetrievalStatus::Error => "error",
            RetrievalStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RetrievalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
