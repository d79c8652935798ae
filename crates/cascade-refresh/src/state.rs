//! Per-invocation refresh state machine.

use std::fmt;

/// Phases of one refresh invocation.
///
/// Transitions are deterministic:
/// `Init -> Gated -> Expanded -> Ordered -> Executing -> Done`; any error
/// aborts to `Failed` and surfaces to the caller for rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Init,
    Gated,
    Expanded,
    Ordered,
    Executing,
    Done,
    Failed,
}

impl RefreshPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Gated => "gated",
            Self::Expanded => "expanded",
            Self::Ordered => "ordered",
            Self::Executing => "executing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
