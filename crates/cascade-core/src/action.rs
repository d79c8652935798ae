//! Write actions that can trigger a derived-column refresh.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of write that occurred on a participating table.
///
/// `Refresh` is a synthetic action used to force recomputation of every
/// derived column on a table without an actual row mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Create,
    Update,
    Delete,
    Refresh,
}

impl Action {
    /// Returns the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Refresh => "REFRESH",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
