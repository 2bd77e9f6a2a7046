//! Decrypt attempt state machine.
//!
//! ```text
//!   First ──(recoverable error)──► rebuild ──► Retry ──(any error)──► terminal
//!     │                                          │
//!     └──(ok / terminal error)──► done           └──(ok)──► done
//! ```
//!
//! [`Attempt::next`] returns `None` after [`Attempt::Retry`], which bounds the
//! decrypt loop to two iterations.

use std::fmt;

/// Which decrypt attempt is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attempt {
    /// The initial attempt
    First,
    /// The single attempt after a session rebuild
    Retry,
}

impl Attempt {
    /// The attempt after this one, if any
    pub fn next(self) -> Option<Attempt> {
        match self {
            Attempt::First => Some(Attempt::Retry),
            Attempt::Retry => None,
        }
    }

    /// Whether this is the initial attempt
    pub fn is_first(self) -> bool {
        self == Attempt::First
    }
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attempt::First => f.write_str("first"),
            Attempt::Retry => f.write_str("retry"),
        }
    }
}
