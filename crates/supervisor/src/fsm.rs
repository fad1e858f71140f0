//! # Farmer State Machine
//!
//! ```text
//!            online               lost
//!  OFFLINE ─────────▶ ONLINE ─────────▶ LOST
//!     ▲                 │  ▲              │
//!     │     offline     │  └── online ────┤
//!     └─────────────────┴──── offline ────┘
//! ```
//!
//! ## Valid Transitions
//!
//! | Event | From | To |
//! |-------|------|----|
//! | online | OFFLINE, LOST | ONLINE |
//! | offline | ONLINE, LOST | OFFLINE |
//! | lost | ONLINE | LOST |
//!
//! Anything else is rejected and leaves the state untouched.

use std::fmt;

use crate::account::FarmerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FarmerEvent {
    Online,
    Offline,
    Lost,
}

impl fmt::Display for FarmerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FarmerEvent::Online => "online",
            FarmerEvent::Offline => "offline",
            FarmerEvent::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// Destination state for `event` fired in `from`, or `None` if the
/// transition table has no such edge.
pub fn transition(from: FarmerState, event: FarmerEvent) -> Option<FarmerState> {
    use FarmerEvent as E;
    use FarmerState as S;

    match (from, event) {
        (S::Offline | S::Lost, E::Online) => Some(S::Online),
        (S::Online | S::Lost, E::Offline) => Some(S::Offline),
        (S::Online, E::Lost) => Some(S::Lost),
        _ => None,
    }
}

pub fn can(from: FarmerState, event: FarmerEvent) -> bool {
    transition(from, event).is_some()
}
