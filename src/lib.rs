//! Live raffle draw choreography.
//!
//! An organizer ([`Driver`]) runs the draw on the hosted service, then walks
//! every connected client through `round1 -> round2 -> round3 -> finished`
//! over a per-raffle broadcast channel. [`Spectator`]s only mirror what they
//! receive. Each client reads the ranked winners on its own once it reaches
//! `finished`.
//!
//! Delivery is best-effort. A client that misses broadcasts stays on its last
//! phase until the next one arrives; the snapshot read at mount is the only
//! catch-up mechanism.

/// Build a [`DrawError::Rejected`] concisely.
macro_rules! refused {
    ($msg:literal $(, $ex:expr)*) => {
        $crate::error::DrawError::Rejected(format!($msg, $($ex,)*))
    };
}

mod animator;
mod backend;
mod config;
mod error;
mod relay;
mod schedule;
mod session;
mod types;

pub use crate::animator::Animator;
pub use crate::backend::{DrawBackend, MemoryBackend};
pub use crate::config::{AnimatorConfig, DrawConfig, PhaseTiming};
pub use crate::error::{DrawError, Result};
pub use crate::relay::{DrawChannel, LocalRelay, PhaseRelay};
pub use crate::schedule::TaskHandle;
pub use crate::session::{DrawSession, Driver, Spectator};
pub use crate::types::*;

/// Log target for everything this crate emits.
pub const LOG_TARGET: &str = "raffle_live_draw";
