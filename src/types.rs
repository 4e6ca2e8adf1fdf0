use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event name carried by every phase broadcast.
pub const PHASE_CHANGE_EVENT: &str = "phase_change";

/// Opaque identifier of a raffle event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct RaffleId(String);

impl RaffleId {
    pub fn new(id: impl Into<String>) -> Self {
        RaffleId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RaffleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RaffleId {
    fn from(id: &str) -> Self {
        RaffleId::new(id)
    }
}

/// Identity of one mounted session, used to drop our own broadcast echoes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn random() -> Self {
        ClientId(Uuid::new_v4())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stages of the draw choreography, in canonical order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DrawPhase {
    Waiting,
    Round1,
    Round2,
    Round3,
    Finished,
}

impl DrawPhase {
    pub const ALL: [DrawPhase; 5] = [
        DrawPhase::Waiting,
        DrawPhase::Round1,
        DrawPhase::Round2,
        DrawPhase::Round3,
        DrawPhase::Finished,
    ];

    /// The phase the driver advances to once this one's dwell elapses.
    /// Only rounds have a successor; `Waiting` is left by a launch and
    /// `Finished` is terminal.
    pub fn next(self) -> Option<DrawPhase> {
        match self {
            DrawPhase::Round1 => Some(DrawPhase::Round2),
            DrawPhase::Round2 => Some(DrawPhase::Round3),
            DrawPhase::Round3 => Some(DrawPhase::Finished),
            DrawPhase::Waiting | DrawPhase::Finished => None,
        }
    }

    pub fn is_round(self) -> bool {
        matches!(self, DrawPhase::Round1 | DrawPhase::Round2 | DrawPhase::Round3)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DrawPhase::Waiting => "waiting",
            DrawPhase::Round1 => "round1",
            DrawPhase::Round2 => "round2",
            DrawPhase::Round3 => "round3",
            DrawPhase::Finished => "finished",
        }
    }
}

impl fmt::Display for DrawPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrawPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DrawPhase::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| format!("unknown draw phase: {:?}", s))
    }
}

/// What one client currently shows.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawState {
    pub is_open: bool,
    pub phase: DrawPhase,
}

impl DrawState {
    pub const IDLE: DrawState = DrawState {
        is_open: false,
        phase: DrawPhase::Waiting,
    };

    pub fn open(phase: DrawPhase) -> Self {
        DrawState {
            is_open: true,
            phase,
        }
    }
}

impl Default for DrawState {
    fn default() -> Self {
        DrawState::IDLE
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Live,
    Completed,
}

/// Authoritative read taken when a session mounts.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub live: bool,
    pub has_winner: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Participant {
    pub fn named(name: impl Into<String>) -> Self {
        Participant {
            name: name.into(),
            avatar_url: None,
        }
    }
}

/// One podium place, as stored by the draw service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WinnerEntry {
    pub rank: u32,
    pub ticket_number: String,
    pub participant: Participant,
}

/// Reply of the draw and reset procedures.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DrawOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DrawOutcome {
    pub fn ok() -> Self {
        DrawOutcome {
            success: true,
            message: None,
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        DrawOutcome {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseEvent {
    pub phase: DrawPhase,
}

/// A message on a raffle's broadcast channel.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    pub event: String,
    pub origin: ClientId,
    pub payload: PhaseEvent,
}

impl Envelope {
    pub fn phase_change(origin: ClientId, phase: DrawPhase) -> Self {
        Envelope {
            event: PHASE_CHANGE_EVENT.to_string(),
            origin,
            payload: PhaseEvent { phase },
        }
    }

    pub fn is_phase_change(&self) -> bool {
        self.event == PHASE_CHANGE_EVENT
    }
}

/// Result list as the UI should render it.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum WinnersView {
    /// Not in `finished`, or the read is still in flight.
    #[default]
    Pending,
    NoWinners,
    Podium(Vec<WinnerEntry>),
    Failed(String),
}

impl WinnersView {
    pub fn entries(&self) -> &[WinnerEntry] {
        match self {
            WinnersView::Podium(entries) => entries,
            _ => &[],
        }
    }
}

/// Transient notifications for the UI layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrawNotice {
    Celebrate { winners: usize },
    FetchFailed { message: String },
}
