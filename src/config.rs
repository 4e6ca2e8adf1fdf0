use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DrawError, Result};
use crate::types::{DrawPhase, RaffleId};

/// Dwell time per round, used by the driver only.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct PhaseTiming {
    pub round1_dwell_ms: u64,
    pub round2_dwell_ms: u64,
    pub round3_dwell_ms: u64,
}

impl Default for PhaseTiming {
    fn default() -> Self {
        PhaseTiming {
            round1_dwell_ms: 3000,
            round2_dwell_ms: 3000,
            round3_dwell_ms: 4000,
        }
    }
}

impl PhaseTiming {
    /// How long the driver stays in `phase` before advancing.
    pub fn dwell(&self, phase: DrawPhase) -> Option<Duration> {
        let ms = match phase {
            DrawPhase::Round1 => self.round1_dwell_ms,
            DrawPhase::Round2 => self.round2_dwell_ms,
            DrawPhase::Round3 => self.round3_dwell_ms,
            DrawPhase::Waiting | DrawPhase::Finished => return None,
        };
        Some(Duration::from_millis(ms))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct AnimatorConfig {
    pub round1_tick_ms: u64,
    pub round2_tick_ms: u64,
    pub round3_tick_ms: u64,
    pub min: u32,
    pub max: u32,
    /// Fixed seed for the scrolling numbers; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for AnimatorConfig {
    fn default() -> Self {
        AnimatorConfig {
            round1_tick_ms: 30,
            round2_tick_ms: 80,
            round3_tick_ms: 150,
            min: 1,
            max: 9999,
            seed: None,
        }
    }
}

impl AnimatorConfig {
    pub fn tick(&self, phase: DrawPhase) -> Option<Duration> {
        let ms = match phase {
            DrawPhase::Round1 => self.round1_tick_ms,
            DrawPhase::Round2 => self.round2_tick_ms,
            DrawPhase::Round3 => self.round3_tick_ms,
            DrawPhase::Waiting | DrawPhase::Finished => return None,
        };
        Some(Duration::from_millis(ms))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct DrawConfig {
    pub timing: PhaseTiming,
    pub animator: AnimatorConfig,
    pub channel_prefix: String,
    /// Whether mounting onto an already completed draw opens the draw view.
    pub open_on_completed: bool,
}

impl Default for DrawConfig {
    fn default() -> Self {
        DrawConfig {
            timing: PhaseTiming::default(),
            animator: AnimatorConfig::default(),
            channel_prefix: "raffle_draw_".to_string(),
            open_on_completed: false,
        }
    }
}

impl DrawConfig {
    /// Parse and validate a JSON document. Missing keys take their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: DrawConfig =
            serde_json::from_str(raw).map_err(|err| DrawError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let rounds = [DrawPhase::Round1, DrawPhase::Round2, DrawPhase::Round3];
        for phase in rounds {
            if self.timing.dwell(phase).map_or(true, |d| d.is_zero()) {
                return Err(DrawError::Config(format!("{} dwell must be non-zero", phase)));
            }
            if self.animator.tick(phase).map_or(true, |d| d.is_zero()) {
                return Err(DrawError::Config(format!("{} tick must be non-zero", phase)));
            }
        }
        if self.animator.min == 0 || self.animator.min > self.animator.max {
            return Err(DrawError::Config(format!(
                "animator range {}..={} is empty or starts at zero",
                self.animator.min, self.animator.max
            )));
        }
        if self.channel_prefix.is_empty() {
            return Err(DrawError::Config("channel prefix is empty".to_string()));
        }
        Ok(())
    }

    /// Name of the broadcast channel every client of `raffle` joins.
    pub fn channel_name(&self, raffle: &RaffleId) -> String {
        format!("{}{}", self.channel_prefix, raffle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DrawConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timing.dwell(DrawPhase::Round1), Some(Duration::from_millis(3000)));
        assert_eq!(config.timing.dwell(DrawPhase::Round3), Some(Duration::from_millis(4000)));
        assert_eq!(config.timing.dwell(DrawPhase::Finished), None);
        assert_eq!(config.animator.tick(DrawPhase::Round2), Some(Duration::from_millis(80)));
        assert_eq!(config.animator.tick(DrawPhase::Waiting), None);
        assert_eq!(config.channel_name(&RaffleId::new("raffle-42")), "raffle_draw_raffle-42");
    }

    #[test]
    fn test_partial_json() {
        let config =
            DrawConfig::from_json(r#"{"timing":{"round3_dwell_ms":500},"open_on_completed":true}"#)
                .unwrap();
        assert_eq!(config.timing.round1_dwell_ms, 3000);
        assert_eq!(config.timing.round3_dwell_ms, 500);
        assert!(config.open_on_completed);
        assert_eq!(config.animator.max, 9999);
    }

    #[test]
    fn test_rejects_bad_config() {
        let zero_dwell = DrawConfig::from_json(r#"{"timing":{"round2_dwell_ms":0}}"#);
        assert!(matches!(zero_dwell, Err(DrawError::Config(_))));

        let empty_range = DrawConfig::from_json(r#"{"animator":{"min":10,"max":5}}"#);
        assert!(matches!(empty_range, Err(DrawError::Config(_))));

        let garbage = DrawConfig::from_json("not json");
        assert!(matches!(garbage, Err(DrawError::Config(_))));
    }
}
