use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;

use crate::config::AnimatorConfig;
use crate::schedule::TaskHandle;
use crate::types::DrawState;
use crate::LOG_TARGET;

/// Decorative "slot machine" number shown while the rounds run.
///
/// Each client animates on its own; the value never says anything about
/// the winning ticket.
pub struct Animator {
    number: watch::Receiver<Option<u32>>,
    _task: TaskHandle,
}

impl Animator {
    pub fn start(state: watch::Receiver<DrawState>, config: AnimatorConfig) -> Self {
        let (tx, rx) = watch::channel(None);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Animator {
            number: rx,
            _task: TaskHandle::spawn(run(state, tx, config, rng)),
        }
    }

    /// The number currently on screen, `None` before the first tick.
    pub fn current(&self) -> Option<u32> {
        *self.number.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<Option<u32>> {
        self.number.clone()
    }
}

async fn run(
    mut state: watch::Receiver<DrawState>,
    number: watch::Sender<Option<u32>>,
    config: AnimatorConfig,
    mut rng: StdRng,
) {
    loop {
        let phase = state.borrow_and_update().phase;
        match config.tick(phase) {
            Some(delay) => {
                tokio::select! {
                    // A phase change always wins over a tick that is due at the
                    // same instant, so nothing ticks after leaving the rounds.
                    biased;
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {
                        number.send_replace(Some(rng.gen_range(config.min..=config.max)));
                    }
                }
            }
            None => {
                tracing::debug!(target: LOG_TARGET, %phase, "animator idle");
                if state.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DrawPhase;
    use std::time::Duration;

    fn seeded() -> AnimatorConfig {
        AnimatorConfig {
            seed: Some(42),
            ..AnimatorConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_while_waiting() {
        let (_state_tx, state_rx) = watch::channel(DrawState::IDLE);
        let animator = Animator::start(state_rx, seeded());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(animator.current(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_stay_in_bounds() {
        let (state_tx, state_rx) = watch::channel(DrawState::IDLE);
        let config = AnimatorConfig {
            min: 10,
            max: 20,
            ..seeded()
        };
        let animator = Animator::start(state_rx, config);
        let mut numbers = animator.watch();

        state_tx.send_replace(DrawState::open(DrawPhase::Round1));
        let mut seen = 0;
        while seen < 50 {
            numbers.changed().await.unwrap();
            let value = numbers.borrow_and_update().unwrap();
            assert!((10..=20).contains(&value), "out of range: {}", value);
            seen += 1;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_rate_follows_round() {
        let (state_tx, state_rx) = watch::channel(DrawState::open(DrawPhase::Round3));
        let animator = Animator::start(state_rx, seeded());
        let mut numbers = animator.watch();
        tokio::time::sleep(Duration::from_millis(1)).await;

        // Round 3 ticks every 150ms: nothing lands before that.
        tokio::time::sleep(Duration::from_millis(140)).await;
        assert!(!numbers.has_changed().unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(numbers.has_changed().unwrap());
        numbers.borrow_and_update();

        state_tx.send_replace(DrawState::open(DrawPhase::Round1));
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(numbers.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_tick_after_finished() {
        let (state_tx, state_rx) = watch::channel(DrawState::open(DrawPhase::Round2));
        let animator = Animator::start(state_rx, seeded());
        let mut numbers = animator.watch();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(animator.current().is_some());

        state_tx.send_replace(DrawState::open(DrawPhase::Finished));
        tokio::time::sleep(Duration::from_millis(1)).await;
        numbers.borrow_and_update();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!numbers.has_changed().unwrap());

        state_tx.send_replace(DrawState::IDLE);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!numbers.has_changed().unwrap());
    }
}
