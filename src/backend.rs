use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{Mutex, RwLock};

use crate::types::{
    DrawOutcome, Participant, RaffleId, SessionSnapshot, SessionStatus, WinnerEntry,
};

/// The hosted draw service. Winner selection, ranking and every balance or
/// ticket invariant live behind this trait; sessions only call and read.
pub trait DrawBackend: Send + Sync + 'static {
    /// Select and rank the winners of `raffle`. The session is `live` from
    /// here until [`DrawBackend::complete_draw`].
    fn conduct_draw(
        &self,
        raffle: &RaffleId,
    ) -> impl Future<Output = anyhow::Result<DrawOutcome>> + Send;

    /// Mark a live draw `completed` once its rounds have played out.
    fn complete_draw(
        &self,
        raffle: &RaffleId,
    ) -> impl Future<Output = anyhow::Result<DrawOutcome>> + Send;

    /// Clear every rank assigned to `raffle`.
    fn reset_draw(
        &self,
        raffle: &RaffleId,
    ) -> impl Future<Output = anyhow::Result<DrawOutcome>> + Send;

    fn session_snapshot(
        &self,
        raffle: &RaffleId,
    ) -> impl Future<Output = anyhow::Result<SessionSnapshot>> + Send;

    /// All ranked entries of `raffle`, rank ascending.
    fn fetch_winners(
        &self,
        raffle: &RaffleId,
    ) -> impl Future<Output = anyhow::Result<Vec<WinnerEntry>>> + Send;
}

#[derive(Clone, Debug)]
struct Ticket {
    number: String,
    holder: Participant,
    rank: Option<u32>,
}

#[derive(Debug)]
struct RaffleRecord {
    status: SessionStatus,
    winners_num: u32,
    tickets: Vec<Ticket>,
}

impl RaffleRecord {
    fn new() -> Self {
        RaffleRecord {
            status: SessionStatus::Idle,
            winners_num: 1,
            tickets: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct CallCounts {
    draws: AtomicUsize,
    completions: AtomicUsize,
    resets: AtomicUsize,
    snapshots: AtomicUsize,
    winner_reads: AtomicUsize,
}

/// In-process draw service used by tests and local demos.
pub struct MemoryBackend {
    raffles: RwLock<HashMap<RaffleId, RaffleRecord>>,
    rng: Mutex<StdRng>,
    calls: CallCounts,
    failures: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend::with_rng(StdRng::from_entropy())
    }

    pub fn seeded(seed: u64) -> Self {
        MemoryBackend::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        MemoryBackend {
            raffles: RwLock::new(HashMap::new()),
            rng: Mutex::new(rng),
            calls: CallCounts::default(),
            failures: AtomicUsize::new(0),
        }
    }

    /// Register sold tickets for `raffle`.
    pub async fn add_tickets<I>(&self, raffle: &RaffleId, tickets: I)
    where
        I: IntoIterator<Item = (String, Participant)>,
    {
        let mut raffles = self.raffles.write().await;
        let record = raffles.entry(raffle.clone()).or_insert_with(RaffleRecord::new);
        record.tickets.extend(tickets.into_iter().map(|(number, holder)| Ticket {
            number,
            holder,
            rank: None,
        }));
    }

    pub async fn set_winners_num(&self, raffle: &RaffleId, winners_num: u32) {
        let mut raffles = self.raffles.write().await;
        raffles
            .entry(raffle.clone())
            .or_insert_with(RaffleRecord::new)
            .winners_num = winners_num.max(1);
    }

    pub async fn set_status(&self, raffle: &RaffleId, status: SessionStatus) {
        let mut raffles = self.raffles.write().await;
        raffles.entry(raffle.clone()).or_insert_with(RaffleRecord::new).status = status;
    }

    pub async fn status(&self, raffle: &RaffleId) -> SessionStatus {
        let raffles = self.raffles.read().await;
        raffles.get(raffle).map_or(SessionStatus::Idle, |r| r.status)
    }

    /// Make the next `n` calls fail as if the service were unreachable.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn draw_calls(&self) -> usize {
        self.calls.draws.load(Ordering::SeqCst)
    }

    pub fn completion_calls(&self) -> usize {
        self.calls.completions.load(Ordering::SeqCst)
    }

    pub fn reset_calls(&self) -> usize {
        self.calls.resets.load(Ordering::SeqCst)
    }

    pub fn snapshot_calls(&self) -> usize {
        self.calls.snapshots.load(Ordering::SeqCst)
    }

    pub fn winner_reads(&self) -> usize {
        self.calls.winner_reads.load(Ordering::SeqCst)
    }

    fn injected_failure(&self, call: &str) -> anyhow::Result<()> {
        let armed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(anyhow!("{}: service unavailable", call));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend::new()
    }
}

impl DrawBackend for MemoryBackend {
    async fn conduct_draw(&self, raffle: &RaffleId) -> anyhow::Result<DrawOutcome> {
        self.calls.draws.fetch_add(1, Ordering::SeqCst);
        self.injected_failure("conduct_draw")?;

        let mut raffles = self.raffles.write().await;
        let Some(record) = raffles.get_mut(raffle) else {
            return Ok(DrawOutcome::refused("no tickets sold"));
        };
        match record.status {
            SessionStatus::Live => return Ok(DrawOutcome::refused("a draw is already running")),
            SessionStatus::Completed => {
                return Ok(DrawOutcome::refused("all winners have been drawn"))
            }
            SessionStatus::Idle => {}
        }
        if record.tickets.is_empty() {
            return Ok(DrawOutcome::refused("no tickets sold"));
        }

        let mut order: Vec<usize> = (0..record.tickets.len()).collect();
        order.shuffle(&mut *self.rng.lock().await);
        for (place, idx) in order.into_iter().take(record.winners_num as usize).enumerate() {
            record.tickets[idx].rank = Some(place as u32 + 1);
        }
        record.status = SessionStatus::Live;
        Ok(DrawOutcome::ok())
    }

    async fn complete_draw(&self, raffle: &RaffleId) -> anyhow::Result<DrawOutcome> {
        self.calls.completions.fetch_add(1, Ordering::SeqCst);
        self.injected_failure("complete_draw")?;

        let mut raffles = self.raffles.write().await;
        match raffles.get_mut(raffle) {
            Some(record) if record.status == SessionStatus::Live => {
                record.status = SessionStatus::Completed;
                Ok(DrawOutcome::ok())
            }
            Some(record) if record.status == SessionStatus::Completed => Ok(DrawOutcome::ok()),
            _ => Ok(DrawOutcome::refused("no live draw to complete")),
        }
    }

    async fn reset_draw(&self, raffle: &RaffleId) -> anyhow::Result<DrawOutcome> {
        self.calls.resets.fetch_add(1, Ordering::SeqCst);
        self.injected_failure("reset_draw")?;

        let mut raffles = self.raffles.write().await;
        if let Some(record) = raffles.get_mut(raffle) {
            record.tickets.iter_mut().for_each(|t| t.rank = None);
            record.status = SessionStatus::Idle;
        }
        Ok(DrawOutcome::ok())
    }

    async fn session_snapshot(&self, raffle: &RaffleId) -> anyhow::Result<SessionSnapshot> {
        self.calls.snapshots.fetch_add(1, Ordering::SeqCst);
        self.injected_failure("session_snapshot")?;

        let raffles = self.raffles.read().await;
        Ok(raffles.get(raffle).map_or_else(SessionSnapshot::default, |r| SessionSnapshot {
            live: r.status == SessionStatus::Live,
            has_winner: r.tickets.iter().any(|t| t.rank.is_some()),
        }))
    }

    async fn fetch_winners(&self, raffle: &RaffleId) -> anyhow::Result<Vec<WinnerEntry>> {
        self.calls.winner_reads.fetch_add(1, Ordering::SeqCst);
        self.injected_failure("fetch_winners")?;

        let raffles = self.raffles.read().await;
        let mut winners: Vec<WinnerEntry> = raffles
            .get(raffle)
            .map(|r| {
                r.tickets
                    .iter()
                    .filter_map(|t| {
                        t.rank.map(|rank| WinnerEntry {
                            rank,
                            ticket_number: t.number.clone(),
                            participant: t.holder.clone(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        winners.sort_by_key(|w| w.rank);
        Ok(winners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tickets(n: usize) -> Vec<(String, Participant)> {
        (1..=n)
            .map(|i| (format!("T-{:04}", i), Participant::named(format!("player {}", i))))
            .collect()
    }

    #[tokio::test]
    async fn test_draw_refuses_without_tickets() {
        let backend = MemoryBackend::seeded(7);
        let raffle = RaffleId::new("empty");
        let outcome = backend.conduct_draw(&raffle).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("no tickets sold"));
        assert_eq!(backend.status(&raffle).await, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_draw_ranks_distinct_tickets() {
        let backend = MemoryBackend::seeded(7);
        let raffle = RaffleId::new("r");
        backend.add_tickets(&raffle, tickets(10)).await;
        backend.set_winners_num(&raffle, 3).await;

        assert!(backend.conduct_draw(&raffle).await.unwrap().success);
        assert_eq!(backend.status(&raffle).await, SessionStatus::Live);
        let winners = backend.fetch_winners(&raffle).await.unwrap();
        assert_eq!(winners.iter().map(|w| w.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
        let numbers: std::collections::HashSet<_> =
            winners.iter().map(|w| w.ticket_number.as_str()).collect();
        assert_eq!(numbers.len(), 3);

        let running = backend.conduct_draw(&raffle).await.unwrap();
        assert_eq!(running.message.as_deref(), Some("a draw is already running"));
        assert!(backend.session_snapshot(&raffle).await.unwrap().live);
    }

    #[tokio::test]
    async fn test_complete_only_after_live() {
        let backend = MemoryBackend::seeded(3);
        let raffle = RaffleId::new("r");
        backend.add_tickets(&raffle, tickets(4)).await;
        assert!(!backend.complete_draw(&raffle).await.unwrap().success);

        backend.conduct_draw(&raffle).await.unwrap();
        assert!(backend.complete_draw(&raffle).await.unwrap().success);
        assert_eq!(backend.status(&raffle).await, SessionStatus::Completed);
        let snapshot = backend.session_snapshot(&raffle).await.unwrap();
        assert!(!snapshot.live);
        assert!(snapshot.has_winner);

        let again = backend.conduct_draw(&raffle).await.unwrap();
        assert_eq!(again.message.as_deref(), Some("all winners have been drawn"));
        assert_eq!(backend.completion_calls(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_ranks() {
        let backend = MemoryBackend::seeded(1);
        let raffle = RaffleId::new("r");
        backend.add_tickets(&raffle, tickets(2)).await;
        backend.conduct_draw(&raffle).await.unwrap();

        assert!(backend.reset_draw(&raffle).await.unwrap().success);
        assert!(backend.fetch_winners(&raffle).await.unwrap().is_empty());
        assert_eq!(backend.status(&raffle).await, SessionStatus::Idle);
        assert_eq!(backend.session_snapshot(&raffle).await.unwrap(), SessionSnapshot::default());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = MemoryBackend::seeded(1);
        let raffle = RaffleId::new("r");
        backend.fail_next(1);
        assert!(backend.fetch_winners(&raffle).await.is_err());
        assert!(backend.fetch_winners(&raffle).await.is_ok());
        assert_eq!(backend.winner_reads(), 2);
    }
}
