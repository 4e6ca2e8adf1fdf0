use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::{broadcast, watch};

use crate::animator::Animator;
use crate::backend::DrawBackend;
use crate::config::DrawConfig;
use crate::error::{DrawError, Result};
use crate::relay::{DrawChannel, PhaseRelay};
use crate::schedule::TaskHandle;
use crate::types::{
    ClientId, DrawNotice, DrawOutcome, DrawPhase, DrawState, RaffleId, WinnerEntry, WinnersView,
};
use crate::LOG_TARGET;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    /// Entered by this client: a driver action, its own timer, or "view results".
    Local,
    /// Received on the raffle channel.
    Remote,
    /// Derived from the authoritative read taken at mount.
    Snapshot,
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<B> {
    raffle: RaffleId,
    config: DrawConfig,
    backend: Arc<B>,
    channel: DrawChannel,
    state: watch::Sender<DrawState>,
    winners: watch::Sender<WinnersView>,
    notices: broadcast::Sender<DrawNotice>,
    driving: AtomicBool,
    // Set once any broadcast has been applied; the mount snapshot is older.
    heard_broadcast: AtomicBool,
    // Bumped whenever the podium is invalidated; a read started under an
    // older epoch is discarded.
    winners_epoch: AtomicU64,
    advance: Mutex<Option<TaskHandle>>,
    fetch: Mutex<Option<TaskHandle>>,
    this: Weak<Inner<B>>,
}

impl<B: DrawBackend> Inner<B> {
    fn is_driving(&self) -> bool {
        self.driving.load(Ordering::SeqCst)
    }

    fn set_driving(&self, driving: bool) {
        self.driving.store(driving, Ordering::SeqCst);
        if !driving {
            lock(&self.advance).take();
        }
    }

    fn receive(&self, phase: DrawPhase) {
        let target = match phase {
            DrawPhase::Waiting => DrawState::IDLE,
            phase => DrawState::open(phase),
        };
        self.heard_broadcast.store(true, Ordering::SeqCst);
        self.enter(target, Origin::Remote);
    }

    /// Enter `phase` locally and tell every other client about it.
    fn drive(&self, phase: DrawPhase) {
        let target = match phase {
            DrawPhase::Waiting => DrawState::IDLE,
            phase => DrawState::open(phase),
        };
        self.enter(target, Origin::Local);
        self.channel.publish(phase);
    }

    fn enter(&self, target: DrawState, origin: Origin) {
        let mut previous = target.phase;
        let modified = self.state.send_if_modified(|state| {
            previous = state.phase;
            if *state == target {
                return false;
            }
            *state = target;
            true
        });
        let phase = target.phase;
        if modified {
            tracing::info!(
                target: LOG_TARGET,
                raffle = %self.raffle,
                client = %self.channel.client(),
                from = %previous,
                to = %phase,
                ?origin,
                "draw phase changed"
            );
        }

        match origin {
            Origin::Local if self.is_driving() => self.arm_advance(phase),
            _ if phase != previous => {
                lock(&self.advance).take();
            }
            _ => {}
        }

        if phase != DrawPhase::Finished {
            self.invalidate_winners();
        } else if previous != DrawPhase::Finished {
            self.materialize();
        }
    }

    fn arm_advance(&self, phase: DrawPhase) {
        let task = self.config.timing.dwell(phase).map(|delay| {
            let this = self.this.clone();
            TaskHandle::after(delay, move || {
                if let Some(inner) = this.upgrade() {
                    inner.advance_from(phase);
                }
            })
        });
        *lock(&self.advance) = task;
    }

    fn advance_from(&self, from: DrawPhase) {
        if !self.is_driving() || self.state.borrow().phase != from {
            return;
        }
        if let Some(next) = from.next() {
            self.drive(next);
            if next == DrawPhase::Finished {
                self.report_completed();
            }
        }
    }

    fn report_completed(&self) {
        let backend = self.backend.clone();
        let raffle = self.raffle.clone();
        // Detached: the service has to hear about it even if this session unmounts.
        tokio::spawn(async move {
            match backend.complete_draw(&raffle).await {
                Ok(outcome) if outcome.success => {
                    tracing::info!(target: LOG_TARGET, %raffle, "draw completed")
                }
                Ok(outcome) => {
                    tracing::warn!(target: LOG_TARGET, %raffle, message = ?outcome.message, "completion refused")
                }
                Err(err) => {
                    tracing::warn!(target: LOG_TARGET, %raffle, error = %format!("{:#}", err), "completion failed")
                }
            }
        });
    }

    fn invalidate_winners(&self) {
        lock(&self.fetch).take();
        // The epoch moves under the watch lock so a concurrent store either
        // lands before this or sees the new epoch.
        self.winners.send_if_modified(|view| {
            self.winners_epoch.fetch_add(1, Ordering::SeqCst);
            if *view == WinnersView::Pending {
                return false;
            }
            *view = WinnersView::Pending;
            true
        });
    }

    fn materialize(&self) {
        let epoch = self.winners_epoch.load(Ordering::SeqCst);
        let backend = self.backend.clone();
        let raffle = self.raffle.clone();
        let this = self.this.clone();
        tracing::debug!(target: LOG_TARGET, raffle = %self.raffle, epoch, "reading winners");

        let task = TaskHandle::spawn(async move {
            let result = backend.fetch_winners(&raffle).await;
            if let Some(inner) = this.upgrade() {
                inner.store_winners(epoch, result);
            }
        });
        *lock(&self.fetch) = Some(task);
    }

    fn store_winners(&self, epoch: u64, result: anyhow::Result<Vec<WinnerEntry>>) {
        let (view, notice) = match result {
            Ok(entries) if entries.is_empty() => (WinnersView::NoWinners, None),
            Ok(entries) => {
                let count = entries.len();
                (WinnersView::Podium(entries), Some(DrawNotice::Celebrate { winners: count }))
            }
            Err(err) => {
                let message = format!("{:#}", err);
                tracing::warn!(target: LOG_TARGET, raffle = %self.raffle, error = %message, "winner read failed");
                (
                    WinnersView::Failed(message.clone()),
                    Some(DrawNotice::FetchFailed { message }),
                )
            }
        };
        let summary = match &view {
            WinnersView::Podium(entries) => entries.len(),
            _ => 0,
        };

        let stored = self.winners.send_if_modified(|slot| {
            if self.winners_epoch.load(Ordering::SeqCst) != epoch
                || self.state.borrow().phase != DrawPhase::Finished
            {
                return false;
            }
            *slot = view;
            if let Some(notice) = notice {
                let _ = self.notices.send(notice);
            }
            true
        });

        if stored {
            tracing::info!(target: LOG_TARGET, raffle = %self.raffle, winners = summary, "winners loaded");
        } else {
            tracing::debug!(target: LOG_TARGET, raffle = %self.raffle, epoch, "stale winner read dropped");
        }
    }

    async fn load_snapshot(&self) {
        let snapshot = match self.backend.session_snapshot(&self.raffle).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, raffle = %self.raffle, error = %format!("{:#}", err), "snapshot read failed, staying idle");
                return;
            }
        };
        // A broadcast that arrived during the read is newer than the snapshot.
        if self.heard_broadcast.load(Ordering::SeqCst) {
            return;
        }
        if snapshot.live {
            // Joining mid-draw always resumes at the first round.
            self.enter(DrawState::open(DrawPhase::Round1), Origin::Snapshot);
        } else if snapshot.has_winner {
            let target = DrawState {
                is_open: self.config.open_on_completed,
                phase: DrawPhase::Finished,
            };
            self.enter(target, Origin::Snapshot);
        }
    }
}

fn check_outcome(call: &str, outcome: DrawOutcome) -> Result<()> {
    if outcome.success {
        return Ok(());
    }
    Err(outcome
        .message
        .map_or_else(|| refused!("{} refused without a reason", call), DrawError::Rejected))
}

/// One client's view of one raffle's live draw.
///
/// Mounting reads the authoritative snapshot once and joins the raffle's
/// channel; dropping the session leaves the channel and cancels every timer
/// and read it still owns.
pub struct DrawSession<B: DrawBackend> {
    inner: Arc<Inner<B>>,
    animator: Animator,
    _listener: TaskHandle,
}

impl<B: DrawBackend> DrawSession<B> {
    async fn mount(
        raffle: RaffleId,
        backend: Arc<B>,
        relay: Arc<dyn PhaseRelay>,
        config: DrawConfig,
        driving: bool,
    ) -> Result<Self> {
        config.validate()?;
        let channel = DrawChannel::new(config.channel_name(&raffle), ClientId::random(), relay);
        let (notices, _) = broadcast::channel(16);
        let inner = Arc::new_cyclic(|this| Inner {
            raffle,
            config,
            backend,
            channel,
            state: watch::channel(DrawState::IDLE).0,
            winners: watch::channel(WinnersView::Pending).0,
            notices,
            driving: AtomicBool::new(driving),
            heard_broadcast: AtomicBool::new(false),
            winners_epoch: AtomicU64::new(0),
            advance: Mutex::new(None),
            fetch: Mutex::new(None),
            this: this.clone(),
        });

        // Join before reading so nothing published during the read is lost.
        let listener = inner
            .channel
            .listen(Arc::downgrade(&inner), |inner: &Inner<B>, phase| inner.receive(phase))?;
        let animator = Animator::start(inner.state.subscribe(), inner.config.animator.clone());
        inner.load_snapshot().await;

        tracing::debug!(
            target: LOG_TARGET,
            raffle = %inner.raffle,
            client = %inner.channel.client(),
            channel = inner.channel.name(),
            driving,
            "draw session mounted"
        );
        Ok(DrawSession {
            inner,
            animator,
            _listener: listener,
        })
    }

    pub fn raffle_id(&self) -> &RaffleId {
        &self.inner.raffle
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.channel.client()
    }

    pub fn channel_name(&self) -> &str {
        self.inner.channel.name()
    }

    pub fn state(&self) -> DrawState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<DrawState> {
        self.inner.state.subscribe()
    }

    /// Ranked winners, empty until a read in `finished` succeeds.
    pub fn winners(&self) -> Vec<WinnerEntry> {
        self.inner.winners.borrow().entries().to_vec()
    }

    pub fn winners_view(&self) -> WinnersView {
        self.inner.winners.borrow().clone()
    }

    pub fn watch_winners(&self) -> watch::Receiver<WinnersView> {
        self.inner.winners.subscribe()
    }

    /// Decorative number for the rounds. Never the winning ticket.
    pub fn display_number(&self) -> Option<u32> {
        self.animator.current()
    }

    pub fn watch_number(&self) -> watch::Receiver<Option<u32>> {
        self.animator.watch()
    }

    pub fn notices(&self) -> broadcast::Receiver<DrawNotice> {
        self.inner.notices.subscribe()
    }

    /// Jump to the results of a completed draw. Reads only; nothing is
    /// broadcast and the draw service is not called.
    pub fn view_results(&self) {
        self.inner.enter(DrawState::open(DrawPhase::Finished), Origin::Local);
    }
}

/// Organizer capability: launches, resets and drives the phase timer.
pub struct Driver<B: DrawBackend> {
    session: DrawSession<B>,
}

impl<B: DrawBackend> Driver<B> {
    pub async fn mount(
        raffle: RaffleId,
        backend: Arc<B>,
        relay: Arc<dyn PhaseRelay>,
        config: DrawConfig,
    ) -> Result<Self> {
        let session = DrawSession::mount(raffle, backend, relay, config, true).await?;
        Ok(Driver { session })
    }

    /// Run the draw on the service, then start the rounds everywhere.
    pub async fn launch(&self) -> Result<()> {
        let inner = &self.session.inner;
        if inner.state.borrow().phase.is_round() {
            return Err(DrawError::DrawInProgress);
        }
        tracing::info!(target: LOG_TARGET, raffle = %inner.raffle, "launching draw");
        let outcome = inner
            .backend
            .conduct_draw(&inner.raffle)
            .await
            .map_err(DrawError::Backend)?;
        check_outcome("draw", outcome)?;
        inner.drive(DrawPhase::Round1);
        Ok(())
    }

    /// Clear the draw on the service and send every client back to waiting.
    pub async fn reset(&self) -> Result<()> {
        let inner = &self.session.inner;
        tracing::info!(target: LOG_TARGET, raffle = %inner.raffle, "resetting draw");
        let outcome = inner
            .backend
            .reset_draw(&inner.raffle)
            .await
            .map_err(DrawError::Backend)?;
        check_outcome("reset", outcome)?;
        inner.drive(DrawPhase::Waiting);
        Ok(())
    }

    /// Drop the organizer capability. Auto-advance stops at once; received
    /// phases are still mirrored.
    pub fn into_spectator(self) -> Spectator<B> {
        self.session.inner.set_driving(false);
        Spectator {
            session: self.session,
        }
    }
}

impl<B: DrawBackend> Deref for Driver<B> {
    type Target = DrawSession<B>;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

/// Reactive capability: mirrors whatever the channel says.
pub struct Spectator<B: DrawBackend> {
    session: DrawSession<B>,
}

impl<B: DrawBackend> Spectator<B> {
    pub async fn mount(
        raffle: RaffleId,
        backend: Arc<B>,
        relay: Arc<dyn PhaseRelay>,
        config: DrawConfig,
    ) -> Result<Self> {
        let session = DrawSession::mount(raffle, backend, relay, config, false).await?;
        Ok(Spectator { session })
    }

    /// Grant the organizer capability. The timer only runs for phases this
    /// driver enters from now on.
    pub fn into_driver(self) -> Driver<B> {
        self.session.inner.set_driving(true);
        Driver {
            session: self.session,
        }
    }
}

impl<B: DrawBackend> Deref for Spectator<B> {
    type Target = DrawSession<B>;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}
