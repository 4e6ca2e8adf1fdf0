use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::{DrawError, Result};
use crate::schedule::TaskHandle;
use crate::types::{ClientId, DrawPhase, Envelope};
use crate::LOG_TARGET;

/// Generic best-effort pub/sub provider keyed by channel name.
///
/// Nothing is persisted or replayed: a receiver only sees what is published
/// while it is subscribed.
pub trait PhaseRelay: Send + Sync {
    fn publish(&self, channel: &str, envelope: Envelope) -> Result<()>;

    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Envelope>>;
}

/// In-process relay, one broadcast ring per channel.
pub struct LocalRelay {
    channels: DashMap<String, broadcast::Sender<Envelope>>,
    capacity: usize,
}

impl LocalRelay {
    pub fn new() -> Self {
        LocalRelay::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        LocalRelay {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Envelope> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |tx| tx.receiver_count())
    }
}

impl Default for LocalRelay {
    fn default() -> Self {
        LocalRelay::new()
    }
}

impl PhaseRelay for LocalRelay {
    fn publish(&self, channel: &str, envelope: Envelope) -> Result<()> {
        // An empty channel is not a failure, the event is simply lost.
        if let Err(err) = self.sender(channel).send(envelope) {
            tracing::debug!(target: LOG_TARGET, channel, phase = %err.0.payload.phase, "no subscribers");
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<Envelope>> {
        Ok(self.sender(channel).subscribe())
    }
}

/// One client's handle on one raffle's channel.
#[derive(Clone)]
pub struct DrawChannel {
    name: String,
    client: ClientId,
    relay: Arc<dyn PhaseRelay>,
}

impl DrawChannel {
    pub fn new(name: String, client: ClientId, relay: Arc<dyn PhaseRelay>) -> Self {
        DrawChannel { name, client, relay }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> ClientId {
        self.client
    }

    /// Fire and forget. Failures are logged and dropped.
    pub fn publish(&self, phase: DrawPhase) {
        let envelope = Envelope::phase_change(self.client, phase);
        match self.relay.publish(&self.name, envelope) {
            Ok(()) => {
                tracing::debug!(target: LOG_TARGET, channel = %self.name, %phase, "phase published")
            }
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, channel = %self.name, %phase, error = %err, "phase broadcast dropped")
            }
        }
    }

    /// Deliver every phase published by other clients to `handler` until the
    /// returned handle is dropped or `owner` goes away.
    pub fn listen<T, F>(&self, owner: Weak<T>, handler: F) -> Result<TaskHandle>
    where
        T: Send + Sync + 'static,
        F: Fn(&T, DrawPhase) + Send + 'static,
    {
        let mut rx = self
            .relay
            .subscribe(&self.name)
            .map_err(|err| DrawError::Relay(format!("join {}: {}", self.name, err)))?;
        let me = self.client;
        let name = self.name.clone();

        Ok(TaskHandle::spawn(async move {
            loop {
                let envelope = match rx.recv().await {
                    Ok(envelope) => envelope,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: LOG_TARGET, channel = %name, skipped, "listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                if envelope.origin == me || !envelope.is_phase_change() {
                    continue;
                }
                let Some(owner) = owner.upgrade() else {
                    break;
                };
                handler(&*owner, envelope.payload.phase);
            }
            tracing::debug!(target: LOG_TARGET, channel = %name, "listener stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Sink(Mutex<Vec<DrawPhase>>);

    fn channel(relay: &Arc<LocalRelay>) -> DrawChannel {
        DrawChannel::new("raffle_draw_r1".to_string(), ClientId::random(), relay.clone())
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let relay = LocalRelay::new();
        let env = Envelope::phase_change(ClientId::random(), DrawPhase::Round1);
        assert!(relay.publish("raffle_draw_empty", env).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_skips_own_echo() {
        let relay = Arc::new(LocalRelay::new());
        let organizer = channel(&relay);
        let spectator = channel(&relay);

        let sink = Arc::new(Sink(Mutex::new(Vec::new())));
        let _own = organizer
            .listen(Arc::downgrade(&sink), |s: &Sink, p| s.0.lock().unwrap().push(p))
            .unwrap();

        let other = Arc::new(Sink(Mutex::new(Vec::new())));
        let _theirs = spectator
            .listen(Arc::downgrade(&other), |s: &Sink, p| s.0.lock().unwrap().push(p))
            .unwrap();

        organizer.publish(DrawPhase::Round1);
        organizer.publish(DrawPhase::Round2);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(sink.0.lock().unwrap().is_empty());
        assert_eq!(*other.0.lock().unwrap(), vec![DrawPhase::Round1, DrawPhase::Round2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_listener_unsubscribes() {
        let relay = Arc::new(LocalRelay::new());
        let organizer = channel(&relay);
        let spectator = channel(&relay);

        let sink = Arc::new(Sink(Mutex::new(Vec::new())));
        let listener = spectator
            .listen(Arc::downgrade(&sink), |s: &Sink, p| s.0.lock().unwrap().push(p))
            .unwrap();
        assert_eq!(relay.subscriber_count("raffle_draw_r1"), 1);

        drop(listener);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(relay.subscriber_count("raffle_draw_r1"), 0);

        organizer.publish(DrawPhase::Finished);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscriber_gets_no_replay() {
        let relay = Arc::new(LocalRelay::new());
        let organizer = channel(&relay);
        organizer.publish(DrawPhase::Round1);

        let late = channel(&relay);
        let sink = Arc::new(Sink(Mutex::new(Vec::new())));
        let _listener = late
            .listen(Arc::downgrade(&sink), |s: &Sink, p| s.0.lock().unwrap().push(p))
            .unwrap();
        organizer.publish(DrawPhase::Round2);
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(*sink.0.lock().unwrap(), vec![DrawPhase::Round2]);
    }
}
