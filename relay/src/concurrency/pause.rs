use tokio::sync::watch;

/// Transmitter side of the pause/resume coordination channel.
///
/// [`PauseTx`] pauses and resumes the drain loops of every worker subscribed to
/// it. Pausing stops dispatch without draining or dropping queued events; the
/// shard queues keep accumulating while workers are parked.
#[derive(Debug, Clone)]
pub struct PauseTx(watch::Sender<bool>);

impl PauseTx {
    /// Requests all subscribed drain loops to pause.
    pub fn pause(&self) {
        // Infallible send so pausing works even before any worker subscribed.
        self.0.send_replace(true);
    }

    /// Requests all subscribed drain loops to resume.
    pub fn resume(&self) {
        self.0.send_replace(false);
    }

    /// Creates a new pause receiver subscription.
    pub fn subscribe(&self) -> PauseRx {
        self.0.subscribe()
    }
}

/// Receiver side of the pause/resume coordination channel.
pub type PauseRx = watch::Receiver<bool>;

/// Creates a new pause coordination channel, initially not paused.
pub fn create_pause_channel() -> PauseTx {
    let (tx, _rx) = watch::channel(false);
    PauseTx(tx)
}
