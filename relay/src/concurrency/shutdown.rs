use tokio::sync::watch;

/// Transmitter side of a shutdown channel.
///
/// [`ShutdownTx`] requests graceful termination of the drain loop it is connected
/// to. Each worker owns a private channel, so an individual worker can be stopped
/// without touching its siblings.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Signals shutdown to all subscribed receivers.
    ///
    /// Uses an infallible send so that signaling an already-terminated worker is a
    /// no-op rather than an error; stop must be idempotent.
    pub fn shutdown(&self) {
        self.0.send_replace(());
    }

    /// Creates a new shutdown receiver subscription.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiver side of a shutdown channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Creates a new shutdown channel.
///
/// The receiver side is obtained via [`ShutdownTx::subscribe`]; a receiver created
/// after the signal was sent still observes it as a change.
pub fn create_shutdown_channel() -> ShutdownTx {
    let (tx, _rx) = watch::channel(());
    ShutdownTx(tx)
}
