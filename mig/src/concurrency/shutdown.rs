//! Shutdown channel shared by the scheduler loop and task workers.
//!
//! A thin wrapper around a watch channel of unit values: the transmitter is held
//! by the orchestrator, and every worker subscribes a receiver which resolves in
//! a `select!` arm once shutdown is requested.

use tokio::sync::watch;

/// Receiver side of the shutdown channel.
///
/// Workers call `changed().await` inside a `select!` to observe shutdown.
pub type ShutdownRx = watch::Receiver<()>;

/// Transmitter side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Signals shutdown to every subscribed receiver.
    ///
    /// Returns an error when no receiver is subscribed anymore, which callers may
    /// safely ignore since it means all workers have already exited.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Creates a new receiver subscribed to this shutdown channel.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Creates a new shutdown channel.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
