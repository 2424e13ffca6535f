//! Keepalive ticker bound to a single websocket connection.
//!
//! The ticker never touches the socket. It asks the connection owner to ping
//! through a channel that exists only as long as that connection does, so a
//! ping cannot land on a socket that has already been replaced.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Requests the heartbeat sends to the connection owner.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Command {
    Ping,
}

#[derive(Debug)]
pub(crate) struct Heartbeat {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Starts a ticker for one connection.
    ///
    /// The ticker also stops when `parent` is cancelled.
    pub(crate) fn start(
        interval: Duration,
        parent: &CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let shutdown = parent.child_token();
        let task = tokio::spawn(run(interval, commands_tx, shutdown.clone()));

        (Self { shutdown, task }, commands_rx)
    }

    /// Stops the ticker and waits for it to drop its command sender.
    pub(crate) async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

async fn run(
    interval: Duration,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                trace!(event = "heartbeat_tick");
                if commands.send(Command::Ping).is_err() {
                    break;
                }
            }
        }
    }
}
