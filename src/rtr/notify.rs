//! Notifying connected RTR clients that new data is available (§4.8).
//!
//! A [`NotifySender`] wraps a [`tokio::sync::broadcast`] channel carrying
//! the `(session_id, serial)` pair of every commit. The validation side
//! holds no reference to it directly -- `rtr::server::run` instead
//! watches the [`History`] it was given and republishes every change it
//! observes, so a commit reaches connected clients without the engine
//! needing to know the RTR layer exists at all.
//!
//! Each client connection subscribes its own receiver and turns whatever
//! it receives into a Serial Notify PDU (RFC 8210 §5.3); a client that
//! falls behind the channel's buffer just misses a notification and
//! finds out about the new serial the next time it polls with a Serial
//! Query, so a lagged receiver is not an error worth tearing the
//! connection down for.

use std::time::Duration;
use log::debug;
use tokio::sync::broadcast;
use tokio::time::interval;
use crate::payload::History;
use crate::rtr::serial::Serial;

/// How often the background watcher checks [`History`] for a new serial.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

const CHANNEL_CAPACITY: usize = 16;


//------------ NotifySender ----------------------------------------------------

/// The publishing half of the notification channel.
///
/// Cloning is cheap and shares the same underlying channel; every client
/// task calls [`NotifySender::subscribe`] to get its own receiver.
#[derive(Clone)]
pub struct NotifySender(broadcast::Sender<(u16, Serial)>);

impl NotifySender {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        NotifySender(tx)
    }

    /// Publishes a new `(session_id, serial)` to every subscriber.
    ///
    /// Sending when nobody is subscribed yet is not an error -- there's
    /// simply nobody to notify.
    pub fn notify(&self, session_id: u16, serial: Serial) {
        let _ = self.0.send((session_id, serial));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<(u16, Serial)> {
        self.0.subscribe()
    }
}

impl Default for NotifySender {
    fn default() -> Self {
        Self::new()
    }
}

/// Polls `history` for a new serial and republishes it on `sender`.
///
/// Runs until cancelled; `rtr::server::run` spawns this alongside the
/// listener and lets `tokio::select!` tear it down with everything else.
pub async fn watch(history: History, sender: NotifySender) {
    let mut last = history.session_and_serial();
    let mut ticker = interval(POLL_INTERVAL);
    loop {
        ticker.tick().await;
        let current = history.session_and_serial();
        if current != last {
            debug!(
                "RTR notifier: new serial {} (session {}).",
                current.1, current.0
            );
            sender.notify(current.0, current.1);
            last = current;
        }
    }
}
