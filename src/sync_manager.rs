//! Resync controller.
//!
//! Performs forced full-state pulls and routes results into the state
//! store as snapshot merges. The pull is a fallback behind the push
//! channel: delayed refreshes wait out a settle window so the matching
//! push event can land first. Timers are independent and uncancelled;
//! rapid repeated intents each arm their own.

use std::thread;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::protocol::{Message, StateMessage, SyncMessage};
use crate::server_api::PlayerApi;

/// Settle window between a command completing and its fallback pull.
const SETTLE_DELAY: Duration = Duration::from_millis(300);

/// Pulls authoritative state on demand.
pub struct SyncManager<A: PlayerApi> {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    api: A,
}

impl<A: PlayerApi> SyncManager<A> {
    /// Creates a resync controller bound to bus channels and an API adapter.
    pub fn new(bus_consumer: Receiver<Message>, bus_producer: Sender<Message>, api: A) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            api,
        }
    }

    fn refresh(&self) {
        match self.api.fetch_player_state() {
            Ok(patch) => {
                debug!("full state pull succeeded");
                let _ = self
                    .bus_producer
                    .send(Message::State(StateMessage::ApplySnapshot(patch)));
            }
            // No retry; the last local value stands until the next
            // push event or forced pull.
            Err(error) => warn!("full state pull failed: {error}"),
        }
    }

    fn schedule_refresh(&self) {
        let bus_producer = self.bus_producer.clone();
        thread::spawn(move || {
            thread::sleep(SETTLE_DELAY);
            let _ = bus_producer.send(Message::Sync(SyncMessage::RefreshNow));
        });
    }

    /// Starts the blocking event loop.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Sync(SyncMessage::RefreshNow)) => self.refresh(),
                Ok(Message::Sync(SyncMessage::ScheduleRefresh)) => self.schedule_refresh(),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "SyncManager lagged on control bus, skipped {} message(s)",
                        skipped
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
