//! State-store orchestrator.
//!
//! Sole owner of the canonical [`PlayerState`]. Push events and mutation
//! requests arrive over the bus, get merged field-by-field, and every
//! committed mutation fans out one change notification. There is no
//! batching and no ordering metadata: last write wins per field, which
//! is the accepted consistency model for dual-channel delivery.

use log::{debug, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::player_state::PlayerState;
use crate::protocol::{Message, PushEvent, StateMessage};

/// Owns the session state and applies all merges.
pub struct StateManager {
    state: PlayerState,
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
}

impl StateManager {
    /// Creates a state manager bound to bus channels.
    pub fn new(bus_consumer: Receiver<Message>, bus_producer: Sender<Message>) -> Self {
        Self {
            state: PlayerState::default(),
            bus_consumer,
            bus_producer,
        }
    }

    fn notify_changed(&self) {
        let _ = self.bus_producer.send(Message::State(
            StateMessage::PlayerStateChanged(self.state.clone()),
        ));
    }

    fn handle_push_event(&mut self, event: PushEvent) {
        match event {
            PushEvent::InitialState { state } | PushEvent::PlayerStateChanged { state } => {
                if self.state.apply_patch(state) {
                    self.notify_changed();
                }
            }
            PushEvent::PlaylistUpdated { playlist } => {
                debug!("playlist push with {} song(s)", playlist.len());
                self.state.replace_playlist(playlist);
                self.notify_changed();
            }
            PushEvent::VolumeChanged { volume } => {
                self.state.set_volume(volume);
                self.notify_changed();
            }
            PushEvent::ProgressUpdate {
                progress,
                current_time,
                total_time,
            } => {
                self.state.set_progress(progress, current_time, total_time);
                self.notify_changed();
            }
            PushEvent::Ping => {}
        }
    }

    fn handle_state_message(&mut self, message: StateMessage) {
        match message {
            StateMessage::ApplySnapshot(patch) | StateMessage::ApplyOptimistic(patch) => {
                if self.state.apply_patch(patch) {
                    self.notify_changed();
                }
            }
            // Our own notifications echo back over the bus.
            StateMessage::PlayerStateChanged(_) => {}
        }
    }

    /// Starts the blocking event loop.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Push(event)) => self.handle_push_event(event),
                Ok(Message::State(message)) => self.handle_state_message(message),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "StateManager lagged on control bus, skipped {} message(s)",
                        skipped
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
