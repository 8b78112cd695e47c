//! Application runtime bootstrap.
//!
//! Builds the event bus, spawns the manager threads, and issues the
//! startup full-state pull. All managers subscribe before the startup
//! message is sent so nothing is missed.

use std::thread;

use tokio::sync::broadcast;

use crate::{
    channel_manager::ChannelManager,
    command_manager::CommandManager,
    config::Config,
    protocol::{Message, SyncMessage},
    server_api::HttpPlayerApi,
    state_manager::StateManager,
    sync_manager::SyncManager,
};

const BUS_CAPACITY: usize = 1024;

/// Owns the bus endpoint of a running client session.
pub struct AppRuntime {
    bus_sender: broadcast::Sender<Message>,
}

impl AppRuntime {
    /// Spawns all background services and triggers the startup resync.
    pub fn start(config: &Config) -> Self {
        let (bus_sender, _) = broadcast::channel(BUS_CAPACITY);

        let state_manager_bus_receiver = bus_sender.subscribe();
        let state_manager_bus_sender = bus_sender.clone();
        thread::spawn(move || {
            let mut state_manager =
                StateManager::new(state_manager_bus_receiver, state_manager_bus_sender);
            state_manager.run();
        });

        let command_manager_bus_receiver = bus_sender.subscribe();
        let command_manager_bus_sender = bus_sender.clone();
        let command_api = HttpPlayerApi::new(&config.command_base_url());
        thread::spawn(move || {
            let mut command_manager = CommandManager::new(
                command_manager_bus_receiver,
                command_manager_bus_sender,
                command_api,
            );
            command_manager.run();
        });

        let sync_manager_bus_receiver = bus_sender.subscribe();
        let sync_manager_bus_sender = bus_sender.clone();
        let sync_api = HttpPlayerApi::new(&config.command_base_url());
        thread::spawn(move || {
            let mut sync_manager =
                SyncManager::new(sync_manager_bus_receiver, sync_manager_bus_sender, sync_api);
            sync_manager.run();
        });

        let channel_manager_bus_sender = bus_sender.clone();
        let channel_url = config.push_channel_url();
        thread::spawn(move || {
            let mut channel_manager =
                ChannelManager::new(channel_manager_bus_sender, channel_url);
            channel_manager.run();
        });

        // Startup pull; push events take over from here.
        let _ = bus_sender.send(Message::Sync(SyncMessage::RefreshNow));

        Self { bus_sender }
    }

    pub fn bus_sender(&self) -> broadcast::Sender<Message> {
        self.bus_sender.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.bus_sender.subscribe()
    }
}
