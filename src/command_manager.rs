//! Command dispatcher.
//!
//! Turns user intents into command API requests. Each handler owns its
//! optimistic mutation, its success handling, its rollback on failure,
//! and whether a forced resync follows. Preconditions are checked
//! against a mirror of the last published state, so invalid intents are
//! rejected before any network traffic.

use std::path::{Path, PathBuf};

use log::{info, warn};
use tokio::sync::broadcast::{Receiver, Sender};

use crate::player_state::{PlayerState, StatePatch};
use crate::protocol::{
    IntentMessage, Message, Notice, NoticeMessage, RepeatMode, StateMessage, SyncMessage,
};
use crate::server_api::{PlayerApi, SUPPORTED_UPLOAD_EXTENSION};

/// Dispatches user intents against the command API.
pub struct CommandManager<A: PlayerApi> {
    bus_consumer: Receiver<Message>,
    bus_producer: Sender<Message>,
    api: A,
    /// Last state published by the state store; used for preconditions
    /// and name-to-index resolution, never mutated directly.
    mirror: PlayerState,
    repeat_mode: RepeatMode,
    shuffle_enabled: bool,
}

impl<A: PlayerApi> CommandManager<A> {
    /// Creates a dispatcher bound to bus channels and an API adapter.
    pub fn new(bus_consumer: Receiver<Message>, bus_producer: Sender<Message>, api: A) -> Self {
        Self {
            bus_consumer,
            bus_producer,
            api,
            mirror: PlayerState::default(),
            repeat_mode: RepeatMode::Off,
            shuffle_enabled: false,
        }
    }

    fn notice(&self, notice: Notice) {
        let _ = self
            .bus_producer
            .send(Message::Notice(NoticeMessage::Show(notice)));
    }

    fn apply_optimistic(&self, patch: StatePatch) {
        let _ = self
            .bus_producer
            .send(Message::State(StateMessage::ApplyOptimistic(patch)));
    }

    /// Delayed forced resync; the push event for the same action gets a
    /// head start, the pull is the fallback.
    fn schedule_resync(&self) {
        let _ = self
            .bus_producer
            .send(Message::Sync(SyncMessage::ScheduleRefresh));
    }

    /// Immediate full resync for commands whose index shifts are
    /// server-computed.
    fn force_resync(&self) {
        let _ = self
            .bus_producer
            .send(Message::Sync(SyncMessage::RefreshNow));
    }

    fn select_and_play(&mut self, index: usize) {
        if index >= self.mirror.playlist.len() {
            self.notice(Notice::error(format!("Invalid song index {index}")));
            return;
        }
        match self.api.select_song(index) {
            Ok(response) => {
                self.notice(Notice::success(format!(
                    "Now playing: {}",
                    response.song.name()
                )));
                self.apply_optimistic(StatePatch {
                    current_song_index: Some(index as i32),
                    is_playing: Some(true),
                    ..StatePatch::default()
                });
                self.schedule_resync();
            }
            Err(error) => {
                warn!("select-song {index} failed: {error}");
                self.notice(Notice::error("Could not select song"));
            }
        }
    }

    fn toggle_play(&mut self) {
        if !self.mirror.has_selection() {
            self.notice(Notice::info("Select a song first"));
            return;
        }
        let now_playing = !self.mirror.is_playing;
        // Flip immediately; the play/pause failure paths revert it.
        self.apply_optimistic(StatePatch {
            is_playing: Some(now_playing),
            ..StatePatch::default()
        });
        if now_playing {
            self.play();
        } else {
            self.pause();
        }
    }

    fn play(&mut self) {
        match self.api.play() {
            Ok(response) => {
                self.notice(Notice::success(format!(
                    "Playing: {}",
                    response.song.name()
                )));
                self.apply_optimistic(StatePatch {
                    is_playing: Some(true),
                    ..StatePatch::default()
                });
            }
            Err(error) => {
                warn!("play failed: {error}");
                self.notice(Notice::error("Could not start playback"));
                self.apply_optimistic(StatePatch {
                    is_playing: Some(false),
                    ..StatePatch::default()
                });
            }
        }
    }

    fn pause(&mut self) {
        match self.api.pause() {
            Ok(()) => {
                self.notice(Notice::info("Playback paused"));
                self.apply_optimistic(StatePatch {
                    is_playing: Some(false),
                    ..StatePatch::default()
                });
            }
            Err(error) => {
                warn!("pause failed: {error}");
                self.notice(Notice::error("Could not pause playback"));
                self.apply_optimistic(StatePatch {
                    is_playing: Some(true),
                    ..StatePatch::default()
                });
            }
        }
    }

    fn next_song(&mut self) {
        if self.repeat_mode == RepeatMode::One {
            // Repeat-one restarts the current song instead of advancing.
            self.play();
            return;
        }
        match self.api.next_song() {
            Ok(response) => {
                let name = response.song.name().to_string();
                self.apply_resolved_track(&name);
                self.notice(Notice::info(format!("Next: {name}")));
                self.schedule_resync();
            }
            Err(error) => {
                warn!("next failed: {error}");
                self.notice(Notice::error("Could not change song"));
            }
        }
    }

    fn previous_song(&mut self) {
        match self.api.previous_song() {
            Ok(response) => {
                let name = response.song.name().to_string();
                self.apply_resolved_track(&name);
                self.notice(Notice::info(format!("Previous: {name}")));
                self.schedule_resync();
            }
            Err(error) => {
                warn!("previous failed: {error}");
                self.notice(Notice::error("Could not change song"));
            }
        }
    }

    /// Resolves a returned song name to a mirror index. An unknown name
    /// leaves the selection unchanged; the forced resync corrects it.
    fn apply_resolved_track(&self, name: &str) {
        if let Some(index) = self.mirror.song_index_by_name(name) {
            self.apply_optimistic(StatePatch {
                current_song_index: Some(index as i32),
                ..StatePatch::default()
            });
        } else {
            info!("song '{name}' not found in local playlist, keeping current index");
        }
    }

    fn set_volume(&mut self, volume: f32) {
        if !(0.0..=1.0).contains(&volume) {
            self.notice(Notice::error("Volume must be between 0 and 1"));
            return;
        }
        // Fire and forget; the volume display tracks the input control,
        // not this store.
        if let Err(error) = self.api.set_volume(volume) {
            warn!("set-volume failed: {error}");
            self.notice(Notice::error("Could not set volume"));
        }
    }

    fn request_remove_song(&mut self, index: usize) {
        let Some(song) = self.mirror.playlist.get(index) else {
            self.notice(Notice::error(format!("Invalid song index {index}")));
            return;
        };
        let _ = self
            .bus_producer
            .send(Message::Notice(NoticeMessage::ConfirmRemoval {
                index,
                song_name: song.name.clone(),
            }));
    }

    fn remove_song_confirmed(&mut self, index: usize) {
        if index >= self.mirror.playlist.len() {
            self.notice(Notice::error(format!("Invalid song index {index}")));
            return;
        }
        match self.api.remove_song(index) {
            Ok(()) => {
                self.notice(Notice::success("Song removed"));
                // Index shifts are server-computed; replace the local
                // view wholesale instead of doing index arithmetic.
                self.force_resync();
            }
            Err(error) => {
                warn!("remove-song {index} failed: {error}");
                self.notice(Notice::error("Could not remove song"));
            }
        }
    }

    fn upload_songs(&mut self, paths: Vec<PathBuf>) {
        let valid: Vec<PathBuf> = paths
            .into_iter()
            .filter(|path| has_supported_extension(path))
            .collect();
        if valid.is_empty() {
            self.notice(Notice::error("No valid MP3 files to upload"));
            return;
        }
        // Strictly sequential, one file in flight at a time.
        for path in valid {
            match self.api.upload_song(&path) {
                Ok(response) => {
                    self.notice(Notice::success(format!(
                        "\"{}\" added",
                        response.song.name()
                    )));
                    self.force_resync();
                }
                Err(error) => {
                    warn!("upload of {} failed: {error}", path.display());
                    self.notice(Notice::error(format!(
                        "Upload failed: {}",
                        path.display()
                    )));
                }
            }
        }
    }

    fn toggle_shuffle(&mut self) {
        self.shuffle_enabled = !self.shuffle_enabled;
        let text = if self.shuffle_enabled {
            "Shuffle on"
        } else {
            "Shuffle off"
        };
        self.notice(Notice::info(text));
    }

    fn cycle_repeat_mode(&mut self) {
        self.repeat_mode = self.repeat_mode.next();
        let text = match self.repeat_mode {
            RepeatMode::Off => "Repeat off",
            RepeatMode::All => "Repeat playlist",
            RepeatMode::One => "Repeat current song",
        };
        self.notice(Notice::info(text));
    }

    fn handle_intent(&mut self, intent: IntentMessage) {
        match intent {
            IntentMessage::SelectAndPlay(index) => self.select_and_play(index),
            IntentMessage::TogglePlay => self.toggle_play(),
            IntentMessage::Play => self.play(),
            IntentMessage::Pause => self.pause(),
            IntentMessage::NextSong => self.next_song(),
            IntentMessage::PreviousSong => self.previous_song(),
            IntentMessage::SetVolume(volume) => self.set_volume(volume),
            IntentMessage::RemoveSong(index) => self.request_remove_song(index),
            IntentMessage::RemoveSongConfirmed(index) => self.remove_song_confirmed(index),
            IntentMessage::UploadSongs(paths) => self.upload_songs(paths),
            IntentMessage::ToggleShuffle => self.toggle_shuffle(),
            IntentMessage::CycleRepeatMode => self.cycle_repeat_mode(),
        }
    }

    /// Starts the blocking event loop.
    pub fn run(&mut self) {
        loop {
            match self.bus_consumer.blocking_recv() {
                Ok(Message::Intent(intent)) => self.handle_intent(intent),
                Ok(Message::State(StateMessage::PlayerStateChanged(state))) => {
                    self.mirror = state;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "CommandManager lagged on control bus, skipped {} message(s)",
                        skipped
                    );
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(SUPPORTED_UPLOAD_EXTENSION))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};

    use tokio::sync::broadcast;

    use super::{has_supported_extension, CommandManager};
    use crate::player_state::{Song, StatePatch};
    use crate::protocol::{
        IntentMessage, Message, NoticeLevel, NoticeMessage, RepeatMode, StateMessage, SyncMessage,
    };
    use crate::server_api::{ApiError, PlayerApi, SongRef, SongResponse};

    /// Scripted API adapter recording every issued request.
    struct ScriptedApi {
        calls: RefCell<Vec<String>>,
        fail: bool,
        next_song_name: String,
    }

    impl ScriptedApi {
        fn succeeding() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                fail: false,
                next_song_name: "B".to_string(),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::succeeding()
            }
        }

        fn record(&self, call: &str) -> Result<(), ApiError> {
            self.calls.borrow_mut().push(call.to_string());
            if self.fail {
                Err(ApiError::Status {
                    status: 500,
                    body: "scripted failure".to_string(),
                })
            } else {
                Ok(())
            }
        }

        fn song_response(&self) -> SongResponse {
            SongResponse {
                song: SongRef::Name(self.next_song_name.clone()),
            }
        }
    }

    impl PlayerApi for ScriptedApi {
        fn fetch_player_state(&self) -> Result<StatePatch, ApiError> {
            self.record("fetch")?;
            Ok(StatePatch::default())
        }

        fn select_song(&self, index: usize) -> Result<SongResponse, ApiError> {
            self.record(&format!("select {index}"))?;
            Ok(self.song_response())
        }

        fn play(&self) -> Result<SongResponse, ApiError> {
            self.record("play")?;
            Ok(SongResponse {
                song: SongRef::Name("A".to_string()),
            })
        }

        fn pause(&self) -> Result<(), ApiError> {
            self.record("pause")
        }

        fn next_song(&self) -> Result<SongResponse, ApiError> {
            self.record("next")?;
            Ok(self.song_response())
        }

        fn previous_song(&self) -> Result<SongResponse, ApiError> {
            self.record("previous")?;
            Ok(self.song_response())
        }

        fn set_volume(&self, volume: f32) -> Result<(), ApiError> {
            self.record(&format!("volume {volume}"))
        }

        fn remove_song(&self, index: usize) -> Result<(), ApiError> {
            self.record(&format!("remove {index}"))
        }

        fn upload_song(&self, path: &Path) -> Result<SongResponse, ApiError> {
            self.record(&format!("upload {}", path.display()))?;
            Ok(SongResponse {
                song: SongRef::Name("Uploaded".to_string()),
            })
        }
    }

    fn song(name: &str, duration: f32) -> Song {
        Song {
            name: name.to_string(),
            duration,
            duration_formatted: String::new(),
        }
    }

    fn manager_with_observer(
        api: ScriptedApi,
    ) -> (CommandManager<ScriptedApi>, broadcast::Receiver<Message>) {
        let (bus_sender, _) = broadcast::channel(64);
        let manager = CommandManager::new(bus_sender.subscribe(), bus_sender.clone(), api);
        let observer = bus_sender.subscribe();
        (manager, observer)
    }

    fn seed_mirror(manager: &mut CommandManager<ScriptedApi>, is_playing: bool) {
        manager.mirror.playlist = vec![song("A", 180.0), song("B", 200.0)];
        manager.mirror.current_song_index = 0;
        manager.mirror.is_playing = is_playing;
    }

    fn drain(observer: &mut broadcast::Receiver<Message>) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = observer.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn optimistic_patches(messages: &[Message]) -> Vec<&StatePatch> {
        messages
            .iter()
            .filter_map(|message| match message {
                Message::State(StateMessage::ApplyOptimistic(patch)) => Some(patch),
                _ => None,
            })
            .collect()
    }

    fn has_schedule_refresh(messages: &[Message]) -> bool {
        messages
            .iter()
            .any(|message| matches!(message, Message::Sync(SyncMessage::ScheduleRefresh)))
    }

    fn has_refresh_now(messages: &[Message]) -> bool {
        messages
            .iter()
            .any(|message| matches!(message, Message::Sync(SyncMessage::RefreshNow)))
    }

    #[test]
    fn test_select_out_of_bounds_makes_no_request_and_no_mutation() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());
        seed_mirror(&mut manager, false);

        manager.handle_intent(IntentMessage::SelectAndPlay(9));

        assert!(manager.api.calls.borrow().is_empty());
        let messages = drain(&mut observer);
        assert!(optimistic_patches(&messages).is_empty());
        assert!(messages.iter().any(|message| matches!(
            message,
            Message::Notice(NoticeMessage::Show(notice)) if notice.level == NoticeLevel::Error
        )));
    }

    #[test]
    fn test_select_success_applies_index_and_schedules_resync() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());
        seed_mirror(&mut manager, false);

        manager.handle_intent(IntentMessage::SelectAndPlay(1));

        assert_eq!(manager.api.calls.borrow().as_slice(), ["select 1"]);
        let messages = drain(&mut observer);
        let patches = optimistic_patches(&messages);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].current_song_index, Some(1));
        assert_eq!(patches[0].is_playing, Some(true));
        assert!(has_schedule_refresh(&messages));
    }

    #[test]
    fn test_toggle_without_selection_emits_notice_only() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());

        manager.handle_intent(IntentMessage::TogglePlay);

        assert!(manager.api.calls.borrow().is_empty());
        let messages = drain(&mut observer);
        assert!(optimistic_patches(&messages).is_empty());
        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0],
            Message::Notice(NoticeMessage::Show(notice)) if notice.level == NoticeLevel::Info
        ));
    }

    #[test]
    fn test_toggle_from_stopped_flips_then_plays() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());
        seed_mirror(&mut manager, false);

        manager.handle_intent(IntentMessage::TogglePlay);

        assert_eq!(manager.api.calls.borrow().as_slice(), ["play"]);
        let messages = drain(&mut observer);
        let patches = optimistic_patches(&messages);
        // Optimistic flip first, confirmation second; both land on true.
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].is_playing, Some(true));
        assert_eq!(patches[1].is_playing, Some(true));
    }

    #[test]
    fn test_toggle_from_playing_issues_pause() {
        let (mut manager, _observer) = manager_with_observer(ScriptedApi::succeeding());
        seed_mirror(&mut manager, true);

        manager.handle_intent(IntentMessage::TogglePlay);

        assert_eq!(manager.api.calls.borrow().as_slice(), ["pause"]);
    }

    #[test]
    fn test_failed_play_rolls_back_to_not_playing() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::failing());
        seed_mirror(&mut manager, false);

        manager.handle_intent(IntentMessage::TogglePlay);

        let messages = drain(&mut observer);
        let patches = optimistic_patches(&messages);
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[0].is_playing, Some(true), "optimistic flip");
        assert_eq!(patches[1].is_playing, Some(false), "rollback after failure");
        assert!(messages.iter().any(|message| matches!(
            message,
            Message::Notice(NoticeMessage::Show(notice)) if notice.level == NoticeLevel::Error
        )));
    }

    #[test]
    fn test_failed_pause_rolls_back_to_playing() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::failing());
        seed_mirror(&mut manager, true);

        manager.handle_intent(IntentMessage::TogglePlay);

        let patches_owned: Vec<Option<bool>> = optimistic_patches(&drain(&mut observer))
            .into_iter()
            .map(|patch| patch.is_playing)
            .collect();
        assert_eq!(patches_owned, vec![Some(false), Some(true)]);
    }

    #[test]
    fn test_repeat_one_reissues_play_instead_of_next() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());
        seed_mirror(&mut manager, true);
        manager.repeat_mode = RepeatMode::One;

        manager.handle_intent(IntentMessage::NextSong);

        assert_eq!(manager.api.calls.borrow().as_slice(), ["play"]);
        let messages = drain(&mut observer);
        let patches = optimistic_patches(&messages);
        assert!(patches.iter().all(|patch| patch.current_song_index.is_none()));
        assert!(!has_schedule_refresh(&messages));
    }

    #[test]
    fn test_next_resolves_returned_name_to_index() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());
        seed_mirror(&mut manager, true);

        manager.handle_intent(IntentMessage::NextSong);

        assert_eq!(manager.api.calls.borrow().as_slice(), ["next"]);
        let messages = drain(&mut observer);
        let patches = optimistic_patches(&messages);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].current_song_index, Some(1));
        assert!(has_schedule_refresh(&messages));
    }

    #[test]
    fn test_next_with_unknown_name_keeps_index_unchanged() {
        let mut api = ScriptedApi::succeeding();
        api.next_song_name = "not in playlist".to_string();
        let (mut manager, mut observer) = manager_with_observer(api);
        seed_mirror(&mut manager, true);

        manager.handle_intent(IntentMessage::NextSong);

        let messages = drain(&mut observer);
        assert!(optimistic_patches(&messages).is_empty());
        assert!(has_schedule_refresh(&messages), "resync still scheduled");
    }

    #[test]
    fn test_set_volume_is_fire_and_forget() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());

        manager.handle_intent(IntentMessage::SetVolume(0.5));

        assert_eq!(manager.api.calls.borrow().as_slice(), ["volume 0.5"]);
        let messages = drain(&mut observer);
        assert!(optimistic_patches(&messages).is_empty());
        assert!(!has_schedule_refresh(&messages));
        assert!(!has_refresh_now(&messages));
    }

    #[test]
    fn test_set_volume_out_of_range_rejected_before_network() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());

        manager.handle_intent(IntentMessage::SetVolume(1.5));

        assert!(manager.api.calls.borrow().is_empty());
        let messages = drain(&mut observer);
        assert!(messages.iter().any(|message| matches!(
            message,
            Message::Notice(NoticeMessage::Show(notice)) if notice.level == NoticeLevel::Error
        )));
    }

    #[test]
    fn test_remove_requests_confirmation_before_any_request() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());
        seed_mirror(&mut manager, false);

        manager.handle_intent(IntentMessage::RemoveSong(1));

        assert!(manager.api.calls.borrow().is_empty());
        let messages = drain(&mut observer);
        assert!(messages.iter().any(|message| matches!(
            message,
            Message::Notice(NoticeMessage::ConfirmRemoval { index: 1, song_name }) if song_name == "B"
        )));
    }

    #[test]
    fn test_confirmed_removal_forces_full_resync_without_local_arithmetic() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());
        seed_mirror(&mut manager, false);

        manager.handle_intent(IntentMessage::RemoveSongConfirmed(1));

        assert_eq!(manager.api.calls.borrow().as_slice(), ["remove 1"]);
        let messages = drain(&mut observer);
        assert!(
            optimistic_patches(&messages).is_empty(),
            "playlist and index come back from the server snapshot"
        );
        assert!(has_refresh_now(&messages));
    }

    #[test]
    fn test_upload_rejects_unsupported_extensions_pre_network() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());

        manager.handle_intent(IntentMessage::UploadSongs(vec![
            PathBuf::from("/tmp/notes.txt"),
            PathBuf::from("/tmp/cover.png"),
        ]));

        assert!(manager.api.calls.borrow().is_empty());
        let messages = drain(&mut observer);
        assert!(messages.iter().any(|message| matches!(
            message,
            Message::Notice(NoticeMessage::Show(notice)) if notice.level == NoticeLevel::Error
        )));
    }

    #[test]
    fn test_upload_sends_valid_files_sequentially_with_resync_each() {
        let (mut manager, mut observer) = manager_with_observer(ScriptedApi::succeeding());

        manager.handle_intent(IntentMessage::UploadSongs(vec![
            PathBuf::from("/tmp/a.mp3"),
            PathBuf::from("/tmp/skip.wav"),
            PathBuf::from("/tmp/b.MP3"),
        ]));

        assert_eq!(
            manager.api.calls.borrow().as_slice(),
            ["upload /tmp/a.mp3", "upload /tmp/b.MP3"]
        );
        let messages = drain(&mut observer);
        let resyncs = messages
            .iter()
            .filter(|message| matches!(message, Message::Sync(SyncMessage::RefreshNow)))
            .count();
        assert_eq!(resyncs, 2, "one full resync per uploaded file");
    }

    #[test]
    fn test_cycle_repeat_reaches_repeat_one() {
        let (mut manager, _observer) = manager_with_observer(ScriptedApi::succeeding());
        manager.handle_intent(IntentMessage::CycleRepeatMode);
        manager.handle_intent(IntentMessage::CycleRepeatMode);
        assert_eq!(manager.repeat_mode, RepeatMode::One);
    }

    #[test]
    fn test_extension_check_is_case_insensitive() {
        assert!(has_supported_extension(Path::new("song.mp3")));
        assert!(has_supported_extension(Path::new("song.MP3")));
        assert!(!has_supported_extension(Path::new("song.flac")));
        assert!(!has_supported_extension(Path::new("mp3")));
    }
}
