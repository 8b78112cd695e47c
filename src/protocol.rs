//! Event-bus protocol shared by all runtime components.
//!
//! This module defines all message payloads exchanged between the push
//! channel, the state store, the command dispatcher, and the resync
//! controller, plus the wire shape of server push events.

use std::path::PathBuf;

use crate::player_state::{PlayerState, Song, StatePatch};

/// Repeat behavior applied when advancing past the current song.
///
/// Client-local preference; the server never sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    Off,
    All,
    One,
}

impl RepeatMode {
    /// Next mode in the Off -> All -> One cycle.
    pub fn next(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        }
    }
}

/// Top-level envelope for all bus traffic.
#[derive(Debug, Clone)]
pub enum Message {
    Intent(IntentMessage),
    Push(PushEvent),
    State(StateMessage),
    Sync(SyncMessage),
    Notice(NoticeMessage),
    Channel(ChannelMessage),
}

/// User intents forwarded by the view layer.
#[derive(Debug, Clone)]
pub enum IntentMessage {
    SelectAndPlay(usize),
    TogglePlay,
    Play,
    Pause,
    NextSong,
    PreviousSong,
    SetVolume(f32),
    /// First phase of removal: asks the view layer to confirm.
    RemoveSong(usize),
    /// Second phase of removal: the user confirmed interactively.
    RemoveSongConfirmed(usize),
    UploadSongs(Vec<PathBuf>),
    ToggleShuffle,
    CycleRepeatMode,
}

/// Server push events delivered over the websocket channel.
///
/// Tagged wire format; unknown tags and malformed payloads fail to parse
/// and are discarded by the channel manager.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
    InitialState {
        state: StatePatch,
    },
    PlayerStateChanged {
        state: StatePatch,
    },
    PlaylistUpdated {
        playlist: Vec<Song>,
    },
    VolumeChanged {
        volume: f32,
    },
    ProgressUpdate {
        progress: f32,
        current_time: String,
        total_time: String,
    },
    /// Keepalive; carries no state.
    Ping,
}

/// State-store mutation requests and change notifications.
#[derive(Debug, Clone)]
pub enum StateMessage {
    /// Merge a full or partial authoritative snapshot.
    ApplySnapshot(StatePatch),
    /// Merge a local mutation ahead of server confirmation. Same merge
    /// mechanics as a snapshot; rollbacks travel this way too.
    ApplyOptimistic(StatePatch),
    /// Emitted by the state store after every committed mutation.
    PlayerStateChanged(PlayerState),
}

/// Resync control for the full-state pull path.
#[derive(Debug, Clone)]
pub enum SyncMessage {
    /// Fetch the authoritative state immediately.
    RefreshNow,
    /// Fetch after the settle delay, letting the matching push event
    /// arrive first. Each request arms an independent timer.
    ScheduleRefresh,
}

/// Transient user-facing notifications.
#[derive(Debug, Clone)]
pub enum NoticeMessage {
    Show(Notice),
    /// Removal needs interactive confirmation before any request is made.
    ConfirmRemoval { index: usize, song_name: String },
}

/// Severity of a user notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// One transient user notice.
#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// Push-channel lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMessage {
    Connected,
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::{PushEvent, RepeatMode};

    #[test]
    fn test_repeat_mode_cycles_through_all_modes() {
        assert_eq!(RepeatMode::Off.next(), RepeatMode::All);
        assert_eq!(RepeatMode::All.next(), RepeatMode::One);
        assert_eq!(RepeatMode::One.next(), RepeatMode::Off);
    }

    #[test]
    fn test_push_event_parses_tagged_progress_update() {
        let event = serde_json::from_str::<PushEvent>(
            r#"{"type":"progress_update","progress":12.5,"current_time":"00:12","total_time":"03:20"}"#,
        )
        .expect("progress_update should parse");
        let PushEvent::ProgressUpdate {
            progress,
            current_time,
            total_time,
        } = event
        else {
            panic!("unexpected event variant");
        };
        assert!((progress - 12.5).abs() < f32::EPSILON);
        assert_eq!(current_time, "00:12");
        assert_eq!(total_time, "03:20");
    }

    #[test]
    fn test_push_event_parses_partial_state_payload() {
        let event = serde_json::from_str::<PushEvent>(
            r#"{"type":"player_state_changed","state":{"is_playing":true}}"#,
        )
        .expect("partial state should parse");
        let PushEvent::PlayerStateChanged { state } = event else {
            panic!("unexpected event variant");
        };
        assert_eq!(state.is_playing, Some(true));
        assert!(state.playlist.is_none());
        assert!(state.volume.is_none());
    }

    #[test]
    fn test_push_event_rejects_unknown_tag() {
        assert!(serde_json::from_str::<PushEvent>(r#"{"type":"quantum_update"}"#).is_err());
    }

    #[test]
    fn test_push_event_rejects_malformed_payload() {
        assert!(
            serde_json::from_str::<PushEvent>(r#"{"type":"volume_changed","volume":"loud"}"#)
                .is_err()
        );
    }
}
