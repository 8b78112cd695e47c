//! Playback-session state model and field-level merge rules.
//!
//! One `PlayerState` instance exists per client session. It is owned by
//! the state manager and mutated only through the merge operations here;
//! every other component requests mutations over the bus.

use log::debug;

/// One playlist entry. `name` is the durable identity key across
/// resyncs; the server guarantees uniqueness.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Song {
    pub name: String,
    /// Length in seconds.
    #[serde(default)]
    pub duration: f32,
    /// Preformatted `mm:ss` display string.
    #[serde(default)]
    pub duration_formatted: String,
}

/// Partial-state payload used for full pulls, state-changed pushes, and
/// optimistic mutations. Absent fields leave the current value untouched.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct StatePatch {
    pub playlist: Option<Vec<Song>>,
    pub current_song_index: Option<i32>,
    pub is_playing: Option<bool>,
    pub is_paused: Option<bool>,
    pub volume: Option<f32>,
    pub progress: Option<f32>,
    pub current_time: Option<String>,
    pub total_time: Option<String>,
}

/// Canonical view of the remote playback session.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    /// Playback order.
    pub playlist: Vec<Song>,
    /// -1 means no selection, otherwise a valid index into `playlist`.
    pub current_song_index: i32,
    pub is_playing: bool,
    pub is_paused: bool,
    /// 0.0 to 1.0.
    pub volume: f32,
    /// Seconds elapsed in the current song. Not clamped to the song
    /// duration; pushes and real playback are allowed to drift.
    pub progress: f32,
    pub current_time: String,
    pub total_time: String,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            playlist: Vec::new(),
            current_song_index: -1,
            is_playing: false,
            is_paused: false,
            volume: 0.7,
            progress: 0.0,
            current_time: "00:00".to_string(),
            total_time: "00:00".to_string(),
        }
    }
}

impl PlayerState {
    /// Merges a partial snapshot, field by field, last write wins.
    /// Returns whether any field was committed.
    ///
    /// The playlist field is applied before the index field so an index
    /// arriving alongside a new playlist is validated against the
    /// incoming list. An out-of-range incoming index is never committed.
    pub fn apply_patch(&mut self, patch: StatePatch) -> bool {
        let mut changed = false;
        if let Some(playlist) = patch.playlist {
            self.playlist = playlist;
            changed = true;
        }
        if let Some(index) = patch.current_song_index {
            if index == -1 || Self::index_in_range(index, self.playlist.len()) {
                self.current_song_index = index;
                changed = true;
            } else {
                debug!(
                    "rejecting out-of-range song index {} (playlist has {} songs)",
                    index,
                    self.playlist.len()
                );
            }
        }
        if let Some(is_playing) = patch.is_playing {
            self.is_playing = is_playing;
            changed = true;
        }
        if let Some(is_paused) = patch.is_paused {
            self.is_paused = is_paused;
            changed = true;
        }
        if let Some(volume) = patch.volume {
            self.volume = volume;
            changed = true;
        }
        if let Some(progress) = patch.progress {
            self.progress = progress;
            changed = true;
        }
        if let Some(current_time) = patch.current_time {
            self.current_time = current_time;
            changed = true;
        }
        if let Some(total_time) = patch.total_time {
            self.total_time = total_time;
            changed = true;
        }
        if self.revalidate_index() {
            changed = true;
        }
        changed
    }

    /// Replaces the playlist only. The retained selection is reset to -1
    /// when the new list no longer covers it.
    pub fn replace_playlist(&mut self, playlist: Vec<Song>) {
        self.playlist = playlist;
        self.revalidate_index();
    }

    /// Sets the volume only.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    /// Sets elapsed progress and both time labels, nothing else.
    pub fn set_progress(&mut self, progress: f32, current_time: String, total_time: String) {
        self.progress = progress;
        self.current_time = current_time;
        self.total_time = total_time;
    }

    /// Currently selected song, if any.
    pub fn current_song(&self) -> Option<&Song> {
        if self.current_song_index < 0 {
            return None;
        }
        self.playlist.get(self.current_song_index as usize)
    }

    /// Position of a song by its identity key.
    pub fn song_index_by_name(&self, name: &str) -> Option<usize> {
        self.playlist.iter().position(|song| song.name == name)
    }

    pub fn has_selection(&self) -> bool {
        self.current_song_index >= 0
    }

    fn index_in_range(index: i32, playlist_len: usize) -> bool {
        index >= 0 && (index as usize) < playlist_len
    }

    fn revalidate_index(&mut self) -> bool {
        if self.current_song_index >= 0
            && !Self::index_in_range(self.current_song_index, self.playlist.len())
        {
            debug!(
                "selection {} fell outside the {}-song playlist, clearing",
                self.current_song_index,
                self.playlist.len()
            );
            self.current_song_index = -1;
            return true;
        }
        false
    }
}
