//! Command API adapter for the playback server.
//!
//! All request/response traffic goes through the [`PlayerApi`] trait so
//! command handling can be exercised against a scripted implementation.
//! The concrete adapter is backed by `ureq`.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::player_state::{Song, StatePatch};

/// Only upload type the server accepts.
pub const SUPPORTED_UPLOAD_EXTENSION: &str = "mp3";

/// Command API failure. Non-2xx responses keep the status and body for
/// the user notice; nothing here is fatal to the client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("response parse failed: {0}")]
    Parse(String),
    #[error("{0}")]
    Io(String),
}

/// Song reference in command responses. `play` answers with a bare name
/// while track-change commands answer with the full song object.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(untagged)]
pub enum SongRef {
    Full(Song),
    Name(String),
}

impl SongRef {
    pub fn name(&self) -> &str {
        match self {
            SongRef::Full(song) => &song.name,
            SongRef::Name(name) => name,
        }
    }
}

/// Response envelope for commands that identify a song.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SongResponse {
    pub song: SongRef,
}

/// Interface implemented by the concrete command API adapter.
pub trait PlayerApi: Send {
    fn fetch_player_state(&self) -> Result<StatePatch, ApiError>;
    fn select_song(&self, index: usize) -> Result<SongResponse, ApiError>;
    fn play(&self) -> Result<SongResponse, ApiError>;
    fn pause(&self) -> Result<(), ApiError>;
    fn next_song(&self) -> Result<SongResponse, ApiError>;
    fn previous_song(&self) -> Result<SongResponse, ApiError>;
    fn set_volume(&self, volume: f32) -> Result<(), ApiError>;
    fn remove_song(&self, index: usize) -> Result<(), ApiError>;
    fn upload_song(&self, path: &Path) -> Result<SongResponse, ApiError>;
}

/// Command API adapter backed by `ureq`.
pub struct HttpPlayerApi {
    http_client: ureq::Agent,
    base_url: String,
}

impl HttpPlayerApi {
    /// Creates an adapter for the given command base URL.
    pub fn new(base_url: &str) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(15))
            .timeout_write(Duration::from_secs(30))
            .build();
        Self {
            http_client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn to_api_error(error: ureq::Error) -> ApiError {
        match error {
            ureq::Error::Status(status, response) => {
                let body = response.into_string().unwrap_or_default();
                ApiError::Status { status, body }
            }
            ureq::Error::Transport(transport) => ApiError::Transport(transport.to_string()),
        }
    }

    fn read_json<T: serde::de::DeserializeOwned>(response: ureq::Response) -> Result<T, ApiError> {
        response
            .into_json::<T>()
            .map_err(|err| ApiError::Parse(err.to_string()))
    }

    fn post_song_command(&self, path: &str) -> Result<SongResponse, ApiError> {
        let response = self
            .http_client
            .post(&self.api_url(path))
            .call()
            .map_err(Self::to_api_error)?;
        Self::read_json(response)
    }
}

impl PlayerApi for HttpPlayerApi {
    fn fetch_player_state(&self) -> Result<StatePatch, ApiError> {
        let response = self
            .http_client
            .get(&self.api_url("player-state"))
            .call()
            .map_err(Self::to_api_error)?;
        Self::read_json(response)
    }

    fn select_song(&self, index: usize) -> Result<SongResponse, ApiError> {
        self.post_song_command(&format!("select-song/{index}"))
    }

    fn play(&self) -> Result<SongResponse, ApiError> {
        self.post_song_command("play")
    }

    fn pause(&self) -> Result<(), ApiError> {
        self.http_client
            .post(&self.api_url("pause"))
            .call()
            .map_err(Self::to_api_error)?;
        Ok(())
    }

    fn next_song(&self) -> Result<SongResponse, ApiError> {
        self.post_song_command("next")
    }

    fn previous_song(&self) -> Result<SongResponse, ApiError> {
        self.post_song_command("previous")
    }

    fn set_volume(&self, volume: f32) -> Result<(), ApiError> {
        self.http_client
            .post(&self.api_url("set-volume"))
            .send_json(serde_json::json!({ "volume": volume }))
            .map_err(Self::to_api_error)?;
        Ok(())
    }

    fn remove_song(&self, index: usize) -> Result<(), ApiError> {
        self.http_client
            .delete(&self.api_url(&format!("remove-song/{index}")))
            .call()
            .map_err(Self::to_api_error)?;
        Ok(())
    }

    fn upload_song(&self, path: &Path) -> Result<SongResponse, ApiError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ApiError::Io(format!("unusable file name: {}", path.display())))?
            .to_string();
        let bytes = std::fs::read(path)
            .map_err(|err| ApiError::Io(format!("failed to read {}: {err}", path.display())))?;

        let boundary = make_boundary();
        let body = multipart_file_body(&boundary, &file_name, &bytes);
        let response = self
            .http_client
            .post(&self.api_url("upload-song"))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
            .map_err(Self::to_api_error)?;
        Self::read_json(response)
    }
}

fn make_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!("evoremote-{nanos:032x}")
}

/// Strips characters that would break the quoted `filename` parameter.
fn sanitize_file_name(file_name: &str) -> String {
    file_name
        .chars()
        .filter(|c| !matches!(c, '"' | '\\') && !c.is_control())
        .collect()
}

/// Builds a single-field `multipart/form-data` body carrying one file.
fn multipart_file_body(boundary: &str, file_name: &str, bytes: &[u8]) -> Vec<u8> {
    let file_name = sanitize_file_name(file_name);
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: audio/mpeg\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}
