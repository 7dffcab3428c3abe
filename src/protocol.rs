use crate::error::{HeosError, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// URL scheme prefixed to every request line
pub const SCHEME: &str = "heos";

/// Command name prefix marking unsolicited events
pub const EVENT_PREFIX: &str = "event/";

/// Message key sent while a long-running command is still being processed
pub const UNDER_PROCESS: &str = "command under process";

/// Request parameter the device echoes back in the response message
pub const SEQUENCE: &str = "SEQUENCE";

/// Command paths
pub mod commands {
    pub const HEART_BEAT: &str = "system/heart_beat";
    pub const REGISTER_FOR_CHANGE_EVENTS: &str = "system/register_for_change_events";
    pub const CHECK_ACCOUNT: &str = "system/check_account";
    pub const SIGN_IN: &str = "system/sign_in";
    pub const SIGN_OUT: &str = "system/sign_out";
    pub const REBOOT: &str = "system/reboot";

    pub const GET_PLAYERS: &str = "player/get_players";
    pub const GET_PLAYER_INFO: &str = "player/get_player_info";
    pub const GET_PLAY_STATE: &str = "player/get_play_state";
    pub const SET_PLAY_STATE: &str = "player/set_play_state";
    pub const GET_NOW_PLAYING_MEDIA: &str = "player/get_now_playing_media";
    pub const GET_VOLUME: &str = "player/get_volume";
    pub const SET_VOLUME: &str = "player/set_volume";
    pub const VOLUME_UP: &str = "player/volume_up";
    pub const VOLUME_DOWN: &str = "player/volume_down";
    pub const GET_MUTE: &str = "player/get_mute";
    pub const SET_MUTE: &str = "player/set_mute";
    pub const TOGGLE_MUTE: &str = "player/toggle_mute";
    pub const GET_PLAY_MODE: &str = "player/get_play_mode";
    pub const SET_PLAY_MODE: &str = "player/set_play_mode";
    pub const GET_QUEUE: &str = "player/get_queue";
    pub const PLAY_QUEUE: &str = "player/play_queue";
    pub const CLEAR_QUEUE: &str = "player/clear_queue";
    pub const PLAY_NEXT: &str = "player/play_next";
    pub const PLAY_PREVIOUS: &str = "player/play_previous";

    pub const GET_GROUPS: &str = "group/get_groups";
    pub const SET_GROUP: &str = "group/set_group";
    pub const GET_GROUP_VOLUME: &str = "group/get_volume";
    pub const SET_GROUP_VOLUME: &str = "group/set_volume";
    pub const GET_GROUP_MUTE: &str = "group/get_mute";
    pub const SET_GROUP_MUTE: &str = "group/set_mute";

    pub const GET_MUSIC_SOURCES: &str = "browse/get_music_sources";
    pub const BROWSE: &str = "browse/browse";
    pub const PLAY_STREAM: &str = "browse/play_stream";
}

/// Flat key/value mapping decoded from an envelope's `message` field
pub type Message = BTreeMap<String, String>;

/// Decode a `key=value&key=value` message string.
///
/// Keys without `=` map to an empty value. Percent-escapes are decoded where
/// valid; anything else is kept verbatim.
pub fn parse_message(raw: &str) -> Message {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

/// A command as written to the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    command: String,
    params: Vec<(String, String)>,
}

impl Request {
    /// Create a request for the given command path, e.g. `player/get_players`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter; order is preserved on the wire
    pub fn param(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    /// Command path
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Parameters in insertion order
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Serialize to `heos://command?k=v&k=v` followed by CRLF
    pub fn to_wire(&self) -> String {
        let mut line = format!("{}://{}", SCHEME, self.command);
        for (i, (key, value)) in self.params.iter().enumerate() {
            line.push(if i == 0 { '?' } else { '&' });
            line.push_str(&urlencoding::encode(key));
            line.push('=');
            line.push_str(&urlencoding::encode(value));
        }
        line.push_str("\r\n");
        line
    }
}

/// Protocol envelope
#[derive(Debug, Clone, Deserialize)]
struct Envelope {
    heos: Header,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct Header {
    command: String,
    #[serde(default)]
    result: Option<Status>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Status {
    Success,
    Fail,
}

/// Successful command response
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Command path the device answered
    pub command: String,
    /// Decoded message fields
    pub message: Message,
    /// Command-specific structured data
    pub payload: Option<Value>,
}

impl Reply {
    /// Get a message field
    pub fn field(&self, key: &str) -> Result<&str> {
        self.message
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| {
                HeosError::InvalidResponse(format!("No {} in {} response", key, self.command))
            })
    }

    /// Get a message field parsed into `T`
    pub fn parse_field<T: FromStr>(&self, key: &str) -> Result<T> {
        let raw = self.field(key)?;
        raw.parse().map_err(|_| {
            HeosError::InvalidResponse(format!(
                "Invalid {} in {} response: {}",
                key, self.command, raw
            ))
        })
    }

    /// Deserialize the payload into `T`
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        let payload = self.payload.clone().ok_or_else(|| {
            HeosError::InvalidResponse(format!("No payload in {} response", self.command))
        })?;
        Ok(serde_json::from_value(payload)?)
    }
}

/// Unsolicited event pushed by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    /// Event name with the `event/` prefix stripped
    pub name: String,
    /// Decoded message fields
    pub message: Message,
}

/// Well-known event names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SourcesChanged,
    PlayersChanged,
    GroupsChanged,
    PlayerStateChanged,
    PlayerNowPlayingChanged,
    PlayerNowPlayingProgress,
    PlayerPlaybackError,
    PlayerQueueChanged,
    PlayerVolumeChanged,
    RepeatModeChanged,
    ShuffleModeChanged,
    GroupVolumeChanged,
    UserChanged,
    Other,
}

impl DeviceEvent {
    /// Classify the event name
    pub fn kind(&self) -> EventKind {
        match self.name.as_str() {
            "sources_changed" => EventKind::SourcesChanged,
            "players_changed" => EventKind::PlayersChanged,
            "groups_changed" => EventKind::GroupsChanged,
            "player_state_changed" => EventKind::PlayerStateChanged,
            "player_now_playing_changed" => EventKind::PlayerNowPlayingChanged,
            "player_now_playing_progress" => EventKind::PlayerNowPlayingProgress,
            "player_playback_error" => EventKind::PlayerPlaybackError,
            "player_queue_changed" => EventKind::PlayerQueueChanged,
            "player_volume_changed" => EventKind::PlayerVolumeChanged,
            "repeat_mode_changed" => EventKind::RepeatModeChanged,
            "shuffle_mode_changed" => EventKind::ShuffleModeChanged,
            "group_volume_changed" => EventKind::GroupVolumeChanged,
            "user_changed" => EventKind::UserChanged,
            _ => EventKind::Other,
        }
    }
}

/// One classified frame
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    /// Unsolicited event
    Event(DeviceEvent),
    /// Command response with a success (or absent) status
    Response(Reply),
    /// Command response with a failure status
    Failure {
        /// Command path the device answered
        command: String,
        /// Decoded message fields
        message: Message,
        /// Device-supplied reason
        error: HeosError,
    },
}

impl ParsedMessage {
    /// Command path for responses and failures; `None` for events
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Event(_) => None,
            Self::Response(reply) => Some(&reply.command),
            Self::Failure { command, .. } => Some(command),
        }
    }

    /// Decoded message fields
    pub fn message(&self) -> &Message {
        match self {
            Self::Event(event) => &event.message,
            Self::Response(reply) => &reply.message,
            Self::Failure { message, .. } => message,
        }
    }
}

/// Classify one raw frame.
///
/// Returns `Ok(None)` for the "command under process" sentinel, which must be
/// neither routed to a waiting command nor surfaced as an event.
pub fn classify(raw: &str) -> Result<Option<ParsedMessage>> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    let header = envelope.heos;
    let message = parse_message(&header.message);

    if message.contains_key(UNDER_PROCESS) {
        return Ok(None);
    }

    // Events never occupy a command slot, whatever their status says
    if let Some(name) = header.command.strip_prefix(EVENT_PREFIX) {
        return Ok(Some(ParsedMessage::Event(DeviceEvent {
            name: name.to_string(),
            message,
        })));
    }

    if header.result == Some(Status::Fail) {
        let eid = message.get("eid").and_then(|eid| eid.parse().ok());
        let text = match message.get("text") {
            Some(text) => text.clone(),
            None if !header.message.is_empty() => header.message.clone(),
            None => "unknown_error".to_string(),
        };
        return Ok(Some(ParsedMessage::Failure {
            command: header.command,
            message,
            error: HeosError::Device { eid, text },
        }));
    }

    Ok(Some(ParsedMessage::Response(Reply {
        command: header.command,
        message,
        payload: envelope.payload,
    })))
}
