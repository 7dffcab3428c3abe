use crate::config::HeosConfig;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Player identifier
pub type PlayerId = i64;

/// Group identifier
pub type GroupId = i64;

/// Music source identifier
pub type SourceId = i64;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    /// Lowercase state name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Power state reported on the telnet channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Standby,
}

impl PowerState {
    /// Parse a telnet power token (`PWON`, `PWSTANDBY`)
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "PWON" => Some(Self::On),
            "PWSTANDBY" => Some(Self::Standby),
            _ => None,
        }
    }

    /// Telnet token that requests this state
    pub fn token(&self) -> &'static str {
        match self {
            Self::On => "PWON",
            Self::Standby => "PWSTANDBY",
        }
    }
}

/// Parse error for the string-valued enums below
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown value: {0}")]
pub struct UnknownValue(pub String);

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Play,
    Pause,
    Stop,
}

impl PlayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Play => "play",
            Self::Pause => "pause",
            Self::Stop => "stop",
        }
    }
}

impl FromStr for PlayState {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "play" => Ok(Self::Play),
            "pause" => Ok(Self::Pause),
            "stop" => Ok(Self::Stop),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repeat mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatMode {
    All,
    One,
    Off,
}

impl RepeatMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "on_all",
            Self::One => "on_one",
            Self::Off => "off",
        }
    }
}

impl FromStr for RepeatMode {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on_all" => Ok(Self::All),
            "on_one" => Ok(Self::One),
            "off" => Ok(Self::Off),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repeat and shuffle settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayMode {
    pub repeat: RepeatMode,
    pub shuffle: bool,
}

/// Parse the protocol's `on`/`off` flag
pub(crate) fn parse_on_off(value: &str) -> Option<bool> {
    match value {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

/// Ids arrive as numbers from most firmware and as strings from some
fn id_from_any<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(i64),
        Text(String),
    }

    match Id::deserialize(deserializer)? {
        Id::Number(n) => Ok(n),
        Id::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapped(#[serde(deserialize_with = "id_from_any")] i64);

    Ok(Option::<Wrapped>::deserialize(deserializer)?.map(|Wrapped(id)| id))
}

/// Player information from `player/get_players`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,

    #[serde(deserialize_with = "id_from_any")]
    pub pid: PlayerId,

    /// Group the player belongs to, if any
    #[serde(default, deserialize_with = "optional_id")]
    pub gid: Option<GroupId>,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub version: String,

    /// Network type (wired, wifi)
    #[serde(default)]
    pub network: Option<String>,

    #[serde(default)]
    pub ip: Option<String>,

    #[serde(default)]
    pub lineout: Option<u8>,

    #[serde(default)]
    pub serial: Option<String>,
}

/// Role of a player within a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Leader,
    Member,
}

/// Group member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMember {
    pub name: String,
    #[serde(deserialize_with = "id_from_any")]
    pub pid: PlayerId,
    pub role: GroupRole,
}

/// Group information from `group/get_groups`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    #[serde(deserialize_with = "id_from_any")]
    pub gid: GroupId,
    #[serde(default)]
    pub players: Vec<GroupMember>,
}

impl GroupInfo {
    /// The group leader, if listed
    pub fn leader(&self) -> Option<&GroupMember> {
        self.players.iter().find(|p| p.role == GroupRole::Leader)
    }
}

/// Music source from `browse/get_music_sources`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicSource {
    pub name: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(deserialize_with = "id_from_any")]
    pub sid: SourceId,
    /// Availability flag as sent (`true`/`false`)
    #[serde(default)]
    pub available: Option<String>,
}

/// Now playing media from `player/get_now_playing_media`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NowPlayingMedia {
    /// Media type (song, station)
    #[serde(rename = "type", default)]
    pub media_type: String,
    #[serde(default)]
    pub song: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub album_id: String,
    #[serde(default)]
    pub mid: String,
    #[serde(default, deserialize_with = "optional_id")]
    pub qid: Option<i64>,
    #[serde(default, deserialize_with = "optional_id")]
    pub sid: Option<SourceId>,
    #[serde(default)]
    pub station: Option<String>,
}

/// Entry in a player's queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    #[serde(default)]
    pub song: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(deserialize_with = "id_from_any")]
    pub qid: i64,
    #[serde(default)]
    pub mid: String,
    #[serde(default)]
    pub album_id: String,
}

/// Device found by network discovery
///
/// Discovery itself lives outside this crate; this is the record it hands
/// over. The address may change over the device's lifetime, see
/// [`crate::HeosClient::set_address`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Stable device identifier
    pub device_id: String,
    /// Display name, without the `ACT-` prefix
    pub friendly_name: String,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub wlan_mac: Option<String>,
    /// Current network address
    pub address: String,
}

impl DiscoveredDevice {
    /// Build a client bound to this device's address
    ///
    /// The client is not connected yet; call [`crate::HeosClient::connect`].
    pub fn client(&self) -> crate::client::HeosClient {
        self.client_with_config(HeosConfig::default())
    }

    /// Build a client with explicit configuration
    pub fn client_with_config(&self, config: HeosConfig) -> crate::client::HeosClient {
        crate::client::HeosClient::with_config(self.address.clone(), config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_value_names_the_input() {
        let err = "loop".parse::<PlayState>().unwrap_err();
        assert_eq!(err, UnknownValue("loop".to_string()));
        assert_eq!(err.to_string(), "unknown value: loop");
    }

    #[test]
    fn test_player_info_accepts_string_ids() {
        let player: PlayerInfo = serde_json::from_value(json!({
            "name": "Kitchen",
            "pid": "-1203",
            "gid": 77,
            "model": "HEOS 1",
            "version": "1.520.200",
            "network": "wifi",
            "lineout": 0
        }))
        .unwrap();
        assert_eq!(player.pid, -1203);
        assert_eq!(player.gid, Some(77));
        assert_eq!(player.serial, None);
    }

    #[test]
    fn test_group_leader() {
        let group: GroupInfo = serde_json::from_value(json!({
            "name": "Downstairs",
            "gid": "12",
            "players": [
                {"name": "Kitchen", "pid": 3, "role": "member"},
                {"name": "Living", "pid": 12, "role": "leader"}
            ]
        }))
        .unwrap();
        assert_eq!(group.leader().map(|p| p.pid), Some(12));
    }

    #[test]
    fn test_state_names() {
        assert_eq!("pause".parse::<PlayState>(), Ok(PlayState::Pause));
        assert!("rewind".parse::<PlayState>().is_err());
        assert_eq!("on_one".parse::<RepeatMode>(), Ok(RepeatMode::One));
        assert_eq!(ConnectionState::Disconnecting.to_string(), "disconnecting");
        assert_eq!(PowerState::from_token("PWSTANDBY"), Some(PowerState::Standby));
        assert_eq!(PowerState::from_token("SICD"), None);
    }
}
