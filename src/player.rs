use crate::client::HeosClient;
use crate::error::{HeosError, Result};
use crate::protocol::{commands, Request};
use crate::types::{
    on_off, parse_on_off, NowPlayingMedia, PlayMode, PlayState, PlayerId, PlayerInfo, QueueItem,
    RepeatMode,
};

const MAX_VOLUME: u8 = 100;
const MAX_VOLUME_STEP: u8 = 10;

/// Interface for controlling a player
///
/// A `Player` provides playback, volume, mute, play mode and queue control
/// for one HEOS player. Handles are obtained from [`HeosClient::players`] or
/// [`HeosClient::player`] and share the client's connection.
#[derive(Clone)]
pub struct Player {
    client: HeosClient,
    info: PlayerInfo,
}

impl Player {
    pub(crate) fn new(client: HeosClient, info: PlayerInfo) -> Self {
        Self { client, info }
    }

    /// Get the player ID
    pub fn pid(&self) -> PlayerId {
        self.info.pid
    }

    /// Get the player name
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Get the player information as last fetched
    pub fn info(&self) -> &PlayerInfo {
        &self.info
    }

    fn request(&self, command: &str) -> Request {
        Request::new(command).param("pid", self.info.pid)
    }

    /// Get the playback state
    pub async fn get_play_state(&self) -> Result<PlayState> {
        self.client
            .send(self.request(commands::GET_PLAY_STATE))
            .await?
            .parse_field("state")
    }

    /// Set the playback state
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use denon_heos::{HeosClient, PlayState};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = HeosClient::connect_to("192.168.1.100").await?;
    /// if let Some(player) = client.players().await?.first() {
    ///     player.set_play_state(PlayState::Pause).await?;
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn set_play_state(&self, state: PlayState) -> Result<()> {
        self.client
            .send(self.request(commands::SET_PLAY_STATE).param("state", state))
            .await?;
        Ok(())
    }

    /// Get the media currently playing
    pub async fn get_now_playing_media(&self) -> Result<NowPlayingMedia> {
        self.client
            .send(self.request(commands::GET_NOW_PLAYING_MEDIA))
            .await?
            .payload_as()
    }

    /// Get the volume level (0-100)
    pub async fn get_volume(&self) -> Result<u8> {
        self.client
            .send(self.request(commands::GET_VOLUME))
            .await?
            .parse_field("level")
    }

    /// Set the volume level; values above 100 are clamped
    pub async fn set_volume(&self, level: u8) -> Result<()> {
        self.client
            .send(self.request(commands::SET_VOLUME).param("level", level.min(MAX_VOLUME)))
            .await?;
        Ok(())
    }

    /// Raise the volume by `step` (1-10)
    pub async fn volume_up(&self, step: u8) -> Result<()> {
        self.client
            .send(self.request(commands::VOLUME_UP).param("step", step.clamp(1, MAX_VOLUME_STEP)))
            .await?;
        Ok(())
    }

    /// Lower the volume by `step` (1-10)
    pub async fn volume_down(&self, step: u8) -> Result<()> {
        self.client
            .send(self.request(commands::VOLUME_DOWN).param("step", step.clamp(1, MAX_VOLUME_STEP)))
            .await?;
        Ok(())
    }

    /// Get the mute state
    pub async fn get_mute(&self) -> Result<bool> {
        let reply = self.client.send(self.request(commands::GET_MUTE)).await?;
        let state = reply.field("state")?;
        parse_on_off(state)
            .ok_or_else(|| HeosError::InvalidResponse(format!("Invalid mute state: {}", state)))
    }

    pub async fn set_mute(&self, mute: bool) -> Result<()> {
        self.client
            .send(self.request(commands::SET_MUTE).param("state", on_off(mute)))
            .await?;
        Ok(())
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        self.client.send(self.request(commands::TOGGLE_MUTE)).await?;
        Ok(())
    }

    /// Get repeat and shuffle settings
    pub async fn get_play_mode(&self) -> Result<PlayMode> {
        let reply = self.client.send(self.request(commands::GET_PLAY_MODE)).await?;
        let repeat: RepeatMode = reply.parse_field("repeat")?;
        let shuffle = reply.field("shuffle")?;
        let shuffle = parse_on_off(shuffle).ok_or_else(|| {
            HeosError::InvalidResponse(format!("Invalid shuffle state: {}", shuffle))
        })?;
        Ok(PlayMode { repeat, shuffle })
    }

    pub async fn set_play_mode(&self, mode: PlayMode) -> Result<()> {
        self.client
            .send(
                self.request(commands::SET_PLAY_MODE)
                    .param("repeat", mode.repeat)
                    .param("shuffle", on_off(mode.shuffle)),
            )
            .await?;
        Ok(())
    }

    /// Get queue entries in the inclusive range `start..=end`
    pub async fn get_queue(&self, start: u32, end: u32) -> Result<Vec<QueueItem>> {
        self.client
            .send(
                self.request(commands::GET_QUEUE)
                    .param("range", format!("{},{}", start, end.max(start))),
            )
            .await?
            .payload_as()
    }

    /// Jump to a queue entry
    pub async fn play_queue_item(&self, qid: i64) -> Result<()> {
        self.client
            .send(self.request(commands::PLAY_QUEUE).param("qid", qid))
            .await?;
        Ok(())
    }

    pub async fn clear_queue(&self) -> Result<()> {
        self.client.send(self.request(commands::CLEAR_QUEUE)).await?;
        Ok(())
    }

    pub async fn play_next(&self) -> Result<()> {
        self.client.send(self.request(commands::PLAY_NEXT)).await?;
        Ok(())
    }

    pub async fn play_previous(&self) -> Result<()> {
        self.client.send(self.request(commands::PLAY_PREVIOUS)).await?;
        Ok(())
    }

    /// Play a stream from a URL
    pub async fn play_url(&self, url: &str) -> Result<()> {
        self.client
            .send(self.request(commands::PLAY_STREAM).param("url", url))
            .await?;
        Ok(())
    }
}
