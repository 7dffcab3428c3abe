use crate::config::HeosConfig;
use crate::connection::ConnectionManager;
use crate::error::{HeosError, Result};
use crate::player::Player;
use crate::protocol::{commands, Reply, Request};
use crate::subscription::{DeviceEventReceiver, EventReceiver};
use crate::telnet::TelnetClient;
use crate::types::{
    on_off, parse_on_off, ConnectionState, GroupId, GroupInfo, MusicSource, PlayerId, PlayerInfo,
    SourceId,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Client for a HEOS device
///
/// The `HeosClient` owns one persistent connection to the device's control
/// port. Commands are queued and sent one at a time; unsolicited device events
/// and connection state changes are delivered to subscribers. Once connected,
/// a watchdog keeps the connection alive across network interruptions until
/// [`HeosClient::disconnect`] is called.
///
/// Cloning is cheap; all clones share the same connection.
#[derive(Clone)]
pub struct HeosClient {
    connection: Arc<ConnectionManager>,
    telnet: TelnetClient,
}

impl HeosClient {
    /// Create a client for the device at `address` with default settings
    ///
    /// No connection is made until [`HeosClient::connect`] is called.
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_config(address, HeosConfig::default())
    }

    /// Create a client with explicit configuration
    pub fn with_config(address: impl Into<String>, config: HeosConfig) -> Self {
        let address = address.into();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let telnet = TelnetClient::new(address.clone(), &config, events.clone());
        let connection = Arc::new(ConnectionManager::new(address, config, events));
        Self { connection, telnet }
    }

    /// Create a client and connect it
    ///
    /// # Example
    ///
    /// ```no_run
    /// use denon_heos::HeosClient;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let client = HeosClient::connect_to("192.168.1.100").await?;
    ///     for player in client.players().await? {
    ///         println!("{} ({})", player.name(), player.pid());
    ///     }
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect_to(address: impl Into<String>) -> Result<Self> {
        let client = Self::new(address);
        client.connect().await?;
        Ok(client)
    }

    /// Open the connection and register for change events
    ///
    /// Concurrent calls share one attempt; calling while connected is a no-op.
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Close the connection and stop the watchdog
    ///
    /// Calling while disconnected is a no-op. The telnet channel is closed too.
    pub async fn disconnect(&self) -> Result<()> {
        let result = self.connection.disconnect().await;
        self.telnet.disconnect().await?;
        result
    }

    /// Disconnect and connect again
    ///
    /// Raises [`HeosEvent::Reconnecting`](crate::HeosEvent::Reconnecting) and then either
    /// `Reconnected` or `ReconnectError`.
    pub async fn reconnect(&self) -> Result<()> {
        self.connection.reconnect().await
    }

    /// Current connection state
    pub async fn state(&self) -> ConnectionState {
        self.connection.state().await
    }

    /// Current device address
    pub fn address(&self) -> String {
        self.connection.address()
    }

    /// Point the client at a new address
    ///
    /// An open connection is left alone; the new address is used from the next
    /// connect or reconnect.
    pub fn set_address(&self, address: impl Into<String>) {
        let address = address.into();
        self.telnet.set_address(address.clone());
        self.connection.set_address(address);
    }

    /// Active configuration
    pub fn config(&self) -> &HeosConfig {
        self.connection.config()
    }

    /// Telnet control channel for power and input selection
    pub fn telnet(&self) -> &TelnetClient {
        &self.telnet
    }

    /// Subscribe to all notifications
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.connection.events().subscribe())
    }

    /// Subscribe to device events with one name, e.g. `player_state_changed`
    pub fn subscribe_event(&self, name: impl Into<String>) -> DeviceEventReceiver {
        DeviceEventReceiver::new(self.connection.events().subscribe(), name)
    }

    /// Send a request and wait for its reply
    pub async fn send(&self, request: Request) -> Result<Reply> {
        self.connection.submit(request).await
    }

    /// Send a command by path with string parameters
    pub async fn submit(&self, command: &str, params: &[(&str, &str)]) -> Result<Reply> {
        let request = params
            .iter()
            .fold(Request::new(command), |request, (key, value)| request.param(*key, value));
        self.send(request).await
    }

    // ---- system ----

    /// Liveness check
    pub async fn heart_beat(&self) -> Result<()> {
        self.send(Request::new(commands::HEART_BEAT)).await?;
        Ok(())
    }

    /// Enable or disable unsolicited change events
    ///
    /// Events are enabled automatically on every connect.
    pub async fn register_for_change_events(&self, enable: bool) -> Result<()> {
        let request =
            Request::new(commands::REGISTER_FOR_CHANGE_EVENTS).param("enable", on_off(enable));
        self.send(request).await?;
        Ok(())
    }

    /// Signed-in account name, if any
    pub async fn check_account(&self) -> Result<Option<String>> {
        let reply = self.send(Request::new(commands::CHECK_ACCOUNT)).await?;
        Ok(reply.message.get("un").cloned())
    }

    pub async fn sign_in(&self, username: &str, password: &str) -> Result<()> {
        self.send(
            Request::new(commands::SIGN_IN)
                .param("un", username)
                .param("pw", password),
        )
        .await?;
        Ok(())
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.send(Request::new(commands::SIGN_OUT)).await?;
        Ok(())
    }

    /// Reboot the device; the connection drops and the watchdog reconnects
    pub async fn reboot(&self) -> Result<()> {
        self.send(Request::new(commands::REBOOT)).await?;
        Ok(())
    }

    // ---- players ----

    /// Raw player list
    pub async fn get_players(&self) -> Result<Vec<PlayerInfo>> {
        self.send(Request::new(commands::GET_PLAYERS))
            .await?
            .payload_as()
    }

    /// Player handles for every player the device knows
    pub async fn players(&self) -> Result<Vec<Player>> {
        Ok(self
            .get_players()
            .await?
            .into_iter()
            .map(|info| Player::new(self.clone(), info))
            .collect())
    }

    /// Handle for a single player
    pub async fn player(&self, pid: PlayerId) -> Result<Player> {
        let info = self
            .send(Request::new(commands::GET_PLAYER_INFO).param("pid", pid))
            .await?
            .payload_as()?;
        Ok(Player::new(self.clone(), info))
    }

    // ---- groups ----

    pub async fn get_groups(&self) -> Result<Vec<GroupInfo>> {
        self.send(Request::new(commands::GET_GROUPS))
            .await?
            .payload_as()
    }

    /// Group players; the first pid becomes the leader. A single pid ungroups.
    pub async fn set_group(&self, pids: &[PlayerId]) -> Result<Reply> {
        if pids.is_empty() {
            return Err(HeosError::InvalidArgument(
                "set_group needs at least one pid".to_string(),
            ));
        }
        let pids = pids
            .iter()
            .map(PlayerId::to_string)
            .collect::<Vec<_>>()
            .join(",");
        self.send(Request::new(commands::SET_GROUP).param("pid", pids))
            .await
    }

    pub async fn get_group_volume(&self, gid: GroupId) -> Result<u8> {
        self.send(Request::new(commands::GET_GROUP_VOLUME).param("gid", gid))
            .await?
            .parse_field("level")
    }

    pub async fn set_group_volume(&self, gid: GroupId, level: u8) -> Result<()> {
        self.send(
            Request::new(commands::SET_GROUP_VOLUME)
                .param("gid", gid)
                .param("level", level.min(100)),
        )
        .await?;
        Ok(())
    }

    pub async fn get_group_mute(&self, gid: GroupId) -> Result<bool> {
        let reply = self
            .send(Request::new(commands::GET_GROUP_MUTE).param("gid", gid))
            .await?;
        let state = reply.field("state")?;
        parse_on_off(state)
            .ok_or_else(|| HeosError::InvalidResponse(format!("Invalid mute state: {}", state)))
    }

    pub async fn set_group_mute(&self, gid: GroupId, mute: bool) -> Result<()> {
        self.send(
            Request::new(commands::SET_GROUP_MUTE)
                .param("gid", gid)
                .param("state", on_off(mute)),
        )
        .await?;
        Ok(())
    }

    // ---- browse ----

    pub async fn get_music_sources(&self) -> Result<Vec<MusicSource>> {
        self.send(Request::new(commands::GET_MUSIC_SOURCES))
            .await?
            .payload_as()
    }

    /// Browse a music source; the payload layout depends on the source
    pub async fn browse(&self, sid: SourceId) -> Result<Reply> {
        self.send(Request::new(commands::BROWSE).param("sid", sid))
            .await
    }
}
