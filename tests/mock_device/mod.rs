#![allow(dead_code)]
//! Mock HEOS device for testing
//!
//! Speaks the line-delimited JSON protocol on a random local port. Requests
//! are recorded, a handful of commands get canned payloads, and everything
//! else is acknowledged by echoing its parameters back.

use denon_heos::{HeosClient, HeosConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Default)]
struct MockState {
    accepts: AtomicUsize,
    fail_handshake: AtomicBool,
    silent: AtomicBool,
    delay_once_ms: AtomicU64,
    linger_ms: AtomicU64,
    received: Mutex<Vec<String>>,
}

#[derive(Debug, Clone)]
enum Push {
    Line(String),
    Hangup,
}

/// Mock HEOS device server
pub struct MockDevice {
    addr: SocketAddr,
    state: Arc<MockState>,
    push: broadcast::Sender<Push>,
    handle: JoinHandle<()>,
}

impl MockDevice {
    /// Start a mock device on a random port
    pub async fn start() -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState::default());
        let (push, _) = broadcast::channel(16);

        let state_clone = state.clone();
        let push_clone = push.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                state_clone.accepts.fetch_add(1, Ordering::SeqCst);
                let state = state_clone.clone();
                let push = push_clone.subscribe();
                tokio::spawn(handle_connection(stream, state, push));
            }
        });

        Self {
            addr,
            state,
            push,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Config pointing at this device with short timers
    pub fn config(&self) -> HeosConfig {
        HeosConfig::default()
            .with_port(self.port())
            .with_command_timeout(Duration::from_millis(500))
            .with_watchdog_interval(Duration::from_secs(60))
    }

    /// Client for this device, not yet connected
    pub fn client(&self) -> HeosClient {
        HeosClient::with_config("127.0.0.1", self.config())
    }

    /// Number of connections accepted so far
    pub fn accepts(&self) -> usize {
        self.state.accepts.load(Ordering::SeqCst)
    }

    /// Requests received so far, in order, without the scheme or sequence tag
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().unwrap().clone()
    }

    /// Command paths received so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .map(|r| r.split('?').next().unwrap_or_default().to_string())
            .collect()
    }

    /// Answer the change-event registration with a failure
    pub fn fail_handshake(&self, fail: bool) {
        self.state.fail_handshake.store(fail, Ordering::SeqCst);
    }

    /// Stop answering commands
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Hold back the answer to the next command
    pub fn delay_next_reply(&self, delay: Duration) {
        self.state.delay_once_ms.store(millis(delay), Ordering::SeqCst);
    }

    /// Keep a socket open this long after the client half-closes it
    pub fn linger_on_close(&self, linger: Duration) {
        self.state.linger_ms.store(millis(linger), Ordering::SeqCst);
    }

    /// Push a raw frame to every open connection
    pub fn push_line(&self, line: impl Into<String>) {
        let _ = self.push.send(Push::Line(line.into()));
    }

    /// Push an event frame to every open connection
    pub fn push_event(&self, name: &str, message: &str) {
        let frame = json!({"heos": {"command": format!("event/{}", name), "message": message}});
        self.push_line(frame.to_string());
    }

    /// Close every open connection from the device side
    pub fn hang_up(&self) {
        let _ = self.push.send(Push::Hangup);
    }

    pub async fn stop(self) {
        self.hang_up();
        self.handle.abort();
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<MockState>,
    mut push: broadcast::Receiver<Push>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            read = lines.next_line() => {
                let Ok(Some(line)) = read else {
                    let linger = state.linger_ms.load(Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(linger)).await;
                    break;
                };
                let Some(frames) = respond(line.trim_end(), &state) else {
                    continue;
                };
                let delay = state.delay_once_ms.swap(0, Ordering::SeqCst);
                if delay > 0 {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                for frame in frames {
                    if writer.write_all(format!("{}\r\n", frame).as_bytes()).await.is_err() {
                        return;
                    }
                }
            }
            pushed = push.recv() => {
                match pushed {
                    Ok(Push::Line(frame)) => {
                        if writer.write_all(format!("{}\r\n", frame).as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    Ok(Push::Hangup) | Err(_) => return,
                }
            }
        }
    }
}

fn respond(line: &str, state: &MockState) -> Option<Vec<String>> {
    let request = line.strip_prefix("heos://")?;
    let (command, query) = request.split_once('?').unwrap_or((request, ""));
    state.received.lock().unwrap().push(untagged(command, query));

    if state.silent.load(Ordering::SeqCst) {
        return None;
    }

    let frame = match command {
        "system/register_for_change_events" if state.fail_handshake.load(Ordering::SeqCst) => {
            json!({"heos": {"command": command, "result": "fail", "message": "eid=2&text=Invalid ID"}})
        }
        "player/get_players" => {
            // Long-running commands announce themselves first
            let pending = json!({"heos": {"command": command, "result": "success", "message": "command under process"}});
            let reply = success(
                command,
                "",
                Some(json!([
                    {"name": "Living Room", "pid": 1, "model": "HEOS 7", "version": "1.583.147", "network": "wifi"},
                    {"name": "Kitchen", "pid": "2", "gid": 1, "model": "HEOS 1", "version": "1.583.147"}
                ])),
            );
            return Some(vec![pending.to_string(), reply.to_string()]);
        }
        "player/get_player_info" => success(
            command,
            query,
            Some(json!({"name": "Living Room", "pid": 1, "model": "HEOS 7", "version": "1.583.147"})),
        ),
        "player/get_volume" => success(command, &format!("{}&level=25", query), None),
        "player/get_mute" => success(command, &format!("{}&state=off", query), None),
        "player/get_play_state" => success(command, &format!("{}&state=play", query), None),
        "player/get_play_mode" => {
            success(command, &format!("{}&repeat=on_all&shuffle=off", query), None)
        }
        _ => success(command, query, None),
    };
    Some(vec![frame.to_string()])
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap()
}

/// Request as recorded, without the client's sequence tag
fn untagged(command: &str, query: &str) -> String {
    let params: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.starts_with("SEQUENCE="))
        .collect();
    if params.is_empty() {
        command.to_string()
    } else {
        format!("{}?{}", command, params.join("&"))
    }
}

fn success(command: &str, message: &str, payload: Option<Value>) -> Value {
    let mut frame = json!({"heos": {"command": command, "result": "success", "message": message}});
    if let Some(payload) = payload {
        frame["payload"] = payload;
    }
    frame
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
