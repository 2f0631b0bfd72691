// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Unix socket server: admission, routing and the accept loop.
//!
//! Every connection is one request and one response. Admission runs in this
//! order: JSON decode, per-client rate limit, allow-list and parameter checks,
//! session token for mutating actions. Only then does the request reach the
//! controller, on a blocking thread under the hardware lock.

use crate::config::Config;
use crate::controller::{self, Controller, SharedController};
use crate::protocol::{self, AUTH_REQUIRED, Envelope, ProtocolError, Request, Response};
use crate::session::{RateLimiter, SessionStore};
use nix::unistd::{Group, chown};
use std::future::Future;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, Semaphore};
use tokio::time;

/// Client key used when the peer's credentials can't be read.
const UNKNOWN_PEER: u32 = u32::MAX;

/// Quiet period after which an oversized request is considered fully sent.
const DRAIN_IDLE: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub socket_path: PathBuf,
    pub socket_group: Option<String>,
    pub allow_world_access: bool,
    pub max_connections: usize,
    pub rate_limit_requests: usize,
    pub rate_limit_window: Duration,
    pub session_ttl: Duration,
    pub require_token: bool,
    pub io_timeout: Duration,
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            socket_path: PathBuf::from(&config.daemon.socket_path),
            socket_group: config.security.socket_group.clone(),
            allow_world_access: config.security.allow_world_access,
            max_connections: config.security.max_connections,
            rate_limit_requests: config.security.rate_limit_requests,
            rate_limit_window: config.security.rate_limit_window(),
            session_ttl: config.security.session_ttl(),
            require_token: config.security.require_token,
            io_timeout: config.daemon.io_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

struct Guard {
    sessions: SessionStore,
    limiter: RateLimiter<u32>,
}

pub struct Server {
    controller: SharedController,
    guard: Mutex<Guard>,
    connections: Arc<Semaphore>,
    options: ServerOptions,
}

impl Server {
    pub fn new(controller: SharedController, options: ServerOptions) -> Self {
        Self {
            controller,
            guard: Mutex::new(Guard {
                sessions: SessionStore::new(options.session_ttl),
                limiter: RateLimiter::new(options.rate_limit_requests, options.rate_limit_window),
            }),
            connections: Arc::new(Semaphore::new(options.max_connections)),
            options,
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Bind the socket and apply the configured access policy.
    /// Must be called from within a tokio runtime.
    pub fn bind(&self) -> io::Result<UnixListener> {
        let path = &self.options.socket_path;

        if let Ok(metadata) = path.symlink_metadata() {
            if metadata.file_type().is_symlink() {
                log::error!(target: "security", "SECURITY: socket path {} is a symlink", path.display());
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "socket path is a symlink",
                ));
            }
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        apply_socket_permissions(path, &self.options)?;
        log::info!("Listening on {}", path.display());
        Ok(listener)
    }

    /// Serve connections until `shutdown` resolves, then remove the socket.
    pub async fn run(self: Arc<Self>, listener: UnixListener, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut cleanup = time::interval(self.options.rate_limit_window);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => self.clone().spawn_connection(stream),
                        Err(e) => log::error!("Failed to accept connection: {e}"),
                    }
                }
                _ = cleanup.tick() => {
                    self.guard.lock().await.limiter.cleanup(Instant::now());
                }
                _ = &mut shutdown => {
                    log::info!("Daemon shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.options.socket_path);
    }

    fn spawn_connection(self: Arc<Self>, mut stream: UnixStream) {
        match self.connections.clone().try_acquire_owned() {
            Ok(permit) => {
                tokio::spawn(async move {
                    self.handle_client(stream).await;
                    drop(permit);
                });
            }
            Err(_) => {
                log::warn!(
                    target: "security",
                    "SECURITY: connection limit ({}) reached, rejecting client",
                    self.options.max_connections
                );
                let timeout = self.options.io_timeout;
                tokio::spawn(async move {
                    // Consume the request so closing doesn't reset the peer.
                    if let Ok(bytes) = read_request(&mut stream, timeout).await {
                        if !bytes.is_empty() {
                            let _ = write_response(stream, &Response::error("Server busy"), timeout).await;
                        }
                    }
                });
            }
        }
    }

    async fn handle_client(&self, mut stream: UnixStream) {
        let peer = match stream.peer_cred() {
            Ok(cred) => cred.uid(),
            Err(e) => {
                log::warn!("Could not read peer credentials: {e}");
                UNKNOWN_PEER
            }
        };

        let request = match read_request(&mut stream, self.options.io_timeout).await {
            Ok(bytes) if bytes.is_empty() => return,
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to read request from uid {peer}: {e}");
                return;
            }
        };

        let response = self.handle_request(&request, peer).await;
        if let Err(e) = write_response(stream, &response, self.options.io_timeout).await {
            log::warn!("Failed to send response to uid {peer}: {e}");
        }
    }

    /// Admit, route and execute one raw request from `peer`.
    pub async fn handle_request(&self, bytes: &[u8], peer: u32) -> Response {
        let obj = match protocol::decode(bytes) {
            Ok(obj) => obj,
            Err(e) => {
                log::warn!(target: "security", "SECURITY: invalid JSON from uid {peer}");
                return e.into();
            }
        };

        let envelope = {
            let mut guard = self.guard.lock().await;
            if !guard.limiter.check(&peer) {
                log::warn!(target: "security", "SECURITY: rate limit exceeded for uid {peer}");
                return Response::error("Rate limit exceeded");
            }

            let envelope = match Envelope::from_object(&obj) {
                Ok(env) => env,
                Err(e) => {
                    log_rejection(&e, peer);
                    return e.into();
                }
            };

            if envelope.request == Request::Authenticate {
                log::info!("Issued session token to uid {peer}");
                return Response::with_token(guard.sessions.issue());
            }

            if self.options.require_token && envelope.request.action().is_mutating() {
                let valid = envelope
                    .token
                    .as_deref()
                    .is_some_and(|t| guard.sessions.is_valid(t));
                if !valid {
                    log::warn!(
                        target: "security",
                        "SECURITY: {} from uid {peer} without a valid session token",
                        envelope.request.action().name()
                    );
                    return Response::error(AUTH_REQUIRED);
                }
            }
            envelope
        };

        let controller = self.controller.clone();
        let request = envelope.request;
        match tokio::task::spawn_blocking(move || {
            let mut ctl = controller::lock(&controller);
            dispatch(&mut ctl, &request)
        })
        .await
        {
            Ok(response) => response,
            Err(e) => {
                log::error!("Request handler failed: {e}");
                Response::internal_error()
            }
        }
    }
}

fn log_rejection(e: &ProtocolError, peer: u32) {
    match e {
        ProtocolError::UnauthorizedAction(action) => {
            log::warn!(target: "security", "SECURITY: unauthorized action {action:?} from uid {peer}");
        }
        other => {
            log::warn!(target: "security", "SECURITY: rejected request from uid {peer}: {other}");
        }
    }
}

/// Execute an admitted request against the controller.
pub fn dispatch(ctl: &mut Controller, request: &Request) -> Response {
    match request {
        // Sessions belong to the server, which answers this before dispatch.
        Request::Authenticate => Response::error("Unknown error"),
        Request::GetStatus => Response::with_data(&ctl.status()),
        Request::GetTemps => Response::with_data(&ctl.temps()),
        Request::GetFans => Response::with_data(&ctl.fans()),
        Request::GetPowerMode => Response::with_data(&ctl.power()),
        Request::GetAllData => Response::with_data(&ctl.all_data()),
        Request::SetPowerMode { mode } => {
            ctl.set_power_mode(*mode);
            Response::ok()
        }
        Request::SetFanBoost { fan_id, percentage } => {
            match ctl.set_fan_boost(*fan_id, *percentage) {
                Ok(()) => Response::ok(),
                Err(e) => Response::error(e.to_string()),
            }
        }
        Request::ToggleGMode => {
            ctl.toggle_g_mode();
            Response::ok()
        }
    }
}

// ---------------------------------------------------------------------------
// Socket I/O
// ---------------------------------------------------------------------------

fn apply_socket_permissions(path: &Path, options: &ServerOptions) -> io::Result<()> {
    let mode = if options.allow_world_access {
        log::warn!(target: "security", "SECURITY: socket is world-writable (allow_world_access)");
        0o666
    } else if let Some(name) = &options.socket_group {
        match Group::from_name(name) {
            Ok(Some(group)) => match chown(path, None, Some(group.gid)) {
                Ok(()) => {
                    log::info!("Socket access granted to group '{name}'");
                    0o660
                }
                Err(e) => {
                    log::warn!("Could not chown socket to group '{name}': {e}, root-only access");
                    0o600
                }
            },
            _ => {
                log::warn!("Socket group '{name}' not found, root-only access");
                0o600
            }
        }
    } else {
        log::warn!("No socket_group configured, only root can connect");
        0o600
    };

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

/// Read one JSON document (at most [`protocol::MAX_REQUEST_SIZE`] bytes).
/// Input past the limit is read and discarded.
async fn read_request(stream: &mut UnixStream, timeout: Duration) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let mut overflow = false;

    let read_all = async {
        loop {
            let n = stream.read(&mut chunk).await?;
            if n == 0 {
                break;
            }
            let room = protocol::MAX_REQUEST_SIZE - buf.len();
            buf.extend_from_slice(&chunk[..n.min(room)]);
            if buf.len() >= protocol::MAX_REQUEST_SIZE {
                overflow = true;
                break;
            }
            match serde_json::from_slice::<serde_json::Value>(&buf) {
                Err(e) if e.is_eof() => continue,
                _ => break,
            }
        }
        Ok::<_, io::Error>(())
    };

    let outcome = time::timeout(timeout, read_all).await;
    match outcome {
        Ok(result) => result?,
        Err(_) if !buf.is_empty() => {}
        Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "request timed out")),
    }

    if overflow {
        log::warn!(target: "security", "SECURITY: request exceeds {} bytes", protocol::MAX_REQUEST_SIZE);
        let _ = time::timeout(timeout, drain(stream, &mut chunk)).await;
    }
    Ok(buf)
}

/// Discard whatever the peer still has in flight, stopping at EOF or once
/// the stream has been idle for [`DRAIN_IDLE`].
async fn drain(stream: &mut UnixStream, chunk: &mut [u8]) {
    while let Ok(Ok(n)) = time::timeout(DRAIN_IDLE, stream.read(chunk)).await {
        if n == 0 {
            break;
        }
    }
}

async fn write_response(mut stream: UnixStream, response: &Response, timeout: Duration) -> io::Result<()> {
    let encoded = protocol::encode(response).map_err(io::Error::other)?;
    let write = async {
        stream.write_all(encoded.as_bytes()).await?;
        stream.shutdown().await
    };
    time::timeout(timeout, write)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "response timed out"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acpi::testing::RecordingTransport;
    use crate::hardware::{Hardware, Timing};
    use crate::mode::PowerMode;
    use crate::protocol::{AllData, Status};
    use crate::store::ConfigStore;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    fn options(dir: &Path) -> ServerOptions {
        ServerOptions {
            socket_path: dir.join("g15.sock"),
            socket_group: None,
            allow_world_access: false,
            max_connections: 4,
            rate_limit_requests: 50,
            rate_limit_window: Duration::from_secs(10),
            session_ttl: Duration::from_secs(60),
            require_token: true,
            io_timeout: Duration::from_secs(2),
        }
    }

    fn server() -> (Server, RecordingTransport, TempDir) {
        server_with(|_| {})
    }

    fn server_with(adjust: impl FnOnce(&mut ServerOptions)) -> (Server, RecordingTransport, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::default();
        let hw = Hardware::new(Box::new(transport.clone()), None, Timing::NONE);
        let ctl = Controller::new(hw, ConfigStore::new(dir.path().join("state")));
        let mut opts = options(dir.path());
        adjust(&mut opts);
        let server = Server::new(Arc::new(StdMutex::new(ctl)), opts);
        (server, transport, dir)
    }

    fn socket_mode(server: &Server) -> u32 {
        std::fs::metadata(&server.options().socket_path)
            .unwrap()
            .permissions()
            .mode()
            & 0o777
    }

    async fn token(server: &Server) -> String {
        server
            .handle_request(br#"{"action": "authenticate"}"#, 1000)
            .await
            .token
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_action_is_rejected_without_hardware_calls() {
        let (server, transport, _dir) = server();
        let resp = server.handle_request(br#"{"action": "drop_table"}"#, 1000).await;
        assert_eq!(resp.status, Status::Error);
        assert_eq!(resp.message.as_deref(), Some("Unauthorized action"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_and_missing_action() {
        let (server, _transport, _dir) = server();
        let resp = server.handle_request(b"{\"action\": ", 1000).await;
        assert_eq!(resp.message.as_deref(), Some("Invalid JSON"));
        let resp = server.handle_request(br#"{"fan_id": 1}"#, 1000).await;
        assert_eq!(resp.message.as_deref(), Some("Request validation failed"));
    }

    #[tokio::test]
    async fn test_mutations_need_a_token() {
        let (server, transport, _dir) = server();
        let resp = server.handle_request(br#"{"action": "toggle_g_mode"}"#, 1000).await;
        assert_eq!(resp.message.as_deref(), Some("Authentication required"));
        let resp = server
            .handle_request(br#"{"action": "toggle_g_mode", "token": "forged"}"#, 1000)
            .await;
        assert_eq!(resp.message.as_deref(), Some("Authentication required"));
        assert!(transport.calls().is_empty());

        let token = token(&server).await;
        let req = format!(r#"{{"action": "set_power_mode", "mode": "Performance", "token": "{token}"}}"#);
        let resp = server.handle_request(req.as_bytes(), 1000).await;
        assert!(resp.is_success());
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_reads_do_not_need_a_token() {
        let (server, _transport, _dir) = server();
        let resp = server.handle_request(br#"{"action": "get_power_mode"}"#, 1000).await;
        assert!(resp.is_success());
        let data = resp.data.unwrap();
        assert_eq!(data["current_mode"], "Balanced");
        assert_eq!(data["g_mode"], false);
    }

    #[tokio::test]
    async fn test_fan_boost_validation_errors() {
        let (server, transport, _dir) = server();
        let token = token(&server).await;
        for body in [
            format!(r#"{{"action": "set_fan_boost", "fan_id": 3, "percentage": 50, "token": "{token}"}}"#),
            format!(r#"{{"action": "set_fan_boost", "fan_id": 1, "percentage": 101, "token": "{token}"}}"#),
            format!(r#"{{"action": "set_fan_boost", "fan_id": 1, "percentage": "50", "token": "{token}"}}"#),
        ] {
            let resp = server.handle_request(body.as_bytes(), 1000).await;
            assert_eq!(resp.status, Status::Error, "{body}");
        }
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_applies_per_peer() {
        let (server, _transport, _dir) = server();
        for _ in 0..50 {
            let resp = server.handle_request(br#"{"action": "get_status"}"#, 1000).await;
            assert!(resp.is_success());
        }
        let resp = server.handle_request(br#"{"action": "get_status"}"#, 1000).await;
        assert_eq!(resp.message.as_deref(), Some("Rate limit exceeded"));

        let resp = server.handle_request(br#"{"action": "get_status"}"#, 1001).await;
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn test_get_all_data_aggregates_everything() {
        let (server, _transport, _dir) = server();
        let resp = server.handle_request(br#"{"action": "get_all_data"}"#, 1000).await;
        let all: AllData = resp.data_as().unwrap();
        assert_eq!(all.power.current_mode, PowerMode::Balanced);
        assert!(!all.status.hwmon_available);
        assert_eq!(all.status.model, "Unknown");
        // The recorder answers 0x0, a valid in-range reading.
        assert_eq!(all.temps.cpu_temp, 0);
        assert_eq!(all.fans.fan1_boost, 0);
    }

    #[tokio::test]
    async fn test_bind_is_root_only_without_group() {
        let (server, _transport, _dir) = server();
        let _listener = server.bind().unwrap();
        assert_eq!(socket_mode(&server), 0o600);
    }

    #[tokio::test]
    async fn test_bind_unknown_group_stays_root_only() {
        let (server, _transport, _dir) = server_with(|o| {
            o.socket_group = Some("g15-no-such-group".to_string());
        });
        let _listener = server.bind().unwrap();
        assert_eq!(socket_mode(&server), 0o600);
    }

    #[tokio::test]
    async fn test_bind_grants_group_access() {
        let own_group = Group::from_gid(nix::unistd::getgid()).unwrap().unwrap();
        let (server, _transport, _dir) = server_with(|o| {
            o.socket_group = Some(own_group.name.clone());
        });
        let _listener = server.bind().unwrap();
        assert_eq!(socket_mode(&server), 0o660);
        let gid = std::os::unix::fs::MetadataExt::gid(
            &std::fs::metadata(&server.options().socket_path).unwrap(),
        );
        assert_eq!(gid, own_group.gid.as_raw());
    }

    #[tokio::test]
    async fn test_bind_world_access_overrides_group() {
        let (server, _transport, _dir) = server_with(|o| {
            o.socket_group = Some("g15-no-such-group".to_string());
            o.allow_world_access = true;
        });
        let _listener = server.bind().unwrap();
        assert_eq!(socket_mode(&server), 0o666);
    }

    #[tokio::test]
    async fn test_bind_refuses_symlink() {
        let (server, _transport, dir) = server();
        std::os::unix::fs::symlink(dir.path().join("elsewhere"), &server.options().socket_path).unwrap();
        assert!(server.bind().is_err());
    }
}
