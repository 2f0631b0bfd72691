// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Blocking client for the daemon socket.

use crate::mode::{FanId, PowerMode};
use crate::protocol::{AUTH_REQUIRED, AllData, Envelope, FansData, PowerData, Request, Response, StatusData, TempsData};
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a `get_all_data` answer is reused.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(1);

const IO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("daemon socket {0} not found, is g15-daemon running?")]
    DaemonNotRunning(PathBuf),

    #[error("permission denied on {0}, is your user in the socket group?")]
    PermissionDenied(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon error: {0}")]
    Daemon(String),
}

pub struct Client {
    socket_path: PathBuf,
    token: Option<String>,
    cache_ttl: Duration,
    cache: Option<(Instant, AllData)>,
}

impl Client {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            token: None,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: None,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Send one request over a fresh connection.
    pub fn send(&self, envelope: &Envelope) -> Result<Response, ClientError> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
                ClientError::DaemonNotRunning(self.socket_path.clone())
            }
            io::ErrorKind::PermissionDenied => ClientError::PermissionDenied(self.socket_path.clone()),
            _ => ClientError::Io(e),
        })?;
        stream.set_read_timeout(Some(IO_TIMEOUT))?;
        stream.set_write_timeout(Some(IO_TIMEOUT))?;

        let encoded = serde_json::to_vec(&envelope.to_json())?;
        stream.write_all(&encoded)?;
        stream.flush()?;

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Send `request`, attaching a session token to mutations. A token the
    /// daemon no longer accepts is dropped and the request retried once.
    fn request(&mut self, request: Request) -> Result<Response, ClientError> {
        let mutating = request.action().is_mutating();
        let mut retried = false;
        loop {
            let token = if mutating { Some(self.token()?) } else { None };
            let response = self.send(&Envelope {
                request: request.clone(),
                token,
            })?;
            if response.is_success() {
                return Ok(response);
            }

            let message = response.message.unwrap_or_else(|| "unknown error".to_string());
            if mutating && !retried && message == AUTH_REQUIRED {
                log::debug!("Session token rejected, authenticating again");
                self.token = None;
                retried = true;
                continue;
            }
            return Err(ClientError::Daemon(message));
        }
    }

    fn query<T: for<'de> serde::Deserialize<'de>>(&mut self, request: Request) -> Result<T, ClientError> {
        let response = self.request(request)?;
        let data = response
            .data
            .ok_or_else(|| ClientError::Daemon("response carried no data".to_string()))?;
        Ok(serde_json::from_value(data)?)
    }

    fn token(&mut self) -> Result<String, ClientError> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        let response = self.request(Request::Authenticate)?;
        let token = response
            .token
            .ok_or_else(|| ClientError::Daemon("authentication returned no token".to_string()))?;
        self.token = Some(token.clone());
        Ok(token)
    }

    // -- operations ---------------------------------------------------------

    pub fn status(&mut self) -> Result<StatusData, ClientError> {
        self.query(Request::GetStatus)
    }

    pub fn temps(&mut self) -> Result<TempsData, ClientError> {
        self.query(Request::GetTemps)
    }

    pub fn fans(&mut self) -> Result<FansData, ClientError> {
        self.query(Request::GetFans)
    }

    pub fn power_mode(&mut self) -> Result<PowerData, ClientError> {
        self.query(Request::GetPowerMode)
    }

    pub fn all_data(&mut self) -> Result<AllData, ClientError> {
        if let Some((at, data)) = &self.cache {
            if at.elapsed() < self.cache_ttl {
                return Ok(data.clone());
            }
        }
        let data: AllData = self.query(Request::GetAllData)?;
        self.cache = Some((Instant::now(), data.clone()));
        Ok(data)
    }

    pub fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), ClientError> {
        self.request(Request::SetPowerMode { mode })?;
        self.cache = None;
        Ok(())
    }

    pub fn set_fan_boost(&mut self, fan: FanId, percentage: u8) -> Result<(), ClientError> {
        self.request(Request::SetFanBoost {
            fan_id: i64::from(fan.number()),
            percentage: i64::from(percentage),
        })?;
        self.cache = None;
        Ok(())
    }

    pub fn toggle_g_mode(&mut self) -> Result<(), ClientError> {
        self.request(Request::ToggleGMode)?;
        self.cache = None;
        Ok(())
    }
}
