//! Line-oriented wire protocol for the external player.
//!
//! A command is a single line terminated by `\n`; a response is zero or
//! more `key: value` lines followed by `OK` on success or `ACK ...` on
//! failure. This module only knows how to read/write lines and parse the
//! two reply shapes this appliance actually needs (`status`, `currentsong`)
//! — it does not attempt to model the player's full command surface.

use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// A connected line-protocol session.
pub struct Connection {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Connection {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::PlayerUnreachable(e.to_string()))?;
        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer: write_half,
        };
        // The banner line (e.g. "OK MPD 0.23.0") precedes any command.
        let mut banner = String::new();
        conn.reader
            .read_line(&mut banner)
            .await
            .map_err(|e| Error::PlayerUnreachable(e.to_string()))?;
        Ok(conn)
    }

    /// Send one command line and collect the response lines up to `OK`/`ACK`.
    pub async fn command(&mut self, line: &str) -> Result<Vec<String>> {
        self.writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .map_err(|e| Error::PlayerUnreachable(e.to_string()))?;

        let mut lines = Vec::new();
        loop {
            let mut buf = String::new();
            let n = self
                .reader
                .read_line(&mut buf)
                .await
                .map_err(|e| Error::PlayerUnreachable(e.to_string()))?;
            if n == 0 {
                return Err(Error::PlayerUnreachable("connection closed".into()));
            }
            let trimmed = buf.trim_end_matches(['\r', '\n']).to_string();
            if trimmed == "OK" {
                return Ok(lines);
            }
            if let Some(msg) = trimmed.strip_prefix("ACK ") {
                return Err(Error::PlayerRejected(msg.to_string()));
            }
            lines.push(trimmed);
        }
    }
}

/// Parse `key: value` lines into a map. Keys are lowercased.
pub fn parse_kv(lines: &[String]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(": ") {
            map.insert(k.to_lowercase(), v.to_string());
        }
    }
    map
}

/// Parsed `status` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    pub state: String,
    pub elapsed: f64,
    pub volume: i32,
}

impl Status {
    pub fn from_lines(lines: &[String]) -> Self {
        let map = parse_kv(lines);
        Status {
            state: map.get("state").cloned().unwrap_or_default(),
            elapsed: map.get("elapsed").and_then(|s| s.parse().ok()).unwrap_or(0.0),
            volume: map.get("volume").and_then(|s| s.parse().ok()).unwrap_or(-1),
        }
    }
}

/// Parsed `currentsong` response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentSong {
    pub file: Option<String>,
}

impl CurrentSong {
    pub fn from_lines(lines: &[String]) -> Self {
        let map = parse_kv(lines);
        CurrentSong {
            file: map.get("file").cloned(),
        }
    }
}
