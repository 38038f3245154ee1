//! Live player counts
//!
//! Occupancy only shapes the deploy prompt, so lookups are best effort:
//! [`resolve_occupancy`] turns any probe failure into zero.

use crate::error::ProbeError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};
use updraft_types::ServerName;

const DEFAULT_PORT: u16 = 25565;
const PROTOCOL_VERSION: i32 = 47;
const MAX_RESPONSE_LEN: usize = 1 << 20;

/// Reports how many players are connected to a server
#[async_trait]
pub trait OccupancyProbe: Send + Sync {
    async fn current_players(&self, address: &str) -> Result<u32, ProbeError>;
}

/// Player count for `server`, or zero when it cannot be determined
pub async fn resolve_occupancy(
    probe: &dyn OccupancyProbe,
    server: &ServerName,
    address: Option<&str>,
) -> u32 {
    let Some(address) = address else {
        debug!(server = %server, "No status address configured, assuming empty");
        return 0;
    };
    match probe.current_players(address).await {
        Ok(players) => players,
        Err(e) => {
            warn!(server = %server, error = %e, "Player count unavailable, assuming empty");
            0
        }
    }
}

/// Queries the server list ping status endpoint of a game server
#[derive(Debug, Clone)]
pub struct MinecraftStatusProbe {
    timeout: Duration,
}

impl MinecraftStatusProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for MinecraftStatusProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    players: StatusPlayers,
}

#[derive(Debug, Deserialize)]
struct StatusPlayers {
    online: u32,
}

#[async_trait]
impl OccupancyProbe for MinecraftStatusProbe {
    async fn current_players(&self, address: &str) -> Result<u32, ProbeError> {
        let (host, port) = split_address(address)?;
        tokio::time::timeout(self.timeout, query_status(host, port))
            .await
            .map_err(|_| ProbeError::Timeout)?
    }
}

fn split_address(address: &str) -> Result<(&str, u16), ProbeError> {
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| ProbeError::InvalidAddress(address.to_string()))?;
            Ok((host, port))
        }
        None if !address.is_empty() => Ok((address, DEFAULT_PORT)),
        None => Err(ProbeError::InvalidAddress(address.to_string())),
    }
}

async fn query_status(host: &str, port: u16) -> Result<u32, ProbeError> {
    let mut stream = TcpStream::connect((host, port)).await?;

    // 1. Handshake with next state = status
    let mut handshake = Vec::new();
    write_varint(&mut handshake, 0x00);
    write_varint(&mut handshake, PROTOCOL_VERSION);
    write_varint(&mut handshake, host.len() as i32);
    handshake.extend_from_slice(host.as_bytes());
    handshake.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut handshake, 1);
    stream.write_all(&frame(&handshake)).await?;

    // 2. Status request
    stream.write_all(&frame(&[0x00])).await?;
    stream.flush().await?;

    // 3. Status response: id, then a length-prefixed JSON string
    let length = read_varint(&mut stream).await?;
    if length <= 0 || length as usize > MAX_RESPONSE_LEN {
        return Err(ProbeError::InvalidResponse(format!("packet length {}", length)));
    }
    let mut packet = vec![0u8; length as usize];
    stream.read_exact(&mut packet).await?;

    let mut cursor = packet.as_slice();
    let packet_id = read_varint(&mut cursor).await?;
    if packet_id != 0x00 {
        return Err(ProbeError::InvalidResponse(format!("packet id {}", packet_id)));
    }
    let json_len = read_varint(&mut cursor).await?;
    if json_len < 0 || json_len as usize > cursor.len() {
        return Err(ProbeError::InvalidResponse("truncated status".to_string()));
    }
    let status: StatusResponse = serde_json::from_slice(&cursor[..json_len as usize])
        .map_err(|e| ProbeError::InvalidResponse(e.to_string()))?;

    Ok(status.players.online)
}

fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    write_varint(&mut out, payload.len() as i32);
    out.extend_from_slice(payload);
    out
}

fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7F == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, ProbeError> {
    let mut result: u32 = 0;
    for i in 0..5 {
        let byte = reader.read_u8().await?;
        result |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(ProbeError::InvalidResponse("varint too long".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    struct FailingProbe;

    #[async_trait]
    impl OccupancyProbe for FailingProbe {
        async fn current_players(&self, _address: &str) -> Result<u32, ProbeError> {
            Err(ProbeError::Timeout)
        }
    }

    async fn read_packet(stream: &mut TcpStream) -> Vec<u8> {
        let len = read_varint(stream).await.unwrap();
        let mut buf = vec![0u8; len as usize];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    async fn fake_server(online: u32) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let handshake = read_packet(&mut stream).await;
            assert_eq!(handshake[0], 0x00);
            assert_eq!(*handshake.last().unwrap(), 1);
            let request = read_packet(&mut stream).await;
            assert_eq!(request, vec![0x00]);

            let json = format!(
                r#"{{"version":{{"name":"1.20.4","protocol":765}},"players":{{"max":100,"online":{}}},"description":"hub"}}"#,
                online
            );
            let mut body = Vec::new();
            write_varint(&mut body, 0x00);
            write_varint(&mut body, json.len() as i32);
            body.extend_from_slice(json.as_bytes());
            stream.write_all(&frame(&body)).await.unwrap();
        });
        addr.to_string()
    }

    #[test]
    fn test_varint_encoding() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);

        buf.clear();
        write_varint(&mut buf, -1);
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }

    #[tokio::test]
    async fn test_read_varint() {
        let bytes = [0xAC, 0x02];
        let mut cursor = &bytes[..];
        assert_eq!(read_varint(&mut cursor).await.unwrap(), 300);
    }

    #[test]
    fn test_split_address() {
        assert_eq!(split_address("mc.example.net").unwrap(), ("mc.example.net", 25565));
        assert_eq!(split_address("10.0.0.5:25570").unwrap(), ("10.0.0.5", 25570));
        assert!(split_address("host:port").is_err());
    }

    #[tokio::test]
    async fn test_status_probe_reads_online_players() {
        let address = fake_server(42).await;
        let probe = MinecraftStatusProbe::default();
        assert_eq!(probe.current_players(&address).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_probe_failure_resolves_to_zero() {
        let server = ServerName::from("Lobby");
        assert_eq!(resolve_occupancy(&FailingProbe, &server, Some("x:1")).await, 0);
        assert_eq!(resolve_occupancy(&FailingProbe, &server, None).await, 0);
    }
}
