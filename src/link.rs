//! MAVLink transport over UDP
//!
//! The link speaks MAVLink v2 on send and accepts both v1 and v2 frames on receive. It is the only part of the
//! crate that touches sockets; everything above it works with decoded [MavMessage]s.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering::Relaxed};
use std::sync::Mutex;

use mavlink::common::MavMessage;
use mavlink::peek_reader::PeekReader;
use mavlink::MavHeader;
use tokio::net::UdpSocket;

use crate::{Error, Result};

/// System id used by this ground station
pub const GCS_SYSTEM_ID: u8 = 255;
/// Component id used by this ground station
pub const GCS_COMPONENT_ID: u8 = 0;

const MAVLINK_V1_STX: u8 = 0xFE;
const MAVLINK_V2_STX: u8 = 0xFD;
const MAX_DATAGRAM: usize = 2048;

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionUri {
    /// Bind locally and wait for the vehicle to send to us (`host:port`, `udp:host:port`, `udpin:host:port`)
    UdpIn(String),
    /// Send to a fixed remote address (`udpout:host:port`)
    UdpOut(String),
}

impl ConnectionUri {
    /// Parse a connection string.
    ///
    /// A bare `host:port` is a listening UDP endpoint, which is how SITL and most ground station setups hand
    /// out their telemetry stream (for example `127.0.0.1:14550`).
    pub fn parse(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        let (scheme, address) = match uri.split_once(':') {
            Some((scheme, rest)) if scheme.chars().all(|c| c.is_ascii_alphabetic()) && rest.contains(':') => {
                (Some(scheme), rest)
            }
            _ => (None, uri),
        };

        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| Error::Connection(format!("missing port in '{}'", uri)))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(Error::Connection(format!("invalid address '{}'", address)));
        }

        match scheme {
            None | Some("udp") | Some("udpin") => Ok(ConnectionUri::UdpIn(address.to_owned())),
            Some("udpout") => Ok(ConnectionUri::UdpOut(address.to_owned())),
            Some(other) => Err(Error::Connection(format!("unsupported transport '{}'", other))),
        }
    }
}

/// UDP MAVLink link to a single vehicle
#[derive(Debug)]
pub struct MavLink {
    socket: UdpSocket,
    peer: Mutex<Option<SocketAddr>>,
    sequence: AtomicU8,
}

impl MavLink {
    /// Open the link described by `uri`
    pub async fn open(uri: &str) -> Result<Self> {
        let (socket, peer) = match ConnectionUri::parse(uri)? {
            ConnectionUri::UdpIn(address) => {
                let socket = UdpSocket::bind(&address)
                    .await
                    .map_err(|e| Error::Connection(format!("cannot bind {}: {}", address, e)))?;
                (socket, None)
            }
            ConnectionUri::UdpOut(address) => {
                let remote = tokio::net::lookup_host(&address)
                    .await
                    .map_err(|e| Error::Connection(format!("cannot resolve {}: {}", address, e)))?
                    .next()
                    .ok_or_else(|| Error::Connection(format!("no address for {}", address)))?;
                let local = if remote.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                (UdpSocket::bind(local).await?, Some(remote))
            }
        };
        log::debug!("MAVLink link open on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            peer: Mutex::new(peer),
            sequence: AtomicU8::new(0),
        })
    }

    /// Local address of the link socket
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Address of the vehicle, once known
    pub fn peer(&self) -> Option<SocketAddr> {
        *self.peer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive one datagram and decode every MAVLink frame it carries.
    ///
    /// On a listening link the first sender becomes the vehicle address used for outgoing messages.
    pub async fn recv(&self) -> Result<Vec<(MavHeader, MavMessage)>> {
        let mut buf = [0u8; MAX_DATAGRAM];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        {
            let mut peer = self.peer.lock().unwrap_or_else(|e| e.into_inner());
            if peer.is_none() {
                log::info!("Vehicle link established with {}", from);
                *peer = Some(from);
            }
        }
        Ok(decode_datagram(&buf[..len]))
    }

    /// Send a message to the vehicle. Messages sent before the vehicle address is known are dropped.
    pub async fn send(&self, msg: &MavMessage) -> Result<()> {
        let Some(peer) = self.peer() else {
            log::debug!("Dropping {}, vehicle address not known yet", message_name(msg));
            return Ok(());
        };

        let header = MavHeader {
            system_id: GCS_SYSTEM_ID,
            component_id: GCS_COMPONENT_ID,
            sequence: self.sequence.fetch_add(1, Relaxed),
        };
        let frame = encode_v2(header, msg)?;
        self.socket.send_to(&frame, peer).await?;
        Ok(())
    }
}

/// Serialize a message as a MAVLink v2 frame
pub fn encode_v2(header: MavHeader, msg: &MavMessage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::with_capacity(280));
    mavlink::write_v2_msg(&mut buf, header, msg)?;
    Ok(buf.into_inner())
}

/// Decode all MAVLink frames found in a datagram. Garbage between frames is skipped.
pub fn decode_datagram(data: &[u8]) -> Vec<(MavHeader, MavMessage)> {
    let mut messages = Vec::new();
    let mut rest = data;

    while let Some(pos) = rest.iter().position(|&b| b == MAVLINK_V1_STX || b == MAVLINK_V2_STX) {
        rest = &rest[pos..];
        let Some(frame_len) = frame_len(rest) else {
            break;
        };
        let frame = &rest[..frame_len.min(rest.len())];

        let mut reader = PeekReader::new(Cursor::new(frame));
        let parsed = if rest[0] == MAVLINK_V2_STX {
            mavlink::read_v2_msg::<MavMessage, _>(&mut reader)
        } else {
            mavlink::read_v1_msg::<MavMessage, _>(&mut reader)
        };
        match parsed {
            Ok(msg) => {
                messages.push(msg);
                rest = &rest[frame_len.min(rest.len())..];
            }
            // Not a frame start after all, resync on the next magic byte
            Err(_) => rest = &rest[1..],
        }
    }

    messages
}

fn frame_len(frame: &[u8]) -> Option<usize> {
    let payload_len = *frame.get(1)? as usize;
    match frame[0] {
        MAVLINK_V1_STX => Some(6 + payload_len + 2),
        MAVLINK_V2_STX => {
            let incompat_flags = *frame.get(2)?;
            let signature = if incompat_flags & 0x01 != 0 { 13 } else { 0 };
            Some(10 + payload_len + 2 + signature)
        }
        _ => None,
    }
}

pub(crate) fn message_name(msg: &MavMessage) -> &'static str {
    use mavlink::Message;
    msg.message_name()
}
