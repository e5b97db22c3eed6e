//! ICMP echo: message helpers and a raw-socket pinger/responder.
//!
//! Datagrams on an IP-raw socket may arrive with or without the IPv4
//! header in front depending on the engine; [`icmp_message`] accepts both.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use wizlink_protocol::SocketId;
use wizlink_protocol::constants::{PING_BUFFER_SIZE, PING_IDENTIFIER, PING_PAYLOAD_LEN};
use wizlink_socket::{SocketDriver, SocketError, SocketKind};

pub const ECHO_REPLY: u8 = 0;
pub const ECHO_REQUEST: u8 = 8;
pub const IP_PROTO_ICMP: u8 = 1;
pub const ECHO_HEADER_LEN: usize = 8;

const IPV4_MIN_HEADER_LEN: usize = 20;
const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, thiserror::Error)]
pub enum IcmpError {
    #[error("packet too short ({0} bytes)")]
    TooShort(usize),

    #[error("IP protocol {0} is not ICMP")]
    NotIcmp(u8),

    #[error("ICMP type {0} is not an echo request")]
    NotEchoRequest(u8),

    #[error("bad ICMP checksum")]
    BadChecksum,

    #[error("pinger is not open")]
    NotOpen,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Socket(#[from] SocketError),
}

/// RFC 1071 internet checksum. An odd trailing byte is padded with zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut chunks = data.chunks_exact(2);
    let mut sum: u32 = chunks
        .by_ref()
        .map(|c| u32::from(u16::from_be_bytes([c[0], c[1]])))
        .sum();
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

/// First eight bytes of an echo request or reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoHeader {
    pub kind: u8,
    pub code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
}

impl EchoHeader {
    pub fn encode(&self) -> [u8; ECHO_HEADER_LEN] {
        let mut out = [0u8; ECHO_HEADER_LEN];
        out[0] = self.kind;
        out[1] = self.code;
        out[2..4].copy_from_slice(&self.checksum.to_be_bytes());
        out[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        out[6..8].copy_from_slice(&self.sequence.to_be_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, IcmpError> {
        let Some(h) = data.get(..ECHO_HEADER_LEN) else {
            return Err(IcmpError::TooShort(data.len()));
        };
        Ok(Self {
            kind: h[0],
            code: h[1],
            checksum: u16::from_be_bytes([h[2], h[3]]),
            identifier: u16::from_be_bytes([h[4], h[5]]),
            sequence: u16::from_be_bytes([h[6], h[7]]),
        })
    }
}

pub fn build_echo_request(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let header = EchoHeader {
        kind: ECHO_REQUEST,
        code: 0,
        checksum: 0,
        identifier,
        sequence,
    };
    let mut packet = Vec::with_capacity(ECHO_HEADER_LEN + payload.len());
    packet.extend_from_slice(&header.encode());
    packet.extend_from_slice(payload);
    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// Builds the reply to an echo request: same identifier, sequence and
/// payload, type flipped and checksum recomputed.
pub fn echo_reply(request: &[u8]) -> Result<Vec<u8>, IcmpError> {
    let header = EchoHeader::decode(request)?;
    if header.kind != ECHO_REQUEST {
        return Err(IcmpError::NotEchoRequest(header.kind));
    }
    if checksum(request) != 0 {
        return Err(IcmpError::BadChecksum);
    }

    let mut reply = request.to_vec();
    reply[0] = ECHO_REPLY;
    reply[2..4].fill(0);
    let sum = checksum(&reply);
    reply[2..4].copy_from_slice(&sum.to_be_bytes());
    Ok(reply)
}

/// Returns the ICMP message inside `packet`, skipping an IPv4 header when
/// one is present.
pub fn icmp_message(packet: &[u8]) -> Result<&[u8], IcmpError> {
    let Some(&first) = packet.first() else {
        return Err(IcmpError::TooShort(0));
    };
    if first >> 4 != 4 {
        return Ok(packet);
    }

    let header_len = usize::from(first & 0x0F) * 4;
    if header_len < IPV4_MIN_HEADER_LEN || packet.len() < header_len + ECHO_HEADER_LEN {
        return Err(IcmpError::TooShort(packet.len()));
    }
    if packet[9] != IP_PROTO_ICMP {
        return Err(IcmpError::NotIcmp(packet[9]));
    }
    Ok(&packet[header_len..])
}

/// Echo round-trip counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingStats {
    pub sent: u32,
    pub received: u32,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    total: Duration,
}

impl PingStats {
    fn record(&mut self, rtt: Duration) {
        self.received += 1;
        self.total += rtt;
        self.min = Some(self.min.map_or(rtt, |m| m.min(rtt)));
        self.max = Some(self.max.map_or(rtt, |m| m.max(rtt)));
    }

    pub fn lost(&self) -> u32 {
        self.sent.saturating_sub(self.received)
    }

    pub fn avg(&self) -> Option<Duration> {
        (self.received > 0).then(|| self.total / self.received)
    }
}

/// Sends echo requests and answers incoming ones on one raw socket.
pub struct Pinger<D> {
    driver: Arc<Mutex<D>>,
    socket: SocketId,
    identifier: u16,
    sequence: u16,
    open: bool,
    stats: PingStats,
}

impl<D: SocketDriver> Pinger<D> {
    pub fn new(driver: Arc<Mutex<D>>, socket: SocketId) -> Self {
        Self {
            driver,
            socket,
            identifier: PING_IDENTIFIER,
            sequence: 0,
            open: false,
            stats: PingStats::default(),
        }
    }

    /// (Re)opens the socket in ICMP raw mode.
    pub async fn open(&mut self) -> Result<(), IcmpError> {
        let mut driver = self.driver.lock().await;
        driver.close(self.socket);
        self.open = false;
        driver
            .open(
                self.socket,
                SocketKind::IpRaw {
                    protocol: IP_PROTO_ICMP,
                },
                0,
            )
            .await?;
        self.open = true;
        debug!(socket = %self.socket, "ICMP socket open");
        Ok(())
    }

    pub async fn close(&mut self) {
        if self.open {
            self.driver.lock().await.close(self.socket);
            self.open = false;
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn stats(&self) -> PingStats {
        self.stats
    }

    /// Clears the counters. Identifier and sequence carry on.
    pub fn reset_stats(&mut self) {
        self.stats = PingStats::default();
    }

    /// Sends one echo request to `target` and waits up to `timeout` for
    /// the matching reply.
    pub async fn ping(
        &mut self,
        target: Ipv4Addr,
        timeout: Duration,
    ) -> Result<Duration, IcmpError> {
        if !self.open {
            return Err(IcmpError::NotOpen);
        }

        self.sequence = self.sequence.wrapping_add(1);
        let payload: Vec<u8> = (0..PING_PAYLOAD_LEN).map(|i| i as u8).collect();
        let request = build_echo_request(self.identifier, self.sequence, &payload);

        self.driver
            .lock()
            .await
            .send_to(self.socket, &request, SocketAddrV4::new(target, 0))
            .await?;
        self.stats.sent += 1;
        let start = Instant::now();

        let mut buf = [0u8; PING_BUFFER_SIZE];
        loop {
            loop {
                let got = self.driver.lock().await.recv_from(self.socket, &mut buf)?;
                let Some((n, from)) = got else { break };
                if self.is_our_reply(&buf[..n]) {
                    let rtt = start.elapsed();
                    self.stats.record(rtt);
                    debug!(
                        %target,
                        seq = self.sequence,
                        rtt_ms = rtt.as_millis() as u64,
                        "echo reply"
                    );
                    return Ok(rtt);
                }
                trace!(from = %from.ip(), "ignoring ICMP packet");
            }
            if start.elapsed() >= timeout {
                debug!(%target, seq = self.sequence, "echo request timed out");
                return Err(IcmpError::Timeout(timeout));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn is_our_reply(&self, packet: &[u8]) -> bool {
        icmp_message(packet)
            .and_then(EchoHeader::decode)
            .is_ok_and(|h| {
                h.kind == ECHO_REPLY
                    && h.identifier == self.identifier
                    && h.sequence == self.sequence
            })
    }

    /// Answers one pending echo request. Returns `false` when nothing
    /// answerable was waiting.
    pub async fn respond_once(&mut self) -> Result<bool, IcmpError> {
        if !self.open {
            return Err(IcmpError::NotOpen);
        }

        let mut buf = [0u8; PING_BUFFER_SIZE * 2];
        let mut driver = self.driver.lock().await;
        let Some((n, from)) = driver.recv_from(self.socket, &mut buf)? else {
            return Ok(false);
        };

        let reply = match icmp_message(&buf[..n]).and_then(echo_reply) {
            Ok(reply) => reply,
            Err(e) => {
                trace!(from = %from.ip(), error = %e, "not answering ICMP packet");
                return Ok(false);
            }
        };

        driver
            .send_to(self.socket, &reply, SocketAddrV4::new(*from.ip(), 0))
            .await?;
        debug!(to = %from.ip(), "answered echo request");
        Ok(true)
    }
}
