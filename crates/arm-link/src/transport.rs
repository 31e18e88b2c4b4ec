use crate::{Envelope, LinkError, LinkMessage};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Timing and retry parameters for the link.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LinkConfig {
    /// How long to wait for an ack before retransmitting.
    pub ack_timeout: Duration,
    /// Total send attempts before the link is declared unavailable.
    pub retry_budget: u32,
    /// Ceiling on one `receive` call.
    pub recv_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_millis(500),
            retry_budget: 3,
            recv_timeout: Duration::from_secs(2),
        }
    }
}

/// Reliable request/response channel to the relay server over any byte
/// stream (TCP in production, an in-memory duplex in tests).
///
/// Outgoing frames carry session-monotonic sequence numbers and are
/// retransmitted until acked, bounded by the retry budget. Incoming data
/// frames are always acked; a frame whose sequence number is not beyond the
/// highest delivered one is a retransmit duplicate and is dropped, giving
/// the coordinator at-most-once delivery.
pub struct LinkTransport<T> {
    reader: Lines<BufReader<tokio::io::ReadHalf<T>>>,
    writer: tokio::io::WriteHalf<T>,
    config: LinkConfig,
    next_seq: u64,
    last_peer_seq: u64,
    inbox: VecDeque<LinkMessage>,
}

impl<T: AsyncRead + AsyncWrite> LinkTransport<T> {
    pub fn new(io: T, config: LinkConfig) -> Self {
        let (read, writer) = tokio::io::split(io);
        Self {
            reader: BufReader::new(read).lines(),
            writer,
            config,
            next_seq: 1,
            last_peer_seq: 0,
            inbox: VecDeque::new(),
        }
    }

    /// Send one message reliably. Fails with `LinkUnavailable` after the
    /// retry budget is exhausted without an ack.
    pub async fn send(&mut self, msg: LinkMessage) -> Result<(), LinkError> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut line = serde_json::to_string(&Envelope { seq, msg }).expect("message serializes");
        line.push('\n');

        for attempt in 1..=self.config.retry_budget {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.flush().await?;
            debug!("sent #{} (attempt {}/{})", seq, attempt, self.config.retry_budget);

            match timeout(self.config.ack_timeout, self.read_until_ack(seq)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => return Err(e),
                Err(_) => warn!(
                    "no ack for #{} within {:?} (attempt {}/{})",
                    seq, self.config.ack_timeout, attempt, self.config.retry_budget
                ),
            }
        }

        Err(LinkError::LinkUnavailable {
            attempts: self.config.retry_budget,
        })
    }

    /// Next data message from the peer. Duplicates are dropped here; acks
    /// for them are still re-sent so the peer stops retransmitting.
    pub async fn receive(&mut self) -> Result<LinkMessage, LinkError> {
        if let Some(msg) = self.inbox.pop_front() {
            return Ok(msg);
        }

        let deadline = Instant::now() + self.config.recv_timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(LinkError::ReceiveTimeout)?;

            let envelope = match timeout(remaining, self.read_envelope()).await {
                Ok(result) => result?,
                Err(_) => return Err(LinkError::ReceiveTimeout),
            };

            if envelope.msg.is_ack() {
                debug!("stale ack #{} outside send, ignored", envelope.seq);
                continue;
            }
            if let Some(msg) = self.accept_data(envelope).await? {
                return Ok(msg);
            }
        }
    }

    /// Read frames until the ack for `seq` arrives, stashing any data
    /// frames that show up in the meantime.
    async fn read_until_ack(&mut self, seq: u64) -> Result<(), LinkError> {
        loop {
            let envelope = self.read_envelope().await?;
            match envelope.msg {
                LinkMessage::MoveAck { ack } if ack == seq => {
                    debug!("#{} acked", seq);
                    return Ok(());
                }
                LinkMessage::MoveAck { ack } => {
                    debug!("stale ack #{} while waiting for #{}", ack, seq);
                }
                _ => {
                    if let Some(msg) = self.accept_data(envelope).await? {
                        self.inbox.push_back(msg);
                    }
                }
            }
        }
    }

    /// Ack a data frame and decide whether to deliver it. Returns `None`
    /// for duplicates.
    async fn accept_data(&mut self, envelope: Envelope) -> Result<Option<LinkMessage>, LinkError> {
        let ack = Envelope {
            seq: envelope.seq,
            msg: LinkMessage::MoveAck { ack: envelope.seq },
        };
        let mut line = serde_json::to_string(&ack).expect("ack serializes");
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        if envelope.seq <= self.last_peer_seq {
            debug!("duplicate #{} dropped (last delivered #{})", envelope.seq, self.last_peer_seq);
            return Ok(None);
        }
        self.last_peer_seq = envelope.seq;
        Ok(Some(envelope.msg))
    }

    /// Next well-formed envelope. Malformed lines are logged and skipped.
    /// Cancel-safe: a line interrupted by a timeout is resumed on the next
    /// call.
    async fn read_envelope(&mut self) -> Result<Envelope, LinkError> {
        loop {
            let line = self
                .reader
                .next_line()
                .await?
                .ok_or(LinkError::Closed)?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(envelope) => return Ok(envelope),
                Err(e) => warn!("malformed frame skipped: {} ({})", line, e),
            }
        }
    }
}
