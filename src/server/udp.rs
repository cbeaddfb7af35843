//! UDP session tracking.
//!
//! UDP has no connection lifecycle, so sessions are kept in a table keyed by
//! remote endpoint. Per endpoint: Unseen -> Active -> Evicted. A session is
//! created by a first datagram carrying a UDP tag, counts every later
//! datagram as payload, and is evicted once its age reaches the budget. The
//! budget is a fixed measurement window anchored to the first datagram, not
//! an idle timeout. After eviction the endpoint is Unseen again and must send
//! a fresh tag to start a new, independent session.
//!
//! Reception and sweeping interleave on a single task, so the table needs no
//! locking.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::SessionReport;
use crate::config::ServerConfig;
use crate::wire::{received_file_name, ModeTag, Protocol};

/// Receive buffer; large enough for any UDP datagram.
pub const RECV_BUFFER: usize = 65_535;

// ---------------------------------------------------------------------------
// SessionTable
// ---------------------------------------------------------------------------

struct ReceivedFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

struct UdpSession {
    id: Uuid,
    mode: ModeTag,
    started: Instant,
    bytes: u64,
    file: Option<ReceivedFile>,
}

/// What a datagram did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// First datagram from an unseen endpoint carried a UDP tag.
    Started(ModeTag),
    /// Payload counted against an active session.
    Data(usize),
    /// Unseen endpoint without a recognized tag, or the table is full.
    Dropped,
}

/// Active UDP sessions keyed by remote endpoint, with age-based eviction.
pub struct SessionTable {
    sessions: HashMap<SocketAddr, UdpSession>,
    budget: Duration,
    max_sessions: usize,
    output_dir: PathBuf,
}

impl SessionTable {
    pub fn new(budget: Duration, max_sessions: usize, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions: HashMap::new(),
            budget,
            max_sessions,
            output_dir: output_dir.into(),
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            config.session_budget(),
            config.udp_max_sessions,
            config.output_dir.clone(),
        )
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, peer: &SocketAddr) -> bool {
        self.sessions.contains_key(peer)
    }

    /// Payload bytes counted so far for `peer`'s active session.
    pub fn bytes_received(&self, peer: &SocketAddr) -> Option<u64> {
        self.sessions.get(peer).map(|s| s.bytes)
    }

    fn is_expired(&self, session: &UdpSession, now: Instant) -> bool {
        now.saturating_duration_since(session.started) >= self.budget
    }

    /// Account for one datagram from `peer` received at `now`.
    ///
    /// A session already past its budget is evicted first, and the datagram
    /// is then treated as coming from an unseen endpoint.
    pub async fn on_datagram(
        &mut self,
        peer: SocketAddr,
        payload: &[u8],
        now: Instant,
    ) -> DatagramOutcome {
        let expired = self
            .sessions
            .get(&peer)
            .is_some_and(|session| self.is_expired(session, now));
        if expired {
            if let Some(session) = self.sessions.remove(&peer) {
                finish(peer, session, now).await.log("session budget reached");
            }
        }

        if let Some(session) = self.sessions.get_mut(&peer) {
            if let Some(file) = session.file.as_mut() {
                if let Err(e) = file.writer.write_all(payload).await {
                    warn!(
                        session_id = %session.id,
                        path = %file.path.display(),
                        error = %e,
                        "write to received file failed, no longer saving this session"
                    );
                    session.file = None;
                }
            }
            session.bytes += payload.len() as u64;
            return DatagramOutcome::Data(payload.len());
        }

        self.start_session(peer, payload, now).await
    }

    async fn start_session(
        &mut self,
        peer: SocketAddr,
        payload: &[u8],
        now: Instant,
    ) -> DatagramOutcome {
        // Stray traffic is dropped without logging.
        let mode = match ModeTag::parse(payload) {
            Some(mode) if mode.protocol() == Protocol::Udp => mode,
            _ => return DatagramOutcome::Dropped,
        };

        if self.sessions.len() >= self.max_sessions {
            debug!(%peer, max_sessions = self.max_sessions, "session table full, dropping tag");
            return DatagramOutcome::Dropped;
        }

        let file = if mode.saves_to_file() {
            let path = self.output_dir.join(received_file_name(peer));
            match File::create(&path).await {
                Ok(file) => Some(ReceivedFile {
                    path,
                    writer: BufWriter::new(file),
                }),
                Err(e) => {
                    warn!(%peer, path = %path.display(), error = %e, "failed to create received file, session not started");
                    return DatagramOutcome::Dropped;
                }
            }
        } else {
            None
        };

        let session = UdpSession {
            id: Uuid::new_v4(),
            mode,
            started: now,
            bytes: 0,
            file,
        };
        if mode.saves_to_file() {
            info!(session_id = %session.id, %peer, %mode, "receiving file over UDP");
        } else {
            info!(session_id = %session.id, %peer, %mode, "receiving UDP stream");
        }
        self.sessions.insert(peer, session);
        DatagramOutcome::Started(mode)
    }

    /// Evict every session whose age has reached the budget.
    pub async fn sweep(&mut self, now: Instant) -> Vec<SessionReport> {
        let expired: Vec<SocketAddr> = self
            .sessions
            .iter()
            .filter(|(_, session)| self.is_expired(session, now))
            .map(|(peer, _)| *peer)
            .collect();

        let mut reports = Vec::with_capacity(expired.len());
        for peer in expired {
            if let Some(session) = self.sessions.remove(&peer) {
                reports.push(finish(peer, session, now).await);
            }
        }
        reports
    }

    /// Close every session regardless of age.
    pub async fn close_all(&mut self, now: Instant) -> Vec<SessionReport> {
        let mut reports = Vec::with_capacity(self.sessions.len());
        for (peer, session) in self.sessions.drain() {
            reports.push(finish(peer, session, now).await);
        }
        reports
    }
}

/// Flush and close the session's file and produce its final report.
async fn finish(peer: SocketAddr, session: UdpSession, now: Instant) -> SessionReport {
    let saved_to = match session.file {
        Some(mut file) => {
            if let Err(e) = file.writer.flush().await {
                warn!(session_id = %session.id, path = %file.path.display(), error = %e, "flush of received file failed");
            }
            Some(file.path)
        }
        None => None,
    };
    debug!(session_id = %session.id, mode = %session.mode, "UDP session closed");

    SessionReport {
        session_id: session.id,
        peer,
        protocol: Protocol::Udp,
        bytes: session.bytes,
        duration: now.saturating_duration_since(session.started),
        saved_to,
    }
}

// ---------------------------------------------------------------------------
// UdpSessionTracker
// ---------------------------------------------------------------------------

/// Single polling loop over one UDP socket.
pub struct UdpSessionTracker {
    socket: UdpSocket,
    table: SessionTable,
    poll_interval: Duration,
}

impl UdpSessionTracker {
    pub fn new(socket: UdpSocket, table: SessionTable, poll_interval: Duration) -> Self {
        Self {
            socket,
            table,
            poll_interval,
        }
    }

    /// Receive and sweep until `cancel` fires, then close every open session.
    ///
    /// Sweeps run on every poll tick, so a session that keeps sending is
    /// still evicted within one interval of reaching its budget.
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            socket,
            mut table,
            poll_interval,
        } = self;

        let mut buf = vec![0u8; RECV_BUFFER];
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = ticker.tick() => {
                    for report in table.sweep(Instant::now()).await {
                        report.log("session budget reached");
                    }
                }

                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => {
                        table.on_datagram(peer, &buf[..len], Instant::now()).await;
                    }
                    Err(e) => debug!(error = %e, "UDP recv_from error"),
                },
            }
        }

        drop(socket);
        for report in table.close_all(Instant::now()).await {
            report.log("closed on shutdown");
        }
        info!("UDP session tracker stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
