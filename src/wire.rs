//! Handshake tags for the throughput protocol.
//!
//! Exactly one 3-byte ASCII tag opens every TCP stream and every UDP flow.
//! On TCP it is the first three bytes of the stream; on UDP it is a
//! standalone datagram. Everything after the tag is opaque payload with no
//! length prefix or checksum.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SpeedError;

/// Length of every handshake tag on the wire.
pub const TAG_LEN: usize = 3;

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Transport a worker or session runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP", alias = "tcp")]
    Tcp,
    #[serde(rename = "UDP", alias = "udp")]
    Udp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = SpeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(SpeedError::InvalidArgument(format!(
                "unknown mode '{}' (expected tcp or udp)",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ModeTag
// ---------------------------------------------------------------------------

/// Handshake value announcing what follows: raw synthetic bytes, or the
/// contents of a file the receiver should persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeTag {
    /// `tcp`: discard the stream after counting it.
    RawTcp,
    /// `tpf`: persist the stream to a received file.
    FileTcp,
    /// `udp`: discard datagrams after counting them.
    RawUdp,
    /// `upf`: persist datagrams to a received file.
    FileUdp,
}

impl ModeTag {
    pub const ALL: [ModeTag; 4] = [Self::RawTcp, Self::FileTcp, Self::RawUdp, Self::FileUdp];

    pub fn for_tcp(save_to_file: bool) -> Self {
        if save_to_file {
            Self::FileTcp
        } else {
            Self::RawTcp
        }
    }

    pub fn for_udp(save_to_file: bool) -> Self {
        if save_to_file {
            Self::FileUdp
        } else {
            Self::RawUdp
        }
    }

    /// Wire encoding of the tag.
    pub fn as_bytes(&self) -> &'static [u8; TAG_LEN] {
        match self {
            Self::RawTcp => b"tcp",
            Self::FileTcp => b"tpf",
            Self::RawUdp => b"udp",
            Self::FileUdp => b"upf",
        }
    }

    /// Decode a tag from the first [`TAG_LEN`] bytes of `buf`.
    ///
    /// Returns `None` if `buf` is shorter than a tag or the prefix is not a
    /// recognized tag. Trailing bytes are ignored.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let prefix = buf.get(..TAG_LEN)?;
        Self::ALL
            .into_iter()
            .find(|tag| tag.as_bytes().as_slice() == prefix)
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::RawTcp | Self::FileTcp => Protocol::Tcp,
            Self::RawUdp | Self::FileUdp => Protocol::Udp,
        }
    }

    pub fn saves_to_file(&self) -> bool {
        matches!(self, Self::FileTcp | Self::FileUdp)
    }
}

impl fmt::Display for ModeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tags are always ASCII.
        f.write_str(std::str::from_utf8(self.as_bytes()).unwrap_or("???"))
    }
}

/// File name a receiver uses for the payload sent by `peer`.
///
/// Deterministic per remote endpoint; a later session from the same endpoint
/// overwrites the earlier file.
pub fn received_file_name(peer: SocketAddr) -> String {
    format!("received_from_{}_{}.bin", peer.ip(), peer.port())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
