//! Frame encoding, fragmentation and reassembly.
//!
//! Outbound messages are prefixed with the session id (unless
//! [`Flags::WITHOUT_SESSION_ID`] is set) and cut into chunks of at most
//! `buffer_size - 2` bytes. Inbound fragments are merged per header by a
//! [`Reassembler`] until a frame without [`Flags::MORE_FOLLOWS`] completes
//! the message.
//!
//! There is no acknowledgement or retransmission at this layer: losing any
//! fragment corrupts the whole logical message.
//!
//! # Known limitation
//!
//! Reassembly is keyed by header only. Two multipart messages with
//! *different* headers may interleave freely, but two in-flight messages
//! with the *same* header cannot be told apart and corrupt each other. The
//! wire format carries no message id to do better.

use std::{collections::HashMap, fmt, ops::BitOr};

use bytes::{BufMut, Bytes, BytesMut};

use super::Header;
use crate::error::{Error, Result};

/// Bitset carried in the second byte of every frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    pub const NONE: Flags = Flags(0);

    /// More fragments of the same message follow this one.
    pub const MORE_FOLLOWS: Flags = Flags(1 << 0);

    /// The payload is not prefixed with the session id.
    pub const WITHOUT_SESSION_ID: Flags = Flags(1 << 1);

    #[must_use]
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn without(self, other: Flags) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for Flags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// A single datagram: header, flags and raw payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub header: Header,
    pub flags: Flags,
    pub payload: Bytes,
}

impl Frame {
    /// Header plus flags.
    pub const OVERHEAD: usize = 2;

    /// Decodes one received datagram.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the datagram is shorter than the two
    /// byte frame header.
    pub fn decode(datagram: &[u8]) -> Result<Self> {
        match datagram {
            [header, flags, payload @ ..] => Ok(Self {
                header: Header::from(*header),
                flags: Flags::from_bits(*flags),
                payload: Bytes::copy_from_slice(payload),
            }),
            _ => Err(Error::invalid_argument(format!(
                "datagram of {} bytes is too short for a frame",
                datagram.len()
            ))),
        }
    }

    /// Whether this frame completes its message.
    #[must_use]
    pub fn is_final(&self) -> bool {
        !self.flags.contains(Flags::MORE_FOLLOWS)
    }

    /// Payload as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(Self::OVERHEAD + self.payload.len());
        buffer.put_u8(self.header.code());
        buffer.put_u8(self.flags.bits());
        buffer.put_slice(&self.payload);
        buffer.freeze()
    }
}

/// Encodes a message into one or more datagrams.
///
/// Unless `flags` contains [`Flags::WITHOUT_SESSION_ID`], `session_id` is
/// prepended to `data`. The result is split into chunks of at most
/// `buffer_size - 2` bytes; all chunks but the last carry
/// [`Flags::MORE_FOLLOWS`]. An empty message still yields one frame.
///
/// # Errors
///
/// Returns `InvalidArgument` if `buffer_size` leaves no room for payload.
pub fn encode(
    header: Header,
    data: &[u8],
    flags: Flags,
    session_id: &str,
    buffer_size: usize,
) -> Result<Vec<Bytes>> {
    let max_chunk = buffer_size.saturating_sub(Frame::OVERHEAD);
    if max_chunk == 0 {
        return Err(Error::invalid_argument(format!(
            "buffer size {buffer_size} cannot hold a frame payload"
        )));
    }

    let mut message = BytesMut::new();
    if !flags.contains(Flags::WITHOUT_SESSION_ID) {
        message.put_slice(session_id.as_bytes());
    }
    message.put_slice(data);

    let flags = flags.without(Flags::MORE_FOLLOWS);
    if message.is_empty() {
        let frame = Frame {
            header,
            flags,
            payload: Bytes::new(),
        };
        return Ok(vec![frame.to_bytes()]);
    }

    let mut chunks = message.chunks(max_chunk).peekable();
    let mut datagrams = Vec::with_capacity(message.len().div_ceil(max_chunk));
    while let Some(chunk) = chunks.next() {
        let flags = if chunks.peek().is_some() {
            flags | Flags::MORE_FOLLOWS
        } else {
            flags
        };

        let frame = Frame {
            header,
            flags,
            payload: Bytes::copy_from_slice(chunk),
        };
        datagrams.push(frame.to_bytes());
    }

    Ok(datagrams)
}

/// A fully reassembled inbound message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Packet {
    pub header: Header,
    pub data: String,
}

impl Packet {
    #[must_use]
    pub fn new(header: Header, data: impl Into<String>) -> Self {
        Self {
            header,
            data: data.into(),
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.header, self.data.len())
    }
}

/// Table of partially received multipart messages, one per header.
///
/// Fragments are merged as raw bytes and only decoded as text once the
/// message is complete, so multi-byte characters split across datagrams
/// survive.
#[derive(Debug, Default)]
pub struct Reassembler {
    incomplete: HashMap<Header, BytesMut>,
}

impl Reassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame and returns the completed packet, if any.
    pub fn push(&mut self, frame: Frame) -> Option<Packet> {
        let finish = frame.is_final();

        let data = match self.incomplete.remove(&frame.header) {
            Some(mut data) => {
                data.put_slice(&frame.payload);
                data
            }
            None => BytesMut::from(&frame.payload[..]),
        };

        if finish {
            Some(Packet {
                header: frame.header,
                data: String::from_utf8_lossy(&data).into_owned(),
            })
        } else {
            self.incomplete.insert(frame.header, data);
            None
        }
    }

    /// Number of messages still waiting for fragments.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.incomplete.len()
    }

    pub fn clear(&mut self) {
        self.incomplete.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(datagrams: &[Bytes]) -> Vec<Packet> {
        let mut reassembler = Reassembler::new();
        datagrams
            .iter()
            .filter_map(|datagram| reassembler.push(Frame::decode(datagram).unwrap()))
            .collect()
    }

    #[test]
    fn reassembles_any_number_of_fragments() {
        // 10 payload bytes per datagram.
        let buffer_size = 12;

        for chunks in [1_usize, 2, 5, 100] {
            let payload: String = (0..(chunks - 1) * 10 + 7)
                .map(|i| char::from(b'a' + u8::try_from(i % 26).unwrap()))
                .collect();

            let datagrams = encode(
                Header::ListFiles,
                payload.as_bytes(),
                Flags::WITHOUT_SESSION_ID,
                "unused",
                buffer_size,
            )
            .unwrap();
            assert_eq!(datagrams.len(), chunks);
            assert!(datagrams.iter().all(|d| d.len() <= buffer_size));

            let packets = reassemble(&datagrams);
            assert_eq!(packets, vec![Packet::new(Header::ListFiles, payload)]);
        }
    }

    #[test]
    fn only_the_last_fragment_finishes() {
        let datagrams =
            encode(Header::SetSetting, b"0123456789", Flags::NONE, "s-1", 6).unwrap();
        let frames: Vec<Frame> = datagrams.iter().map(|d| Frame::decode(d).unwrap()).collect();

        let (last, rest) = frames.split_last().unwrap();
        assert!(rest.iter().all(|f| !f.is_final()));
        assert!(last.is_final());
        assert_eq!(frames[0].payload.as_ref(), b"s-10");
    }

    #[test]
    fn session_id_is_prepended_unless_flagged() {
        let with = encode(Header::Pause, b"", Flags::NONE, "abc-123", 1500).unwrap();
        assert_eq!(with, vec![Bytes::from_static(b"\xa7\x00abc-123")]);

        let without = encode(
            Header::Login,
            b"RPi::omxremote",
            Flags::WITHOUT_SESSION_ID,
            "abc-123",
            1500,
        )
        .unwrap();
        assert_eq!(without, vec![Bytes::from_static(b"\xa1\x02RPi::omxremote")]);
    }

    #[test]
    fn empty_message_yields_a_single_frame() {
        let datagrams =
            encode(Header::Keepalive, b"", Flags::WITHOUT_SESSION_ID, "", 1500).unwrap();
        assert_eq!(datagrams, vec![Bytes::from_static(b"\xe0\x02")]);
    }

    #[test]
    fn interleaved_headers_reassemble_independently() {
        let files = encode(
            Header::ListFiles,
            b"/root||a.mkv|b.mkv|c.mkv",
            Flags::WITHOUT_SESSION_ID,
            "",
            7,
        )
        .unwrap();
        let extra = encode(
            Header::PlayerExtra,
            b"ST:Some Show|ET:Pilot",
            Flags::WITHOUT_SESSION_ID,
            "",
            7,
        )
        .unwrap();

        let mut interleaved = Vec::new();
        let mut files_iter = files.iter();
        let mut extra_iter = extra.iter();
        loop {
            match (files_iter.next(), extra_iter.next()) {
                (None, None) => break,
                (a, b) => interleaved.extend(a.into_iter().chain(b).cloned()),
            }
        }

        let packets = reassemble(&interleaved);
        assert_eq!(packets.len(), 2);
        assert!(packets.contains(&Packet::new(Header::ListFiles, "/root||a.mkv|b.mkv|c.mkv")));
        assert!(packets.contains(&Packet::new(Header::PlayerExtra, "ST:Some Show|ET:Pilot")));
    }

    #[test]
    fn multibyte_text_split_across_fragments_survives() {
        let text = "Amélie|Léon";
        let datagrams = encode(
            Header::PlayerInfo,
            text.as_bytes(),
            Flags::WITHOUT_SESSION_ID,
            "",
            5,
        )
        .unwrap();

        assert_eq!(reassemble(&datagrams), vec![Packet::new(Header::PlayerInfo, text)]);
    }

    #[test]
    fn short_datagrams_are_rejected() {
        assert!(Frame::decode(&[]).is_err());
        assert!(Frame::decode(&[0xA1]).is_err());

        let frame = Frame::decode(&[0xA1, 0x00]).unwrap();
        assert!(frame.is_final());
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn tiny_buffers_are_rejected() {
        assert!(encode(Header::Pause, b"x", Flags::NONE, "", 2).is_err());
    }

    #[test]
    fn incomplete_messages_stay_pending() {
        let mut reassembler = Reassembler::new();
        let frame = Frame {
            header: Header::PlayerExtra,
            flags: Flags::MORE_FOLLOWS,
            payload: Bytes::from_static(b"ST:"),
        };
        assert!(reassembler.push(frame).is_none());
        assert_eq!(reassembler.pending(), 1);

        reassembler.clear();
        assert_eq!(reassembler.pending(), 0);
    }
}
