// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Video payloads as delivered by the FEC/reordering layer.
//!
//! Each RTP packet on the video stream carries a small video header after the
//! RTP header, then a piece of the Annex B bitstream.

use bytes::{Buf, Bytes};

use crate::error::ErrorInt;
use crate::Error;

/// The packet contains picture data. Ignored when deciding if a packet starts a frame.
pub const FLAG_CONTAINS_PIC_DATA: u8 = 0x1;

/// The packet is the last of its frame.
pub const FLAG_EOF: u8 = 0x2;

/// The packet is the first of its frame.
pub const FLAG_SOF: u8 = 0x4;

/// Bit in the first RTP header byte indicating a header extension follows.
pub const FLAG_EXTENSION: u8 = 0x10;

/// Length of the RTP header as sent on the video stream (no CSRCs).
const RTP_HEADER_LEN: usize = 12;

/// Length of the header extension, when present.
const RTP_EXTENSION_LEN: usize = 4;

/// Length of the video header which follows the RTP header.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   (ignored)   |         stream packet index (LE, 24 bits)     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      frame index (LE)                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     flags     |                  reserved                     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           reserved                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
const VIDEO_HEADER_LEN: usize = 16;

/// Stream packet indices are 24 bits and wrap.
pub(crate) const STREAM_PACKET_INDEX_MASK: u32 = 0xFF_FFFF;

/// One video payload, the unit of input to the depacketizer.
pub struct VideoPacket {
    pub frame_index: u32,

    /// Transport-level sequence number. Only the bottom 24 bits are meaningful.
    pub stream_packet_index: u32,

    /// Some combination of `FLAG_SOF`, `FLAG_EOF`, and `FLAG_CONTAINS_PIC_DATA`.
    pub flags: u8,

    /// The Annex B data, starting with the frame header on a frame's first packet.
    pub payload: Bytes,
}

impl VideoPacket {
    /// Parses a complete RTP packet from the video stream.
    pub fn parse(mut data: Bytes) -> Result<Self, Error> {
        if data.is_empty() {
            bail!(ErrorInt::MalformedPacket {
                reason: "empty packet",
                data,
            });
        }
        let mut header_len = RTP_HEADER_LEN;
        if (data[0] & FLAG_EXTENSION) != 0 {
            header_len += RTP_EXTENSION_LEN;
        }
        if data.len() < header_len + VIDEO_HEADER_LEN {
            bail!(ErrorInt::MalformedPacket {
                reason: "too short for RTP and video headers",
                data,
            });
        }
        data.advance(header_len);
        let stream_packet_index = data.get_u32_le() >> 8;
        let frame_index = data.get_u32_le();
        let flags = data.get_u8();
        data.advance(VIDEO_HEADER_LEN - 9);
        Ok(VideoPacket {
            frame_index,
            stream_packet_index,
            flags,
            payload: data,
        })
    }

    /// Returns true iff this packet begins a frame.
    ///
    /// That's the case when the flags are exactly `SOF` or `SOF | EOF`, not
    /// counting `CONTAINS_PIC_DATA`.
    #[inline]
    pub fn is_first_packet(&self) -> bool {
        let flags = self.flags & !FLAG_CONTAINS_PIC_DATA;
        flags == FLAG_SOF || flags == FLAG_SOF | FLAG_EOF
    }

    #[inline]
    pub fn is_last_packet(&self) -> bool {
        (self.flags & FLAG_EOF) != 0
    }
}

impl std::fmt::Debug for VideoPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoPacket")
            .field("frame_index", &self.frame_index)
            .field(
                "stream_packet_index",
                &format_args!("{:06x}", self.stream_packet_index),
            )
            .field("flags", &format_args!("{:#04x}", self.flags))
            .field("payload", &crate::hex::LimitedHex::new(&self.payload, 64))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    /// Serializes a video packet with the given RTP first byte.
    fn wire(rtp_first: u8, spi: u32, frame_index: u32, flags: u8, payload: &[u8]) -> Bytes {
        let mut out = vec![rtp_first, 96, 0x12, 0x34, 0, 0, 0, 1, 0xde, 0xad, 0xbe, 0xef];
        if (rtp_first & FLAG_EXTENSION) != 0 {
            out.extend_from_slice(b"\xbe\xde\x00\x00");
        }
        out.extend_from_slice(&(spi << 8).to_le_bytes());
        out.extend_from_slice(&frame_index.to_le_bytes());
        out.extend_from_slice(&[flags, 0, 0, 0, 0, 0, 0, 0]);
        out.extend_from_slice(payload);
        out.into()
    }

    #[test]
    fn parse() {
        let p = VideoPacket::parse(wire(
            0x80,
            0x00_0102,
            7,
            FLAG_SOF | FLAG_EOF,
            b"\x00\x00\x01\x41",
        ))
        .unwrap();
        assert_eq!(p.stream_packet_index, 0x102);
        assert_eq!(p.frame_index, 7);
        assert!(p.is_first_packet());
        assert!(p.is_last_packet());
        assert_eq!(&p.payload[..], b"\x00\x00\x01\x41");
    }

    #[test]
    fn parse_with_extension() {
        let p = VideoPacket::parse(wire(0x90, 0xff_ffff, 9, FLAG_EOF, b"tail")).unwrap();
        assert_eq!(p.stream_packet_index, 0xff_ffff);
        assert_eq!(p.frame_index, 9);
        assert!(!p.is_first_packet());
        assert_eq!(&p.payload[..], b"tail");
    }

    #[test]
    fn parse_too_short() {
        let mut data = wire(0x90, 1, 1, FLAG_SOF, b"");
        data.truncate(RTP_HEADER_LEN + VIDEO_HEADER_LEN);
        let e = VideoPacket::parse(data).unwrap_err();
        assert!(!e.is_protocol_violation());
        assert!(VideoPacket::parse(Bytes::new()).is_err());
    }

    #[test]
    fn parse_oversized() {
        // No limit beyond what the caller received; a reassembled jumbo
        // packet is passed through whole.
        let payload = vec![0x5a; 70_000];
        let pkt = VideoPacket::parse(wire(0x80, 9, 2, FLAG_CONTAINS_PIC_DATA, &payload)).unwrap();
        assert_eq!(pkt.stream_packet_index, 9);
        assert_eq!(pkt.frame_index, 2);
        assert_eq!(pkt.payload.len(), 70_000);
    }

    #[test]
    fn first_packet_flags() {
        let pkt = |flags| VideoPacket {
            frame_index: 1,
            stream_packet_index: 0,
            flags,
            payload: Bytes::new(),
        };
        assert!(pkt(FLAG_SOF).is_first_packet());
        assert!(pkt(FLAG_SOF | FLAG_CONTAINS_PIC_DATA).is_first_packet());
        assert!(pkt(FLAG_SOF | FLAG_EOF | FLAG_CONTAINS_PIC_DATA).is_first_packet());
        assert!(!pkt(FLAG_CONTAINS_PIC_DATA).is_first_packet());
        assert!(!pkt(FLAG_EOF).is_first_packet());
        assert!(!pkt(FLAG_SOF | 0x8).is_first_packet());
    }
}
