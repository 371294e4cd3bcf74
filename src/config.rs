// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session parameters negotiated before the video stream starts.

use std::num::NonZeroUsize;

use crate::error::ErrorInt;
use crate::Error;

/// Default bound on decode units waiting for the decode thread.
///
/// This bounds latency rather than memory: a decoder that falls this far
/// behind is better served by flushing and starting over from an IDR frame.
pub const DEFAULT_QUEUE_CAPACITY: usize = 15;

const DEFAULT_QUEUE_CAPACITY_NZ: NonZeroUsize = match NonZeroUsize::new(DEFAULT_QUEUE_CAPACITY) {
    Some(n) => n,
    None => panic!("zero queue capacity"),
};

/// The negotiated video codec.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VideoFormat {
    H264,
    H265,
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoFormat::H264 => f.pad("h264"),
            VideoFormat::H265 => f.pad("h265"),
        }
    }
}

impl std::str::FromStr for VideoFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "h264" | "avc" => VideoFormat::H264,
            "h265" | "hevc" => VideoFormat::H265,
            _ => bail!(ErrorInt::InvalidArgument(format!(
                "Video format {:?} not understood",
                s
            ))),
        })
    }
}

/// Decoder capabilities, as declared by the decoder/renderer.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(u32);

impl Capabilities {
    /// Decode units are submitted synchronously from the receive thread
    /// rather than queued for a decode thread.
    pub const DIRECT_SUBMIT: Capabilities = Capabilities(0x1);

    /// The H.264 decoder tolerates reference frame invalidation, so it doesn't
    /// need to wait for an IDR frame after loss.
    pub const REFERENCE_FRAME_INVALIDATION_AVC: Capabilities = Capabilities(0x2);

    /// As `REFERENCE_FRAME_INVALIDATION_AVC`, for H.265.
    pub const REFERENCE_FRAME_INVALIDATION_HEVC: Capabilities = Capabilities(0x4);

    #[inline]
    pub const fn empty() -> Self {
        Capabilities(0)
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Capabilities(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, other: Capabilities) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Returns true if every dropped frame must be followed by an IDR frame
    /// before decoding can resume.
    pub fn requires_strict_idr_wait(self, format: VideoFormat) -> bool {
        !match format {
            VideoFormat::H264 => self.contains(Self::REFERENCE_FRAME_INVALIDATION_AVC),
            VideoFormat::H265 => self.contains(Self::REFERENCE_FRAME_INVALIDATION_HEVC),
        }
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut l = f.debug_set();
        for (flag, name) in [
            (Self::DIRECT_SUBMIT, "DIRECT_SUBMIT"),
            (
                Self::REFERENCE_FRAME_INVALIDATION_AVC,
                "REFERENCE_FRAME_INVALIDATION_AVC",
            ),
            (
                Self::REFERENCE_FRAME_INVALIDATION_HEVC,
                "REFERENCE_FRAME_INVALIDATION_HEVC",
            ),
        ] {
            if self.contains(flag) {
                l.entry(&format_args!("{}", name));
            }
        }
        let unknown = self.0 & !0x7;
        if unknown != 0 {
            l.entry(&format_args!("{:#x}", unknown));
        }
        l.finish()
    }
}

/// The server's application version, as reported in its `appversion`.
///
/// Compares component-wise, most significant first. Components are signed
/// because servers have been seen to report e.g. `7.1.431.-1`.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion([i32; 4]);

impl ServerVersion {
    pub const fn new(major: i32, minor: i32, patch: i32) -> Self {
        ServerVersion([major, minor, patch, 0])
    }

    #[inline]
    pub fn major(&self) -> i32 {
        self.0[0]
    }

    /// Returns the length of the frame header which precedes the Annex B data
    /// in the first packet of each frame.
    pub fn frame_header_len(&self) -> usize {
        let [major, minor, patch, _] = self.0;
        if (major, minor, patch) >= (7, 1, 350) {
            8
        } else if (major, minor, patch) >= (7, 1, 320) {
            12
        } else if major >= 5 {
            8
        } else {
            0
        }
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

impl std::fmt::Debug for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::str::FromStr for ServerVersion {
    type Err = Error;

    /// Parses between one and four dot-separated integers; missing trailing
    /// components are zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut quad = [0i32; 4];
        let mut n = 0;
        for part in s.trim().split('.') {
            if n == quad.len() {
                bail!(ErrorInt::InvalidArgument(format!(
                    "Server version {:?} has more than {} components",
                    s,
                    quad.len()
                )));
            }
            quad[n] = i32::from_str_radix(part, 10).map_err(|_| {
                wrap!(ErrorInt::InvalidArgument(format!(
                    "Server version {:?} has bad component {:?}",
                    s, part
                )))
            })?;
            n += 1;
        }
        Ok(ServerVersion(quad))
    }
}

/// Options fixed for the life of a [`crate::depacketizer::Depacketizer`].
#[derive(Clone, Debug)]
pub struct Options {
    pub(crate) format: VideoFormat,
    pub(crate) capabilities: Capabilities,
    pub(crate) server_version: ServerVersion,
    pub(crate) queue_capacity: NonZeroUsize,
}

impl Options {
    pub fn new(format: VideoFormat) -> Self {
        Options {
            format,
            capabilities: Capabilities::empty(),
            server_version: ServerVersion::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY_NZ,
        }
    }

    /// Sets the decoder's capabilities. `DIRECT_SUBMIT` selects the delivery
    /// mode; the reference frame invalidation flags select how strictly to
    /// wait for IDR frames after loss.
    pub fn capabilities(self, capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..self
        }
    }

    /// Sets the server version, which determines the frame header length.
    pub fn server_version(self, server_version: ServerVersion) -> Self {
        Self {
            server_version,
            ..self
        }
    }

    /// Sets how many decode units may wait for the decode thread before the
    /// queue is considered overflowed. Ignored with `DIRECT_SUBMIT`.
    pub fn queue_capacity(self, queue_capacity: NonZeroUsize) -> Self {
        Self {
            queue_capacity,
            ..self
        }
    }

    pub fn format(&self) -> VideoFormat {
        self.format
    }
}
