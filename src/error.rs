// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt::Display, sync::Arc};

use bytes::Bytes;
use thiserror::Error;

/// An opaque `std::error::Error + Send + Sync + 'static` implementation.
///
/// Errors carry the frame and stream packet indices of the offending payload,
/// which is usually enough to find it in a packet capture.
///
/// Only two things are worth deciding programmatically: whether the input
/// ordering was broken (see [`Error::is_protocol_violation`]), in which case
/// the depacketizer should be reset, or whether a single packet was
/// unparseable, in which case it can simply be skipped.
#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Error {
    /// Returns true iff this error means the payload sequence was out of order
    /// or interleaved. Frame assembly state is undefined afterward; call
    /// [`crate::depacketizer::Depacketizer::reset`].
    pub fn is_protocol_violation(&self) -> bool {
        matches!(*self.0, ErrorInt::ProtocolViolation { .. })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Error)]
pub(crate) enum ErrorInt {
    /// The method's caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The supposedly-ordered payload sequence wasn't.
    #[error("[frame={frame_index}, pkt={stream_packet_index:06x}] Protocol violation: {description}")]
    ProtocolViolation {
        frame_index: u32,
        stream_packet_index: u32,
        description: String,
    },

    #[error(
        "Malformed video packet ({reason}):\n{:?}",
        crate::hex::LimitedHex::new(data, 64)
    )]
    MalformedPacket { reason: &'static str, data: Bytes },
}
