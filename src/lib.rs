// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Video depacketizer for game-streaming clients.
//!
//! Takes the RTP video payloads of a session, as recovered and ordered by the
//! FEC layer, and produces [`DecodeUnit`]s: complete H.264 or H.265 access
//! units in Annex B form, ready for a hardware or software decoder.
//!
//! Along the way it tracks loss at both the packet and frame level, drops
//! frames that can't be decoded, and tells the [`ConnectionListener`] when
//! the server should send an IDR frame.
//!
//! ```no_run
//! use std::time::Instant;
//! use gamestream_video::{depacketizer::Depacketizer, Options, VideoFormat};
//!
//! # fn next_packet() -> Option<bytes::Bytes> { None }
//! # fn decode(_: &gamestream_video::DecodeUnit) {}
//! # fn main() -> Result<(), gamestream_video::Error> {
//! let options = Options::new(VideoFormat::H264).server_version("7.1.431".parse()?);
//! let mut depacketizer = Depacketizer::new(options, (), None)?;
//! let receiver = depacketizer.decode_unit_receiver().unwrap();
//! std::thread::spawn(move || receiver.for_each(|unit| decode(&unit)));
//! while let Some(pkt) = next_packet() {
//!     if let Err(e) = depacketizer.queue_rtp_packet(pkt, Instant::now()) {
//!         log::warn!("{}", e);
//!         if e.is_protocol_violation() {
//!             depacketizer.reset();
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(clippy::print_stderr, clippy::print_stdout)]
// I prefer to use from_str_radix(..., 10) to explicitly note the base.
#![allow(clippy::from_str_radix_10)]

/// Wraps the supplied `ErrorInt` and returns it as an `Err`.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::error::Error(std::sync::Arc::new($e)))
    };
}

macro_rules! wrap {
    ($e:expr) => {
        crate::error::Error(std::sync::Arc::new($e))
    };
}

pub mod annexb;
mod chain;
mod config;
pub mod depacketizer;
mod error;
mod hex;
mod listener;
mod queue;
pub mod rtp;

#[cfg(test)]
mod testutil;

pub use chain::DecodeUnit;
pub use config::{Capabilities, Options, ServerVersion, VideoFormat, DEFAULT_QUEUE_CAPACITY};
pub use depacketizer::{Decoder, SubmitStatus};
pub use error::Error;
pub use listener::{ConnectionListener, IdrRequestReason};
pub use queue::{DecodeUnitReceiver, StopHandle};
