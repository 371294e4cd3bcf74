// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notifications from the depacketizer to the rest of the connection.
//!
//! These feed the control stream: loss statistics, frame acknowledgements,
//! and requests for the server to send an IDR frame.

/// Why the depacketizer wants an IDR frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IdrRequestReason {
    /// Too many frames in a row were dropped while waiting for a decodable one.
    ConsecutiveDropLimit,

    /// The decode thread fell behind and the queue was flushed.
    QueueOverflow,

    /// The decoder asked for a refresh, or
    /// [`crate::depacketizer::Depacketizer::request_decoder_refresh`] was called.
    DecoderRefresh,
}

impl std::fmt::Display for IdrRequestReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            IdrRequestReason::ConsecutiveDropLimit => "consecutive frame drop limit",
            IdrRequestReason::QueueOverflow => "decode unit queue overflow",
            IdrRequestReason::DecoderRefresh => "decoder refresh",
        })
    }
}

/// Receives the depacketizer's notifications.
///
/// Called synchronously on the thread calling
/// [`crate::depacketizer::Depacketizer::process_rtp_payload`], so
/// implementations should be quick. All methods default to doing nothing.
pub trait ConnectionListener {
    /// A video payload for `frame_index` arrived. Called for every payload,
    /// including ones later rejected.
    fn saw_frame(&mut self, frame_index: u32) {
        let _ = frame_index;
    }

    /// Stream packet indices between `last_received` and `next_received`
    /// (both exclusive, 24-bit wrapping) never arrived.
    fn lost_packets(&mut self, last_received: u32, next_received: u32) {
        let _ = (last_received, next_received);
    }

    /// Frames `first..=last` (wrapping) were not delivered to the decoder.
    fn detected_frame_loss(&mut self, first: u32, last: u32) {
        let _ = (first, last);
    }

    /// `frame_index` was handed to the decoder or decode queue.
    fn received_complete_frame(&mut self, frame_index: u32) {
        let _ = frame_index;
    }

    /// The server should send an IDR frame as soon as possible.
    fn request_idr_frame(&mut self, reason: IdrRequestReason) {
        let _ = reason;
    }
}

impl ConnectionListener for () {}

impl<L: ConnectionListener + ?Sized> ConnectionListener for Box<L> {
    fn saw_frame(&mut self, frame_index: u32) {
        (**self).saw_frame(frame_index)
    }

    fn lost_packets(&mut self, last_received: u32, next_received: u32) {
        (**self).lost_packets(last_received, next_received)
    }

    fn detected_frame_loss(&mut self, first: u32, last: u32) {
        (**self).detected_frame_loss(first, last)
    }

    fn received_complete_frame(&mut self, frame_index: u32) {
        (**self).received_complete_frame(frame_index)
    }

    fn request_idr_frame(&mut self, reason: IdrRequestReason) {
        (**self).request_idr_frame(reason)
    }
}
