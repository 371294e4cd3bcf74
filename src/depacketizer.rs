// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reassembly of video payloads into [`DecodeUnit`]s.
//!
//! The [`Depacketizer`] expects payloads in stream packet index order, with
//! retransmission and FEC recovery already done. It tolerates loss between
//! frames: it reports it, drops what can't be decoded, and asks the server
//! for an IDR frame when necessary. Payloads out of order are a caller bug
//! and are rejected with an error.

use std::time::Instant;

use bytes::{Buf, Bytes};
use log::{debug, info, trace, warn};

use crate::annexb;
use crate::chain::NalChain;
use crate::config::{Capabilities, Options};
use crate::error::ErrorInt;
use crate::listener::{ConnectionListener, IdrRequestReason};
use crate::queue::{OfferError, Queue};
use crate::rtp::{VideoPacket, STREAM_PACKET_INDEX_MASK};
use crate::{DecodeUnit, DecodeUnitReceiver, Error, StopHandle};

/// After this many frames in a row are dropped, an IDR frame is requested
/// regardless of whether one is already expected.
pub const CONSECUTIVE_DROP_LIMIT: u32 = 120;

/// The result of [`Decoder::submit_decode_unit`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SubmitStatus {
    Ok,

    /// The decoder is unable to continue without an IDR frame, e.g. because
    /// it failed to decode this unit.
    NeedIdr,
}

/// A decoder which accepts decode units synchronously on the receive thread.
///
/// Used when [`Capabilities::DIRECT_SUBMIT`] is set.
pub trait Decoder {
    fn submit_decode_unit(&mut self, unit: &DecodeUnit) -> SubmitStatus;
}

enum Delivery {
    Direct(Box<dyn Decoder + Send>),
    Queued(Queue),
}

/// Returns true if frame index `a` is before `b`, allowing for wraparound.
#[inline]
fn frame_is_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Returns true if 24-bit stream packet index `a` is before `b`, allowing for wraparound.
#[inline]
fn packet_is_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) & STREAM_PACKET_INDEX_MASK) >= 0x80_0000
}

/// Turns an ordered sequence of video payloads into decode units.
///
/// Delivery depends on [`Capabilities::DIRECT_SUBMIT`]. With it, each decode
/// unit is passed to the supplied [`Decoder`] before
/// [`Depacketizer::process_rtp_payload`] returns. Without it, decode units
/// are placed on a bounded queue to be read from another thread via
/// [`Depacketizer::decode_unit_receiver`].
pub struct Depacketizer<L: ConnectionListener> {
    listener: L,
    delivery: Delivery,

    /// Bytes to skip at the start of each frame's first packet.
    frame_header_len: usize,

    /// If every dropped frame requires an IDR frame before decoding can resume.
    strict_idr_frame_wait: bool,

    next_frame_number: u32,

    /// The first frame not yet known to be delivered; used to report the
    /// range of lost frames.
    start_frame_number: u32,

    waiting_for_next_successful_frame: bool,
    waiting_for_idr_frame: bool,

    /// The last stream packet index seen, in 24-bit space.
    last_packet_in_stream: u32,

    /// If a frame's first packet has been seen but not its last.
    decoding_frame: bool,

    consecutive_frame_drops: u32,

    chain: NalChain,

    /// When the current frame's first packet was received.
    frame_received: Instant,
}

impl<L: ConnectionListener> Depacketizer<L> {
    /// Creates a new depacketizer.
    ///
    /// `decoder` must be supplied iff `options` include
    /// [`Capabilities::DIRECT_SUBMIT`].
    pub fn new(
        options: Options,
        listener: L,
        decoder: Option<Box<dyn Decoder + Send>>,
    ) -> Result<Self, Error> {
        let direct = options.capabilities.contains(Capabilities::DIRECT_SUBMIT);
        let delivery = match (direct, decoder) {
            (true, Some(decoder)) => Delivery::Direct(decoder),
            (false, None) => Delivery::Queued(Queue::new(options.queue_capacity.get())),
            (true, None) => bail!(ErrorInt::InvalidArgument(
                "DIRECT_SUBMIT requires a decoder".to_owned()
            )),
            (false, Some(_)) => bail!(ErrorInt::InvalidArgument(
                "decoder supplied without DIRECT_SUBMIT; read from decode_unit_receiver instead"
                    .to_owned()
            )),
        };
        let strict_idr_frame_wait = options
            .capabilities
            .requires_strict_idr_wait(options.format);
        let frame_header_len = options.server_version.frame_header_len();
        debug!(
            "new {} depacketizer: server {:?}, capabilities {:?}, {}, strict IDR wait {}",
            options.format,
            options.server_version,
            options.capabilities,
            if direct { "direct submit" } else { "queued" },
            strict_idr_frame_wait,
        );
        Ok(Depacketizer {
            listener,
            delivery,
            frame_header_len,
            strict_idr_frame_wait,
            next_frame_number: 1,
            start_frame_number: 0,
            waiting_for_next_successful_frame: false,
            waiting_for_idr_frame: true,
            last_packet_in_stream: STREAM_PACKET_INDEX_MASK,
            decoding_frame: false,
            consecutive_frame_drops: 0,
            chain: NalChain::default(),
            frame_received: Instant::now(),
        })
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    #[inline]
    pub fn is_waiting_for_idr_frame(&self) -> bool {
        self.waiting_for_idr_frame
    }

    /// The frame index expected next, or of the frame being assembled.
    #[inline]
    pub fn next_frame_number(&self) -> u32 {
        self.next_frame_number
    }

    /// Returns a receiver for decode units, or `None` with `DIRECT_SUBMIT`.
    ///
    /// Multiple receivers may be created; each unit goes to exactly one.
    pub fn decode_unit_receiver(&self) -> Option<DecodeUnitReceiver> {
        match &self.delivery {
            Delivery::Direct(_) => None,
            Delivery::Queued(q) => Some(q.receiver()),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        match &self.delivery {
            Delivery::Direct(_) => StopHandle::default(),
            Delivery::Queued(q) => q.stop_handle(),
        }
    }

    /// Parses a complete RTP packet from the video stream and processes its payload.
    pub fn queue_rtp_packet(&mut self, data: Bytes, received: Instant) -> Result<(), Error> {
        let pkt = VideoPacket::parse(data)?;
        self.process_rtp_payload(pkt, received)
    }

    /// Processes one video payload.
    ///
    /// On error, nothing but [`ConnectionListener::saw_frame`] has happened.
    /// A protocol violation (see [`Error::is_protocol_violation`]) means the
    /// caller's ordering is broken; [`Depacketizer::reset`] before continuing.
    pub fn process_rtp_payload(
        &mut self,
        pkt: VideoPacket,
        received: Instant,
    ) -> Result<(), Error> {
        let first_packet = pkt.is_first_packet();
        let last_packet = pkt.is_last_packet();
        let frame_index = pkt.frame_index;
        let stream_packet_index = pkt.stream_packet_index & STREAM_PACKET_INDEX_MASK;
        let mut payload = pkt.payload;

        self.listener.saw_frame(frame_index);
        self.check_packet(frame_index, stream_packet_index, first_packet, &payload)?;
        trace!(
            "frame {} pkt {:06x}: {} bytes{}{}",
            frame_index,
            stream_packet_index,
            payload.len(),
            if first_packet { " (first)" } else { "" },
            if last_packet { " (last)" } else { "" },
        );

        if first_packet {
            if frame_is_before(self.next_frame_number, frame_index) {
                info!(
                    "network dropped an entire frame: expected {}, got {}",
                    self.next_frame_number, frame_index
                );
                self.next_frame_number = frame_index;
                self.waiting_for_next_successful_frame = true;
                self.drop_frame_state();
            }
            self.decoding_frame = true;
            self.frame_received = received;
        }

        let expected = self.last_packet_in_stream.wrapping_add(1) & STREAM_PACKET_INDEX_MASK;
        if stream_packet_index != expected {
            self.listener
                .lost_packets(self.last_packet_in_stream, stream_packet_index);
        }
        self.last_packet_in_stream = stream_packet_index;

        if first_packet {
            payload.advance(self.frame_header_len);
            if annexb::is_idr_frame_start(&payload) {
                // Parameter sets lead an IDR access unit; this frame is decodable.
                self.waiting_for_idr_frame = false;
                self.waiting_for_next_successful_frame = false;
                self.process_annex_b_payload(frame_index, payload);
            } else {
                self.chain.push(payload);
            }
        } else {
            self.chain.push(payload);
        }

        if last_packet {
            self.decoding_frame = false;
            self.next_frame_number = frame_index.wrapping_add(1);
            if self.waiting_for_next_successful_frame {
                self.listener
                    .detected_frame_loss(self.start_frame_number, frame_index.wrapping_sub(1));
                self.waiting_for_next_successful_frame = false;
            }
            if self.waiting_for_idr_frame {
                debug!("waiting for IDR frame; dropping frame {}", frame_index);
                self.drop_frame_state();
                return Ok(());
            }
            self.reassemble_frame(frame_index);
            self.start_frame_number = self.next_frame_number;
        }
        Ok(())
    }

    /// Checks ordering before any state is touched.
    fn check_packet(
        &self,
        frame_index: u32,
        stream_packet_index: u32,
        first_packet: bool,
        payload: &Bytes,
    ) -> Result<(), Error> {
        let violation = |description: String| {
            wrap!(ErrorInt::ProtocolViolation {
                frame_index,
                stream_packet_index,
                description,
            })
        };
        let expected = self.last_packet_in_stream.wrapping_add(1) & STREAM_PACKET_INDEX_MASK;
        if packet_is_before(stream_packet_index, expected) {
            return Err(violation(format!(
                "stream packet index went backward; expected {:06x} or later",
                expected
            )));
        }
        if frame_is_before(frame_index, self.next_frame_number) {
            return Err(violation(format!(
                "frame index went backward; expected {} or later",
                self.next_frame_number
            )));
        }
        if first_packet {
            if self.decoding_frame {
                return Err(violation(format!(
                    "new frame started while frame {} is incomplete",
                    self.next_frame_number
                )));
            }
            if payload.len() < self.frame_header_len {
                bail!(ErrorInt::MalformedPacket {
                    reason: "first packet shorter than frame header",
                    data: payload.clone(),
                });
            }
        } else {
            if !self.decoding_frame {
                return Err(violation(
                    "continuation packet with no frame in progress".to_owned(),
                ));
            }
            if frame_index != self.next_frame_number {
                return Err(violation(format!(
                    "continuation packet while frame {} is incomplete",
                    self.next_frame_number
                )));
            }
            if stream_packet_index != expected {
                return Err(violation(format!(
                    "continuation packet skipped from {:06x}",
                    self.last_packet_in_stream
                )));
            }
        }
        Ok(())
    }

    /// Splits an Annex B payload at frame starts and padding.
    ///
    /// Each frame start dispatches what came before it. Padding after video
    /// data does likewise and is itself discarded. Start codes are kept.
    fn process_annex_b_payload(&mut self, frame_index: u32, payload: Bytes) {
        let data = &payload[..];
        let mut pos = 0;
        let mut decoding_video = false;
        while pos < data.len() {
            let start = pos;
            if let Some(seq) = annexb::special_seq(&data[pos..]) {
                if seq.is_annex_b_start() {
                    decoding_video = true;
                    if seq.is_frame_start() {
                        self.decoding_frame = true;
                        self.reassemble_frame(frame_index);
                        if annexb::is_reference_frame_start(&data[pos..], seq) {
                            self.waiting_for_idr_frame = false;
                            self.waiting_for_next_successful_frame = false;
                        }
                    }
                    pos += seq.len();
                } else {
                    if decoding_video {
                        self.reassemble_frame(frame_index);
                    }
                    decoding_video = false;
                    pos += 1;
                }
            }

            // Advance to the next boundary.
            while pos < data.len() {
                match annexb::special_seq(&data[pos..]) {
                    Some(seq) if decoding_video || !seq.is_padding() => break,
                    _ => pos += 1,
                }
            }

            if decoding_video {
                self.chain.push(payload.slice(start..pos));
            }
        }
    }

    /// Hands the accumulated chain to the decoder or queue, if non-empty.
    fn reassemble_frame(&mut self, frame_number: u32) {
        if self.chain.is_empty() {
            return;
        }
        if self.chain.is_poisoned() {
            warn!("dropping incomplete frame {}", frame_number);
            self.drop_frame_state();
            return;
        }
        let unit = self.chain.finish(frame_number, self.frame_received);
        let len = unit.len();
        let submitted = match &mut self.delivery {
            Delivery::Direct(decoder) => {
                let status = decoder.submit_decode_unit(&unit);
                drop(unit);
                Ok(status)
            }
            Delivery::Queued(queue) => queue.offer(unit).map(|()| SubmitStatus::Ok),
        };
        match submitted {
            Ok(SubmitStatus::Ok) => {}
            Ok(SubmitStatus::NeedIdr) => {
                info!(
                    "requesting IDR frame on behalf of decoder (frame {})",
                    frame_number
                );
                self.request_decoder_refresh();
            }
            Err(OfferError::Full(unit)) => {
                warn!(
                    "decode unit queue overflow; dropping frame {} and everything queued",
                    frame_number
                );
                drop(unit);
                self.drop_frame_state();
                self.flush_queue();
                self.waiting_for_idr_frame = true;
                self.request_idr_frame(IdrRequestReason::QueueOverflow);
                return;
            }
            Err(OfferError::Shutdown) => {
                debug!(
                    "decode unit queue is shut down; discarding frame {}",
                    frame_number
                );
                return;
            }
        }
        trace!("dispatched frame {} ({} bytes)", frame_number, len);
        self.listener.received_complete_frame(frame_number);
        self.consecutive_frame_drops = 0;
    }

    fn request_idr_frame(&mut self, reason: IdrRequestReason) {
        debug!("requesting IDR frame: {}", reason);
        self.listener.request_idr_frame(reason);
    }

    /// Abandons the frame in progress.
    fn drop_frame_state(&mut self) {
        if self.strict_idr_frame_wait {
            self.waiting_for_idr_frame = true;
        }
        self.consecutive_frame_drops += 1;
        if self.consecutive_frame_drops == CONSECUTIVE_DROP_LIMIT {
            warn!(
                "reached consecutive drop limit of {}; requesting IDR frame",
                CONSECUTIVE_DROP_LIMIT
            );
            self.consecutive_frame_drops = 0;
            self.waiting_for_idr_frame = true;
            self.request_idr_frame(IdrRequestReason::ConsecutiveDropLimit);
        }
        self.chain.clear();
    }

    fn flush_queue(&self) {
        if let Delivery::Queued(q) = &self.delivery {
            let n = q.flush();
            if n > 0 {
                debug!("flushed {} queued decode units", n);
            }
        }
    }

    /// Discards everything not yet decoded and waits for an IDR frame,
    /// asking the server for one.
    ///
    /// Called automatically when the decoder returns
    /// [`SubmitStatus::NeedIdr`]; also useful when the decode thread
    /// discovers it can't continue.
    pub fn request_decoder_refresh(&mut self) {
        self.waiting_for_idr_frame = true;
        self.drop_frame_state();
        self.flush_queue();
        self.request_idr_frame(IdrRequestReason::DecoderRefresh);
    }

    /// Returns to the initial frame assembly state, as when the stream restarts.
    ///
    /// Releases the frame in progress and anything queued. The delivery mode
    /// and options are kept, and a stopped queue stays stopped.
    pub fn reset(&mut self) {
        self.chain.clear();
        self.flush_queue();
        self.next_frame_number = 1;
        self.start_frame_number = 0;
        self.waiting_for_next_successful_frame = false;
        self.waiting_for_idr_frame = true;
        self.last_packet_in_stream = STREAM_PACKET_INDEX_MASK;
        self.decoding_frame = false;
        self.consecutive_frame_drops = 0;
    }

    #[doc(hidden)]
    pub fn check_invariants(&self) -> Result<(), String> {
        self.chain.check_invariants()?;
        if !self.decoding_frame && !self.chain.is_empty() {
            return Err(format!(
                "no frame in progress but chain holds {} bytes",
                self.chain.len()
            ));
        }
        if self.last_packet_in_stream > STREAM_PACKET_INDEX_MASK {
            return Err(format!(
                "last packet in stream {:#x} exceeds 24 bits",
                self.last_packet_in_stream
            ));
        }
        if self.consecutive_frame_drops >= CONSECUTIVE_DROP_LIMIT {
            return Err(format!(
                "consecutive frame drops {} reached limit without reset",
                self.consecutive_frame_drops
            ));
        }
        Ok(())
    }
}

impl<L: ConnectionListener> Drop for Depacketizer<L> {
    fn drop(&mut self) {
        if let Delivery::Queued(q) = &self.delivery {
            q.shutdown();
        }
        self.chain.clear();
    }
}

impl<L: ConnectionListener> std::fmt::Debug for Depacketizer<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Depacketizer")
            .field("next_frame_number", &self.next_frame_number)
            .field("start_frame_number", &self.start_frame_number)
            .field(
                "waiting_for_next_successful_frame",
                &self.waiting_for_next_successful_frame,
            )
            .field("waiting_for_idr_frame", &self.waiting_for_idr_frame)
            .field(
                "last_packet_in_stream",
                &format_args!("{:06x}", self.last_packet_in_stream),
            )
            .field("decoding_frame", &self.decoding_frame)
            .field("consecutive_frame_drops", &self.consecutive_frame_drops)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}
