// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{ConnectionListener, DecodeUnit, Decoder, IdrRequestReason, SubmitStatus};

pub(crate) fn init_logging() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or("GAMESTREAM_LOG", "info")
            .write_style("GAMESTREAM_LOG_STYLE"),
    )
    .is_test(true)
    .try_init();
}

/// Like `assert_eq!` on byte slices, but prints hex dumps on failure.
macro_rules! assert_eq_hex {
    ($left:expr, $right:expr) => {
        match (&$left, &$right) {
            (left, right) => {
                let left: &[u8] = &left[..];
                let right: &[u8] = &right[..];
                if left != right {
                    panic!(
                        "assertion failed: `(left == right)`\nleft:\n{:?}\nright:\n{:?}",
                        pretty_hex::PrettyHex::hex_dump(&left),
                        pretty_hex::PrettyHex::hex_dump(&right),
                    );
                }
            }
        }
    };
}
pub(crate) use assert_eq_hex;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    SawFrame(u32),
    LostPackets(u32, u32),
    FrameLoss(u32, u32),
    CompleteFrame(u32),
    IdrRequest(IdrRequestReason),
}

/// Records every notification, in order.
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Vec<Event>,
}

impl RecordingListener {
    pub(crate) fn take(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// As `take`, omitting the per-payload `SawFrame` events.
    pub(crate) fn take_without_saw_frame(&mut self) -> Vec<Event> {
        let mut events = self.take();
        events.retain(|e| !matches!(e, Event::SawFrame(_)));
        events
    }
}

impl ConnectionListener for RecordingListener {
    fn saw_frame(&mut self, frame_index: u32) {
        self.events.push(Event::SawFrame(frame_index));
    }

    fn lost_packets(&mut self, last_received: u32, next_received: u32) {
        self.events
            .push(Event::LostPackets(last_received, next_received));
    }

    fn detected_frame_loss(&mut self, first: u32, last: u32) {
        self.events.push(Event::FrameLoss(first, last));
    }

    fn received_complete_frame(&mut self, frame_index: u32) {
        self.events.push(Event::CompleteFrame(frame_index));
    }

    fn request_idr_frame(&mut self, reason: IdrRequestReason) {
        self.events.push(Event::IdrRequest(reason));
    }
}

#[derive(Default)]
struct DecoderState {
    units: Vec<(u32, Vec<u8>)>,
    fail_frames: Vec<u32>,
    fail_nal_headers: Vec<u8>,
}

/// Records submitted decode units; clones share state so the test can keep
/// one while the depacketizer owns another.
#[derive(Clone, Default)]
pub(crate) struct RecordingDecoder(Arc<Mutex<DecoderState>>);

impl RecordingDecoder {
    /// Returns the `(frame_number, data)` of each unit submitted since the last call.
    pub(crate) fn take(&self) -> Vec<(u32, Vec<u8>)> {
        std::mem::take(&mut self.0.lock().units)
    }

    /// Makes submission of `frame_number` return [`SubmitStatus::NeedIdr`].
    pub(crate) fn fail_frame(&self, frame_number: u32) {
        self.0.lock().fail_frames.push(frame_number);
    }

    /// Makes submission of any unit starting with a 4-byte start code and
    /// then `header` return [`SubmitStatus::NeedIdr`].
    pub(crate) fn fail_nal_header(&self, header: u8) {
        self.0.lock().fail_nal_headers.push(header);
    }
}

impl Decoder for RecordingDecoder {
    fn submit_decode_unit(&mut self, unit: &DecodeUnit) -> SubmitStatus {
        let mut l = self.0.lock();
        let data = unit.to_vec();
        let fail = l.fail_frames.contains(&unit.frame_number())
            || matches!(data.get(4), Some(h) if l.fail_nal_headers.contains(h));
        l.units.push((unit.frame_number(), data));
        if fail {
            SubmitStatus::NeedIdr
        } else {
            SubmitStatus::Ok
        }
    }
}
