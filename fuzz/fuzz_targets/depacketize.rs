// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

#![no_main]
use std::time::Instant;

use bytes::Buf;
use gamestream_video::{
    depacketizer::Depacketizer,
    rtp::{VideoPacket, FLAG_CONTAINS_PIC_DATA, FLAG_EOF, FLAG_SOF},
    Capabilities, DecodeUnit, Decoder, Options, ServerVersion, SubmitStatus, VideoFormat,
};
use libfuzzer_sys::fuzz_target;

/// Reads each unit fully and occasionally asks for an IDR frame.
struct Checker;

impl Decoder for Checker {
    fn submit_decode_unit(&mut self, unit: &DecodeUnit) -> SubmitStatus {
        let mut unit = unit.clone();
        assert_eq!(unit.remaining(), unit.len());
        let mut sum = 0usize;
        while unit.has_remaining() {
            let chunk_len = unit.chunk().len();
            assert!(chunk_len > 0);
            sum += chunk_len;
            unit.advance(chunk_len);
        }
        assert_eq!(sum, unit.len());
        if unit.frame_number() % 7 == 3 {
            SubmitStatus::NeedIdr
        } else {
            SubmitStatus::Ok
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let (cfg, mut data) = match data.split_first() {
        Some(r) => r,
        None => return,
    };
    let format = if (cfg & 0b001) != 0 {
        VideoFormat::H265
    } else {
        VideoFormat::H264
    };
    let mut capabilities = Capabilities::empty();
    if (cfg & 0b010) != 0 {
        capabilities = capabilities
            | Capabilities::REFERENCE_FRAME_INVALIDATION_AVC
            | Capabilities::REFERENCE_FRAME_INVALIDATION_HEVC;
    }
    let direct = (cfg & 0b100) != 0;
    if direct {
        capabilities = capabilities | Capabilities::DIRECT_SUBMIT;
    }
    let options = Options::new(format)
        .capabilities(capabilities)
        .server_version(ServerVersion::new(7, 1, 431));
    let decoder: Option<Box<dyn Decoder + Send>> = if direct {
        Some(Box::new(Checker))
    } else {
        None
    };
    let mut depacketizer = Depacketizer::new(options, (), decoder).unwrap();
    let receiver = depacketizer.decode_unit_receiver();
    let mut frame_index = 0u32;
    let mut stream_packet_index = 0u32;
    let now = Instant::now();
    loop {
        let (hdr, rest) = match data.split_first() {
            Some(r) => r,
            None => return,
        };
        let first = (hdr & 0b001) != 0;
        let last = (hdr & 0b010) != 0;
        let loss = (hdr & 0b100) != 0;
        let len = usize::from(hdr >> 3);
        if rest.len() < len {
            return;
        }
        let (payload, rest) = rest.split_at(len);
        data = rest;
        if loss {
            stream_packet_index = stream_packet_index.wrapping_add(1);
            if first {
                frame_index = frame_index.wrapping_add(1);
            }
        }
        if first {
            frame_index = frame_index.wrapping_add(1);
        }
        let mut flags = FLAG_CONTAINS_PIC_DATA;
        if first {
            flags |= FLAG_SOF;
        }
        if last {
            flags |= FLAG_EOF;
        }
        let pkt = VideoPacket {
            frame_index,
            stream_packet_index,
            flags,
            payload: bytes::Bytes::copy_from_slice(payload),
        };
        stream_packet_index = stream_packet_index.wrapping_add(1) & 0xFF_FFFF;
        if let Err(e) = depacketizer.process_rtp_payload(pkt, now) {
            if e.is_protocol_violation() {
                depacketizer.reset();
                frame_index = 0;
                stream_packet_index = 0;
            }
        }
        if let Err(e) = depacketizer.check_invariants() {
            panic!("{}", e);
        }
        if let Some(r) = &receiver {
            while let Some(unit) = r.try_recv() {
                assert_eq!(unit.to_vec().len(), unit.len());
            }
        }
    }
});
