// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Instant;

use bytes::{Buf, Bytes};
use criterion::{criterion_group, criterion_main, Criterion};
use gamestream_video::{
    depacketizer::Depacketizer,
    rtp::{VideoPacket, FLAG_CONTAINS_PIC_DATA, FLAG_EOF, FLAG_SOF},
    Capabilities, DecodeUnit, Decoder, Options, ServerVersion, SubmitStatus, VideoFormat,
};

/// Payload bytes per packet, about what fits in a 1,500-byte MTU after headers.
const PACKET_SIZE: usize = 1_392;

const FRAME_HEADER: [u8; 8] = [0x01, 0x10, 0, 0, 0, 0, 0, 0];

struct Session {
    packets: Vec<(u32, u32, u8, Bytes)>,
    bytes: usize,
}

/// Builds one second of 60 fps video: an IDR access unit (SPS, PPS, and a
/// large slice, separated by padding) followed by P frames.
fn session() -> Session {
    let mut frames = Vec::new();
    let mut idr = Vec::new();
    idr.extend_from_slice(&FRAME_HEADER);
    idr.extend_from_slice(b"\x00\x00\x00\x01\x67\x64\x00\x2a\xac\x2b\x40\x3c\x01\x13\xf2\xc0");
    idr.extend_from_slice(b"\x00\x00\x00\x00\x00\x00\x00\x01\x68\xee\x3c\xb0");
    idr.extend_from_slice(b"\x00\x00\x00\x01\x65\x88\x84");
    idr.extend((0..200_000u32).map(|i| (i % 251) as u8 | 0x80));
    frames.push(idr);
    for f in 1..60u32 {
        let mut p = Vec::new();
        p.extend_from_slice(&FRAME_HEADER);
        p.extend_from_slice(b"\x00\x00\x00\x01\x41\x9a");
        p.extend((0..20_000u32).map(|i| ((i + f) % 251) as u8 | 0x80));
        frames.push(p);
    }

    let mut packets = Vec::new();
    let mut bytes = 0;
    let mut spi = 0u32;
    for (i, frame) in frames.into_iter().enumerate() {
        let frame_index = u32::try_from(i).unwrap() + 1;
        let frame = Bytes::from(frame);
        bytes += frame.len();
        let n = (frame.len() + PACKET_SIZE - 1) / PACKET_SIZE;
        for j in 0..n {
            let mut flags = FLAG_CONTAINS_PIC_DATA;
            if j == 0 {
                flags |= FLAG_SOF;
            }
            if j == n - 1 {
                flags |= FLAG_EOF;
            }
            let end = std::cmp::min(frame.len(), (j + 1) * PACKET_SIZE);
            packets.push((frame_index, spi, flags, frame.slice(j * PACKET_SIZE..end)));
            spi += 1;
        }
    }
    Session { packets, bytes }
}

/// Reads every byte, as a decoder copying into its input buffer would.
struct Sink(u64);

impl Decoder for Sink {
    fn submit_decode_unit(&mut self, unit: &DecodeUnit) -> SubmitStatus {
        let mut unit = unit.clone();
        while unit.has_remaining() {
            let chunk = unit.chunk();
            self.0 += u64::from(chunk[0]) + chunk.len() as u64;
            let len = chunk.len();
            unit.advance(len);
        }
        SubmitStatus::Ok
    }
}

fn direct(session: &Session) {
    let options = Options::new(VideoFormat::H264)
        .capabilities(Capabilities::DIRECT_SUBMIT)
        .server_version(ServerVersion::new(7, 1, 431));
    let mut d = Depacketizer::new(options, (), Some(Box::new(Sink(0)))).unwrap();
    let now = Instant::now();
    for (frame_index, stream_packet_index, flags, payload) in &session.packets {
        d.process_rtp_payload(
            VideoPacket {
                frame_index: *frame_index,
                stream_packet_index: *stream_packet_index,
                flags: *flags,
                payload: payload.clone(),
            },
            now,
        )
        .unwrap();
    }
}

fn queued(session: &Session) {
    let options =
        Options::new(VideoFormat::H264).server_version(ServerVersion::new(7, 1, 431));
    let mut d = Depacketizer::new(options, (), None).unwrap();
    let receiver = d.decode_unit_receiver().unwrap();
    let now = Instant::now();
    for (frame_index, stream_packet_index, flags, payload) in &session.packets {
        d.process_rtp_payload(
            VideoPacket {
                frame_index: *frame_index,
                stream_packet_index: *stream_packet_index,
                flags: *flags,
                payload: payload.clone(),
            },
            now,
        )
        .unwrap();
        while let Some(unit) = receiver.try_recv() {
            criterion::black_box(unit);
        }
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let session = session();
    let mut g = c.benchmark_group("depacketize");
    g.throughput(criterion::Throughput::Bytes(
        u64::try_from(session.bytes).unwrap(),
    ));
    g.bench_function("h264_direct", |b| b.iter(|| direct(&session)));
    g.bench_function("h264_queued", |b| b.iter(|| queued(&session)));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
