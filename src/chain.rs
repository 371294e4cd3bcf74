// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Accumulation of a frame's Annex B segments and the resulting [`DecodeUnit`].

use std::time::Instant;

use bytes::{Buf, Bytes};
use smallvec::SmallVec;

type Segments = SmallVec<[Bytes; 4]>;

/// Segments of the frame currently being received.
#[derive(Default)]
pub(crate) struct NalChain {
    segments: Segments,

    /// Sum of `segments`' lengths.
    len: usize,

    /// Set when the chain couldn't grow. The frame is incomplete and must be dropped.
    poisoned: bool,
}

impl NalChain {
    /// Appends `segment`, ignoring it if empty.
    pub(crate) fn push(&mut self, segment: Bytes) {
        if self.poisoned || segment.is_empty() {
            return;
        }
        if self.segments.try_reserve(1).is_err() {
            log::warn!(
                "unable to grow chain past {} segments ({} bytes); frame will be dropped",
                self.segments.len(),
                self.len
            );
            self.poison();
            return;
        }
        self.len += segment.len();
        self.segments.push(segment);
    }

    /// Discards the segments and ignores further pushes until [`NalChain::clear`].
    pub(crate) fn poison(&mut self) {
        self.segments = Segments::new();
        self.len = 0;
        self.poisoned = true;
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.segments.is_empty() && !self.poisoned
    }

    #[inline]
    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn clear(&mut self) {
        self.segments.clear();
        self.len = 0;
        self.poisoned = false;
    }

    /// Moves the accumulated segments into a new decode unit, leaving the chain empty.
    pub(crate) fn finish(&mut self, frame_number: u32, received: Instant) -> DecodeUnit {
        debug_assert!(!self.poisoned);
        let segments = std::mem::take(&mut self.segments);
        let len = std::mem::replace(&mut self.len, 0);
        DecodeUnit {
            segments,
            len,
            frame_number,
            received,
            seg: 0,
            seg_pos: 0,
            pos: 0,
        }
    }

    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        let sum: usize = self.segments.iter().map(Bytes::len).sum();
        if sum != self.len {
            return Err(format!("chain len {} != segment sum {}", self.len, sum));
        }
        if let Some(i) = self.segments.iter().position(Bytes::is_empty) {
            return Err(format!("chain segment {} is empty", i));
        }
        if self.poisoned && !self.segments.is_empty() {
            return Err("poisoned chain holds segments".to_owned());
        }
        Ok(())
    }
}

/// A complete frame (access unit) ready for the decoder.
///
/// The data is the concatenation of [`DecodeUnit::segments`], Annex B start
/// codes included. Use the [`bytes::Buf`] implementation to read it without
/// copying, or [`DecodeUnit::to_vec`] for a contiguous copy.
///
/// Cloning is cheap; the segments are reference-counted.
#[derive(Clone)]
pub struct DecodeUnit {
    segments: Segments,
    len: usize,
    frame_number: u32,
    received: Instant,

    /// Read cursor: index into `segments`, offset within that segment, and
    /// overall offset.
    seg: usize,
    seg_pos: usize,
    pos: usize,
}

impl DecodeUnit {
    /// The frame index from the video packet headers.
    #[inline]
    pub fn frame_number(&self) -> u32 {
        self.frame_number
    }

    /// When the frame's first packet was received.
    #[inline]
    pub fn receive_time(&self) -> Instant {
        self.received
    }

    /// Total length in bytes, regardless of how much has been read via `Buf`.
    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn segments(&self) -> &[Bytes] {
        &self.segments
    }

    /// Returns the full contents as one contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for s in &self.segments {
            out.extend_from_slice(s);
        }
        out
    }
}

impl std::fmt::Debug for DecodeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeUnit")
            .field("frame_number", &self.frame_number)
            .field("received", &self.received)
            .field("pos", &self.pos)
            .field(
                "data",
                &crate::hex::LimitedHex::chain(&self.segments, 64),
            )
            .finish()
    }
}

impl Buf for DecodeUnit {
    fn remaining(&self) -> usize {
        self.len - self.pos
    }

    fn chunk(&self) -> &[u8] {
        match self.segments.get(self.seg) {
            Some(s) => &s[self.seg_pos..],
            None => &[],
        }
    }

    fn advance(&mut self, mut cnt: usize) {
        assert!(
            cnt <= self.remaining(),
            "advance {} past remaining {}",
            cnt,
            self.remaining()
        );
        self.pos += cnt;
        while cnt > 0 {
            let left_in_seg = self.segments[self.seg].len() - self.seg_pos;
            if cnt < left_in_seg {
                self.seg_pos += cnt;
                return;
            }
            cnt -= left_in_seg;
            self.seg += 1;
            self.seg_pos = 0;
        }
    }

    fn chunks_vectored<'a>(&'a self, dst: &mut [std::io::IoSlice<'a>]) -> usize {
        let mut n = 0;
        let mut seg_pos = self.seg_pos;
        for s in self.segments[self.seg.min(self.segments.len())..].iter() {
            if n == dst.len() {
                break;
            }
            dst[n] = std::io::IoSlice::new(&s[seg_pos..]);
            seg_pos = 0;
            n += 1;
        }
        n
    }
}
