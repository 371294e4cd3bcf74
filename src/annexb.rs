// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recognition of the special byte sequences of an
//! [Annex B](https://www.itu.int/rec/T-REC-H.264-201906-I/en) byte stream.
//!
//! The server sends each access unit as Annex B data. A 4-byte start code
//! begins what it considers a new frame (including each parameter set of an
//! IDR access unit), a 3-byte start code begins a NAL unit within one, and
//! runs of zero bytes pad between parameter sets.

/// The NAL header byte of an H.264 IDR slice with `nal_ref_idc` 3.
const AVC_IDR_SLICE: u8 = 0x65;

/// The NAL header byte of an H.264 sequence parameter set with `nal_ref_idc` 3.
const AVC_SPS: u8 = 0x67;

/// The first NAL header byte of an H.265 video parameter set.
const HEVC_VPS: u8 = 0x40;

/// First NAL header bytes of the H.265 unit types 16–21 (`BLA_W_LP` through
/// `CRA_NUT`) with `nuh_layer_id` 0.
const HEVC_IRAP: [u8; 6] = [0x20, 0x22, 0x24, 0x26, 0x28, 0x2a];

/// A special sequence found at the start of a byte window.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpecialSeq {
    /// `00 00 00 01`.
    FrameStart,

    /// `00 00 01`.
    NalStart,

    /// `00 00 00`, not followed by `01`.
    Padding,
}

impl SpecialSeq {
    /// Returns the number of bytes the sequence occupies.
    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(self) -> usize {
        match self {
            SpecialSeq::FrameStart => 4,
            SpecialSeq::NalStart | SpecialSeq::Padding => 3,
        }
    }

    /// Returns the sequence's final byte.
    #[inline]
    fn terminal(self) -> u8 {
        match self {
            SpecialSeq::FrameStart | SpecialSeq::NalStart => 1,
            SpecialSeq::Padding => 0,
        }
    }

    #[inline]
    pub fn is_frame_start(self) -> bool {
        self.len() == 4 && self.terminal() == 1
    }

    /// Returns true for either kind of start code.
    #[inline]
    pub fn is_annex_b_start(self) -> bool {
        self.terminal() == 1
    }

    #[inline]
    pub fn is_padding(self) -> bool {
        self.terminal() == 0
    }
}

/// Looks for a special sequence at the very start of `window`.
pub fn special_seq(window: &[u8]) -> Option<SpecialSeq> {
    match window {
        [0, 0, 0, 1, ..] => Some(SpecialSeq::FrameStart),
        [0, 0, 0, ..] => Some(SpecialSeq::Padding),
        [0, 0, 1, ..] => Some(SpecialSeq::NalStart),
        _ => None,
    }
}

/// Returns the byte immediately after `seq`, which was found at the start of `window`.
#[inline]
fn following_byte(window: &[u8], seq: SpecialSeq) -> Option<u8> {
    window.get(seq.len()).copied()
}

/// Returns true if the NAL introduced by `seq` (found at the start of
/// `window`) carries a picture that can be decoded without earlier ones.
pub fn is_reference_frame_start(window: &[u8], seq: SpecialSeq) -> bool {
    match following_byte(window, seq) {
        Some(AVC_IDR_SLICE) => true,
        Some(b) => HEVC_IRAP.contains(&b),
        None => false,
    }
}

/// Returns true if `window` begins an IDR access unit, which the server
/// always prefixes with parameter sets.
///
/// Such access units need a full scan: the parameter sets are separated by
/// padding that must not reach the decoder.
pub fn is_idr_frame_start(window: &[u8]) -> bool {
    match special_seq(window) {
        Some(seq) if seq.is_frame_start() => {
            matches!(following_byte(window, seq), Some(AVC_SPS | HEVC_VPS))
        }
        _ => false,
    }
}
