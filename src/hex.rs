// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Size-limited hex dumps of payloads and segment chains for `Debug` output.

use bytes::Bytes;
use pretty_hex::PrettyHex;
use smallvec::SmallVec;

/// Dumps at most `max_bytes` of some data, noting how much was left out.
///
/// The data may be a single slice or a chain of segments; in the latter case
/// the shown prefix is gathered across segment boundaries.
pub(crate) struct LimitedHex<'a> {
    chunks: SmallVec<[&'a [u8]; 1]>,
    max_bytes: usize,
}

impl<'a> LimitedHex<'a> {
    pub(crate) fn new(inner: &'a [u8], max_bytes: usize) -> Self {
        Self {
            chunks: smallvec::smallvec![inner],
            max_bytes,
        }
    }

    pub(crate) fn chain(segments: &'a [Bytes], max_bytes: usize) -> Self {
        Self {
            chunks: segments.iter().map(|s| &s[..]).collect(),
            max_bytes,
        }
    }
}

impl std::fmt::Debug for LimitedHex<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total: usize = self.chunks.iter().map(|c| c.len()).sum();
        let mut shown = Vec::with_capacity(std::cmp::min(total, self.max_bytes));
        for c in &self.chunks {
            let room = self.max_bytes - shown.len();
            if room == 0 {
                break;
            }
            shown.extend_from_slice(&c[..std::cmp::min(room, c.len())]);
        }
        writeln!(f, "Length: {0} (0x{0:x}) bytes", total)?;
        if self.chunks.len() > 1 {
            writeln!(f, "Segments: {}", self.chunks.len())?;
        }
        let omitted = total - shown.len();
        let shown: &[u8] = &shown;
        write!(
            f,
            "{:#?}",
            shown.hex_conf(pretty_hex::HexConfig {
                title: false,
                ..Default::default()
            })
        )?;
        if omitted > 0 {
            write!(f, "\n...{0} (0x{0:x}) bytes not shown...", omitted)?;
        }
        Ok(())
    }
}
