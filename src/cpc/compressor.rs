// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Turns the in-memory sketch state into the serialized payload streams and
//! back.
//!
//! The payload is two independent 32-bit-word streams: the surprising-value
//! pairs and the sliding window. Pairs are sorted and delta-coded: the
//! column delta in unary, the row delta in a Golomb code whose base width is
//! derived from `(K, num_pairs)` identically on both sides, so nothing about
//! the code needs to be stored. Window bytes at steady state are close to
//! maximum entropy and are packed verbatim, four per word.
//!
//! The codec is deterministic and round-trip safe; the envelope around it is
//! specified in [`sketch`](super::sketch).

use crate::cpc::Flavor;
use crate::cpc::determine_correct_offset;
use crate::cpc::determine_flavor;
use crate::cpc::sketch::CpcSketch;
use crate::cpc::slot_table::SlotTable;
use crate::cpc::slot_table::sort_nearly_sorted;
use crate::error::Error;

/// A sketch's payload in serialized form.
#[derive(Default)]
pub(super) struct CompressedState {
    pub(super) table_data: Vec<u32>,
    /// Number of pairs in the table stream; in hybrid mode this also counts
    /// the pairs that were folded in from the window.
    pub(super) table_num_entries: u32,
    pub(super) window_data: Vec<u32>,
}

/// A payload decoded back into sketch state.
pub(super) struct UncompressedState {
    pub(super) table: SlotTable,
    pub(super) window: Vec<u8>,
}

impl CompressedState {
    pub fn compress(sketch: &CpcSketch) -> Result<Self, Error> {
        let mut state = CompressedState::default();
        match sketch.flavor() {
            Flavor::Empty => {}
            Flavor::Sparse => state.compress_sparse(sketch)?,
            Flavor::Hybrid => state.compress_hybrid(sketch)?,
            Flavor::Pinned => state.compress_pinned(sketch)?,
            Flavor::Sliding => state.compress_sliding(sketch)?,
        }
        Ok(state)
    }

    fn compress_sparse(&mut self, sketch: &CpcSketch) -> Result<(), Error> {
        debug_assert!(sketch.sliding_window.is_empty());
        let mut pairs = sketch.surprising_value_table.extract_pairs();
        sort_nearly_sorted(&mut pairs);
        self.encode_pairs(&pairs, sketch.lg_k())
    }

    /// In hybrid mode the window sits at offset zero, so its bits are plain
    /// coupons; fold them into the pair stream instead of shipping a nearly
    /// empty window.
    fn compress_hybrid(&mut self, sketch: &CpcSketch) -> Result<(), Error> {
        if sketch.window_offset != 0 {
            return Err(Error::internal("hybrid sketch has a shifted window"));
        }
        let mut table_pairs = sketch.surprising_value_table.extract_pairs();
        sort_nearly_sorted(&mut table_pairs);

        // Ascending by construction: rows in order, columns in order per row.
        let mut window_pairs = Vec::new();
        for (row, &byte) in sketch.sliding_window.iter().enumerate() {
            let mut bits = byte;
            while bits != 0 {
                let col = bits.trailing_zeros();
                bits &= bits - 1;
                window_pairs.push(((row as u32) << 6) | col);
            }
        }

        if table_pairs.len() + window_pairs.len() != sketch.num_coupons() as usize {
            return Err(Error::internal(
                "hybrid coupon count does not match table plus window",
            ));
        }

        let mut all_pairs = Vec::with_capacity(table_pairs.len() + window_pairs.len());
        let (mut t, mut w) = (0, 0);
        while t < table_pairs.len() || w < window_pairs.len() {
            if w >= window_pairs.len()
                || (t < table_pairs.len() && table_pairs[t] <= window_pairs[w])
            {
                all_pairs.push(table_pairs[t]);
                t += 1;
            } else {
                all_pairs.push(window_pairs[w]);
                w += 1;
            }
        }

        self.encode_pairs(&all_pairs, sketch.lg_k())
    }

    fn compress_pinned(&mut self, sketch: &CpcSketch) -> Result<(), Error> {
        self.window_data = pack_window(&sketch.sliding_window);
        let mut pairs = sketch.surprising_value_table.extract_pairs();
        if pairs.is_empty() {
            return Ok(());
        }
        // No pinned-mode column is below the 8-wide window at offset zero,
        // so the whole code can be shifted down by 8 to shorten the deltas.
        for pair in &mut pairs {
            if *pair & 63 < 8 {
                return Err(Error::internal("pinned-mode pair inside the window"));
            }
            *pair -= 8;
        }
        sort_nearly_sorted(&mut pairs);
        self.encode_pairs(&pairs, sketch.lg_k())
    }

    fn compress_sliding(&mut self, sketch: &CpcSketch) -> Result<(), Error> {
        self.window_data = pack_window(&sketch.sliding_window);
        let mut pairs = sketch.surprising_value_table.extract_pairs();
        if pairs.is_empty() {
            return Ok(());
        }
        // Rotate the columns into a canonical position relative to the
        // window: new = (old - (offset + 8)) mod 64. This changes the
        // implied ordering, so it happens before the sort.
        let offset = sketch.window_offset;
        debug_assert!(offset <= 56);
        for pair in &mut pairs {
            let row = *pair >> 6;
            let col = ((*pair & 63) as u8).wrapping_add(56 - offset) & 63;
            if col >= 56 {
                return Err(Error::internal("sliding-mode pair inside the window"));
            }
            *pair = (row << 6) | col as u32;
        }
        sort_nearly_sorted(&mut pairs);
        self.encode_pairs(&pairs, sketch.lg_k())
    }

    fn encode_pairs(&mut self, pairs: &[u32], lg_k: u8) -> Result<(), Error> {
        let k = 1u64 << lg_k;
        let num_pairs = pairs.len() as u64;
        let base_bits = golomb_base_bits(k + num_pairs, num_pairs);
        let golomb_lo_mask = (1u64 << base_bits) - 1;

        let mut writer = BitWriter::with_capacity(pairs.len() / 2 + 8);
        let mut predicted_row = 0u32;
        let mut predicted_col = 0u32;
        for &row_col in pairs {
            let row = row_col >> 6;
            let col = row_col & 63;
            if row != predicted_row {
                predicted_col = 0;
            }
            if row < predicted_row || col < predicted_col {
                return Err(Error::internal("pair stream is not sorted"));
            }
            let x_delta = (col - predicted_col) as u64;
            let y_delta = (row - predicted_row) as u64;
            predicted_row = row;
            predicted_col = col + 1;

            writer.write_unary(x_delta);
            writer.write_unary(y_delta >> base_bits);
            writer.write_bits(y_delta & golomb_lo_mask, base_bits);
        }

        self.table_data = writer.into_words();
        self.table_num_entries = pairs.len() as u32;
        Ok(())
    }

    pub fn uncompress(&self, lg_k: u8, num_coupons: u32) -> Result<UncompressedState, Error> {
        match determine_flavor(lg_k, num_coupons) {
            Flavor::Empty => Ok(UncompressedState {
                table: SlotTable::new(2, 6 + lg_k),
                window: vec![],
            }),
            Flavor::Sparse => self.uncompress_sparse(lg_k),
            Flavor::Hybrid => self.uncompress_hybrid(lg_k),
            Flavor::Pinned => self.uncompress_pinned(lg_k),
            Flavor::Sliding => self.uncompress_sliding(lg_k, num_coupons),
        }
    }

    fn uncompress_sparse(&self, lg_k: u8) -> Result<UncompressedState, Error> {
        let pairs = decode_pairs(&self.table_data, self.table_num_entries, lg_k)?;
        Ok(UncompressedState {
            table: SlotTable::from_pairs(lg_k, pairs)?,
            window: vec![],
        })
    }

    fn uncompress_hybrid(&self, lg_k: u8) -> Result<UncompressedState, Error> {
        let pairs = decode_pairs(&self.table_data, self.table_num_entries, lg_k)?;

        // Some of these pairs belong in the window; set those bits and keep
        // only the true surprising values for the table.
        let k = 1usize << lg_k;
        let mut window = vec![0u8; k];
        let mut true_pairs = Vec::with_capacity(pairs.len());
        for row_col in pairs {
            let col = row_col & 63;
            if col < 8 {
                window[(row_col >> 6) as usize] |= 1 << col;
            } else {
                true_pairs.push(row_col);
            }
        }

        Ok(UncompressedState {
            table: SlotTable::from_pairs(lg_k, true_pairs)?,
            window,
        })
    }

    fn uncompress_pinned(&self, lg_k: u8) -> Result<UncompressedState, Error> {
        let window = unpack_window(&self.window_data, 1usize << lg_k)?;
        let table = if self.table_num_entries == 0 {
            SlotTable::new(2, 6 + lg_k)
        } else {
            let mut pairs = decode_pairs(&self.table_data, self.table_num_entries, lg_k)?;
            for pair in &mut pairs {
                // undo the encoder's 8-column shift
                if *pair & 63 >= 56 {
                    return Err(Error::corruption("pinned pair column out of range"));
                }
                *pair += 8;
            }
            SlotTable::from_pairs(lg_k, pairs)?
        };
        Ok(UncompressedState { table, window })
    }

    fn uncompress_sliding(&self, lg_k: u8, num_coupons: u32) -> Result<UncompressedState, Error> {
        let window = unpack_window(&self.window_data, 1usize << lg_k)?;
        let table = if self.table_num_entries == 0 {
            SlotTable::new(2, 6 + lg_k)
        } else {
            let mut pairs = decode_pairs(&self.table_data, self.table_num_entries, lg_k)?;
            let offset = determine_correct_offset(lg_k, num_coupons);
            debug_assert!(offset <= 56);
            for pair in &mut pairs {
                let row = *pair >> 6;
                let col = (*pair & 63) as u8;
                if col >= 56 {
                    return Err(Error::corruption("sliding pair column out of range"));
                }
                // undo the rotation: old = (new + (offset + 8)) mod 64
                let col = col.wrapping_add(offset + 8) & 63;
                *pair = (row << 6) | col as u32;
            }
            SlotTable::from_pairs(lg_k, pairs)?
        };
        Ok(UncompressedState { table, window })
    }
}

fn decode_pairs(data: &[u32], num_pairs: u32, lg_k: u8) -> Result<Vec<u32>, Error> {
    let k = 1u64 << lg_k;
    let base_bits = golomb_base_bits(k + num_pairs as u64, num_pairs as u64);

    let mut reader = BitReader::new(data);
    let mut pairs = Vec::with_capacity(num_pairs as usize);
    let mut predicted_row = 0u64;
    let mut predicted_col = 0u64;
    for _ in 0..num_pairs {
        let x_delta = reader.read_unary()?;
        let golomb_hi = reader.read_unary()?;
        let golomb_lo = reader.read_bits(base_bits)?;
        // golomb_hi is bounded by the stream's bit count and base_bits by
        // lg_k, so this shift cannot overflow even on corrupt input.
        let y_delta = (golomb_hi << base_bits) | golomb_lo;

        if y_delta > 0 {
            predicted_col = 0;
        }
        let row = predicted_row + y_delta;
        let col = predicted_col + x_delta;
        if row >= k || col > 63 {
            return Err(Error::corruption("decoded pair is out of range"));
        }
        pairs.push(((row as u32) << 6) | col as u32);
        predicted_row = row;
        predicted_col = col + 1;
    }
    Ok(pairs)
}

/// Chooses the Golomb base width for the row deltas: an integer between zero
/// and `ceil(log2(k)) - 1` inclusive.
fn golomb_base_bits(n: u64, count: u64) -> u8 {
    debug_assert!(count > 0 && n >= count);
    let quotient = (n - count) / count;
    if quotient == 0 { 0 } else { quotient.ilog2() as u8 }
}

fn pack_window(window: &[u8]) -> Vec<u32> {
    let mut words = vec![0u32; window.len().div_ceil(4)];
    for (i, &byte) in window.iter().enumerate() {
        words[i >> 2] |= (byte as u32) << ((i & 3) << 3);
    }
    words
}

fn unpack_window(data: &[u32], k: usize) -> Result<Vec<u8>, Error> {
    if data.len() != k.div_ceil(4) {
        return Err(Error::corruption("window payload length mismatch"));
    }
    let mut window = vec![0u8; k];
    for (i, byte) in window.iter_mut().enumerate() {
        *byte = (data[i >> 2] >> ((i & 3) << 3)) as u8;
    }
    Ok(window)
}

/// Accumulates variable-width codes into 32-bit words, low bits first.
struct BitWriter {
    words: Vec<u32>,
    bitbuf: u64,
    bufbits: u8,
}

impl BitWriter {
    fn with_capacity(words: usize) -> Self {
        Self {
            words: Vec::with_capacity(words),
            bitbuf: 0,
            bufbits: 0,
        }
    }

    /// Appends the low `bits` bits of `value`; `bits <= 32`.
    fn write_bits(&mut self, value: u64, bits: u8) {
        debug_assert!(bits <= 32 && value >> bits == 0);
        self.bitbuf |= value << self.bufbits;
        self.bufbits += bits;
        while self.bufbits >= 32 {
            self.words.push(self.bitbuf as u32);
            self.bitbuf >>= 32;
            self.bufbits -= 32;
        }
    }

    /// Appends `value` zeros followed by a terminating one.
    fn write_unary(&mut self, value: u64) {
        let mut remaining = value;
        while remaining >= 16 {
            self.write_bits(0, 16);
            remaining -= 16;
        }
        self.write_bits(1u64 << remaining, remaining as u8 + 1);
    }

    /// Pads so that the reader's 8-bit unary peek can never overrun, then
    /// flushes the final partial word.
    fn into_words(mut self) -> Vec<u32> {
        self.write_bits(0, 7);
        if self.bufbits > 0 {
            self.words.push(self.bitbuf as u32);
        }
        self.words
    }
}

/// The reading half of [`BitWriter`]; rejects reads past the end of the
/// payload instead of trusting it.
struct BitReader<'a> {
    words: &'a [u32],
    index: usize,
    bitbuf: u64,
    bufbits: u8,
}

impl<'a> BitReader<'a> {
    fn new(words: &'a [u32]) -> Self {
        Self {
            words,
            index: 0,
            bitbuf: 0,
            bufbits: 0,
        }
    }

    fn fill(&mut self, min_bits: u8) -> Result<(), Error> {
        debug_assert!(min_bits <= 32);
        if self.bufbits < min_bits {
            let Some(&word) = self.words.get(self.index) else {
                return Err(Error::corruption("compressed payload overrun"));
            };
            self.bitbuf |= (word as u64) << self.bufbits;
            self.index += 1;
            self.bufbits += 32;
        }
        Ok(())
    }

    fn read_bits(&mut self, bits: u8) -> Result<u64, Error> {
        if bits == 0 {
            return Ok(0);
        }
        self.fill(bits)?;
        let value = self.bitbuf & ((1u64 << bits) - 1);
        self.bitbuf >>= bits;
        self.bufbits -= bits;
        Ok(value)
    }

    fn read_unary(&mut self) -> Result<u64, Error> {
        let mut subtotal = 0u64;
        loop {
            self.fill(8)?;
            let peek = self.bitbuf & 0xff;
            let zeros = peek.trailing_zeros() as u8;
            if zeros < 8 {
                self.bitbuf >>= zeros + 1;
                self.bufbits -= zeros + 1;
                return Ok(subtotal + zeros as u64);
            }
            // The codeword continues into the next byte.
            subtotal += 8;
            self.bitbuf >>= 8;
            self.bufbits -= 8;
        }
    }
}
