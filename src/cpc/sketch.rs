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

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;

use crate::codec::SketchReader;
use crate::codec::SketchWriter;
use crate::common::canonical_double;
use crate::common::inv_pow2::INVERSE_POWERS_OF_2;
use crate::cpc::DEFAULT_LG_K;
use crate::cpc::Flavor;
use crate::cpc::MAX_LG_K;
use crate::cpc::MIN_LG_K;
use crate::cpc::compressor::CompressedState;
use crate::cpc::count_bits_set_in_matrix;
use crate::cpc::determine_correct_offset;
use crate::cpc::determine_flavor;
use crate::cpc::estimator::hip_confidence_lb;
use crate::cpc::estimator::hip_confidence_ub;
use crate::cpc::estimator::icon_confidence_lb;
use crate::cpc::estimator::icon_confidence_ub;
use crate::cpc::estimator::icon_estimate;
use crate::cpc::kxp_table::KXP_BYTE_TABLE;
use crate::cpc::slot_table::EMPTY_SLOT;
use crate::cpc::slot_table::SlotTable;
use crate::error::Error;
use crate::hash::DEFAULT_UPDATE_SEED;
use crate::hash::MurmurHash3X64128;
use crate::hash::compute_seed_hash;

/// A Compressed Probabilistic Counting sketch.
///
/// See the [module level documentation](super) for more.
///
/// A sketch instance is single-writer: all mutating operations take
/// `&mut self` and must be serialized by the caller; read-only operations
/// take `&self` and may run concurrently with each other.
#[derive(Debug, Clone)]
pub struct CpcSketch {
    // immutable config variables
    lg_k: u8,
    seed: u64,
    seed_hash: u16,

    // sketch state
    /// The number of coupons collected so far; monotone non-decreasing.
    pub(super) num_coupons: u32,
    /// The surprising values: zeros below the window, ones above it.
    pub(super) surprising_value_table: SlotTable,
    /// K bytes once the sketch leaves the sparse region, empty before that.
    pub(super) sliding_window: Vec<u8>,
    /// Derivable from `num_coupons`, kept explicit for speed.
    pub(super) window_offset: u8,
    /// Columns below this are known globally set; updates there are skipped.
    pub(super) first_interesting_column: u8,

    // estimator state
    /// A merged sketch has no valid HIP history; only ICON is trustworthy.
    was_merged: bool,
    /// Sum over rows of 2^-(height of row); drives the HIP increment.
    kxp: f64,
    /// The accumulated HIP cardinality estimate.
    hip_est_accum: f64,
}

impl CpcSketch {
    /// Creates a sketch with the given `lg_k` and the default seed.
    ///
    /// Returns an `InvalidArgument` error if `lg_k` is outside `[4, 26]`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cpc_sketch::cpc::CpcSketch;
    /// let sketch = CpcSketch::new(11).unwrap();
    /// assert!(sketch.is_empty());
    /// ```
    pub fn new(lg_k: u8) -> Result<Self, Error> {
        Self::with_seed(lg_k, DEFAULT_UPDATE_SEED)
    }

    /// Creates a sketch with the given `lg_k` and hash seed.
    ///
    /// Returns an `InvalidArgument` error if `lg_k` is outside `[4, 26]` or
    /// the seed digests to zero.
    pub fn with_seed(lg_k: u8, seed: u64) -> Result<Self, Error> {
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
            return Err(Error::invalid_argument(format!(
                "lg_k must be in [{MIN_LG_K}, {MAX_LG_K}]; got {lg_k}"
            )));
        }
        let seed_hash = compute_seed_hash(seed);
        if seed_hash == 0 {
            return Err(Error::invalid_argument(
                "seed digests to zero; choose a different seed",
            ));
        }
        Ok(Self {
            lg_k,
            seed,
            seed_hash,
            num_coupons: 0,
            surprising_value_table: SlotTable::new(2, 6 + lg_k),
            sliding_window: vec![],
            window_offset: 0,
            first_interesting_column: 0,
            was_merged: false,
            kxp: (1u64 << lg_k) as f64,
            hip_est_accum: 0.0,
        })
    }

    /// Creates a sketch with the default `lg_k` of 11.
    pub fn default_sketch() -> Self {
        // Both parameters are compile-time constants known to be valid.
        match Self::new(DEFAULT_LG_K) {
            Ok(sketch) => sketch,
            Err(_) => unreachable!("default parameters are valid"),
        }
    }

    /// Returns the configured `lg_k`.
    pub fn lg_k(&self) -> u8 {
        self.lg_k
    }

    /// Returns true if no coupons have been collected.
    pub fn is_empty(&self) -> bool {
        self.num_coupons == 0
    }

    /// Returns the number of coupons collected so far.
    pub fn num_coupons(&self) -> u32 {
        self.num_coupons
    }

    /// Returns the population regime the sketch is currently in.
    pub fn flavor(&self) -> Flavor {
        determine_flavor(self.lg_k, self.num_coupons)
    }

    /// Returns the best available estimate of the number of distinct inputs.
    ///
    /// Uses the HIP estimator unless the sketch is the result of a merge, in
    /// which case the ICON estimate (a pure function of the coupon count) is
    /// returned.
    pub fn estimate(&self) -> f64 {
        if self.was_merged {
            icon_estimate(self.lg_k, self.num_coupons)
        } else {
            self.hip_est_accum
        }
    }

    /// Returns the lower bound of the confidence interval selected by
    /// `kappa`, the number of standard deviations: 1, 2 or 3 for roughly
    /// 67%, 95% and 99.7% confidence.
    pub fn lower_bound(&self, kappa: u8) -> Result<f64, Error> {
        validate_kappa(kappa)?;
        Ok(if self.was_merged {
            icon_confidence_lb(self.lg_k, self.num_coupons, kappa)
        } else {
            hip_confidence_lb(self.lg_k, self.num_coupons, self.hip_est_accum, kappa)
        })
    }

    /// Returns the upper bound of the confidence interval selected by
    /// `kappa`; see [`lower_bound`](Self::lower_bound).
    pub fn upper_bound(&self, kappa: u8) -> Result<f64, Error> {
        validate_kappa(kappa)?;
        Ok(if self.was_merged {
            icon_confidence_ub(self.lg_k, self.num_coupons, kappa)
        } else {
            hip_confidence_ub(self.lg_k, self.num_coupons, self.hip_est_accum, kappa)
        })
    }

    /// Updates the sketch with any hashable value.
    ///
    /// For `f32`/`f64` values use [`update_f64`](Self::update_f64), and for
    /// raw bytes use [`update_bytes`](Self::update_bytes), which match the
    /// canonical encodings of the sister implementations.
    pub fn update<T: Hash>(&mut self, value: T) -> Result<(), Error> {
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        value.hash(&mut hasher);
        let (h0, h1) = hasher.finish128();
        self.row_col_update(row_col_from_two_hashes(h0, h1, self.lg_k))
    }

    /// Updates the sketch with a byte slice. An empty slice is a no-op, not
    /// an error, matching stream semantics.
    pub fn update_bytes(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() {
            return Ok(());
        }
        let mut hasher = MurmurHash3X64128::with_seed(self.seed);
        hasher.write(data);
        let (h0, h1) = hasher.finish128();
        self.row_col_update(row_col_from_two_hashes(h0, h1, self.lg_k))
    }

    /// Updates the sketch with a string's UTF-8 bytes.
    pub fn update_str(&mut self, value: &str) -> Result<(), Error> {
        self.update_bytes(value.as_bytes())
    }

    /// Updates the sketch with a `u64` as its 8 little-endian bytes.
    pub fn update_u64(&mut self, value: u64) -> Result<(), Error> {
        self.update_bytes(&value.to_le_bytes())
    }

    /// Updates the sketch with an `i64` as its 8 little-endian bytes.
    pub fn update_i64(&mut self, value: i64) -> Result<(), Error> {
        self.update_bytes(&value.to_le_bytes())
    }

    /// Updates the sketch with an `f64`, canonicalizing NaN and signed zero
    /// first so that all equal values count as one.
    pub fn update_f64(&mut self, value: f64) -> Result<(), Error> {
        self.update_u64(canonical_double(value))
    }

    /// Updates the sketch with an `f32`; see [`update_f64`](Self::update_f64).
    pub fn update_f32(&mut self, value: f32) -> Result<(), Error> {
        self.update_f64(value as f64)
    }

    /// Feeds a precomputed coupon directly into the sketch.
    ///
    /// This is an advanced entry point for callers that derive `row_col`
    /// codes themselves; everything else should go through the `update`
    /// family. The row bits must be below `2^lg_k`.
    pub fn row_col_update(&mut self, row_col: u32) -> Result<(), Error> {
        if (row_col >> 6) as u64 >= 1u64 << self.lg_k {
            return Err(Error::invalid_argument(format!(
                "row_col {row_col:#010x} encodes a row outside [0, 2^{})",
                self.lg_k
            )));
        }
        let col = (row_col & 63) as u8;
        if col < self.first_interesting_column {
            // important speed optimization
            return Ok(());
        }
        if self.sliding_window.is_empty() {
            self.update_sparse(row_col)
        } else {
            self.update_windowed(row_col)
        }
    }

    fn update_hip(&mut self, row_col: u32) {
        let k = 1u64 << self.lg_k;
        let col = (row_col & 63) as usize;
        self.hip_est_accum += k as f64 / self.kxp;
        self.kxp -= INVERSE_POWERS_OF_2[col + 1]; // notice the "+1"
    }

    fn update_sparse(&mut self, row_col: u32) -> Result<(), Error> {
        let k = 1u64 << self.lg_k;
        if (self.num_coupons as u64) << 5 >= 3 * k {
            return Err(Error::internal("sparse update past the sparse region"));
        }
        if self.surprising_value_table.maybe_insert(row_col)? {
            self.num_coupons += 1;
            self.update_hip(row_col);
            if (self.num_coupons as u64) << 5 >= 3 * k {
                self.promote_sparse_to_windowed()?;
            }
        }
        Ok(())
    }

    /// In terms of flavor, this promotes SPARSE to HYBRID.
    fn promote_sparse_to_windowed(&mut self) -> Result<(), Error> {
        let k = 1u64 << self.lg_k;
        let c32 = (self.num_coupons as u64) << 5;
        // At lg_k = 4 the boundary can be overshot because 3K/32 is not an
        // integer multiple of the coupon granularity.
        if !(c32 == 3 * k || (self.lg_k == 4 && c32 > 3 * k)) || self.window_offset != 0 {
            return Err(Error::internal("sparse promotion at a wrong coupon count"));
        }

        self.sliding_window = vec![0u8; k as usize];

        let old_table = std::mem::replace(
            &mut self.surprising_value_table,
            SlotTable::new(2, 6 + self.lg_k),
        );
        for &row_col in old_table.slots() {
            if row_col != EMPTY_SLOT {
                let col = row_col & 63;
                if col < 8 {
                    self.sliding_window[(row_col >> 6) as usize] |= 1 << col;
                } else if !self.surprising_value_table.maybe_insert(row_col)? {
                    return Err(Error::internal("duplicate coupon during promotion"));
                }
            }
        }
        Ok(())
    }

    /// The flavor is HYBRID, PINNED or SLIDING.
    fn update_windowed(&mut self, row_col: u32) -> Result<(), Error> {
        let k = 1u64 << self.lg_k;
        let c32_pre = (self.num_coupons as u64) << 5;
        let c8_pre = (self.num_coupons as u64) << 3;
        let w8 = (self.window_offset as u64) << 3;
        if self.window_offset > 56 || c32_pre < 3 * k || c8_pre >= (27 + w8) * k {
            return Err(Error::internal("windowed update in a wrong regime"));
        }

        let col = (row_col & 63) as u8;
        let is_novel = if col < self.window_offset {
            // Early zone: the tracked surprises are zeros, so novelty is a
            // successful delete.
            self.surprising_value_table.maybe_delete(row_col)?
        } else if col < self.window_offset + 8 {
            let row = (row_col >> 6) as usize;
            let old_bits = self.sliding_window[row];
            let new_bits = old_bits | (1 << (col - self.window_offset));
            self.sliding_window[row] = new_bits;
            new_bits != old_bits
        } else {
            // Late zone: ones are the surprise.
            self.surprising_value_table.maybe_insert(row_col)?
        };

        if is_novel {
            self.num_coupons += 1;
            self.update_hip(row_col);
            let c8_post = (self.num_coupons as u64) << 3;
            if c8_post >= (27 + w8) * k {
                self.move_window()?;
                let w8_post = (self.window_offset as u64) << 3;
                if !(1..=56).contains(&self.window_offset) || c8_post >= (27 + w8_post) * k {
                    return Err(Error::internal("window shift fell short"));
                }
            }
        }
        Ok(())
    }

    fn move_window(&mut self) -> Result<(), Error> {
        let new_offset = self.window_offset + 1;
        if new_offset > 56 || new_offset != determine_correct_offset(self.lg_k, self.num_coupons) {
            return Err(Error::internal("window shift to a wrong offset"));
        }

        let bit_matrix = self.build_bit_matrix();

        // Refresh the KXP register on every 8th shift to claw back the
        // mantissa bits the incremental subtraction has been losing.
        if new_offset & 0x7 == 0 {
            self.refresh_kxp(&bit_matrix);
        }

        self.surprising_value_table.clear(); // the new surprise count will be about the same

        let mask_for_clearing_window = !(0xFFu64 << new_offset);
        let mask_for_flipping_early_zone = (1u64 << new_offset) - 1;
        let mut all_surprises_ored = 0u64;

        for (row, &word) in bit_matrix.iter().enumerate() {
            let mut pattern = word;
            self.sliding_window[row] = ((pattern >> new_offset) & 0xff) as u8;
            pattern &= mask_for_clearing_window;
            // Convert surprising 0's to 1's in the early zone (and vice
            // versa), so one representation serves both zones; this is what
            // keeps the shift O(k) instead of O(C).
            pattern ^= mask_for_flipping_early_zone;
            all_surprises_ored |= pattern;
            while pattern != 0 {
                let col = pattern.trailing_zeros();
                pattern &= pattern - 1; // erase the 1
                let row_col = ((row as u32) << 6) | col;
                if !self.surprising_value_table.maybe_insert(row_col)? {
                    return Err(Error::internal("duplicate surprise during window shift"));
                }
            }
        }

        self.window_offset = new_offset;
        // The OR across all patterns bounds, cheaply, the lowest column that
        // can still receive a novel coupon.
        self.first_interesting_column = (all_surprises_ored.trailing_zeros() as u8).min(new_offset);
        Ok(())
    }

    /// The KXP register is a double with roughly 50 bits of precision, but
    /// it would need roughly 90 to track its value exactly. It is therefore
    /// recomputed from the full bit matrix periodically, picking up the
    /// changes that fell outside the mantissa.
    fn refresh_kxp(&mut self, bit_matrix: &[u64]) {
        // For numerical accuracy the eight byte positions are summed
        // separately and combined from the smallest scale up.
        let mut byte_sums = [0.0f64; 8];
        for &row in bit_matrix {
            let mut word = row;
            for sum in byte_sums.iter_mut() {
                *sum += KXP_BYTE_TABLE[(word & 0xff) as usize];
                word >>= 8;
            }
        }

        let mut total = 0.0;
        for j in (0..8).rev() {
            // the reverse order is important
            total += INVERSE_POWERS_OF_2[8 * j] * byte_sums[j];
        }
        self.kxp = total;
    }

    /// Reconstructs the full K x 64 bit matrix the sketch represents.
    pub(super) fn build_bit_matrix(&self) -> Vec<u64> {
        let k = 1usize << self.lg_k;
        let offset = self.window_offset;
        debug_assert!(offset <= 56);

        // Default rows have the early zone filled with ones; the surprising
        // values then flip the exceptions. This is what makes the routine
        // O(k) rather than O(C).
        let default_row = (1u64 << offset) - 1;
        let mut matrix = vec![default_row; k];
        if self.num_coupons == 0 {
            return matrix;
        }

        if !self.sliding_window.is_empty() {
            for (row, &bits) in self.sliding_window.iter().enumerate() {
                matrix[row] |= (bits as u64) << offset;
            }
        }

        for &row_col in self.surprising_value_table.slots() {
            if row_col != EMPTY_SLOT {
                let col = row_col & 63;
                let row = (row_col >> 6) as usize;
                // Early zone: flips 1 -> 0. Late zone: flips 0 -> 1.
                matrix[row] ^= 1u64 << col;
            }
        }
        matrix
    }

    /// Rebuilds the bit matrix and checks that its popcount equals the
    /// coupon count. Used by tests and after deserialization.
    pub fn validate(&self) -> bool {
        count_bits_set_in_matrix(&self.build_bit_matrix()) == self.num_coupons
    }
}

fn validate_kappa(kappa: u8) -> Result<(), Error> {
    if (1..=3).contains(&kappa) {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "kappa must be 1, 2 or 3; got {kappa}"
        )))
    }
}

fn row_col_from_two_hashes(h0: u64, h1: u64, lg_k: u8) -> u32 {
    let k = 1u64 << lg_k;
    let col = h1.leading_zeros().min(63); // clip so that 0 <= col <= 63
    let row = (h0 & (k - 1)) as u32;
    let mut row_col = (row << 6) | col;
    // To avoid the slot table's empty sentinel, move the following pair.
    // This case is extremely unlikely, but we might as well handle it.
    if row_col == u32::MAX {
        row_col ^= 1 << 6;
    }
    row_col
}

impl fmt::Display for CpcSketch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### CPC sketch summary:")?;
        writeln!(f, "   lg_k            : {}", self.lg_k)?;
        writeln!(f, "   seed hash       : {:x}", self.seed_hash)?;
        writeln!(f, "   C               : {}", self.num_coupons)?;
        writeln!(f, "   flavor          : {:?}", self.flavor())?;
        writeln!(f, "   merged          : {}", self.was_merged)?;
        if !self.was_merged {
            writeln!(f, "   HIP estimate    : {}", self.hip_est_accum)?;
            writeln!(f, "   kxp             : {}", self.kxp)?;
        }
        writeln!(f, "   interesting col : {}", self.first_interesting_column)?;
        writeln!(
            f,
            "   table entries   : {}",
            self.surprising_value_table.num_items()
        )?;
        let window = if self.sliding_window.is_empty() {
            "not allocated"
        } else {
            "allocated"
        };
        writeln!(f, "   window          : {window}")?;
        if !self.sliding_window.is_empty() {
            writeln!(f, "   window offset   : {}", self.window_offset)?;
        }
        write!(f, "### End sketch summary")
    }
}

const SERIAL_VERSION: u8 = 1;
const FAMILY: u8 = 16;
const FLAG_IS_COMPRESSED: u8 = 0;
const FLAG_HAS_HIP: u8 = 1;
const FLAG_HAS_TABLE: u8 = 2;
const FLAG_HAS_WINDOW: u8 = 3;

impl CpcSketch {
    /// Serializes the sketch into the compressed wire format.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let compressed = CompressedState::compress(self)?;
        let has_hip = !self.was_merged;
        let has_table = !compressed.table_data.is_empty();
        let has_window = !compressed.window_data.is_empty();
        let preamble_ints = make_preamble_ints(self.num_coupons, has_hip, has_table, has_window);

        let payload_words = compressed.table_data.len() + compressed.window_data.len();
        let mut bytes = SketchWriter::with_capacity((preamble_ints as usize + payload_words) * 4);
        bytes.write_u8(preamble_ints);
        bytes.write_u8(SERIAL_VERSION);
        bytes.write_u8(FAMILY);
        bytes.write_u8(self.lg_k);
        bytes.write_u8(self.first_interesting_column);
        let mut flags = 1 << FLAG_IS_COMPRESSED;
        if has_hip {
            flags |= 1 << FLAG_HAS_HIP;
        }
        if has_table {
            flags |= 1 << FLAG_HAS_TABLE;
        }
        if has_window {
            flags |= 1 << FLAG_HAS_WINDOW;
        }
        bytes.write_u8(flags);
        bytes.write_u16_le(self.seed_hash);

        if !self.is_empty() {
            bytes.write_u32_le(self.num_coupons);
            if has_table && has_window {
                // When there is no window the entry count equals the coupon
                // count, so it is only written when both streams exist.
                bytes.write_u32_le(compressed.table_num_entries);
                // The HIP registers appear in one of two positions; this is
                // the first HIP decision point.
                if has_hip {
                    self.write_hip(&mut bytes);
                }
            }
            if has_table {
                bytes.write_u32_le(compressed.table_data.len() as u32);
            }
            if has_window {
                bytes.write_u32_le(compressed.window_data.len() as u32);
            }
            // the second HIP decision point
            if has_hip && !(has_table && has_window) {
                self.write_hip(&mut bytes);
            }
            for &word in &compressed.window_data {
                bytes.write_u32_le(word);
            }
            for &word in &compressed.table_data {
                bytes.write_u32_le(word);
            }
        }
        Ok(bytes.into_bytes())
    }

    fn write_hip(&self, bytes: &mut SketchWriter) {
        bytes.write_f64_le(self.kxp);
        bytes.write_f64_le(self.hip_est_accum);
    }

    /// Deserializes a sketch serialized under the default seed.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        Self::deserialize_with_seed(bytes, DEFAULT_UPDATE_SEED)
    }

    /// Deserializes a sketch, verifying it was serialized under `seed`.
    pub fn deserialize_with_seed(bytes: &[u8], seed: u64) -> Result<Self, Error> {
        fn field(tag: &'static str) -> impl FnOnce(std::io::Error) -> Error {
            move |_| Error::insufficient_data(tag)
        }

        let mut cursor = SketchReader::new(bytes);
        let preamble_ints = cursor.read_u8().map_err(field("preamble_ints"))?;
        let serial_version = cursor.read_u8().map_err(field("serial_version"))?;
        let family_id = cursor.read_u8().map_err(field("family_id"))?;
        if family_id != FAMILY {
            return Err(Error::invalid_family(FAMILY, family_id));
        }
        if serial_version != SERIAL_VERSION {
            return Err(Error::unsupported_serial_version(
                SERIAL_VERSION,
                serial_version,
            ));
        }
        let lg_k = cursor.read_u8().map_err(field("lg_k"))?;
        if !(MIN_LG_K..=MAX_LG_K).contains(&lg_k) {
            return Err(Error::corruption(format!("lg_k out of range; got {lg_k}")));
        }
        let first_interesting_column = cursor
            .read_u8()
            .map_err(field("first_interesting_column"))?;
        let flags = cursor.read_u8().map_err(field("flags"))?;
        let seed_hash = cursor.read_u16_le().map_err(field("seed_hash"))?;

        if flags & (1 << FLAG_IS_COMPRESSED) == 0 {
            return Err(Error::corruption("only compressed sketches are supported"));
        }
        let has_hip = flags & (1 << FLAG_HAS_HIP) != 0;
        let has_table = flags & (1 << FLAG_HAS_TABLE) != 0;
        let has_window = flags & (1 << FLAG_HAS_WINDOW) != 0;

        let mut compressed = CompressedState::default();
        let mut num_coupons = 0u32;
        let mut kxp = 0.0f64;
        let mut hip_est_accum = 0.0f64;

        if has_table || has_window {
            num_coupons = cursor.read_u32_le().map_err(field("num_coupons"))?;
            if has_table && has_window {
                compressed.table_num_entries = cursor
                    .read_u32_le()
                    .map_err(field("table_num_entries"))?;
                if has_hip {
                    kxp = cursor.read_f64_le().map_err(field("kxp"))?;
                    hip_est_accum = cursor.read_f64_le().map_err(field("hip_est_accum"))?;
                }
            }
            let mut table_data_words = 0usize;
            let mut window_data_words = 0usize;
            if has_table {
                table_data_words =
                    cursor.read_u32_le().map_err(field("table_data_words"))? as usize;
            }
            if has_window {
                window_data_words =
                    cursor.read_u32_le().map_err(field("window_data_words"))? as usize;
            }
            if has_hip && !(has_table && has_window) {
                kxp = cursor.read_f64_le().map_err(field("kxp"))?;
                hip_est_accum = cursor.read_f64_le().map_err(field("hip_est_accum"))?;
            }
            for _ in 0..window_data_words {
                let word = cursor.read_u32_le().map_err(field("window_data"))?;
                compressed.window_data.push(word);
            }
            for _ in 0..table_data_words {
                let word = cursor.read_u32_le().map_err(field("table_data"))?;
                compressed.table_data.push(word);
            }
            if !has_window {
                compressed.table_num_entries = num_coupons;
            }
        }

        let expected_preamble_ints =
            make_preamble_ints(num_coupons, has_hip, has_table, has_window);
        if preamble_ints != expected_preamble_ints {
            return Err(Error::invalid_preamble_ints(
                expected_preamble_ints,
                preamble_ints,
            ));
        }
        let expected_seed_hash = compute_seed_hash(seed);
        if seed_hash != expected_seed_hash {
            return Err(Error::corruption(format!(
                "seed hash mismatch: expected {expected_seed_hash:#06x}, got {seed_hash:#06x}"
            )));
        }
        if cursor.remaining() != 0 {
            return Err(Error::corruption("serialized size mismatch"));
        }

        // Cross-checks between the flags and the coupon count.
        let k = 1u64 << lg_k;
        if num_coupons as u64 > 64 * k {
            return Err(Error::corruption("coupon count exceeds matrix capacity"));
        }
        let flags_consistent = match determine_flavor(lg_k, num_coupons) {
            Flavor::Empty => !has_table && !has_window,
            Flavor::Sparse | Flavor::Hybrid => has_table && !has_window,
            Flavor::Pinned | Flavor::Sliding => has_window,
        };
        if !flags_consistent {
            return Err(Error::corruption(
                "flags are inconsistent with the coupon count",
            ));
        }
        if compressed.table_num_entries > num_coupons {
            return Err(Error::corruption(
                "table entry count exceeds the coupon count",
            ));
        }
        let window_offset = determine_correct_offset(lg_k, num_coupons);
        if window_offset > 56 || first_interesting_column > window_offset {
            return Err(Error::corruption(
                "first interesting column is past the window",
            ));
        }

        let uncompressed = compressed.uncompress(lg_k, num_coupons)?;
        let sketch = CpcSketch {
            lg_k,
            seed,
            seed_hash,
            num_coupons,
            surprising_value_table: uncompressed.table,
            sliding_window: uncompressed.window,
            window_offset,
            first_interesting_column,
            was_merged: !has_hip,
            // An empty sketch comes back with its KXP register seeded to K.
            kxp: if num_coupons == 0 { k as f64 } else { kxp },
            hip_est_accum,
        };
        if !sketch.validate() {
            return Err(Error::corruption(
                "coupon count does not match the reconstructed bit matrix",
            ));
        }
        Ok(sketch)
    }
}

fn make_preamble_ints(num_coupons: u32, has_hip: bool, has_table: bool, has_window: bool) -> u8 {
    let mut preamble_ints = 2;
    if num_coupons > 0 {
        preamble_ints += 1; // number of coupons
        if has_hip {
            preamble_ints += 4; // kxp and hip_est_accum
        }
        if has_table {
            preamble_ints += 1; // table data length
            // the entry count is only present when the window is too
            if has_window {
                preamble_ints += 1;
            }
        }
        if has_window {
            preamble_ints += 1; // window data length
        }
    }
    preamble_ints
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_ints_decision_table() {
        assert_eq!(make_preamble_ints(0, true, false, false), 2);
        assert_eq!(make_preamble_ints(0, false, false, false), 2);
        // sparse / hybrid: table only
        assert_eq!(make_preamble_ints(10, false, true, false), 4);
        assert_eq!(make_preamble_ints(10, true, true, false), 8);
        // pinned / sliding with an empty table: window only
        assert_eq!(make_preamble_ints(10, false, false, true), 4);
        assert_eq!(make_preamble_ints(10, true, false, true), 8);
        // pinned / sliding with both streams
        assert_eq!(make_preamble_ints(10, false, true, true), 6);
        assert_eq!(make_preamble_ints(10, true, true, true), 10);
    }

    #[test]
    fn test_sentinel_collision_is_remapped() {
        // row = k - 1 at lg_k = 26 and col = 63 packs to the empty sentinel.
        let row_col = row_col_from_two_hashes(u64::MAX, 0, 26);
        assert_ne!(row_col, u32::MAX);
        assert_eq!(row_col, u32::MAX ^ (1 << 6));
    }

    #[test]
    fn test_hip_and_icon_agree() {
        let mut sketch = CpcSketch::new(8).unwrap();
        for value in 0u64..1000 {
            sketch.update_u64(value).unwrap();
        }
        let hip = sketch.estimate();
        let icon = icon_estimate(sketch.lg_k(), sketch.num_coupons());
        let rel = (hip - icon).abs() / icon;
        assert!(rel < 0.22, "hip {hip} vs icon {icon}");
    }

    #[test]
    fn test_kappa_validation() {
        let sketch = CpcSketch::new(11).unwrap();
        for kappa in [1, 2, 3] {
            assert!(sketch.lower_bound(kappa).is_ok());
            assert!(sketch.upper_bound(kappa).is_ok());
        }
        for kappa in [0, 4, 255] {
            assert!(sketch.lower_bound(kappa).is_err());
            assert!(sketch.upper_bound(kappa).is_err());
        }
    }
}
