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

//! Compressed Probabilistic Counting sketch.
//!
//! This is a unique-counting sketch that implements the Compressed
//! Probabilistic Counting (CPC, a.k.a. FM85) algorithms developed by Kevin
//! Lang in his paper [Back to the Future: an Even More Nearly Optimal
//! Cardinality Estimation Algorithm](https://arxiv.org/abs/1708.06839).
//!
//! This sketch is extremely space-efficient when serialized. In an
//! apples-to-apples empirical comparison against compressed HyperLogLog
//! sketches it simultaneously wins on the two dimensions of the
//! space/accuracy tradeoff and produces sketches that are smaller than the
//! entropy of HLL. The sketch maintains two estimators: the Historical
//! Inverse Probability (HIP) estimator, which is more accurate but is
//! invalidated by merging, and the ICON estimator, which is a pure function
//! of the coupon count and therefore survives set operations.
//!
//! For additional security the sketch can be configured with a
//! user-specified hash seed.

mod compressor;
mod estimator;
mod kxp_table;
mod sketch;
mod slot_table;

pub use self::sketch::CpcSketch;

/// Default log2 of K.
pub const DEFAULT_LG_K: u8 = 11;
/// Min log2 of K.
pub(crate) const MIN_LG_K: u8 = 4;
/// Max log2 of K.
pub(crate) const MAX_LG_K: u8 = 26;

/// The population regime a sketch is currently in, determined by `lg_k` and
/// the coupon count.
///
/// The flavor is derived state: it is never stored, and it changes only when
/// the coupon count crosses one of the boundaries below (`K = 2^lg_k`).
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub enum Flavor {
    /// No coupons collected yet.
    Empty,
    /// `1 <= C < 3K/32`: coupons live in the surprising-value table only.
    Sparse,
    /// `3K/32 <= C < K/2`: window allocated at offset 0, table still carries
    /// the high columns.
    Hybrid,
    /// `K/2 <= C < 27K/8`: window pinned at offset 0, table carries
    /// surprising ones above it.
    Pinned,
    /// `27K/8 <= C`: the window slides; the table carries surprising zeros
    /// below it and surprising ones above it.
    Sliding,
}

pub(crate) fn determine_flavor(lg_k: u8, num_coupons: u32) -> Flavor {
    let k = 1u64 << lg_k;
    let c = num_coupons as u64;
    if c == 0 {
        Flavor::Empty
    } else if c << 5 < 3 * k {
        Flavor::Sparse
    } else if c << 1 < k {
        Flavor::Hybrid
    } else if c << 3 < 27 * k {
        Flavor::Pinned
    } else {
        Flavor::Sliding
    }
}

/// The window offset implied by the coupon count: `(8C - 19K) / 8K`,
/// clamped at zero. Always in `[0, 56]` for any reachable coupon count.
pub(crate) fn determine_correct_offset(lg_k: u8, num_coupons: u32) -> u8 {
    let k = 1i64 << lg_k;
    let tmp = ((num_coupons as i64) << 3) - 19 * k; // 8C - 19K
    if tmp < 0 {
        0
    } else {
        (tmp >> (lg_k + 3)) as u8 // tmp / 8K
    }
}

pub(crate) fn count_bits_set_in_matrix(matrix: &[u64]) -> u32 {
    matrix.iter().map(|word| word.count_ones()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flavor_boundaries() {
        let lg_k = 10; // k = 1024
        assert_eq!(determine_flavor(lg_k, 0), Flavor::Empty);
        assert_eq!(determine_flavor(lg_k, 1), Flavor::Sparse);
        assert_eq!(determine_flavor(lg_k, 95), Flavor::Sparse); // 3K/32 = 96
        assert_eq!(determine_flavor(lg_k, 96), Flavor::Hybrid);
        assert_eq!(determine_flavor(lg_k, 511), Flavor::Hybrid); // K/2 = 512
        assert_eq!(determine_flavor(lg_k, 512), Flavor::Pinned);
        assert_eq!(determine_flavor(lg_k, 3455), Flavor::Pinned); // 27K/8 = 3456
        assert_eq!(determine_flavor(lg_k, 3456), Flavor::Sliding);
    }

    #[test]
    fn test_offset_tracks_coupon_count() {
        let lg_k = 10;
        let k = 1u32 << lg_k;
        assert_eq!(determine_correct_offset(lg_k, 0), 0);
        assert_eq!(determine_correct_offset(lg_k, 2 * k), 0); // 8C < 19K
        // At C = 19K/8 the offset formula crosses zero.
        assert_eq!(determine_correct_offset(lg_k, (19 * k) / 8), 0);
        assert_eq!(determine_correct_offset(lg_k, (27 * k) / 8), 1);
        assert_eq!(determine_correct_offset(lg_k, (35 * k) / 8), 2);
    }
}
