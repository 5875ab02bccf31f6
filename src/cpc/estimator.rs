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

//! The ICON estimator and the HIP/ICON confidence bounds.
//!
//! ICON treats the coupon count as the observed value of the expected-coupon
//! curve `E[C](n) = sum over columns j of K * (1 - (1 - q_j)^n)` with
//! `q_j = 2^-(j+1) / K`, and returns the `n` at which the curve attains `C`.
//! The curve is strictly increasing in `n`, so the inverse is found by
//! doubling followed by bisection; the result is a pure, monotone function
//! of `(lg_k, C)` and needs no update history, which is what lets it survive
//! merging.

use crate::common::inv_pow2::INVERSE_POWERS_OF_2;

/// Asymptotic relative error constant of the ICON estimator, ln 2.
const ICON_ERROR_CONSTANT: f64 = std::f64::consts::LN_2;

/// Asymptotic relative error constant of the HIP estimator, sqrt(ln 2 / 2).
#[allow(clippy::excessive_precision)]
const HIP_ERROR_CONSTANT: f64 = 0.5887050112577373;

/// Expected number of collected coupons after `n` distinct updates.
fn expected_coupons(lg_k: u8, n: f64) -> f64 {
    let k = (1u64 << lg_k) as f64;
    let mut sum = 0.0;
    for col in 0..64usize {
        // P(a given update lands on a given row/column bit); the last column
        // also absorbs the clamped tail of the leading-zero distribution.
        let q = if col < 63 {
            INVERSE_POWERS_OF_2[col + 1] / k
        } else {
            INVERSE_POWERS_OF_2[63] / k
        };
        // (1 - q)^n, computed in log space to stay accurate for tiny q
        sum += 1.0 - (n * (-q).ln_1p()).exp();
    }
    k * sum
}

/// The ICON estimate for a sketch with the given coupon count.
pub(super) fn icon_estimate(lg_k: u8, num_coupons: u32) -> f64 {
    if num_coupons == 0 {
        return 0.0;
    }
    if num_coupons == 1 {
        return 1.0;
    }
    let c = num_coupons as f64;

    // Bracket the root: E[C](n) <= n, so c is a lower bound.
    let mut lo = c;
    let mut hi = c;
    while expected_coupons(lg_k, hi) < c {
        lo = hi;
        hi *= 2.0;
        if hi > 1e300 {
            break;
        }
    }

    for _ in 0..64 {
        let mid = 0.5 * (lo + hi);
        if expected_coupons(lg_k, mid) < c {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let result = 0.5 * (lo + hi);
    if result < c { c } else { result }
}

pub(super) fn icon_confidence_lb(lg_k: u8, num_coupons: u32, kappa: u8) -> f64 {
    if num_coupons == 0 {
        return 0.0;
    }
    let eps = relative_eps(lg_k, kappa, ICON_ERROR_CONSTANT);
    let result = icon_estimate(lg_k, num_coupons) / (1.0 + eps);
    result.max(num_coupons as f64)
}

pub(super) fn icon_confidence_ub(lg_k: u8, num_coupons: u32, kappa: u8) -> f64 {
    if num_coupons == 0 {
        return 0.0;
    }
    let eps = relative_eps(lg_k, kappa, ICON_ERROR_CONSTANT);
    icon_estimate(lg_k, num_coupons) / (1.0 - eps)
}

pub(super) fn hip_confidence_lb(lg_k: u8, num_coupons: u32, hip_est_accum: f64, kappa: u8) -> f64 {
    if num_coupons == 0 {
        return 0.0;
    }
    let eps = relative_eps(lg_k, kappa, HIP_ERROR_CONSTANT);
    let result = hip_est_accum / (1.0 + eps);
    result.max(num_coupons as f64)
}

pub(super) fn hip_confidence_ub(lg_k: u8, num_coupons: u32, hip_est_accum: f64, kappa: u8) -> f64 {
    if num_coupons == 0 {
        return 0.0;
    }
    let eps = relative_eps(lg_k, kappa, HIP_ERROR_CONSTANT);
    hip_est_accum / (1.0 - eps)
}

fn relative_eps(lg_k: u8, kappa: u8, constant: f64) -> f64 {
    debug_assert!((1..=3).contains(&kappa));
    let k = (1u64 << lg_k) as f64;
    kappa as f64 * constant / k.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_points() {
        assert_eq!(icon_estimate(11, 0), 0.0);
        assert_eq!(icon_estimate(11, 1), 1.0);
    }

    #[test]
    fn test_never_below_coupon_count() {
        for c in [2u32, 10, 100, 1000, 10000] {
            assert!(icon_estimate(11, c) >= c as f64);
        }
    }

    #[test]
    fn test_monotone_in_coupons() {
        let mut prev = 0.0;
        for c in (0..5000).step_by(37) {
            let est = icon_estimate(8, c);
            assert!(est >= prev, "c={c}: {est} < {prev}");
            prev = est;
        }
    }

    #[test]
    fn test_inversion_consistency() {
        for lg_k in [4u8, 8, 11, 16] {
            let k = 1u32 << lg_k;
            for c in [k / 8, k / 2, k, 3 * k, 6 * k] {
                let n = icon_estimate(lg_k, c);
                let back = expected_coupons(lg_k, n);
                let rel = (back - c as f64).abs() / c as f64;
                assert!(rel < 1e-9, "lg_k={lg_k} c={c}: E({n}) = {back}");
            }
        }
    }

    #[test]
    fn test_sparse_region_tracks_n() {
        // Far below k the estimator is close to the identity.
        let est = icon_estimate(11, 100);
        assert!((est - 100.0).abs() < 5.0, "estimate = {est}");
    }
}
