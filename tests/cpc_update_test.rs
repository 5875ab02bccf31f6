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

use cpc_sketch::cpc::CpcSketch;
use cpc_sketch::cpc::Flavor;
use cpc_sketch::error::ErrorKind;
use googletest::assert_that;
use googletest::prelude::ge;
use googletest::prelude::le;
use googletest::prelude::near;

#[test]
fn test_empty() {
    let sketch = CpcSketch::new(11).unwrap();
    assert!(sketch.is_empty());
    assert_eq!(sketch.num_coupons(), 0);
    assert_eq!(sketch.flavor(), Flavor::Empty);
    assert_eq!(sketch.estimate(), 0.0);
    assert_eq!(sketch.lower_bound(1).unwrap(), 0.0);
    assert_eq!(sketch.upper_bound(1).unwrap(), 0.0);
    assert!(sketch.validate());
}

#[test]
fn test_one_value() {
    let mut sketch = CpcSketch::new(11).unwrap();
    sketch.update_u64(1).unwrap();
    assert!(!sketch.is_empty());
    assert_eq!(sketch.num_coupons(), 1);
    assert_eq!(sketch.flavor(), Flavor::Sparse);
    assert_eq!(sketch.estimate(), 1.0);
    assert!(sketch.validate());
}

#[test]
fn test_hundred_values_stays_sparse() {
    let mut sketch = CpcSketch::new(11).unwrap();
    for value in 1u64..=100 {
        sketch.update_u64(value).unwrap();
    }
    assert_eq!(sketch.flavor(), Flavor::Sparse);
    // Coupon collisions are rare this far below k, so C is close to n.
    assert!(sketch.num_coupons() >= 95 && sketch.num_coupons() <= 100);
    assert_that!(sketch.estimate(), near(100.0, 5.0));
    assert!(sketch.validate());
}

#[test]
fn test_many_values() {
    let n = 10_000u64;
    let mut sketch = CpcSketch::new(11).unwrap();
    for value in 0..n {
        sketch.update_u64(value).unwrap();
    }
    assert!(!sketch.is_empty());
    assert_that!(sketch.estimate(), near(n as f64, 0.05 * n as f64));
    assert_that!(sketch.estimate(), ge(sketch.lower_bound(1).unwrap()));
    assert_that!(sketch.estimate(), le(sketch.upper_bound(1).unwrap()));
    assert!(sketch.validate());
}

#[test]
fn test_flavor_progression() {
    let mut sketch = CpcSketch::new(6).unwrap();
    let mut last_flavor = Flavor::Empty;
    for value in 0u64..5000 {
        sketch.update_u64(value).unwrap();
        let flavor = sketch.flavor();
        assert!(flavor >= last_flavor, "flavor regressed to {flavor:?}");
        last_flavor = flavor;
        if value % 250 == 0 {
            assert!(sketch.validate(), "validate failed at value {value}");
        }
    }
    assert_eq!(last_flavor, Flavor::Sliding);
    assert!(sketch.validate());
}

#[test]
fn test_lg_k_4_promotion_corner() {
    // The smallest k overshoots the sparse boundary instead of landing on it.
    let mut sketch = CpcSketch::new(4).unwrap();
    for value in 1u64..=100 {
        sketch.update_u64(value).unwrap();
        assert!(sketch.validate(), "validate failed at value {value}");
    }
    assert!(sketch.flavor() >= Flavor::Pinned);
}

#[test]
fn test_duplicates_do_not_change_state() {
    let mut once = CpcSketch::new(10).unwrap();
    let mut twice = CpcSketch::new(10).unwrap();
    for value in 0u64..3000 {
        once.update_u64(value).unwrap();
        twice.update_u64(value).unwrap();
        twice.update_u64(value).unwrap();
    }
    assert_eq!(once.num_coupons(), twice.num_coupons());
    assert_eq!(once.estimate(), twice.estimate());
    assert_eq!(once.serialize().unwrap(), twice.serialize().unwrap());
}

#[test]
fn test_update_encodings() {
    let mut a = CpcSketch::new(11).unwrap();
    let mut b = CpcSketch::new(11).unwrap();
    a.update_str("distinct counting").unwrap();
    b.update_bytes(b"distinct counting").unwrap();
    assert_eq!(a.serialize().unwrap(), b.serialize().unwrap());

    // An empty byte buffer is a no-op, not an error.
    a.update_bytes(&[]).unwrap();
    assert_eq!(a.serialize().unwrap(), b.serialize().unwrap());
}

#[test]
fn test_bounds_bracket_estimate_and_tighten() {
    let mut sketch = CpcSketch::new(9).unwrap();
    for value in 0u64..2000 {
        sketch.update_u64(value).unwrap();
    }
    let est = sketch.estimate();
    let mut last_lb = f64::NEG_INFINITY;
    let mut last_ub = f64::INFINITY;
    for kappa in (1u8..=3).rev() {
        let lb = sketch.lower_bound(kappa).unwrap();
        let ub = sketch.upper_bound(kappa).unwrap();
        assert!(lb <= est && est <= ub, "kappa {kappa}: {lb} {est} {ub}");
        // Bounds are monotone in kappa: smaller kappa, tighter interval.
        assert!(lb >= last_lb && ub <= last_ub);
        last_lb = lb;
        last_ub = ub;
    }
}

#[test]
fn test_invalid_arguments() {
    assert_eq!(
        CpcSketch::new(3).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        CpcSketch::new(27).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );

    let sketch = CpcSketch::new(11).unwrap();
    assert_eq!(
        sketch.lower_bound(0).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        sketch.upper_bound(4).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn test_display_summary() {
    let mut sketch = CpcSketch::new(8).unwrap();
    for value in 0u64..50 {
        sketch.update_u64(value).unwrap();
    }
    let summary = sketch.to_string();
    assert!(summary.contains("CPC sketch summary"));
    assert!(summary.contains("lg_k"));
    assert!(summary.contains("flavor"));
}
