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

//! Randomized checks of the sketch's universal invariants.

use cpc_sketch::cpc::CpcSketch;

#[test]
fn test_random_streams_always_validate() {
    for _ in 0..20 {
        let lg_k = rand::random_range(4u8..=12);
        let n = rand::random_range(1u64..8000);
        let mut sketch = CpcSketch::new(lg_k).unwrap();
        for _ in 0..n {
            sketch.update_u64(rand::random::<u64>()).unwrap();
        }
        assert!(sketch.validate(), "validate failed for lg_k {lg_k}, n {n}");
        let bytes = sketch.serialize().unwrap();
        let restored = CpcSketch::deserialize(&bytes).unwrap();
        assert_eq!(restored.num_coupons(), sketch.num_coupons());
        assert_eq!(restored.serialize().unwrap(), bytes);
    }
}

#[test]
fn test_multiset_equals_its_distinct_support() {
    // A sketch over a multiset must be indistinguishable from a sketch over
    // the multiset's distinct values, because a duplicate can never produce
    // a novel coupon.
    let lg_k = 7;
    let pool: Vec<u64> = (0..500).map(|_| rand::random::<u64>()).collect();

    let mut multiset = CpcSketch::new(lg_k).unwrap();
    let mut seen = std::collections::HashSet::new();
    let mut support = CpcSketch::new(lg_k).unwrap();
    for _ in 0..10_000 {
        let value = pool[rand::random_range(0..pool.len())];
        multiset.update_u64(value).unwrap();
        if seen.insert(value) {
            support.update_u64(value).unwrap();
        }
    }

    assert_eq!(multiset.num_coupons(), support.num_coupons());
    assert_eq!(multiset.serialize().unwrap(), support.serialize().unwrap());
}
