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

//! Helpers shared across the crate.

pub(crate) mod inv_pow2;

/// Canonicalize a double before hashing, for compatibility with sketches
/// built by the Java implementation.
pub(crate) fn canonical_double(value: f64) -> u64 {
    if value.is_nan() {
        // Java's Double.doubleToLongBits() NaN value
        0x7ff8000000000000u64
    } else {
        // -0.0 + 0.0 == +0.0 under IEEE754 roundTiesToEven rounding mode,
        // which Rust guarantees. Adding a positive zero therefore
        // canonicalizes signed zero without a branch.
        (value + 0.0).to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_double() {
        assert_eq!(canonical_double(0.0), canonical_double(-0.0));
        assert_eq!(canonical_double(f64::NAN), 0x7ff8000000000000u64);
        assert_eq!(canonical_double(1.5), 1.5f64.to_bits());
    }
}
