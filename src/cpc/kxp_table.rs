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

use crate::common::inv_pow2::INVERSE_POWERS_OF_2;

/// `KXP_BYTE_TABLE[b] == sum over the ZERO bits i of b of 2^-(i+1)`.
///
/// The KXP register is `sum over rows of (1 - sum over set columns c of
/// 2^-(c+1))`, which is exactly the unset-bit weight of each row (to within
/// 2^-64 per row). The refresh sums it a byte at a time through this table.
/// Each entry is a sum of distinct dyadics no finer than 2^-8, so the const
/// evaluation is exact.
pub(super) const KXP_BYTE_TABLE: [f64; 256] = {
    let mut table = [0.0f64; 256];
    let mut byte = 0;
    while byte < table.len() {
        let mut sum = 0.0f64;
        let mut bit = 0;
        while bit < 8 {
            if byte & (1 << bit) == 0 {
                sum += INVERSE_POWERS_OF_2[bit + 1];
            }
            bit += 1;
        }
        table[byte] = sum;
        byte += 1;
    }
    table
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spot_values() {
        assert_eq!(KXP_BYTE_TABLE[0x00], 255.0 / 256.0);
        assert_eq!(KXP_BYTE_TABLE[0x01], 255.0 / 256.0 - 0.5);
        assert_eq!(KXP_BYTE_TABLE[0x80], 127.0 / 128.0);
        assert_eq!(KXP_BYTE_TABLE[0xff], 0.0);
    }

    #[test]
    fn test_complement_pairs_sum_to_full_byte_weight() {
        for byte in 0..=255usize {
            let total = KXP_BYTE_TABLE[byte] + KXP_BYTE_TABLE[byte ^ 0xff];
            assert_eq!(total, 255.0 / 256.0, "byte {byte:#04x}");
        }
    }
}
