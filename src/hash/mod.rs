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

mod murmurhash;

use std::hash::Hasher;

pub(crate) use self::murmurhash::MurmurHash3X64128;

/// The seed 9001 used in the sketch update methods is a prime number that was
/// chosen very early on in experimental testing.
///
/// Choosing a seed is somewhat arbitrary, and the author cannot prove that
/// this particular seed is somehow superior to other seeds. In order to
/// perform set operations on two sketches it is critical that the same hash
/// function and seed are identical for both sketches, otherwise the assumed
/// 1:1 relationship between the original source key value and the hashed bit
/// string would be violated. Once you have developed a history of stored
/// sketches you are stuck with it.
pub(crate) const DEFAULT_UPDATE_SEED: u64 = 9001;

/// A 16-bit digest of the 64-bit update seed.
///
/// Stored in the serialized envelope so that a sketch cannot silently be
/// deserialized under a different seed. Computed the same way as the sister
/// implementations: the seed's 8 little-endian bytes hashed with seed 0,
/// low 16 bits of h1.
pub(crate) fn compute_seed_hash(seed: u64) -> u16 {
    let mut hasher = MurmurHash3X64128::with_seed(0);
    hasher.write(&seed.to_le_bytes());
    let (h1, _) = hasher.finish128();
    (h1 & 0xffff) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_seed_hash() {
        // A zero digest is rejected at construction, so the default seed must
        // not produce one, and the digest must discriminate between seeds.
        assert_ne!(compute_seed_hash(DEFAULT_UPDATE_SEED), 0);
        assert_ne!(
            compute_seed_hash(DEFAULT_UPDATE_SEED),
            compute_seed_hash(DEFAULT_UPDATE_SEED + 1)
        );
    }
}
