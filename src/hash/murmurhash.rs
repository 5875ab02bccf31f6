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

use std::hash::Hasher;

use byteorder::ByteOrder;
use byteorder::LE;

const C1: u64 = 0x87c37b91114253d5;
const C2: u64 = 0x4cf5ad432745937f;

/// MurmurHash3 x64 128-bit variant.
///
/// A fast, non-cryptographic hash with excellent avalanche and 2-way bit
/// independence properties. Bit-compatible with the reference
/// `MurmurHash3_x64_128`, which every sister sketch implementation uses.
#[derive(Debug)]
pub(crate) struct MurmurHash3X64128 {
    h1: u64,
    h2: u64,
    /// Bytes consumed in full 16-byte blocks so far.
    processed: u64,
    /// Holds the trailing partial block between `write` calls.
    tail: [u8; 16],
    tail_len: usize,
}

impl MurmurHash3X64128 {
    pub fn with_seed(seed: u64) -> Self {
        MurmurHash3X64128 {
            h1: seed,
            h2: seed,
            processed: 0,
            tail: [0; 16],
            tail_len: 0,
        }
    }

    /// Finalizes the hash and returns both 64-bit halves.
    ///
    /// Does not consume the hasher; more input may be written afterwards,
    /// though the sketches never do.
    pub fn finish128(&self) -> (u64, u64) {
        let mut h1 = self.h1;
        let mut h2 = self.h2;
        let total = self.processed + self.tail_len as u64;

        if self.tail_len > 8 {
            let mut buf = [0u8; 8];
            buf[..self.tail_len - 8].copy_from_slice(&self.tail[8..self.tail_len]);
            h2 ^= mix_k2(u64::from_le_bytes(buf));
        }
        if self.tail_len > 0 {
            let mut buf = [0u8; 8];
            let len = self.tail_len.min(8);
            buf[..len].copy_from_slice(&self.tail[..len]);
            h1 ^= mix_k1(u64::from_le_bytes(buf));
        }

        h1 ^= total;
        h2 ^= total;
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);
        h1 = fmix64(h1);
        h2 = fmix64(h2);
        h1 = h1.wrapping_add(h2);
        h2 = h2.wrapping_add(h1);
        (h1, h2)
    }

    #[inline]
    fn consume_block(&mut self, k1: u64, k2: u64) {
        self.h1 ^= mix_k1(k1);
        self.h1 = self.h1.rotate_left(27);
        self.h1 = self.h1.wrapping_add(self.h2);
        self.h1 = self.h1.wrapping_mul(5).wrapping_add(0x52dce729);

        self.h2 ^= mix_k2(k2);
        self.h2 = self.h2.rotate_left(31);
        self.h2 = self.h2.wrapping_add(self.h1);
        self.h2 = self.h2.wrapping_mul(5).wrapping_add(0x38495ab5);

        self.processed += 16;
    }
}

impl Hasher for MurmurHash3X64128 {
    fn finish(&self) -> u64 {
        self.finish128().0
    }

    fn write(&mut self, mut bytes: &[u8]) {
        // Top up a pending partial block first.
        if self.tail_len > 0 {
            let wanted = 16 - self.tail_len;
            if bytes.len() < wanted {
                self.tail[self.tail_len..self.tail_len + bytes.len()].copy_from_slice(bytes);
                self.tail_len += bytes.len();
                return;
            }
            self.tail[self.tail_len..].copy_from_slice(&bytes[..wanted]);
            let k1 = LE::read_u64(&self.tail[0..8]);
            let k2 = LE::read_u64(&self.tail[8..16]);
            self.consume_block(k1, k2);
            self.tail_len = 0;
            bytes = &bytes[wanted..];
        }

        let mut chunks = bytes.chunks_exact(16);
        for chunk in &mut chunks {
            let k1 = LE::read_u64(&chunk[0..8]);
            let k2 = LE::read_u64(&chunk[8..16]);
            self.consume_block(k1, k2);
        }

        let rest = chunks.remainder();
        if !rest.is_empty() {
            self.tail[..rest.len()].copy_from_slice(rest);
            self.tail_len = rest.len();
        }
    }
}

#[inline]
fn mix_k1(k1: u64) -> u64 {
    k1.wrapping_mul(C1).rotate_left(31).wrapping_mul(C2)
}

#[inline]
fn mix_k2(k2: u64) -> u64 {
    k2.wrapping_mul(C2).rotate_left(33).wrapping_mul(C1)
}

/// Finalization mix: forces all bits of a hash block to avalanche.
#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51afd7ed558ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ceb9fe1a85ec53);
    k ^ (k >> 33)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn murmurhash3_x64_128(key: &[u8], seed: u64) -> (u64, u64) {
        let mut hasher = MurmurHash3X64128::with_seed(seed);
        hasher.write(key);
        hasher.finish128()
    }

    // Known-answer vectors from the reference implementation, covering each
    // tail length class.
    #[test]
    fn test_reference_vectors() {
        // remainder > 8
        let key = "The quick brown fox jumps over the lazy dog";
        let (h1, h2) = murmurhash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0xe34bbc7bbc071b6c);
        assert_eq!(h2, 0x7a433ca9c49a9347);

        // one changed bit
        let key = "The quick brown fox jumps over the lazy eog";
        let (h1, h2) = murmurhash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0x362108102c62d1c9);
        assert_eq!(h2, 0x3285cd100292b305);

        // remainder < 8
        let key = "The quick brown fox jumps over the lazy dogdogdog";
        let (h1, h2) = murmurhash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0x9c8205300e612fc4);
        assert_eq!(h2, 0xcbc0af6136aa3df9);

        // remainder == 8
        let key = "The quick brown fox jumps over the lazy1";
        let (h1, h2) = murmurhash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0xe3301a827e5cdfe3);
        assert_eq!(h2, 0xbdbf05f8da0f0392);

        // remainder == 0
        let key = "The quick brown fox jumps over t";
        let (h1, h2) = murmurhash3_x64_128(key.as_bytes(), 0);
        assert_eq!(h1, 0xdf6af91bb29bdacf);
        assert_eq!(h2, 0x91a341c58df1f3a6);
    }

    #[test]
    fn test_split_writes_match_single_write() {
        let key = b"The quick brown fox jumps over the lazy dog";
        let whole = murmurhash3_x64_128(key, 9001);
        for split in [1, 7, 8, 15, 16, 17] {
            let mut hasher = MurmurHash3X64128::with_seed(9001);
            hasher.write(&key[..split]);
            hasher.write(&key[split..]);
            assert_eq!(hasher.finish128(), whole, "split at {split}");
        }
    }
}
