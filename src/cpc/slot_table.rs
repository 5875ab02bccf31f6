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

use crate::error::Error;

/// Sentinel marking an unoccupied slot; never a legal `row_col` code.
pub(super) const EMPTY_SLOT: u32 = u32::MAX;

/// An open-addressed set of 32-bit `row_col` codes.
///
/// Linear probing starts at the slot named by the code's high bits. The
/// capacity is a power of two, growing when occupancy passes 3/4 and
/// shrinking once it falls under 1/4, never below four slots. Deletion uses
/// backward shifting, so no tombstones exist and every probe run stays
/// contiguous.
#[derive(Debug, Clone)]
pub(super) struct SlotTable {
    /// Number of significant low bits in a stored code (6 + lg_k).
    num_valid_bits: u8,
    num_items: u32,
    /// Length is `2^lg_size`; invariant: at least one slot is always empty.
    slots: Vec<u32>,
}

/// Where a probe for a code came to rest.
enum Probe {
    Found(usize),
    Vacant(usize),
}

impl SlotTable {
    pub fn new(lg_size: u8, num_valid_bits: u8) -> Self {
        debug_assert!((2..=26).contains(&lg_size));
        debug_assert!(((lg_size + 1)..=32).contains(&num_valid_bits));
        Self {
            num_valid_bits,
            num_items: 0,
            slots: vec![EMPTY_SLOT; 1 << lg_size],
        }
    }

    /// Rebuilds a table from decompressed pairs, sized for its final
    /// population up front.
    ///
    /// Returns `Corruption` if the pairs contain a duplicate, which a valid
    /// payload can never produce.
    pub fn from_pairs(lg_k: u8, pairs: Vec<u32>) -> Result<Self, Error> {
        // Smallest power of two keeping the final load at or below 3/4.
        let needed = (pairs.len() as u64 * 4).div_ceil(3).next_power_of_two();
        let lg_size = (needed.trailing_zeros() as u8).max(2);
        if lg_size + 1 > 6 + lg_k {
            return Err(Error::corruption("pair count exceeds the table universe")
                .with_context("pairs", pairs.len()));
        }
        let mut table = Self::new(lg_size, 6 + lg_k);
        for pair in pairs {
            if !table.maybe_insert(pair)? {
                return Err(Error::corruption("duplicate pair in compressed table"));
            }
        }
        Ok(table)
    }

    pub fn num_items(&self) -> u32 {
        self.num_items
    }

    pub fn lg_size(&self) -> u8 {
        self.slots.len().trailing_zeros() as u8
    }

    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    pub fn clear(&mut self) {
        self.slots.fill(EMPTY_SLOT);
        self.num_items = 0;
    }

    /// Inserts the code, growing if needed. Returns `true` iff the code was
    /// not already present.
    pub fn maybe_insert(&mut self, code: u32) -> Result<bool, Error> {
        match self.probe(code) {
            Probe::Found(_) => Ok(false),
            Probe::Vacant(slot) => {
                self.slots[slot] = code;
                self.num_items += 1;
                // One doubling is always enough to get back under 3/4.
                if 4 * self.num_items as u64 > 3 * self.slots.len() as u64 {
                    self.resize(self.lg_size() + 1)?;
                }
                Ok(true)
            }
        }
    }

    /// Removes the code if present, shrinking if occupancy allows. Returns
    /// `true` iff the code was present.
    pub fn maybe_delete(&mut self, code: u32) -> Result<bool, Error> {
        let mut hole = match self.probe(code) {
            Probe::Vacant(_) => return Ok(false),
            Probe::Found(slot) => slot,
        };
        if self.num_items == 0 {
            return Err(Error::internal("slot table holds a code but counts none"));
        }

        // Backward shifting: walk the rest of the probe run and pull each
        // entry into the hole whenever its home slot can still reach it
        // there, leaving the run contiguous with no tombstone.
        let mask = self.slots.len() - 1;
        let mut scan = (hole + 1) & mask;
        while self.slots[scan] != EMPTY_SLOT {
            let home = self.home_slot(self.slots[scan]);
            // Movable iff the home lies cyclically at or before the hole,
            // measured against the scan position.
            if scan.wrapping_sub(home) & mask >= scan.wrapping_sub(hole) & mask {
                self.slots[hole] = self.slots[scan];
                hole = scan;
            }
            scan = (scan + 1) & mask;
        }
        self.slots[hole] = EMPTY_SLOT;
        self.num_items -= 1;

        // Shrink straight to the smallest capacity the load bounds allow,
        // rather than halving one step at a time.
        let mut target = self.lg_size();
        while target > 2 && (self.num_items as u64) * 4 < (1u64 << target) {
            target -= 1;
        }
        if target != self.lg_size() {
            self.resize(target)?;
        }
        Ok(true)
    }

    /// Extracts the live codes in near-sorted order.
    ///
    /// A probe run that covers the start of the table may contain entries
    /// that wrapped around from the end; those carry the high bit and are
    /// held back and appended last so the output needs only local fixups.
    /// Pair it with [`sort_nearly_sorted`].
    pub fn extract_pairs(&self) -> Vec<u32> {
        let mut result = Vec::with_capacity(self.num_items as usize);
        let mut wrapped = Vec::new();
        let hi_bit = 1u32 << (self.num_valid_bits - 1);
        let mut in_leading_run = true;
        for &slot in &self.slots {
            if slot == EMPTY_SLOT {
                in_leading_run = false;
            } else if in_leading_run && slot & hi_bit != 0 {
                wrapped.push(slot);
            } else {
                result.push(slot);
            }
        }
        result.append(&mut wrapped);
        result
    }

    /// The slot a code's probe sequence begins at: its high bits, which are
    /// the low bits of the row.
    fn home_slot(&self, code: u32) -> usize {
        let shift = self.num_valid_bits - self.lg_size();
        (code >> shift) as usize & (self.slots.len() - 1)
    }

    fn probe(&self, code: u32) -> Probe {
        let mask = self.slots.len() - 1;
        let mut slot = self.home_slot(code);
        loop {
            match self.slots[slot] {
                EMPTY_SLOT => return Probe::Vacant(slot),
                occupant if occupant == code => return Probe::Found(slot),
                _ => slot = (slot + 1) & mask,
            }
        }
    }

    fn resize(&mut self, lg_size: u8) -> Result<(), Error> {
        if !(2..=26).contains(&lg_size)
            || lg_size + 1 > self.num_valid_bits
            || (1u64 << lg_size) <= self.num_items as u64
        {
            return Err(Error::internal("slot table resize target is invalid")
                .with_context("lg_size", lg_size));
        }
        let old = std::mem::replace(&mut self.slots, vec![EMPTY_SLOT; 1 << lg_size]);
        for code in old {
            if code == EMPTY_SLOT {
                continue;
            }
            match self.probe(code) {
                Probe::Vacant(slot) => self.slots[slot] = code,
                Probe::Found(_) => {
                    return Err(Error::internal("duplicate code while resizing"));
                }
            }
        }
        Ok(())
    }
}

/// Sorts the near-sorted output of [`SlotTable::extract_pairs`] in close to
/// linear time.
///
/// Each element gets shifted down to its place in the sorted prefix, paying
/// out of a shared displacement budget of eight slots per element. Input
/// that is not actually near-sorted exhausts the budget, at which point the
/// whole slice is handed to the standard sort instead of going quadratic.
pub(super) fn sort_nearly_sorted(pairs: &mut [u32]) {
    let mut budget = 8 * pairs.len();
    for i in 1..pairs.len() {
        let value = pairs[i];
        let dest = pairs[..i]
            .iter()
            .rposition(|&sorted| sorted <= value)
            .map_or(0, |pos| pos + 1);
        pairs.copy_within(dest..i, dest + 1);
        pairs[dest] = value;
        match budget.checked_sub(i - dest) {
            Some(rest) => budget = rest,
            None => {
                pairs.sort_unstable();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_insert_delete_against_mirror() {
        let mut table = SlotTable::new(2, 6 + 10);
        let mut mirror = HashSet::new();
        for round in 0..2000u32 {
            let code = rand::random_range(0..(1u32 << 10)) << 6 | (round % 64);
            if round % 3 == 0 {
                let removed = table.maybe_delete(code).unwrap();
                assert_eq!(removed, mirror.remove(&code));
            } else {
                let novel = table.maybe_insert(code).unwrap();
                assert_eq!(novel, mirror.insert(code));
            }
            assert_eq!(table.num_items() as usize, mirror.len());
        }
        let extracted: HashSet<u32> = table.extract_pairs().into_iter().collect();
        assert_eq!(extracted, mirror);
    }

    #[test]
    fn test_delete_keeps_probe_runs_reachable() {
        // Codes sharing a home slot form one long run; deleting from the
        // middle must not strand the entries behind the hole.
        let mut table = SlotTable::new(4, 16);
        let colliding: Vec<u32> = (0..8).map(|i| (1 << 12) | i).collect();
        for &code in &colliding {
            assert!(table.maybe_insert(code).unwrap());
        }
        assert!(table.maybe_delete(colliding[2]).unwrap());
        assert!(table.maybe_delete(colliding[5]).unwrap());
        for (i, &code) in colliding.iter().enumerate() {
            let expected_present = i != 2 && i != 5;
            // a second insert reports novel only if the code went missing
            assert_eq!(table.maybe_insert(code).unwrap(), !expected_present, "code {i}");
        }
    }

    #[test]
    fn test_shrinks_back_down() {
        let mut table = SlotTable::new(2, 16);
        for code in 0..512u32 {
            assert!(table.maybe_insert(code).unwrap());
        }
        for code in 0..512u32 {
            assert!(table.maybe_delete(code).unwrap());
        }
        assert_eq!(table.num_items(), 0);
        assert_eq!(table.lg_size(), 2);
        assert_eq!(table.slots().len(), 4);
    }

    #[test]
    fn test_sort_random() {
        let data = (0..100)
            .map(|_| rand::random_range(0..10000u32))
            .collect::<Vec<_>>();
        let mut sorted = data.clone();
        sort_nearly_sorted(&mut sorted);
        assert!(sorted.is_sorted(), "origin={data:?}, sorted={sorted:?}");
    }

    #[test]
    fn test_sort_reversed_falls_back() {
        let len = 300u32;
        let data = (0..len).map(|i| len - i).collect::<Vec<_>>();
        let mut sorted = data.clone();
        sort_nearly_sorted(&mut sorted);
        assert!(sorted.is_sorted());
    }
}
