// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A fixed-size index allocator.
//!
//! A set bit marks a free index, so both the lowest and the highest
//! free index can be found a word at a time. Bits past the end of the
//! pool are always clear.

use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;

const WORD_BITS: u32 = u64::BITS;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BitPoolError {
    /// Every index is in use.
    Empty,
    OutOfRange(u32),
    /// `alloc_at()` of an index already in use.
    Taken(u32),
    DoubleFree(u32),
}

impl Display for BitPoolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "no free index"),
            Self::OutOfRange(idx) => write!(f, "index {idx} out of range"),
            Self::Taken(idx) => write!(f, "index {idx} already in use"),
            Self::DoubleFree(idx) => write!(f, "index {idx} already free"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BitPool {
    size: u32,
    free: u32,
    words: Vec<u64>,
}

impl BitPool {
    /// Create a pool of `size` indices, all free or all in use.
    pub fn new(size: u32, all_free: bool) -> Self {
        let nwords = size.div_ceil(WORD_BITS) as usize;
        let words = (0..nwords)
            .map(|i| if all_free { Self::valid_bits(size, i) } else { 0 })
            .collect();

        Self { size, free: if all_free { size } else { 0 }, words }
    }

    // The bits of word `i` that map to an index below `size`.
    fn valid_bits(size: u32, i: usize) -> u64 {
        let rem = size - i as u32 * WORD_BITS;
        if rem >= WORD_BITS { u64::MAX } else { (1u64 << rem) - 1 }
    }

    fn locate(&self, idx: u32) -> Result<(usize, u64), BitPoolError> {
        if idx >= self.size {
            return Err(BitPoolError::OutOfRange(idx));
        }

        Ok(((idx / WORD_BITS) as usize, 1u64 << (idx % WORD_BITS)))
    }

    /// Allocate the lowest free index.
    pub fn alloc(&mut self) -> Result<u32, BitPoolError> {
        let i = self
            .words
            .iter()
            .position(|w| *w != 0)
            .ok_or(BitPoolError::Empty)?;
        let bit = self.words[i].trailing_zeros();
        self.words[i] &= !(1u64 << bit);
        self.free -= 1;
        Ok(i as u32 * WORD_BITS + bit)
    }

    /// Allocate the highest free index.
    pub fn alloc_reverse(&mut self) -> Result<u32, BitPoolError> {
        let i = self
            .words
            .iter()
            .rposition(|w| *w != 0)
            .ok_or(BitPoolError::Empty)?;
        let bit = WORD_BITS - 1 - self.words[i].leading_zeros();
        self.words[i] &= !(1u64 << bit);
        self.free -= 1;
        Ok(i as u32 * WORD_BITS + bit)
    }

    /// Allocate exactly `idx`.
    pub fn alloc_at(&mut self, idx: u32) -> Result<u32, BitPoolError> {
        let (i, mask) = self.locate(idx)?;
        if self.words[i] & mask == 0 {
            return Err(BitPoolError::Taken(idx));
        }

        self.words[i] &= !mask;
        self.free -= 1;
        Ok(idx)
    }

    pub fn free(&mut self, idx: u32) -> Result<(), BitPoolError> {
        let (i, mask) = self.locate(idx)?;
        if self.words[i] & mask != 0 {
            return Err(BitPoolError::DoubleFree(idx));
        }

        self.words[i] |= mask;
        self.free += 1;
        Ok(())
    }

    pub fn is_in_use(&self, idx: u32) -> bool {
        match self.locate(idx) {
            Ok((i, mask)) => self.words[i] & mask == 0,
            Err(_) => false,
        }
    }

    /// Find the lowest in-use index at or above `from`.
    pub fn find_next_in_use(&self, from: u32) -> Option<u32> {
        if from >= self.size {
            return None;
        }

        let mut i = (from / WORD_BITS) as usize;
        let mut used = !self.words[i]
            & Self::valid_bits(self.size, i)
            & (u64::MAX << (from % WORD_BITS));

        loop {
            if used != 0 {
                return Some(i as u32 * WORD_BITS + used.trailing_zeros());
            }

            i += 1;
            if i == self.words.len() {
                return None;
            }
            used = !self.words[i] & Self::valid_bits(self.size, i);
        }
    }

    /// Find the lowest in-use index at or above `from` and free it.
    ///
    /// Calling this in a loop drains the pool in index order.
    pub fn find_next_in_use_and_free(&mut self, from: u32) -> Option<u32> {
        let idx = self.find_next_in_use(from)?;
        let (i, mask) = self.locate(idx).ok()?;
        self.words[i] |= mask;
        self.free += 1;
        Some(idx)
    }

    /// Iterate the in-use indices in ascending order.
    pub fn iter_in_use(&self) -> impl Iterator<Item = u32> + '_ {
        core::iter::successors(self.find_next_in_use(0), |idx| {
            self.find_next_in_use(idx + 1)
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn free_count(&self) -> u32 {
        self.free
    }

    pub fn in_use_count(&self) -> u32 {
        self.size - self.free
    }

    #[cfg(any(test, feature = "test-help"))]
    pub fn popcount(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alloc_free_sequence() {
        let mut pool = BitPool::new(4, true);
        assert_eq!(pool.alloc(), Ok(0));
        assert_eq!(pool.alloc(), Ok(1));
        assert_eq!(pool.alloc_reverse(), Ok(3));
        assert_eq!(pool.free(1), Ok(()));
        assert_eq!(pool.alloc(), Ok(1));
        assert_eq!(pool.alloc(), Ok(2));
        assert_eq!(pool.alloc(), Err(BitPoolError::Empty));
        assert_eq!(pool.free_count(), 0);
    }

    #[test]
    fn reverse_and_fixed_allocs() {
        let mut pool = BitPool::new(16, true);
        assert_eq!(pool.alloc_reverse(), Ok(15));
        assert_eq!(pool.alloc_reverse(), Ok(14));
        assert_eq!(pool.alloc(), Ok(0));
        assert_eq!(pool.alloc_at(7), Ok(7));
        assert_eq!(pool.free(0), Ok(()));
        assert_eq!(pool.alloc(), Ok(0));

        assert_eq!(pool.free_count(), 12);
        let free: Vec<u32> = (0..16).filter(|i| !pool.is_in_use(*i)).collect();
        assert_eq!(free, vec![1, 2, 3, 4, 5, 6, 8, 9, 10, 11, 12, 13]);
    }

    #[test]
    fn free_count_matches_bits() {
        let mut pool = BitPool::new(130, true);
        assert_eq!(pool.popcount(), 130);

        for _ in 0..70 {
            pool.alloc().unwrap();
        }
        pool.alloc_reverse().unwrap();
        pool.free(5).unwrap();

        assert_eq!(pool.free_count(), pool.popcount());
        assert_eq!(pool.free_count(), 130 - 70 - 1 + 1);
        assert_eq!(pool.alloc_reverse(), Ok(128));
    }

    #[test]
    fn errors() {
        let mut pool = BitPool::new(10, false);
        assert_eq!(pool.alloc(), Err(BitPoolError::Empty));
        assert_eq!(pool.free(10), Err(BitPoolError::OutOfRange(10)));
        pool.free(3).unwrap();
        assert_eq!(pool.free(3), Err(BitPoolError::DoubleFree(3)));
        assert_eq!(pool.alloc_at(4), Err(BitPoolError::Taken(4)));
        assert_eq!(pool.alloc_at(3), Ok(3));
        assert!(pool.is_in_use(3));
        assert!(!pool.is_in_use(99));
    }

    #[test]
    fn drain_in_use() {
        let mut pool = BitPool::new(200, true);
        for idx in [0, 63, 64, 150, 199] {
            pool.alloc_at(idx).unwrap();
        }

        assert_eq!(
            pool.iter_in_use().collect::<Vec<_>>(),
            vec![0, 63, 64, 150, 199]
        );
        assert_eq!(pool.find_next_in_use(65), Some(150));

        let mut drained = Vec::new();
        let mut next = 0;
        while let Some(idx) = pool.find_next_in_use_and_free(next) {
            drained.push(idx);
            next = idx + 1;
        }

        assert_eq!(drained, vec![0, 63, 64, 150, 199]);
        assert_eq!(pool.free_count(), 200);
        assert_eq!(pool.find_next_in_use(0), None);
    }
}
