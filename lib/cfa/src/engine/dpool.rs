// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A dynamic pool of variable-size extents.
//!
//! The pool covers a contiguous index range leased from firmware and
//! hands out runs of 1 to `max_alloc` consecutive indices, first fit.
//! When no free run is large enough the pool can defragment itself by
//! moving extents; every move is reported through [`Relocate`] so the
//! owner of the extent can move the hardware copy and fix up any
//! index it keeps.
//!
//! Each extent stores one token of type `T`, recorded on its first
//! position. The pool never interprets the token.

use super::dbg;
use crate::api::DefragMode;
use crate::api::DpoolExtentDump;
use crate::api::DumpDpoolResp;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Debug;
use core::fmt::Display;

/// The state of one index in the pool.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Slot {
    #[default]
    Free,
    /// Part of an extent of `size` indices; `start` marks the first.
    Used { size: u32, start: bool },
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct Entry<T> {
    slot: Slot,
    token: T,
}

/// Moves the contents of an extent on behalf of a [`Dpool`].
pub trait Relocate<T> {
    type Error: Debug;

    /// The extent holding `token` now also occupies `new_index`.
    ///
    /// The implementation must copy the extent's contents to
    /// `new_index` and update every index it keeps before returning.
    /// On error the pool discards the destination and leaves the
    /// extent where it was.
    fn relocate(&mut self, token: &T, new_index: u32)
    -> Result<(), Self::Error>;
}

/// A relocator for pools whose extents may never move.
pub struct NoRelocate;

impl<T> Relocate<T> for NoRelocate {
    type Error = ();

    fn relocate(&mut self, _token: &T, _new_index: u32) -> Result<(), ()> {
        Err(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DpoolError {
    BadConfig { size: u32, max_alloc: u32 },
    /// An allocation of zero or more than `max_alloc` indices.
    BadSize(u32),
    OutOfRange(u32),
    /// No free run can hold the request.
    NoSpace(u32),
    /// The index is not the first index of an extent.
    NotStart(u32),
    /// The owner of an extent failed to move it.
    Relocate { index: u32, msg: String },
}

impl Display for DpoolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadConfig { size, max_alloc } => {
                write!(f, "bad pool config: size {size}, max_alloc {max_alloc}")
            }
            Self::BadSize(k) => write!(f, "bad extent size {k}"),
            Self::OutOfRange(idx) => write!(f, "index {idx} out of range"),
            Self::NoSpace(k) => write!(f, "no free run of {k} entries"),
            Self::NotStart(idx) => write!(f, "index {idx} is not an extent"),
            Self::Relocate { index, msg } => {
                write!(f, "relocating extent at {index} failed: {msg}")
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct FreeRun {
    pos: usize,
    len: u32,
}

// An extent with at least one free neighbor.
#[derive(Clone, Copy, Debug)]
struct Neighbor {
    pos: usize,
    size: u32,
    left: u32,
    right: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dpool<T = u64> {
    start_index: u32,
    max_alloc: u32,
    entries: Vec<Entry<T>>,
}

impl<T: Copy + Default> Dpool<T> {
    /// Create a pool over `[start_index, start_index + size)`.
    pub fn new(
        start_index: u32,
        size: u32,
        max_alloc: u32,
    ) -> Result<Self, DpoolError> {
        if size == 0 || max_alloc == 0 || max_alloc > size {
            return Err(DpoolError::BadConfig { size, max_alloc });
        }

        Ok(Self {
            start_index,
            max_alloc,
            entries: vec![Entry::default(); size as usize],
        })
    }

    pub fn start_index(&self) -> u32 {
        self.start_index
    }

    pub fn size(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn max_alloc(&self) -> u32 {
        self.max_alloc
    }

    fn pos(&self, index: u32) -> Result<usize, DpoolError> {
        index
            .checked_sub(self.start_index)
            .map(|p| p as usize)
            .filter(|p| *p < self.entries.len())
            .ok_or(DpoolError::OutOfRange(index))
    }

    fn index(&self, pos: usize) -> u32 {
        self.start_index + pos as u32
    }

    fn check_size(&self, k: u32) -> Result<(), DpoolError> {
        if k == 0 || k > self.max_alloc {
            return Err(DpoolError::BadSize(k));
        }
        Ok(())
    }

    /// Allocate `k` consecutive indices, returning the first.
    pub fn alloc(&mut self, k: u32) -> Result<u32, DpoolError> {
        self.check_size(k)?;
        let pos = self.first_fit(k).ok_or(DpoolError::NoSpace(k))?;
        self.mark_used(pos, k, T::default());
        Ok(self.index(pos))
    }

    /// Allocate `k` consecutive indices, defragmenting once per `mode`
    /// if no free run is large enough.
    pub fn alloc_defrag<R: Relocate<T>>(
        &mut self,
        k: u32,
        mode: DefragMode,
        reloc: &mut R,
    ) -> Result<u32, DpoolError> {
        self.check_size(k)?;
        if self.first_fit(k).is_none() && mode != DefragMode::None {
            self.defrag(k, mode, reloc)?;
        }

        let pos = self.first_fit(k).ok_or(DpoolError::NoSpace(k))?;
        self.mark_used(pos, k, T::default());
        Ok(self.index(pos))
    }

    /// Free the extent starting at `index`.
    pub fn free(&mut self, index: u32) -> Result<(), DpoolError> {
        let pos = self.pos(index)?;
        let Slot::Used { size, start: true } = self.entries[pos].slot else {
            return Err(DpoolError::NotStart(index));
        };

        for e in &mut self.entries[pos..pos + size as usize] {
            *e = Entry::default();
        }
        Ok(())
    }

    /// Record the token of the extent starting at `index`.
    pub fn set_entry_data(
        &mut self,
        index: u32,
        token: T,
    ) -> Result<(), DpoolError> {
        let pos = self.start_pos(index)?;
        self.entries[pos].token = token;
        Ok(())
    }

    pub fn entry_data(&self, index: u32) -> Option<T> {
        self.start_pos(index).ok().map(|pos| self.entries[pos].token)
    }

    /// The size of the extent starting at `index`.
    pub fn extent_size(&self, index: u32) -> Option<u32> {
        let pos = self.start_pos(index).ok()?;
        match self.entries[pos].slot {
            Slot::Used { size, .. } => Some(size),
            Slot::Free => None,
        }
    }

    pub fn slot(&self, index: u32) -> Option<Slot> {
        self.pos(index).ok().map(|pos| self.entries[pos].slot)
    }

    fn start_pos(&self, index: u32) -> Result<usize, DpoolError> {
        let pos = self.pos(index)?;
        match self.entries[pos].slot {
            Slot::Used { start: true, .. } => Ok(pos),
            _ => Err(DpoolError::NotStart(index)),
        }
    }

    /// Iterate `(index, size, token)` for every extent.
    pub fn extents(&self) -> impl Iterator<Item = (u32, u32, T)> + '_ {
        self.entries.iter().enumerate().filter_map(|(pos, e)| match e.slot {
            Slot::Used { size, start: true } => {
                Some((self.index(pos), size, e.token))
            }
            _ => None,
        })
    }

    pub fn free_count(&self) -> u32 {
        self.entries.iter().filter(|e| e.slot == Slot::Free).count() as u32
    }

    pub fn largest_free(&self) -> u32 {
        self.free_runs().iter().map(|r| r.len).max().unwrap_or(0)
    }

    fn first_fit(&self, k: u32) -> Option<usize> {
        let mut run = 0;
        for (pos, e) in self.entries.iter().enumerate() {
            if e.slot == Slot::Free {
                run += 1;
                if run == k {
                    return Some(pos + 1 - k as usize);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    fn mark_used(&mut self, pos: usize, k: u32, token: T) {
        for (i, e) in self.entries[pos..pos + k as usize].iter_mut().enumerate()
        {
            e.slot = Slot::Used { size: k, start: i == 0 };
            e.token = if i == 0 { token } else { T::default() };
        }
    }

    fn free_runs(&self) -> Vec<FreeRun> {
        let mut runs = Vec::new();
        let mut cur: Option<FreeRun> = None;
        for (pos, e) in self.entries.iter().enumerate() {
            if e.slot != Slot::Free {
                runs.extend(cur.take());
                continue;
            }

            match cur.as_mut() {
                Some(run) => run.len += 1,
                None => cur = Some(FreeRun { pos, len: 1 }),
            }
        }
        runs.extend(cur);
        runs
    }

    fn neighbors(&self) -> Vec<Neighbor> {
        let mut out = Vec::new();
        let mut pos = 0;
        let mut free_before = 0;

        while pos < self.entries.len() {
            match self.entries[pos].slot {
                Slot::Free => {
                    free_before += 1;
                    pos += 1;
                }
                Slot::Used { size, .. } => {
                    let end = pos + size as usize;
                    let right = self.entries[end..]
                        .iter()
                        .take_while(|e| e.slot == Slot::Free)
                        .count() as u32;
                    if free_before > 0 || right > 0 {
                        out.push(Neighbor {
                            pos,
                            size,
                            left: free_before,
                            right,
                        });
                    }
                    free_before = 0;
                    pos = end;
                }
            }
        }
        out
    }

    // The free run left around `n` once it has moved into `largest`.
    fn vacated_run(n: &Neighbor, largest: FreeRun) -> u32 {
        if n.left > 0 && largest.pos + largest.len as usize == n.pos {
            n.left + n.right
        } else if n.right > 0 && n.pos + n.size as usize == largest.pos {
            n.left + n.size
        } else {
            n.left + n.size + n.right
        }
    }

    /// Compact the pool, returning the largest free run afterwards.
    ///
    /// Each step moves the extent that best fills its surroundings
    /// into the largest free run, considering only moves that grow the
    /// largest free run. [`DefragMode::ToFit`] stops as soon as a run
    /// of `target` exists; [`DefragMode::All`] continues until no
    /// move helps. [`DefragMode::None`] moves nothing.
    pub fn defrag<R: Relocate<T>>(
        &mut self,
        target: u32,
        mode: DefragMode,
        reloc: &mut R,
    ) -> Result<u32, DpoolError> {
        loop {
            let runs = self.free_runs();
            let Some(largest) = runs.iter().copied().reduce(|best, r| {
                if r.len > best.len { r } else { best }
            }) else {
                return Ok(0);
            };

            let done = match mode {
                DefragMode::None => true,
                DefragMode::ToFit => largest.len >= target,
                DefragMode::All => false,
            };
            if done {
                return Ok(largest.len);
            }

            let mut best: Option<(Neighbor, u32)> = None;
            for n in self.neighbors() {
                if n.size > largest.len
                    || Self::vacated_run(&n, largest) <= largest.len
                {
                    continue;
                }

                let score = n.size + n.left + n.right;
                if best.is_none_or(|(_, s)| score > s) {
                    best = Some((n, score));
                }
            }

            let Some((n, _)) = best else {
                return Ok(largest.len);
            };
            self.move_extent(n.pos, n.size, largest.pos, reloc)?;
        }
    }

    fn move_extent<R: Relocate<T>>(
        &mut self,
        src: usize,
        size: u32,
        dst: usize,
        reloc: &mut R,
    ) -> Result<(), DpoolError> {
        let token = self.entries[src].token;
        let new_index = self.index(dst);
        dbg!(
            "dpool: move extent {} ({} entries) to {}",
            self.index(src),
            size,
            new_index
        );

        self.mark_used(dst, size, token);
        if let Err(e) = reloc.relocate(&token, new_index) {
            for ent in &mut self.entries[dst..dst + size as usize] {
                *ent = Entry::default();
            }
            return Err(DpoolError::Relocate {
                index: self.index(src),
                msg: format!("{e:?}"),
            });
        }

        for e in &mut self.entries[src..src + size as usize] {
            *e = Entry::default();
        }
        Ok(())
    }

    pub fn dump(&self) -> DumpDpoolResp {
        DumpDpoolResp {
            start_index: self.start_index,
            size: self.size(),
            max_alloc: self.max_alloc,
            free: self.free_count(),
            largest_free: self.largest_free(),
            extents: self
                .extents()
                .map(|(index, size, _)| DpoolExtentDump { index, size })
                .collect(),
        }
    }

    /// Verify every extent is well formed.
    #[cfg(any(test, feature = "test-help"))]
    pub fn check(&self) -> Result<(), String> {
        let mut pos = 0;
        while pos < self.entries.len() {
            match self.entries[pos].slot {
                Slot::Free => pos += 1,
                Slot::Used { size, start } => {
                    if !start {
                        let msg = format!("extent body at {pos} has no start");
                        return Err(msg);
                    }
                    if size == 0 || size > self.max_alloc {
                        return Err(format!("bad extent size {size} at {pos}"));
                    }
                    let end = pos + size as usize;
                    if end > self.entries.len() {
                        return Err(format!("extent at {pos} overruns pool"));
                    }
                    for i in pos + 1..end {
                        let want = Slot::Used { size, start: false };
                        if self.entries[i].slot != want {
                            return Err(format!("extent at {pos} torn at {i}"));
                        }
                    }
                    pos = end;
                }
            }
        }
        Ok(())
    }
}
