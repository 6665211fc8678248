// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Placement and compaction of TCAM rows.
//!
//! Every row move is a read of the source entries, a write of each to
//! its destination and then an invalidation of the source, so that an
//! entry is never programmed in two places that hardware could match.

use super::EntryDesc;
use super::EntryId;
use super::TcamError;
use super::table::TcamTable;
use crate::api::Direction;
use crate::api::TCAM_PRIORITY_MAX;
use crate::engine::adapter::Device;
use crate::engine::dbg;
use crate::engine::err;
use alloc::vec::Vec;
use core::ops::RangeInclusive;
use itertools::Itertools;

/// One table, the entry descriptors, and the device behind them.
pub(super) struct TableCtx<'a> {
    pub(super) dir: Direction,
    pub(super) table: &'a mut TcamTable,
    descs: &'a mut [Option<EntryDesc>],
    dev: &'a mut dyn Device,
}

impl<'a> TableCtx<'a> {
    pub(super) fn new(
        dir: Direction,
        table: &'a mut TcamTable,
        descs: &'a mut [Option<EntryDesc>],
        dev: &'a mut dyn Device,
    ) -> Self {
        Self { dir, table, descs, dev }
    }

    fn no_space(&self) -> TcamError {
        TcamError::NoSpace(self.dir, self.table.tbl)
    }

    fn used(&self, r: u16) -> bool {
        self.table.row(r).is_in_use()
    }

    fn priority(&self, r: u16) -> u16 {
        self.table.row(r).priority()
    }

    /// Pick the row and slot for a new entry, moving rows if needed.
    pub(super) fn place(
        &mut self,
        entry_size: u8,
        priority: u16,
    ) -> Result<(u16, u8), TcamError> {
        if entry_size < self.table.max_slices() {
            if let Some(found) = self.table.find_partial(entry_size, priority)
            {
                return Ok(found);
            }
        }

        let row = if priority == TCAM_PRIORITY_MAX {
            self.find_max_row()?
        } else {
            self.make_room(priority)?
        };
        Ok((row, 0))
    }

    // The MAX band grows downward from `start_row` and may not pass
    // the first row of lower priority.
    fn find_max_row(&self) -> Result<u16, TcamError> {
        for r in self.table.range() {
            if !self.used(r) {
                return Ok(r);
            }
            if self.priority(r) != TCAM_PRIORITY_MAX {
                break;
            }
        }
        Err(self.no_space())
    }

    /// Find or make an empty row between the last row of higher
    /// priority and the first row of lower priority.
    fn make_room(&mut self, priority: u16) -> Result<u16, TcamError> {
        let range = self.table.range();
        let (start, end) = (*range.start(), *range.end());

        let lo = range
            .clone()
            .rev()
            .find(|r| self.used(*r) && self.priority(*r) > priority);
        let hi = range
            .clone()
            .find(|r| self.used(*r) && self.priority(*r) < priority);

        let win_lo = lo.map_or(start, |r| r + 1);
        let win_hi = match hi {
            Some(r) if r == start => None,
            Some(r) => Some(r - 1),
            None => Some(end),
        };
        if let Some(win_hi) = win_hi {
            if let Some(r) = (win_lo..=win_hi).rev().find(|r| !self.used(*r)) {
                return Ok(r);
            }
        }

        // No empty row in the window: shift the rows above it up, or
        // the rows below it down, by one.
        let up = lo.and_then(|lo| {
            let e = (start..lo).rev().find(|r| !self.used(*r))?;
            let movable = (e + 1..=lo)
                .all(|r| self.priority(r) != TCAM_PRIORITY_MAX);
            movable.then_some((e, lo))
        });
        let down = hi.and_then(|hi| {
            (hi + 1..=end).find(|r| !self.used(*r)).map(|e| (hi, e))
        });

        match (up, down) {
            (Some((e, lo)), Some((hi, e2))) => {
                if self.bands(e + 1..=lo) <= self.bands(hi..=e2 - 1) {
                    self.shift_up(e, lo)?;
                    Ok(lo)
                } else {
                    self.shift_down(hi, e2)?;
                    Ok(hi)
                }
            }
            (Some((e, lo)), None) => {
                self.shift_up(e, lo)?;
                Ok(lo)
            }
            (None, Some((hi, e))) => {
                self.shift_down(hi, e)?;
                Ok(hi)
            }
            (None, None) => Err(self.no_space()),
        }
    }

    // The number of priority bands, and so row moves, in `rows`.
    fn bands(&self, rows: RangeInclusive<u16>) -> usize {
        rows.map(|r| self.priority(r)).dedup().count()
    }

    // Rows `(empty, last]` are all in use. Move each band up by one,
    // leaving `last` empty.
    fn shift_up(&mut self, empty: u16, last: u16) -> Result<(), TcamError> {
        let mut to = empty;
        while to < last {
            let band = self.priority(to + 1);
            let mut src = to + 1;
            while src < last && self.priority(src + 1) == band {
                src += 1;
            }
            self.move_row(src, to)?;
            to = src;
        }
        Ok(())
    }

    // Rows `[first, empty)` are all in use. Move each band down by
    // one, leaving `first` empty.
    fn shift_down(&mut self, first: u16, empty: u16) -> Result<(), TcamError> {
        let mut to = empty;
        while to > first {
            let band = self.priority(to - 1);
            let mut src = to - 1;
            while src > first && self.priority(src - 1) == band {
                src -= 1;
            }
            self.move_row(src, to)?;
            to = src;
        }
        Ok(())
    }

    pub(super) fn install(
        &mut self,
        row: u16,
        slot: u8,
        id: EntryId,
        entry_size: u8,
        priority: u16,
    ) {
        let r = self.table.row_mut(row);
        r.claim(priority, entry_size);
        r.install(slot, id);
        self.table.used_entries += 1;
        self.descs[id.0 as usize] = Some(EntryDesc { row, slot, ref_cnt: 1 });
    }

    /// Take the entry in `slot` of `row` out of the table and
    /// invalidate its hardware slot.
    pub(super) fn release(
        &mut self,
        row: u16,
        slot: u8,
    ) -> Result<(), TcamError> {
        let entry_size = self.table.row(row).entry_size();
        if let Some(id) = self.table.row_mut(row).remove(slot) {
            self.descs[id.0 as usize] = None;
            self.table.used_entries -= 1;
        }
        self.free_slot(row, slot, entry_size)
    }

    fn free_slot(
        &mut self,
        row: u16,
        slot: u8,
        entry_size: u8,
    ) -> Result<(), TcamError> {
        let index = self.table.hw_index(row, slot, entry_size);
        self.dev.tcam_free(
            self.dir,
            self.table.shape.hcapi_type,
            index,
            self.table.key_size(entry_size),
            self.table.shape.result_size as usize,
        )?;
        Ok(())
    }

    /// Invalidate every slice of `row`.
    pub(super) fn invalidate_row(&mut self, row: u16) -> Result<(), TcamError> {
        for slice in 0..self.table.max_slices() {
            self.free_slot(row, slice, 1)?;
        }
        Ok(())
    }

    /// Move one entry, choosing the first free slot of `dst_row` when
    /// `dst_slot` is `None`.
    fn move_entry(
        &mut self,
        src_row: u16,
        src_slot: u8,
        dst_row: u16,
        dst_slot: Option<u8>,
    ) -> Result<(), TcamError> {
        let entry_size = self.table.row(src_row).entry_size();
        let Some(id) = self.table.row(src_row).entry(src_slot) else {
            err!("tcam: no entry at row {} slot {}", src_row, src_slot);
            return Ok(());
        };
        let dst_slot = match dst_slot {
            Some(slot) => slot,
            None => self
                .table
                .row(dst_row)
                .free_slot(self.table.max_slices())
                .ok_or_else(|| self.no_space())?,
        };

        let hcapi = self.table.shape.hcapi_type;
        let src = self.table.hw_index(src_row, src_slot, entry_size);
        let dst = self.table.hw_index(dst_row, dst_slot, entry_size);
        let rec = self.dev.tcam_get(self.dir, hcapi, src)?;
        self.dev.tcam_set(
            self.dir,
            hcapi,
            dst,
            &rec.key,
            &rec.mask,
            &rec.result,
        )?;
        self.free_slot(src_row, src_slot, entry_size)?;

        self.table.row_mut(src_row).remove(src_slot);
        self.table.row_mut(dst_row).install(dst_slot, id);
        if let Some(desc) = self.descs[id.0 as usize].as_mut() {
            desc.row = dst_row;
            desc.slot = dst_slot;
        }
        Ok(())
    }

    /// Move every entry of `src` into the empty row `dst`.
    fn move_row(&mut self, src: u16, dst: u16) -> Result<(), TcamError> {
        dbg!(
            "tcam: {} {} move row {} to {}",
            self.dir,
            self.table.tbl,
            src,
            dst
        );

        let (priority, entry_size) = {
            let row = self.table.row(src);
            (row.priority(), row.entry_size())
        };
        self.table.row_mut(dst).claim(priority, entry_size);

        let slots = self.table.row(src).slots(self.table.max_slices());
        for slot in 0..slots {
            if self.table.row(src).entry(slot).is_some() {
                self.move_entry(src, slot, dst, Some(slot))?;
            } else {
                self.free_slot(dst, slot, entry_size)?;
            }
        }

        self.table.row_mut(src).reset();
        Ok(())
    }

    /// Tidy up after an entry left `row`, which had `priority`.
    pub(super) fn reclaim(
        &mut self,
        row: u16,
        priority: u16,
    ) -> Result<(), TcamError> {
        if self.used(row) {
            self.combine(row)?;
        }
        if self.used(row) {
            return Ok(());
        }

        self.table.row_mut(row).reset();
        if let Some(vacated) = self.compact(row, priority)? {
            self.invalidate_row(vacated)?;
        }
        Ok(())
    }

    /// Move the remaining entries of `row` into other rows of the same
    /// priority and size, nearest `end_row` first, if they all fit.
    fn combine(&mut self, row: u16) -> Result<(), TcamError> {
        let max = self.table.max_slices();
        let (priority, entry_size, needed) = {
            let r = self.table.row(row);
            (r.priority(), r.entry_size(), r.num_entries())
        };

        let mut partners = Vec::new();
        let mut room = 0;
        for r in self.table.range().rev().filter(|r| *r != row) {
            let other = self.table.row(r);
            if !other.is_in_use()
                || other.priority() != priority
                || other.entry_size() != entry_size
            {
                continue;
            }

            let free = other.free_slots(max);
            if free > 0 {
                partners.push(r);
                room += free;
                if room >= needed {
                    break;
                }
            }
        }
        if room < needed {
            return Ok(());
        }

        let mut partners = partners.into_iter().peekable();
        for slot in 0..self.table.row(row).slots(max) {
            if self.table.row(row).entry(slot).is_none() {
                continue;
            }

            while let Some(p) = partners.peek() {
                if self.table.row(*p).free_slot(max).is_some() {
                    break;
                }
                partners.next();
            }
            let Some(&dst) = partners.peek() else {
                break;
            };
            self.move_entry(row, slot, dst, None)?;
        }
        Ok(())
    }

    /// Close the hole left by emptying row `hole`, which had
    /// `priority`. Returns the row left empty at the end, if any row
    /// moved.
    ///
    /// A MAX hole is filled with the last MAX row. Any other hole is
    /// filled by pulling up the last row of the band below it, and so
    /// on down the table, so that free rows collect at the bottom. A
    /// hole at `start_row` or directly below the MAX band is left
    /// where it is.
    fn compact(
        &mut self,
        hole: u16,
        priority: u16,
    ) -> Result<Option<u16>, TcamError> {
        let (start, end) = (self.table.start_row, self.table.end_row);

        if priority == TCAM_PRIORITY_MAX {
            let last = (hole + 1..=end).rev().find(|r| {
                self.used(*r) && self.priority(*r) == TCAM_PRIORITY_MAX
            });
            let Some(last) = last else {
                return Ok(None);
            };
            self.move_row(last, hole)?;
            return Ok(Some(last));
        }

        if hole == start {
            return Ok(None);
        }
        let below = hole - 1;
        if self.used(below) && self.priority(below) == TCAM_PRIORITY_MAX {
            return Ok(None);
        }

        let mut to = hole;
        let mut vacated = None;
        while to < end {
            let next = to + 1;
            if !self.used(next) || self.priority(next) == TCAM_PRIORITY_MAX {
                break;
            }

            let band = self.priority(next);
            let mut src = next;
            while src < end
                && self.used(src + 1)
                && self.priority(src + 1) == band
            {
                src += 1;
            }
            self.move_row(src, to)?;
            vacated = Some(src);
            to = src;
        }
        Ok(vacated)
    }
}
