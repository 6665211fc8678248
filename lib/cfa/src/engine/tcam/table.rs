// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Row bookkeeping for one TCAM table.

use super::EntryId;
use super::TcamError;
use crate::api::Direction;
use crate::api::DumpTcamResp;
use crate::api::TCAM_PRIORITY_MAX;
use crate::api::TcamRowDump;
use crate::api::TcamTblType;
use crate::bit_on;
use crate::engine::layout::TcamShape;
use alloc::vec::Vec;
use core::ops::RangeInclusive;

/// The most slices any row may have.
pub const MAX_SLICES: usize = 8;

/// One physical TCAM row.
///
/// A row in use holds entries of a single size and a single priority.
/// Slot `j` of a row whose entries are `entry_size` slices wide starts
/// at slice `j * entry_size`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Row {
    priority: u16,
    entry_size: u8,
    inuse: u8,
    entries: [Option<EntryId>; MAX_SLICES],
}

impl Row {
    pub fn is_in_use(&self) -> bool {
        self.inuse != 0
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn entry_size(&self) -> u8 {
        self.entry_size
    }

    /// The occupied slots, one bit per slot.
    pub fn inuse(&self) -> u8 {
        self.inuse
    }

    pub fn entry(&self, slot: u8) -> Option<EntryId> {
        self.entries.get(slot as usize).copied().flatten()
    }

    pub fn num_entries(&self) -> u8 {
        self.inuse.count_ones() as u8
    }

    /// The number of entries this row can hold.
    pub fn slots(&self, max_slices: u8) -> u8 {
        if self.entry_size == 0 { 0 } else { max_slices / self.entry_size }
    }

    pub fn free_slot(&self, max_slices: u8) -> Option<u8> {
        (0..self.slots(max_slices)).find(|j| self.inuse & bit_on(*j) == 0)
    }

    pub fn free_slots(&self, max_slices: u8) -> u8 {
        self.slots(max_slices) - self.num_entries()
    }

    pub(super) fn claim(&mut self, priority: u16, entry_size: u8) {
        self.priority = priority;
        self.entry_size = entry_size;
    }

    pub(super) fn install(&mut self, slot: u8, id: EntryId) {
        self.inuse |= bit_on(slot);
        self.entries[slot as usize] = Some(id);
    }

    pub(super) fn remove(&mut self, slot: u8) -> Option<EntryId> {
        self.inuse &= !bit_on(slot);
        self.entries[slot as usize].take()
    }

    pub(super) fn reset(&mut self) {
        *self = Row::default();
    }
}

/// The rows of one TCAM table and the range of them this session
/// manages.
#[derive(Clone, Debug)]
pub struct TcamTable {
    pub(super) tbl: TcamTblType,
    pub(super) shape: TcamShape,
    pub(super) rows: Vec<Row>,
    pub(super) start_row: u16,
    pub(super) end_row: u16,
    /// Zero while no range is bound.
    pub(super) max_entries: u16,
    pub(super) used_entries: u16,
}

impl TcamTable {
    pub(super) fn new(tbl: TcamTblType, shape: TcamShape) -> Self {
        Self {
            tbl,
            shape,
            rows: vec![Row::default(); shape.num_rows as usize],
            start_row: 0,
            end_row: 0,
            max_entries: 0,
            used_entries: 0,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.max_entries > 0
    }

    /// Manage the `stride` entries starting at physical entry `start`.
    /// Both must be whole rows.
    pub(super) fn bind(
        &mut self,
        start: u32,
        stride: u32,
    ) -> Result<(), TcamError> {
        let slices = self.shape.max_slices as u32;
        if start % slices != 0 || stride % slices != 0 {
            return Err(TcamError::BadRange { tbl: self.tbl, start, stride });
        }

        let first = start / slices;
        let nrows = stride / slices;
        if nrows == 0 {
            return Ok(());
        }
        let last = first + nrows - 1;
        if last >= self.shape.num_rows as u32 || stride > u16::MAX as u32 {
            return Err(TcamError::BadRange { tbl: self.tbl, start, stride });
        }

        self.start_row = first as u16;
        self.end_row = last as u16;
        self.max_entries = stride as u16;
        self.used_entries = 0;
        Ok(())
    }

    pub(super) fn unbind(&mut self) {
        for row in &mut self.rows {
            row.reset();
        }
        self.start_row = 0;
        self.end_row = 0;
        self.max_entries = 0;
        self.used_entries = 0;
    }

    /// The managed rows.
    pub fn range(&self) -> RangeInclusive<u16> {
        self.start_row..=self.end_row
    }

    pub fn row(&self, r: u16) -> &Row {
        &self.rows[r as usize]
    }

    pub(super) fn row_mut(&mut self, r: u16) -> &mut Row {
        &mut self.rows[r as usize]
    }

    pub fn max_slices(&self) -> u8 {
        self.shape.max_slices
    }

    pub fn used_entries(&self) -> u16 {
        self.used_entries
    }

    /// The number of slices an entry with a key of `key_bytes` needs.
    pub(super) fn slices_for_key(
        &self,
        key_bytes: u16,
    ) -> Result<u8, TcamError> {
        let max = self.shape.max_slices as u16;
        let width = self.shape.slice_width() as u16;
        if key_bytes == 0 || key_bytes > width * max {
            return Err(TcamError::BadKeySize { tbl: self.tbl, key_bytes });
        }

        if max == 1 {
            return Ok(1);
        }
        Ok(key_bytes.div_ceil(width).next_power_of_two() as u8)
    }

    /// The physical entry index of `slot` in `row` for entries of
    /// `entry_size` slices.
    pub fn hw_index(&self, row: u16, slot: u8, entry_size: u8) -> u32 {
        row as u32 * self.shape.max_slices as u32
            + slot as u32 * entry_size as u32
    }

    /// Key bytes of an entry of `entry_size` slices.
    pub fn key_size(&self, entry_size: u8) -> usize {
        entry_size as usize * self.shape.slice_width() as usize
    }

    pub fn holds(&self, row: u16, slot: u8, id: EntryId) -> bool {
        self.is_bound()
            && self.range().contains(&row)
            && self.row(row).entry(slot) == Some(id)
    }

    /// A used row of `priority` and `entry_size` with a free slot,
    /// searching from the bottom of the range.
    pub(super) fn find_partial(
        &self,
        entry_size: u8,
        priority: u16,
    ) -> Option<(u16, u8)> {
        let max = self.shape.max_slices;
        self.range().rev().find_map(|r| {
            let row = self.row(r);
            if row.is_in_use()
                && row.priority == priority
                && row.entry_size == entry_size
            {
                row.free_slot(max).map(|slot| (r, slot))
            } else {
                None
            }
        })
    }

    pub fn dump(&self, dir: Direction) -> DumpTcamResp {
        let max = self.shape.max_slices;
        let rows = if self.is_bound() {
            self.range()
                .filter(|r| self.row(*r).is_in_use())
                .map(|r| {
                    let row = self.row(r);
                    TcamRowDump {
                        row: r,
                        priority: row.priority,
                        entry_size: row.entry_size,
                        inuse: row.inuse,
                        entries: (0..row.slots(max))
                            .map(|j| row.entry(j).map(|id| id.0))
                            .collect(),
                    }
                })
                .collect()
        } else {
            Vec::new()
        };

        DumpTcamResp {
            dir,
            tbl: self.tbl,
            start_row: self.start_row,
            end_row: self.end_row,
            max_slices: max,
            used_entries: self.used_entries,
            max_entries: self.max_entries,
            rows,
        }
    }

    /// Verify the row layout: uniform well-formed rows, priorities
    /// that never increase with row index, and a matching entry count.
    #[cfg(any(test, feature = "test-help"))]
    pub fn check(&self) -> Result<(), alloc::string::String> {
        let max = self.shape.max_slices;
        let mut used = 0u32;
        let mut prev: Option<(u16, u16)> = None;

        for (r, row) in self.rows.iter().enumerate() {
            let r = r as u16;
            let managed = self.is_bound() && self.range().contains(&r);
            if !row.is_in_use() {
                if row.entries.iter().any(|e| e.is_some()) {
                    let tbl = self.tbl;
                    return Err(format!("{tbl}: idle row {r} holds entries"));
                }
                continue;
            }
            if !managed {
                return Err(format!("{}: row {r} used outside range", self.tbl));
            }

            let size = row.entry_size;
            if !size.is_power_of_two() || size > max {
                return Err(format!("{}: row {r} entry size {size}", self.tbl));
            }
            for j in 0..MAX_SLICES as u8 {
                let bit = row.inuse & bit_on(j) != 0;
                let past_end = j >= row.slots(max);
                if bit != row.entry(j).is_some() || (bit && past_end) {
                    return Err(format!("{}: row {r} slot {j} torn", self.tbl));
                }
            }

            if let Some((pr, pp)) = prev {
                if pp < row.priority {
                    return Err(format!(
                        "{}: row {r} priority {} above row {pr} priority {pp}",
                        self.tbl, row.priority
                    ));
                }
            }
            prev = Some((r, row.priority));
            used += row.num_entries() as u32;
        }

        if used != self.used_entries as u32 {
            return Err(format!(
                "{}: {used} entries in rows, {} counted",
                self.tbl, self.used_entries
            ));
        }

        let max_rows = self.range().filter(|r| {
            let row = self.row(*r);
            row.is_in_use() && row.priority == TCAM_PRIORITY_MAX
        });
        let first = max_rows.clone().next();
        if let (Some(first), Some(last)) = (first, max_rows.last()) {
            if (first..=last).any(|r| !self.row(r).is_in_use()) {
                return Err(format!("{}: MAX band has a hole", self.tbl));
            }
        }
        Ok(())
    }
}
