// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! A [`Device`] that keeps TCAM entries in memory.

use cfa::api::Direction;
use cfa::api::FwCmd;
use cfa::engine::adapter::Device;
use cfa::engine::adapter::DeviceError;
use cfa::engine::adapter::TcamRecord;
use std::collections::HashMap;

/// One hardware access, in the order it was made.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DevOp {
    TcamSet { dir: Direction, index: u32, invalidate: bool },
    TcamGet { dir: Direction, index: u32 },
}

#[derive(Default)]
pub struct MemDevice {
    entries: HashMap<(Direction, u16, u32), TcamRecord>,
    pub ops: Vec<DevOp>,
    /// Fail every TCAM access once this many more have succeeded.
    pub fail_after: Option<usize>,
}

impl MemDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// The record at `index`, if anything was ever written there.
    pub fn entry(
        &self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
    ) -> Option<&TcamRecord> {
        self.entries.get(&(dir, hcapi_type, index))
    }

    /// Whether `index` holds a valid entry rather than an invalidated
    /// one.
    pub fn is_valid(
        &self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
    ) -> bool {
        self.entry(dir, hcapi_type, index).is_some_and(|r| !is_invalid(r))
    }

    /// The indices holding a valid entry.
    pub fn valid_indices(&self, dir: Direction, hcapi_type: u16) -> Vec<u32> {
        let mut out: Vec<u32> = self
            .entries
            .iter()
            .filter(|((d, h, _), r)| {
                *d == dir && *h == hcapi_type && !is_invalid(r)
            })
            .map(|((_, _, i), _)| *i)
            .collect();
        out.sort_unstable();
        out
    }

    pub fn invalidations(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, DevOp::TcamSet { invalidate: true, .. }))
            .count()
    }

    pub fn sets(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, DevOp::TcamSet { invalidate: false, .. }))
            .count()
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    fn check_fail(&mut self, op: FwCmd) -> Result<(), DeviceError> {
        match self.fail_after.as_mut() {
            Some(0) => Err(DeviceError::Status { op, code: 5 }),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

// An invalidated entry is an all-zero key under an all-ones mask.
fn is_invalid(r: &TcamRecord) -> bool {
    r.key.iter().all(|b| *b == 0) && r.mask.iter().all(|b| *b == 0xFF)
}

impl Device for MemDevice {
    fn tcam_set(
        &mut self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
        key: &[u8],
        mask: &[u8],
        result: &[u8],
    ) -> Result<(), DeviceError> {
        self.check_fail(FwCmd::TcamSet)?;
        let rec = TcamRecord {
            key: key.to_vec(),
            mask: mask.to_vec(),
            result: result.to_vec(),
        };
        let invalidate = is_invalid(&rec);
        self.ops.push(DevOp::TcamSet { dir, index, invalidate });
        self.entries.insert((dir, hcapi_type, index), rec);
        Ok(())
    }

    fn tcam_get(
        &mut self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
    ) -> Result<TcamRecord, DeviceError> {
        self.check_fail(FwCmd::TcamGet)?;
        self.ops.push(DevOp::TcamGet { dir, index });
        Ok(self
            .entries
            .get(&(dir, hcapi_type, index))
            .cloned()
            .unwrap_or_default())
    }
}
