// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Exact-match flow handles.

use super::Direction;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

const HASH_MASK: u64 = 0x3FFF;
const HASH_ID_SHIFT: u32 = 14;
const BUCKET_SHIFT: u32 = 15;
const BUCKET_MASK: u64 = 0x3;
const ENTRIES_SHIFT: u32 = 17;
const ENTRIES_MASK: u64 = 0xF;
const INTERNAL_SHIFT: u32 = 29;
const DIR_SHIFT: u32 = 30;
const RECORD_SHIFT: u32 = 32;

/// The fields packed into a [`FlowHandle`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FlowHandleFields {
    pub record_index: u32,
    pub dir: Direction,
    pub internal: bool,
    /// Record entries occupied by the flow, 1-15.
    pub entries: u8,
    pub bucket: u8,
    pub hash_id: u8,
    /// The 14-bit key hash.
    pub hash: u16,
}

/// An opaque 64-bit identifier for an exact-match flow.
///
/// ```text
/// 63            32 31  30  29 28   21 20     17 16  15  14  13      0
/// +--------------+---+---+---+-------+---------+------+---+---------+
/// | record index | - |dir|int|   -   | entries |bucket|hid|  hash   |
/// +--------------+---+---+---+-------+---------+------+---+---------+
/// ```
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct FlowHandle(u64);

impl FlowHandle {
    pub fn pack(f: &FlowHandleFields) -> Self {
        let mut v = (f.hash as u64) & HASH_MASK;
        v |= ((f.hash_id & 1) as u64) << HASH_ID_SHIFT;
        v |= ((f.bucket as u64) & BUCKET_MASK) << BUCKET_SHIFT;
        v |= ((f.entries as u64) & ENTRIES_MASK) << ENTRIES_SHIFT;
        v |= (f.internal as u64) << INTERNAL_SHIFT;
        v |= (f.dir.idx() as u64) << DIR_SHIFT;
        v |= (f.record_index as u64) << RECORD_SHIFT;
        Self(v)
    }

    pub fn unpack(self) -> FlowHandleFields {
        FlowHandleFields {
            record_index: self.record_index(),
            dir: self.dir(),
            internal: (self.0 >> INTERNAL_SHIFT) & 1 == 1,
            entries: ((self.0 >> ENTRIES_SHIFT) & ENTRIES_MASK) as u8,
            bucket: ((self.0 >> BUCKET_SHIFT) & BUCKET_MASK) as u8,
            hash_id: ((self.0 >> HASH_ID_SHIFT) & 1) as u8,
            hash: (self.0 & HASH_MASK) as u16,
        }
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn record_index(self) -> u32 {
        (self.0 >> RECORD_SHIFT) as u32
    }

    pub const fn dir(self) -> Direction {
        if (self.0 >> DIR_SHIFT) & 1 == 1 {
            Direction::Egress
        } else {
            Direction::Ingress
        }
    }

    /// The same flow, relocated to `record_index`.
    pub const fn with_record_index(self, record_index: u32) -> Self {
        Self((self.0 & 0xFFFF_FFFF) | ((record_index as u64) << RECORD_SHIFT))
    }
}

impl Display for FlowHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn handle_layout() {
        let fields = FlowHandleFields {
            record_index: 0x1234,
            dir: Direction::Egress,
            internal: true,
            entries: 3,
            bucket: 2,
            hash_id: 1,
            hash: 0x2ABC,
        };
        let h = FlowHandle::pack(&fields);
        assert_eq!(h.raw() >> 32, 0x1234);
        assert_eq!(h.raw() & 0x3FFF, 0x2ABC);
        assert_eq!((h.raw() >> 30) & 1, 1);
        assert_eq!(h.unpack(), fields);

        let moved = h.with_record_index(7);
        assert_eq!(moved.record_index(), 7);
        assert_eq!(moved.unpack().hash, fields.hash);
        assert_eq!(moved.dir(), Direction::Egress);
    }
}
