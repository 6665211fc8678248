// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The hardware seam.
//!
//! The table managers never talk to firmware directly. Every hardware
//! access goes through a [`Device`], which is the firmware adapter in
//! a running session and an in-memory table in tests.

use crate::api::CfaError;
use crate::api::Direction;
use crate::api::FlowHandle;
use crate::api::FwCmd;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeviceError {
    /// Firmware rejected the request.
    Status { op: FwCmd, code: i32 },
    /// The request never reached firmware, or its reply never came.
    Transport { op: FwCmd, msg: String },
    /// The reply did not have the expected shape.
    Malformed { op: FwCmd, what: &'static str },
    /// The device has no such primitive.
    NotSupported(FwCmd),
}

impl Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Status { op, code } => {
                write!(f, "{op:?} failed with status {code}")
            }
            Self::Transport { op, msg } => write!(f, "{op:?}: {msg}"),
            Self::Malformed { op, what } => {
                write!(f, "{op:?}: malformed response: {what}")
            }
            Self::NotSupported(op) => write!(f, "{op:?} not supported"),
        }
    }
}

impl From<DeviceError> for CfaError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NotSupported(_) => {
                Self::NotSupported(format!("{err}"))
            }
            _ => Self::Device(format!("{err}")),
        }
    }
}

/// The contents of one TCAM entry as stored in hardware.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TcamRecord {
    pub key: Vec<u8>,
    pub mask: Vec<u8>,
    pub result: Vec<u8>,
}

/// An exact-match insertion.
#[derive(Clone, Copy, Debug)]
pub struct EmInsert<'a> {
    pub key: &'a [u8],
    pub key_bits: u16,
    /// The action record the flow points at.
    pub action_ptr: u64,
    pub strength: u16,
    /// The first record entry leased for the flow.
    pub record_index: u32,
    pub handle: FlowHandle,
}

/// Firmware's account of an exact-match insertion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EmInserted {
    pub record_index: u32,
    pub num_entries: u8,
}

/// Hardware access for the table managers.
///
/// TCAM writes name a physical entry by its firmware table type and
/// index, where the index is `row * max_slices + slice`.
pub trait Device {
    fn tcam_set(
        &mut self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
        key: &[u8],
        mask: &[u8],
        result: &[u8],
    ) -> Result<(), DeviceError>;

    fn tcam_get(
        &mut self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
    ) -> Result<TcamRecord, DeviceError>;

    /// Invalidate one TCAM entry.
    ///
    /// An all-zero key under an all-ones mask never matches a live
    /// key, so this is simply a set. It is safe to repeat.
    fn tcam_free(
        &mut self,
        dir: Direction,
        hcapi_type: u16,
        index: u32,
        key_size: usize,
        result_size: usize,
    ) -> Result<(), DeviceError> {
        let key = vec![0u8; key_size];
        let mask = vec![0xFFu8; key_size];
        let result = vec![0u8; result_size];
        self.tcam_set(dir, hcapi_type, index, &key, &mask, &result)
    }

    fn em_insert(
        &mut self,
        _dir: Direction,
        _req: &EmInsert<'_>,
    ) -> Result<EmInserted, DeviceError> {
        Err(DeviceError::NotSupported(FwCmd::EmInsert))
    }

    fn em_delete(
        &mut self,
        _dir: Direction,
        _handle: FlowHandle,
    ) -> Result<(), DeviceError> {
        Err(DeviceError::NotSupported(FwCmd::EmDelete))
    }

    /// Move a flow's record to `new_index`.
    fn em_move(
        &mut self,
        _dir: Direction,
        _handle: FlowHandle,
        _new_index: u32,
    ) -> Result<(), DeviceError> {
        Err(DeviceError::NotSupported(FwCmd::EmMove))
    }

    fn tbl_set(
        &mut self,
        _dir: Direction,
        _hcapi_type: u16,
        _index: u32,
        _data: &[u8],
    ) -> Result<(), DeviceError> {
        Err(DeviceError::NotSupported(FwCmd::TblSet))
    }

    fn tbl_get(
        &mut self,
        _dir: Direction,
        _hcapi_type: u16,
        _index: u32,
        _len: usize,
    ) -> Result<Vec<u8>, DeviceError> {
        Err(DeviceError::NotSupported(FwCmd::TblGet))
    }
}
