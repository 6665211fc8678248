// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod mem_device;
pub mod mock_fw;

pub use cfa::api::Direction::*;
pub use cfa::api::*;
pub use cfa::engine::adapter::Device;
pub use cfa::engine::adapter::TcamRecord;
pub use cfa::engine::layout::TcamShape;
pub use cfa::engine::tcam::EntryId;
pub use cfa::engine::tcam::TcamMgr;
pub use cfa::provider::LogLevel;
pub use cfa::provider::LogProvider;
pub use cfa::provider::Providers;
pub use mem_device::DevOp;
pub use mem_device::MemDevice;
pub use mock_fw::MockFw;

use std::sync::Arc;
use std::sync::Mutex;

/// A wildcard-TCAM shape of `num_rows` rows of `max_slices` 4-byte
/// slices.
pub fn wc_shape(max_slices: u8, num_rows: u16) -> TcamShape {
    TcamShape {
        hcapi_type: 0x03,
        max_slices,
        row_width: max_slices * 4,
        result_size: 4,
        num_rows,
    }
}

/// A TCAM manager with one ingress wildcard table of `num_rows` rows,
/// all of them bound.
pub fn wc_mgr(max_slices: u8, num_rows: u16) -> TcamMgr {
    let mut mgr = TcamMgr::with_shapes(
        &[(TcamTblType::Wc, wc_shape(max_slices, num_rows))],
        256,
    );
    let resv = Reservation {
        rtype: ResourceType::Tcam(TcamTblType::Wc),
        start: 0,
        stride: max_slices as u32 * num_rows as u32,
    };
    mgr.bind(Ingress, &[resv]).unwrap();
    mgr
}

/// Key bits of an entry of `slices` 4-byte slices.
pub const fn key_bits(slices: u16) -> u16 {
    slices * 32
}

/// A log provider that keeps every message for later inspection.
#[derive(Clone, Default)]
pub struct CaptureLog {
    msgs: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl CaptureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn providers(&self) -> Providers {
        Providers { log: Box::new(self.clone()) }
    }

    pub fn msgs(&self) -> Vec<(LogLevel, String)> {
        self.msgs.lock().unwrap().clone()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.msgs.lock().unwrap().iter().filter(|(l, _)| *l == level).count()
    }
}

impl LogProvider for CaptureLog {
    fn log(&self, level: LogLevel, msg: &str) {
        self.msgs.lock().unwrap().push((level, msg.to_string()));
    }
}
