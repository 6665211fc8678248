// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Host-side management of NIC match tables.
//!
//! The engine leases index ranges from firmware, hands out TCAM
//! entries, SRAM slices and exact-match records from those leases,
//! and keeps the hardware tables ordered and compact as entries come
//! and go. Firmware is reached only through the [`engine::fw`]
//! adapter, so the allocators themselves can be driven entirely from
//! host memory in tests.

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate alloc;

#[macro_use]
extern crate cfg_if;

pub mod api;
pub mod engine;
#[cfg(any(feature = "std", test))]
pub mod print;
pub mod provider;

/// Return value with `bit` set.
pub const fn bit_on(bit: u8) -> u8 {
    0x1 << bit
}
