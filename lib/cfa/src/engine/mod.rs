// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! The table management engine.
//!
//! The allocators at the bottom of this namespace ([`bitpool`],
//! [`dpool`]) know nothing about hardware. The managers built on them
//! ([`sram`], [`tcam`], [`em`]) reach hardware only through the
//! [`adapter::Device`] trait, and [`session`] ties everything to a
//! firmware channel.
pub mod adapter;
pub mod bitpool;
pub mod dpool;
pub mod em;
pub mod fw;
pub mod layout;
pub mod msg;
pub mod rm;
pub mod session;
pub mod sram;
pub mod tcam;

use core::sync::atomic::AtomicBool;

/// When set, the engine prints a line for every TCAM row move and
/// dynamic pool relocation.
pub static CFA_DEBUG: AtomicBool = AtomicBool::new(false);

cfg_if! {
    if #[cfg(feature = "std")] {
        #[macro_export]
        macro_rules! dbg_macro {
            ($s:tt) => {
                if $crate::engine::CFA_DEBUG.load(::core::sync::atomic::Ordering::Relaxed) {
                    println!($s);
                }
            };
            ($s:tt, $($arg:tt)*) => {
                if $crate::engine::CFA_DEBUG.load(::core::sync::atomic::Ordering::Relaxed) {
                    println!($s, $($arg)*);
                }
            };
        }

        #[macro_export]
        macro_rules! err_macro {
            ($s:tt) => {
                println!(concat!("ERROR: ", $s));
            };
            ($s:tt, $($arg:tt)*) => {
                println!(concat!("ERROR: ", $s), $($arg)*);
            };
        }
    } else {
        #[macro_export]
        macro_rules! dbg_macro {
            ($s:tt) => {};
            ($s:tt, $($arg:tt)*) => {
                let _ = format_args!($s, $($arg)*);
            };
        }

        #[macro_export]
        macro_rules! err_macro {
            ($s:tt) => {};
            ($s:tt, $($arg:tt)*) => {
                let _ = format_args!($s, $($arg)*);
            };
        }
    }
}

pub use dbg_macro as dbg;
pub use err_macro as err;
