// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Print dump responses in human-friendly manner.

use crate::api::DumpDpoolResp;
use crate::api::DumpSramResp;
use crate::api::DumpTcamResp;
use crate::api::TCAM_PRIORITY_MAX;
use std::io::Write;
use std::string::String;
use std::string::ToString;
use tabwriter::TabWriter;

/// Print a [`DumpTcamResp`].
pub fn print_tcam(resp: &DumpTcamResp) -> std::io::Result<()> {
    print_tcam_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpTcamResp`] into a given writer.
pub fn print_tcam_into(
    writer: &mut impl Write,
    resp: &DumpTcamResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(
        t,
        "{} {} TCAM rows {}-{}, {} slices: {}/{} entries",
        resp.dir,
        resp.tbl,
        resp.start_row,
        resp.end_row,
        resp.max_slices,
        resp.used_entries,
        resp.max_entries,
    )?;
    write_hr(&mut t)?;
    writeln!(t, "ROW\tPRIORITY\tSIZE\tINUSE\tENTRIES")?;
    for row in &resp.rows {
        let prio = if row.priority == TCAM_PRIORITY_MAX {
            "MAX".to_string()
        } else {
            row.priority.to_string()
        };
        let entries: Vec<String> = row
            .entries
            .iter()
            .map(|e| e.map_or("-".to_string(), |id| id.to_string()))
            .collect();
        writeln!(
            t,
            "{}\t{}\t{}\t{:#04x}\t{}",
            row.row,
            prio,
            row.entry_size,
            row.inuse,
            entries.join(" "),
        )?;
    }
    t.flush()
}

/// Print a [`DumpSramResp`].
pub fn print_sram(resp: &DumpSramResp) -> std::io::Result<()> {
    print_sram_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpSramResp`] into a given writer.
pub fn print_sram_into(
    writer: &mut impl Write,
    resp: &DumpSramResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(t, "{} SRAM {} {} slices", resp.dir, resp.bank, resp.slice_size)?;
    write_hr(&mut t)?;
    writeln!(t, "BLOCK\tINUSE\tFIRST NOT FULL")?;
    for blk in &resp.blocks {
        let first = if resp.first_not_full == Some(blk.block_id) {
            "*"
        } else {
            ""
        };
        writeln!(t, "{}\t{:#010b}\t{}", blk.block_id, blk.in_use_mask, first)?;
    }
    t.flush()
}

/// Print a [`DumpDpoolResp`].
pub fn print_dpool(resp: &DumpDpoolResp) -> std::io::Result<()> {
    print_dpool_into(&mut std::io::stdout(), resp)
}

/// Print a [`DumpDpoolResp`] into a given writer.
pub fn print_dpool_into(
    writer: &mut impl Write,
    resp: &DumpDpoolResp,
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);

    writeln!(
        t,
        "Pool {}-{}: {} free, largest run {}, max alloc {}",
        resp.start_index,
        resp.start_index + resp.size - 1,
        resp.free,
        resp.largest_free,
        resp.max_alloc,
    )?;
    write_hr(&mut t)?;
    writeln!(t, "INDEX\tSIZE")?;
    for ext in &resp.extents {
        writeln!(t, "{}\t{}", ext.index, ext.size)?;
    }
    t.flush()
}

/// Write a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
