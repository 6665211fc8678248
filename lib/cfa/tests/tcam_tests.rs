// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

use cfa::engine::tcam::TcamError;
use cfa_test_utils as common;
use common::*;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

const WC: TcamTblType = TcamTblType::Wc;
const HCAPI_WC: u16 = 0x03;

fn alloc(
    mgr: &mut TcamMgr,
    dev: &mut MemDevice,
    slices: u16,
    priority: u16,
) -> EntryId {
    mgr.alloc(dev, Ingress, WC, key_bits(slices), priority).unwrap()
}

// Program `id` with a key that names it.
fn program(mgr: &TcamMgr, dev: &mut MemDevice, id: EntryId, slices: u16) {
    let key = vec![id.0 as u8 + 1; slices as usize * 4];
    let mask = vec![0xF0; key.len()];
    mgr.set(dev, Ingress, WC, id, &key, &mask, &[id.0 as u8]).unwrap();
}

fn row_of(mgr: &TcamMgr, id: EntryId) -> u16 {
    mgr.location(id).unwrap().0
}

#[test]
fn priority_shuffle() {
    let mut mgr = wc_mgr(2, 4);
    let mut dev = MemDevice::new();

    let top = alloc(&mut mgr, &mut dev, 2, TCAM_PRIORITY_MAX);
    program(&mgr, &mut dev, top, 2);
    let mid = alloc(&mut mgr, &mut dev, 2, 100);
    program(&mgr, &mut dev, mid, 2);
    assert_eq!(row_of(&mgr, top), 0);
    assert_eq!(row_of(&mgr, mid), 3);

    // ================================================================
    // A lower priority entry pushes the priority 100 row up to make
    // room at the bottom, and the hardware copy moves with it.
    // ================================================================
    let low = alloc(&mut mgr, &mut dev, 2, 50);
    program(&mgr, &mut dev, low, 2);
    assert_eq!(row_of(&mgr, top), 0);
    assert_eq!(row_of(&mgr, mid), 2);
    assert_eq!(row_of(&mgr, low), 3);
    assert_eq!(
        mgr.get(&mut dev, Ingress, WC, mid).unwrap().result,
        vec![mid.0 as u8]
    );
    mgr.check().unwrap();

    let extra = alloc(&mut mgr, &mut dev, 2, 100);
    assert_eq!(row_of(&mgr, extra), 1);
    program(&mgr, &mut dev, extra, 2);

    // ================================================================
    // Freeing the row directly below the MAX band leaves the hole
    // where it is.
    // ================================================================
    assert_eq!(mgr.free(&mut dev, Ingress, Some(WC), extra), Ok(0));
    assert_eq!(row_of(&mgr, top), 0);
    assert_eq!(row_of(&mgr, mid), 2);
    assert_eq!(row_of(&mgr, low), 3);
    assert!(!mgr.table(Ingress, WC).unwrap().row(1).is_in_use());
    assert!(!dev.is_valid(Ingress, HCAPI_WC, 2));
    assert_eq!(mgr.location(extra), None);
    mgr.check().unwrap();
}

#[test]
fn slice_packing() {
    let mut mgr = wc_mgr(4, 4);
    let mut dev = MemDevice::new();

    let a = alloc(&mut mgr, &mut dev, 2, 10);
    let b = alloc(&mut mgr, &mut dev, 2, 10);
    assert_eq!(mgr.location(a), Some((3, 0)));
    assert_eq!(mgr.location(b), Some((3, 1)));

    let table = mgr.table(Ingress, WC).unwrap();
    assert_eq!(table.hw_index(3, 0, 2), 12);
    assert_eq!(table.hw_index(3, 1, 2), 14);

    let c = alloc(&mut mgr, &mut dev, 1, 10);
    assert_eq!(mgr.location(c), Some((2, 0)));
    let d = alloc(&mut mgr, &mut dev, 1, 10);
    assert_eq!(mgr.location(d), Some((2, 1)));

    let row = mgr.table(Ingress, WC).unwrap().row(2);
    assert_eq!(row.entry_size(), 1);
    assert_eq!(row.inuse(), 0b11);
    assert_eq!(mgr.used_entries(Ingress, WC), 4);
    mgr.check().unwrap();
}

#[test]
fn partial_rows_combine_on_free() {
    let mut mgr = wc_mgr(2, 4);
    let mut dev = MemDevice::new();

    // Two rows of one-slice entries at the same priority.
    let ids: Vec<EntryId> =
        (0..4).map(|_| alloc(&mut mgr, &mut dev, 1, 10)).collect();
    for id in &ids {
        program(&mgr, &mut dev, *id, 1);
    }
    assert_eq!(row_of(&mgr, ids[0]), 3);
    assert_eq!(row_of(&mgr, ids[2]), 2);

    // Freeing one entry of each row lets the survivors share a row,
    // which then moves up into the row left empty.
    mgr.free(&mut dev, Ingress, Some(WC), ids[1]).unwrap();
    assert_eq!(row_of(&mgr, ids[0]), 3);
    mgr.free(&mut dev, Ingress, Some(WC), ids[2]).unwrap();
    assert_eq!(mgr.location(ids[0]), Some((2, 0)));
    assert_eq!(mgr.location(ids[3]), Some((2, 1)));
    let table = mgr.table(Ingress, WC).unwrap();
    assert_eq!(table.row(2).num_entries(), 2);
    assert!(!table.row(3).is_in_use());
    for id in [ids[0], ids[3]] {
        let rec = mgr.get(&mut dev, Ingress, WC, id).unwrap();
        assert_eq!(rec.key, vec![id.0 as u8 + 1; 4]);
    }
    mgr.check().unwrap();
}

#[test]
fn compaction_on_free() {
    let mut mgr = wc_mgr(2, 4);
    let mut dev = MemDevice::new();

    let top = alloc(&mut mgr, &mut dev, 2, TCAM_PRIORITY_MAX);
    let a = alloc(&mut mgr, &mut dev, 2, 200);
    let b = alloc(&mut mgr, &mut dev, 2, 200);
    let low = alloc(&mut mgr, &mut dev, 2, 100);
    for id in [top, a, b, low] {
        program(&mgr, &mut dev, id, 2);
    }

    let (first, second) = if row_of(&mgr, a) == 1 { (a, b) } else { (b, a) };
    assert_eq!(row_of(&mgr, top), 0);
    assert_eq!(row_of(&mgr, first), 1);
    assert_eq!(row_of(&mgr, second), 2);
    assert_eq!(row_of(&mgr, low), 3);

    mgr.free(&mut dev, Ingress, Some(WC), first).unwrap();
    assert!(!mgr.table(Ingress, WC).unwrap().row(1).is_in_use());
    assert_eq!(row_of(&mgr, second), 2);
    assert_eq!(row_of(&mgr, low), 3);

    // ================================================================
    // Emptying row 2 pulls the priority 100 row up and clears the
    // row it came from.
    // ================================================================
    dev.clear_ops();
    mgr.free(&mut dev, Ingress, Some(WC), second).unwrap();
    assert_eq!(row_of(&mgr, low), 2);
    assert!(!mgr.table(Ingress, WC).unwrap().row(3).is_in_use());
    assert_eq!(
        dev.ops[dev.ops.len() - 2..],
        [
            DevOp::TcamSet { dir: Ingress, index: 6, invalidate: true },
            DevOp::TcamSet { dir: Ingress, index: 7, invalidate: true },
        ]
    );
    assert_eq!(dev.valid_indices(Ingress, HCAPI_WC), vec![0, 4]);
    assert_eq!(
        mgr.get(&mut dev, Ingress, WC, low).unwrap().key,
        vec![low.0 as u8 + 1; 8]
    );
    mgr.check().unwrap();
}

#[test]
fn max_band_stays_contiguous() {
    let mut mgr = wc_mgr(1, 6);
    let mut dev = MemDevice::new();

    let m: Vec<EntryId> = (0..3)
        .map(|_| alloc(&mut mgr, &mut dev, 1, TCAM_PRIORITY_MAX))
        .collect();
    let low = alloc(&mut mgr, &mut dev, 1, 5);
    assert_eq!(row_of(&mgr, m[2]), 2);
    assert_eq!(row_of(&mgr, low), 5);

    mgr.free(&mut dev, Ingress, Some(WC), m[0]).unwrap();
    assert_eq!(row_of(&mgr, m[2]), 0);
    assert_eq!(row_of(&mgr, m[1]), 1);
    assert!(!mgr.table(Ingress, WC).unwrap().row(2).is_in_use());
    mgr.check().unwrap();
}

#[test]
fn full_table() {
    let mut mgr = wc_mgr(1, 4);
    let mut dev = MemDevice::new();

    for p in [40, 30, 20, 10] {
        alloc(&mut mgr, &mut dev, 1, p);
    }
    assert_eq!(
        mgr.alloc(&mut dev, Ingress, WC, key_bits(1), 25),
        Err(TcamError::NoSpace(Ingress, WC))
    );
    assert_eq!(mgr.live_ids(), 4);
    mgr.check().unwrap();
}

#[test]
fn bad_requests() {
    let mut mgr = wc_mgr(4, 4);
    let mut dev = MemDevice::new();

    assert_eq!(
        mgr.alloc(&mut dev, Ingress, WC, 0, 1),
        Err(TcamError::BadKeySize { tbl: WC, key_bytes: 0 })
    );
    assert_eq!(
        mgr.alloc(&mut dev, Ingress, WC, key_bits(5), 1),
        Err(TcamError::BadKeySize { tbl: WC, key_bytes: 20 })
    );
    assert_eq!(
        mgr.alloc(&mut dev, Egress, WC, key_bits(1), 1),
        Err(TcamError::NotBound(Egress, WC))
    );
    assert_eq!(
        mgr.alloc(&mut dev, Ingress, TcamTblType::Veb, key_bits(1), 1),
        Err(TcamError::NotSupported(Ingress, TcamTblType::Veb))
    );

    let id = alloc(&mut mgr, &mut dev, 1, 1);
    assert!(matches!(
        mgr.set(&mut dev, Ingress, WC, id, &[1; 5], &[1; 5], &[]),
        Err(TcamError::BadLength { what: "key", len: 5, max: 4 })
    ));
    assert!(matches!(
        mgr.set(&mut dev, Ingress, WC, id, &[1; 4], &[1; 3], &[]),
        Err(TcamError::BadLength { what: "mask", .. })
    ));
    assert!(matches!(
        mgr.set(&mut dev, Ingress, WC, id, &[1; 4], &[1; 4], &[0; 5]),
        Err(TcamError::BadLength { what: "result", .. })
    ));
    assert_eq!(
        mgr.free(&mut dev, Ingress, Some(WC), EntryId(99)),
        Err(TcamError::NotAllocated(EntryId(99)))
    );
}

#[test]
fn set_get_round_trip() {
    let mut mgr = wc_mgr(4, 8);
    let mut dev = MemDevice::new();

    let id = alloc(&mut mgr, &mut dev, 3, 7);
    let key = [0xDE, 0xAD, 0xBE, 0xEF, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
    let mask = [0xFF; 14];
    let result = [0x11, 0x22, 0x33, 0x44];
    mgr.set(&mut dev, Ingress, WC, id, &key, &mask, &result).unwrap();

    let rec = mgr.get(&mut dev, Ingress, WC, id).unwrap();
    assert_eq!(rec.key, key);
    assert_eq!(rec.mask, mask);
    assert_eq!(rec.result, result);
}

#[test]
fn references() {
    let mut mgr = wc_mgr(2, 4);
    let mut dev = MemDevice::new();

    let id = alloc(&mut mgr, &mut dev, 1, 3);
    assert_eq!(mgr.add_ref(id), Ok(2));
    assert_eq!(mgr.ref_count(id), Some(2));

    // The table is found from the ID.
    assert_eq!(mgr.free(&mut dev, Ingress, None, id), Ok(1));
    assert!(mgr.location(id).is_some());
    assert_eq!(mgr.free(&mut dev, Ingress, None, id), Ok(0));
    assert_eq!(mgr.location(id), None);
    assert_eq!(
        mgr.free(&mut dev, Ingress, None, id),
        Err(TcamError::NotAllocated(id))
    );
    assert_eq!(mgr.add_ref(id), Err(TcamError::NotAllocated(id)));
}

#[test]
fn reference_count_limit() {
    let mut mgr = wc_mgr(2, 4);
    let mut dev = MemDevice::new();

    let id = alloc(&mut mgr, &mut dev, 1, 3);
    for n in 2..=u8::MAX {
        assert_eq!(mgr.add_ref(id), Ok(n));
    }
    assert_eq!(mgr.add_ref(id), Err(TcamError::RefOverflow(id)));
    assert_eq!(mgr.ref_count(id), Some(u8::MAX));
    assert!(matches!(
        CfaError::from(TcamError::RefOverflow(id)),
        CfaError::OutOfSpace(_)
    ));

    // Every counted reference must be released before the entry goes.
    for n in (1..u8::MAX).rev() {
        assert_eq!(mgr.free(&mut dev, Ingress, None, id), Ok(n));
        assert!(mgr.location(id).is_some());
    }
    assert_eq!(mgr.free(&mut dev, Ingress, None, id), Ok(0));
    assert_eq!(mgr.location(id), None);
    mgr.check().unwrap();
}

#[test]
fn unbind_clears_hardware() {
    let mut mgr = wc_mgr(2, 8);
    let mut dev = MemDevice::new();

    for p in [9, 8, 7] {
        let id = alloc(&mut mgr, &mut dev, 2, p);
        program(&mgr, &mut dev, id, 2);
    }
    assert_eq!(dev.valid_indices(Ingress, HCAPI_WC).len(), 3);

    mgr.unbind(&mut dev, &CaptureLog::new());
    assert!(dev.valid_indices(Ingress, HCAPI_WC).is_empty());
    assert_eq!(mgr.live_ids(), 0);
    assert_eq!(mgr.used_entries(Ingress, WC), 0);
    assert!(!mgr.qcaps().supports(Ingress, WC));
    mgr.check().unwrap();
}

#[test]
fn device_failure_is_reported() {
    let mut mgr = wc_mgr(1, 4);
    let mut dev = MemDevice::new();

    let id = alloc(&mut mgr, &mut dev, 1, 1);
    dev.fail_after = Some(0);
    assert!(matches!(
        mgr.free(&mut dev, Ingress, Some(WC), id),
        Err(TcamError::Device(_))
    ));

    // The entry is gone even though its slot could not be cleared.
    assert_eq!(mgr.location(id), None);
    assert_eq!(mgr.live_ids(), 0);
}

#[test]
fn random_churn_keeps_table_sorted() {
    let mut rng = StdRng::seed_from_u64(0x7CA3);
    let mut mgr = wc_mgr(4, 32);
    let mut dev = MemDevice::new();
    let mut live: BTreeMap<EntryId, u16> = BTreeMap::new();

    for _ in 0..2000 {
        if live.is_empty() || rng.random_bool(0.6) {
            let slices = [1, 2, 3, 4][rng.random_range(0..4)];
            let priority = match rng.random_range(0..8) {
                0 => TCAM_PRIORITY_MAX,
                n => n * 10,
            };
            match mgr.alloc(&mut dev, Ingress, WC, key_bits(slices), priority)
            {
                Ok(id) => {
                    program(&mgr, &mut dev, id, slices);
                    live.insert(id, slices);
                }
                Err(TcamError::NoSpace(..)) => {}
                Err(e) => panic!("alloc failed: {e}"),
            }
        } else {
            let nth = rng.random_range(0..live.len());
            let id = *live.keys().nth(nth).unwrap();
            live.remove(&id);
            assert_eq!(mgr.free(&mut dev, Ingress, None, id), Ok(0));
        }

        mgr.check().unwrap();
        for (id, slices) in &live {
            let rec = mgr.get(&mut dev, Ingress, WC, *id).unwrap();
            assert_eq!(rec.key, vec![id.0 as u8 + 1; *slices as usize * 4]);
        }
    }
}
