//! Snapshot isolation scenarios across real transaction manager, table, and
//! worker threads.

mod common;

use common::*;
use pyrite::common::logger::initialize_logger;
use pyrite::concurrency::transaction_manager::TransactionManager;
use pyrite::storage::block::BlockStore;
use pyrite::storage::data_table::DataTable;
use pyrite::storage::projected_row::ProjectedRow;
use pyrite::storage::record_buffer::RecordBufferSegmentPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

fn setup() -> (Arc<TransactionManager>, Arc<DataTable>) {
    initialize_logger();
    let manager = Arc::new(TransactionManager::new(
        Arc::new(RecordBufferSegmentPool::new()),
        true,
        None,
    ));
    let table = DataTable::new(Arc::new(BlockStore::new()), test_layout(), 1, 1);
    (manager, table)
}

fn fixed(value: u64) -> ProjectedRow {
    ProjectedRow::with_values(vec![0], vec![Some(value.to_le_bytes().to_vec())])
}

fn read_fixed(
    manager: &Arc<TransactionManager>,
    table: &Arc<DataTable>,
    slot: pyrite::common::tuple_slot::TupleSlot,
) -> Option<u64> {
    let txn = manager.begin();
    let mut out = ProjectedRow::new(vec![0]);
    let found = table.select(&txn, slot, &mut out);
    manager.commit(&txn, || {});
    if found {
        Some(u64::from_le_bytes(out.value(0).unwrap().try_into().unwrap()))
    } else {
        None
    }
}

/// A transaction that begins after a commit observes the committed write.
#[test]
fn single_writer_single_reader() {
    let (manager, table) = setup();

    let t1 = manager.begin();
    let slot = table.insert(
        &t1,
        ProjectedRow::with_values(
            vec![0, 1],
            vec![Some(1u64.to_le_bytes().to_vec()), Some(b"a".to_vec())],
        ),
    );
    manager.commit(&t1, || {});

    assert_eq!(read_fixed(&manager, &table, slot), Some(1));
}

/// First committer wins: of two transactions racing an update to the same
/// slot, exactly one succeeds and the other observes a conflict.
#[test]
fn concurrent_updates_exactly_one_winner() {
    let (manager, table) = setup();

    let setup_txn = manager.begin();
    let slot = table.insert(
        &setup_txn,
        ProjectedRow::with_values(
            vec![0, 1],
            vec![Some(0u64.to_le_bytes().to_vec()), Some(vec![])],
        ),
    );
    manager.commit(&setup_txn, || {});

    for round in 0..10 {
        let num_threads = 8;
        let barrier = Arc::new(Barrier::new(num_threads));
        let winners = Arc::new(AtomicUsize::new(0));

        thread::scope(|scope| {
            for i in 0..num_threads {
                let manager = Arc::clone(&manager);
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                let winners = Arc::clone(&winners);
                scope.spawn(move || {
                    let txn = manager.begin();
                    barrier.wait();
                    if table.update(&txn, slot, fixed(round * 100 + i as u64)) {
                        winners.fetch_add(1, Ordering::SeqCst);
                        manager.commit(&txn, || {});
                    } else {
                        manager.abort(&txn);
                    }
                });
            }
        });

        assert_eq!(
            winners.load(Ordering::SeqCst),
            1,
            "round {}: exactly one concurrent update may win",
            round
        );
    }
}

/// Readers pinned between commits each keep their own snapshot.
#[test]
fn snapshots_are_stable_across_history() {
    let (manager, table) = setup();

    let writer = manager.begin();
    let slot = table.insert(
        &writer,
        ProjectedRow::with_values(
            vec![0, 1],
            vec![Some(0u64.to_le_bytes().to_vec()), Some(vec![])],
        ),
    );
    manager.commit(&writer, || {});

    // Interleave: commit value v, pin a reader, repeat.
    let mut pinned = Vec::new();
    for v in 1..=5u64 {
        let updater = manager.begin();
        assert!(table.update(&updater, slot, fixed(v)));
        manager.commit(&updater, || {});
        pinned.push((v, manager.begin()));
    }

    // Each pinned reader sees the value committed just before it began,
    // regardless of all the later history.
    for (expected, reader) in &pinned {
        let mut out = ProjectedRow::new(vec![0]);
        assert!(table.select(reader, slot, &mut out));
        let got = u64::from_le_bytes(out.value(0).unwrap().try_into().unwrap());
        assert_eq!(got, *expected);
    }
    for (_, reader) in pinned {
        manager.commit(&reader, || {});
    }
}

/// An aborted insert is invisible afterwards, and a reader that raced the
/// abort never sees the uncommitted row.
#[test]
fn abort_rewinds_insert() {
    let (manager, table) = setup();

    let mut rng = <rand::rngs::StdRng as rand::SeedableRng>::seed_from_u64(1);
    let t1 = manager.begin();
    let slot = table.insert(&t1, random_row(&mut rng));

    // Concurrent reader: the uncommitted insert is already invisible.
    assert_eq!(read_fixed(&manager, &table, slot), None);

    manager.abort(&t1);
    assert_eq!(read_fixed(&manager, &table, slot), None);
}

/// Mixed random workload: every transaction either commits or aborts
/// cleanly, and the final state of each slot is the last committed update.
#[test]
fn randomized_workload_converges() {
    let (manager, table) = setup();
    let slots = populate_initial_table(&manager, &table, 8);

    let sim = simulate_oltp(&manager, &table, &slots, 200, 4, 5, 0.5);
    assert_eq!(sim.outcomes.len(), 200);
    assert!(sim.committed_count() > 0);

    // Replay committed updates in commit order; the table must agree.
    let mut expected: std::collections::HashMap<_, Option<Vec<u8>>> = Default::default();
    let mut committed: Vec<_> = sim
        .outcomes
        .iter()
        .filter(|o| o.commit_ts.is_some())
        .collect();
    committed.sort_by_key(|o| o.commit_ts.unwrap());
    for outcome in committed {
        for (slot, delta) in &outcome.updates {
            for idx in 0..delta.num_columns() as usize {
                let col = delta.col_id(idx);
                expected.insert((*slot, col), delta.value(idx).map(|v| v.to_vec()));
            }
        }
    }

    let verifier = manager.begin();
    for ((slot, col), expected_value) in expected {
        let mut out = ProjectedRow::new(vec![col]);
        assert!(table.select(&verifier, slot, &mut out));
        assert_eq!(out.value(0), expected_value.as_deref());
    }
    manager.commit(&verifier, || {});
}
