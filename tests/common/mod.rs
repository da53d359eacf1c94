//! Shared workload harness: randomized OLTP transactions over one table,
//! with enough bookkeeping to check the log stream afterwards.
#![allow(dead_code)]

use pyrite::common::config::Timestamp;
use pyrite::common::tuple_slot::TupleSlot;
use pyrite::concurrency::transaction_manager::TransactionManager;
use pyrite::storage::data_table::DataTable;
use pyrite::storage::layout::{AttrSize, BlockLayout};
use pyrite::storage::projected_row::ProjectedRow;
use rand::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

pub fn test_layout() -> Arc<BlockLayout> {
    Arc::new(BlockLayout::new(vec![AttrSize::Fixed(8), AttrSize::Varlen]))
}

pub fn random_row(rng: &mut StdRng) -> ProjectedRow {
    ProjectedRow::with_values(
        vec![0, 1],
        vec![
            Some(rng.gen::<u64>().to_le_bytes().to_vec()),
            Some(random_varlen(rng)),
        ],
    )
}

/// A delta over a random non-empty column subset; occasionally writes null.
pub fn random_delta(rng: &mut StdRng) -> ProjectedRow {
    let col_ids: Vec<u16> = match rng.gen_range(0..3) {
        0 => vec![0],
        1 => vec![1],
        _ => vec![0, 1],
    };
    let values = col_ids
        .iter()
        .map(|&col| {
            if rng.gen_bool(0.1) {
                None
            } else if col == 0 {
                Some(rng.gen::<u64>().to_le_bytes().to_vec())
            } else {
                Some(random_varlen(rng))
            }
        })
        .collect();
    ProjectedRow::with_values(col_ids, values)
}

fn random_varlen(rng: &mut StdRng) -> Vec<u8> {
    let len = rng.gen_range(0..24);
    (0..len).map(|_| rng.gen()).collect()
}

/// What one randomized transaction did, for checking against the log.
pub struct TxnOutcome {
    pub begin_ts: Timestamp,
    pub commit_ts: Option<Timestamp>,
    pub updates: HashMap<TupleSlot, ProjectedRow>,
}

pub struct OltpSimulation {
    pub outcomes: Vec<TxnOutcome>,
    pub commit_callbacks_fired: Arc<AtomicUsize>,
}

impl OltpSimulation {
    pub fn committed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.commit_ts.is_some()).count()
    }

    pub fn aborted_count(&self) -> usize {
        self.outcomes.len() - self.committed_count()
    }
}

/// Bootstraps the table with `size` random rows in a single transaction.
///
/// Call this before any other transaction so the populating transaction is
/// the timestamp-zero bootstrap that log readers skip.
pub fn populate_initial_table(
    manager: &TransactionManager,
    table: &Arc<DataTable>,
    size: usize,
) -> Vec<TupleSlot> {
    let mut rng = StdRng::seed_from_u64(0xDB);
    let txn = manager.begin();
    assert_eq!(txn.start_time(), 0, "populate must run first");
    let slots = (0..size)
        .map(|_| table.insert(&txn, random_row(&mut rng)))
        .collect();
    manager.commit(&txn, || {});
    slots
}

/// Runs `num_transactions` randomized transactions over `num_threads` worker
/// threads. Each transaction performs `txn_length` operations, choosing an
/// update with probability `update_ratio` and a select otherwise; a
/// transaction never updates the same tuple twice, so every committed update
/// corresponds to exactly one REDO record.
pub fn simulate_oltp(
    manager: &Arc<TransactionManager>,
    table: &Arc<DataTable>,
    slots: &[TupleSlot],
    num_transactions: usize,
    num_threads: usize,
    txn_length: usize,
    update_ratio: f64,
) -> OltpSimulation {
    let next_txn = AtomicUsize::new(0);
    let outcomes = Mutex::new(Vec::with_capacity(num_transactions));
    let commit_callbacks_fired = Arc::new(AtomicUsize::new(0));

    thread::scope(|scope| {
        for _ in 0..num_threads {
            scope.spawn(|| loop {
                let txn_seed = next_txn.fetch_add(1, Ordering::SeqCst);
                if txn_seed >= num_transactions {
                    break;
                }
                let outcome = simulate_one_transaction(
                    manager,
                    table,
                    slots,
                    txn_length,
                    update_ratio,
                    txn_seed as u64,
                    &commit_callbacks_fired,
                );
                outcomes.lock().unwrap().push(outcome);
            });
        }
    });

    OltpSimulation {
        outcomes: outcomes.into_inner().unwrap(),
        commit_callbacks_fired,
    }
}

fn simulate_one_transaction(
    manager: &Arc<TransactionManager>,
    table: &Arc<DataTable>,
    slots: &[TupleSlot],
    txn_length: usize,
    update_ratio: f64,
    seed: u64,
    callbacks: &Arc<AtomicUsize>,
) -> TxnOutcome {
    let mut rng = StdRng::seed_from_u64(seed);
    let txn = manager.begin();
    let mut updates: HashMap<TupleSlot, ProjectedRow> = HashMap::new();
    let mut aborted = false;

    for _ in 0..txn_length {
        let slot = *slots.choose(&mut rng).unwrap();
        if rng.gen_bool(update_ratio) {
            if updates.contains_key(&slot) {
                continue;
            }
            let delta = random_delta(&mut rng);
            if table.update(&txn, slot, delta.clone()) {
                updates.insert(slot, delta);
            } else {
                aborted = true;
                break;
            }
        } else {
            let mut out = ProjectedRow::new(table.layout().all_cols());
            table.select(&txn, slot, &mut out);
        }
    }

    let begin_ts = txn.start_time();
    if aborted {
        manager.abort(&txn);
        TxnOutcome {
            begin_ts,
            commit_ts: None,
            updates,
        }
    } else {
        let counter = Arc::clone(callbacks);
        let commit_ts = manager.commit(&txn, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        TxnOutcome {
            begin_ts,
            commit_ts: Some(commit_ts),
            updates,
        }
    }
}
