//! Silo-style optimistic concurrency control.
//!
//! Execution buffers writes locally and snapshots a version per record
//! read. Commit runs three phases: write-latch the write set in record
//! address order, validate every read-set version (try-latching records
//! not in the write set), then install all writes under one new version
//! number. Serialization happens the instant all write latches are held.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::storage::record::{Record, RecordWriteGuard};
use crate::txn::{record_addr, TxnOutcome};

struct ReadItem<K, V> {
    record: Arc<Record<K, V>>,
    version: u64,
}

struct WriteSlot<K, V> {
    record: Arc<Record<K, V>>,
    value: V,
}

/// Silo transaction context.
pub struct SiloTxn<K, V> {
    /// Reads in observation order.
    read_list: Vec<ReadItem<K, V>>,
    /// Record address to `read_list` index.
    read_index: HashMap<usize, usize>,
    /// Buffered writes keyed by record address. The map ordering is the
    /// phase-1 latch order, which keeps concurrent commits deadlock-free.
    write_set: BTreeMap<usize, WriteSlot<K, V>>,
    /// Latched to true on any contradiction observed during execution.
    must_abort: bool,
}

impl<K, V: Clone> SiloTxn<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            read_list: Vec::new(),
            read_index: HashMap::new(),
            write_set: BTreeMap::new(),
            must_abort: false,
        }
    }

    pub(crate) fn exec_read_record(&mut self, record: &Arc<Record<K, V>>) -> Option<V> {
        let (valid, value, version) = {
            let guard = record.read();
            (guard.valid, guard.value.clone(), guard.version)
        };

        let addr = record_addr(record);
        let buffered = self.write_set.get(&addr).map(|slot| slot.value.clone());

        // A record another transaction injected but never committed is
        // invisible unless this transaction wrote it itself.
        if buffered.is_none() && !valid {
            return None;
        }

        match self.read_index.get(&addr) {
            Some(&idx) => {
                if self.read_list[idx].version != version {
                    // The same record changed between two reads of this
                    // transaction; the abort decision is saved and taken
                    // at finish time.
                    self.must_abort = true;
                }
            }
            None => {
                self.read_index.insert(addr, self.read_list.len());
                self.read_list.push(ReadItem {
                    record: Arc::clone(record),
                    version,
                });
            }
        }

        buffered.or(value)
    }

    pub(crate) fn exec_write_record(&mut self, record: &Arc<Record<K, V>>, value: V) {
        let addr = record_addr(record);
        match self.write_set.get_mut(&addr) {
            Some(slot) => slot.value = value,
            None => {
                self.write_set.insert(
                    addr,
                    WriteSlot {
                        record: Arc::clone(record),
                        value,
                    },
                );
            }
        }
    }

    pub(crate) fn try_commit(&mut self, ser_counter: Option<&AtomicU64>) -> TxnOutcome {
        if self.must_abort {
            debug!("silo abort: contradiction during execution");
            return TxnOutcome {
                committed: false,
                ser_order: None,
            };
        }

        // Phase 1: write latches in ascending address order.
        let mut guards: HashMap<usize, RecordWriteGuard<K, V>> =
            HashMap::with_capacity(self.write_set.len());
        for (&addr, slot) in &self.write_set {
            guards.insert(addr, slot.record.write());
        }

        // <-- serialization point -->
        let ser_order = ser_counter.map(|counter| counter.fetch_add(1, Ordering::SeqCst));

        // Phase 2: read validation.
        for item in &self.read_list {
            let addr = record_addr(&item.record);
            let current = match guards.get(&addr) {
                Some(guard) => guard.version,
                None => match item.record.try_read() {
                    Some(guard) => guard.version,
                    None => {
                        // Another committer holds this record.
                        debug!("silo abort: read-set record latched by a writer");
                        return TxnOutcome {
                            committed: false,
                            ser_order,
                        };
                    }
                },
            };
            if current != item.version {
                debug!("silo abort: read-set version changed");
                return TxnOutcome {
                    committed: false,
                    ser_order,
                };
            }
        }

        // One greater than every version this transaction observed.
        let mut new_version = 0;
        for item in &self.read_list {
            new_version = new_version.max(item.version);
        }
        for guard in guards.values() {
            new_version = new_version.max(guard.version);
        }
        new_version += 1;

        // Phase 3: install writes and release latches.
        for (addr, slot) in &self.write_set {
            let mut guard = guards.remove(addr).expect("write latch held");
            guard.value = Some(slot.value.clone());
            guard.version = new_version;
            guard.valid = true;
        }

        TxnOutcome {
            committed: true,
            ser_order,
        }
    }
}
