//! Silo with hierarchical validation.
//!
//! Scans can read wide swaths of records, which makes Silo's per-record
//! validation cost proportional to scan width. This variant additionally
//! snapshots a version (`hv_ver`) per traversed tree page. If a page's
//! version is still intact at commit time and no other writer is in
//! flight beneath it (`hv_sem`), every record under that subtree is
//! unchanged and validation jumps past all of them in one step.
//!
//! Subtree spans are tracked only while a scan is active. Each span
//! remembers where its records start in the read lists and the page's
//! high key; it closes (its end indices are fixed) as soon as the leaf
//! walk reaches a node starting at or past that high key, or when the
//! scan finishes. A same-height sibling begins exactly at the previous
//! node's high key, and an internal node's span ends there too, so a
//! skip never certifies records outside the subtree it was snapshotted
//! for. Put and Get traversals register pages with empty spans, so they
//! fall back to plain per-record checks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::storage::page::{Page, PageCore};
use crate::storage::record::{Record, RecordWriteGuard};
use crate::txn::{page_addr, record_addr, TxnOutcome};

struct RecordEntry<K, V> {
    record: Arc<Record<K, V>>,
    version: u64,
}

struct PageEntry<K, V> {
    page: Arc<Page<K, V>>,
    version: u64,
    /// Where this page's covered records begin in `record_list`.
    record_start: usize,
    /// One past the covered records; fixed when the span closes.
    record_end: usize,
    /// `page_list` index to resume from after skipping the subtree.
    page_skip_to: usize,
}

enum WriteItem<K, V> {
    Record { record: Arc<Record<K, V>>, value: V },
    Page { page: Arc<Page<K, V>>, height: u32 },
}

/// An open subtree span of the in-flight scan.
struct SpanFrame<K> {
    /// Index of the span's page in `page_list`.
    at: usize,
    /// Upper bound of the page's subtree; `None` for right-most nodes
    /// (and the root), which only close when the scan finishes.
    high: Option<K>,
}

/// Silo-HV transaction context.
pub struct SiloHvTxn<K, V> {
    /// Records read, in traversal order.
    record_list: Vec<RecordEntry<K, V>>,
    /// Record address to `record_list` index.
    record_index: HashMap<usize, usize>,
    /// Pages traversed by reads, in traversal order.
    page_list: Vec<PageEntry<K, V>>,
    /// Records to write and pages whose subtree versions must advance.
    write_list: Vec<WriteItem<K, V>>,
    /// Record address to `write_list` index.
    write_record_index: HashMap<usize, usize>,
    /// Addresses of pages already in `write_list`; each page's `hv_sem`
    /// moves once per transaction regardless of traversal count.
    write_page_set: HashSet<usize>,
    /// Open subtree spans of the current scan, outermost first.
    open_spans: Vec<SpanFrame<K>>,
    in_scan: bool,
    /// Measurement toggle: skip phase 2 entirely.
    no_read_validation: bool,
    must_abort: bool,
}

impl<K: Ord + Clone, V: Clone> SiloHvTxn<K, V> {
    pub(crate) fn new(no_read_validation: bool) -> Self {
        Self {
            record_list: Vec::new(),
            record_index: HashMap::new(),
            page_list: Vec::new(),
            write_list: Vec::new(),
            write_record_index: HashMap::new(),
            write_page_set: HashSet::new(),
            open_spans: Vec::new(),
            in_scan: false,
            no_read_validation,
            must_abort: false,
        }
    }

    pub(crate) fn exec_read_record(&mut self, record: &Arc<Record<K, V>>) -> Option<V> {
        let (valid, value, version) = {
            let guard = record.read();
            (guard.valid, guard.value.clone(), guard.version)
        };

        let addr = record_addr(record);
        let buffered = self.write_record_index.get(&addr).map(|&idx| {
            match &self.write_list[idx] {
                WriteItem::Record { value, .. } => value.clone(),
                WriteItem::Page { .. } => unreachable!("record index points at a page item"),
            }
        });

        if buffered.is_none() && !valid {
            return None;
        }

        match self.record_index.get(&addr) {
            Some(&idx) => {
                if self.record_list[idx].version != version {
                    self.must_abort = true;
                }
            }
            None => {
                self.record_index.insert(addr, self.record_list.len());
                self.record_list.push(RecordEntry {
                    record: Arc::clone(record),
                    version,
                });
            }
        }

        buffered.or(value)
    }

    pub(crate) fn exec_write_record(&mut self, record: &Arc<Record<K, V>>, value: V) {
        let addr = record_addr(record);
        match self.write_record_index.get(&addr) {
            Some(&idx) => match &mut self.write_list[idx] {
                WriteItem::Record { value: slot, .. } => *slot = value,
                WriteItem::Page { .. } => unreachable!("record index points at a page item"),
            },
            None => {
                self.write_record_index.insert(addr, self.write_list.len());
                self.write_list.push(WriteItem::Record {
                    record: Arc::clone(record),
                    value,
                });
            }
        }
    }

    pub(crate) fn exec_read_traverse_node(&mut self, page: &Arc<Page<K, V>>, core: &PageCore<K, V>) {
        let version = page.hv_ver.load(Ordering::Acquire);
        let at = self.page_list.len();

        if !self.in_scan {
            // No subtree bookkeeping outside scans: the span is empty and
            // a clean check skips nothing.
            let record_at = self.record_list.len();
            self.page_list.push(PageEntry {
                page: Arc::clone(page),
                version,
                record_start: record_at,
                record_end: record_at,
                page_skip_to: at + 1,
            });
            return;
        }

        // Any open span whose high key is at or below this node's first
        // key has been fully walked: the previous leaf's sibling starts
        // exactly at its high key, and an internal node's subtree ends at
        // its own.
        let min_key = core.keys.first();
        loop {
            let exited = match (self.open_spans.last(), min_key) {
                (Some(frame), Some(min)) => {
                    frame.high.as_ref().map_or(false, |high| high <= min)
                }
                _ => false,
            };
            if !exited {
                break;
            }
            let frame = self.open_spans.pop().expect("open span present");
            self.close_span(frame.at);
        }

        self.open_spans.push(SpanFrame {
            at,
            high: core.high_key().cloned(),
        });
        let record_at = self.record_list.len();
        self.page_list.push(PageEntry {
            page: Arc::clone(page),
            version,
            record_start: record_at,
            record_end: record_at,
            page_skip_to: at + 1,
        });
    }

    pub(crate) fn exec_write_traverse_node(&mut self, page: &Arc<Page<K, V>>, height: u32) {
        if self.write_page_set.insert(page_addr(page)) {
            self.write_list.push(WriteItem::Page {
                page: Arc::clone(page),
                height,
            });
        }
    }

    pub(crate) fn exec_enter_scan(&mut self) {
        debug_assert!(self.open_spans.is_empty());
        self.in_scan = true;
    }

    pub(crate) fn exec_leave_scan(&mut self) {
        while let Some(frame) = self.open_spans.pop() {
            self.close_span(frame.at);
        }
        self.in_scan = false;
    }

    fn close_span(&mut self, at: usize) {
        let record_end = self.record_list.len();
        let page_skip_to = self.page_list.len();
        let entry = &mut self.page_list[at];
        entry.record_end = record_end;
        entry.page_skip_to = page_skip_to;
    }

    pub(crate) fn try_commit(&mut self, ser_counter: Option<&AtomicU64>) -> TxnOutcome {
        if self.must_abort {
            debug!("silo-hv abort: contradiction during execution");
            return TxnOutcome {
                committed: false,
                ser_order: None,
            };
        }

        // Phase 1: bring the write list into the global latch order --
        // pages first by decreasing height then address, records after by
        // address. Records take write latches; pages announce an
        // in-flight writer on their semaphore.
        self.write_list.sort_by_key(|item| match item {
            WriteItem::Page { page, height } => (0u8, u32::MAX - height, page_addr(page)),
            WriteItem::Record { record, .. } => (1u8, 0, record_addr(record)),
        });

        let mut guards: HashMap<usize, RecordWriteGuard<K, V>> = HashMap::new();
        for item in &self.write_list {
            match item {
                WriteItem::Record { record, .. } => {
                    guards.insert(record_addr(record), record.write());
                }
                WriteItem::Page { page, .. } => {
                    page.hv_sem.fetch_add(1, Ordering::AcqRel);
                }
            }
        }

        // <-- serialization point -->
        let ser_order = ser_counter.map(|counter| counter.fetch_add(1, Ordering::SeqCst));

        // Phase 2: hierarchical read validation.
        if !self.no_read_validation && !self.validate_reads(&guards) {
            drop(guards);
            self.release_page_sems();
            return TxnOutcome {
                committed: false,
                ser_order,
            };
        }

        // One greater than every version this transaction observed,
        // including subtree version snapshots and the current versions of
        // everything it is about to write.
        let mut new_version = 0;
        for entry in &self.record_list {
            new_version = new_version.max(entry.version);
        }
        for entry in &self.page_list {
            new_version = new_version.max(entry.version);
        }
        for item in &self.write_list {
            match item {
                WriteItem::Record { record, .. } => {
                    let guard = &guards[&record_addr(record)];
                    new_version = new_version.max(guard.version);
                }
                WriteItem::Page { page, .. } => {
                    new_version = new_version.max(page.hv_ver.load(Ordering::Acquire));
                }
            }
        }
        new_version += 1;

        // Phase 3: install. Subtree versions are published before the
        // semaphore drops so validators never see a clean semaphore with
        // a stale version.
        for item in &self.write_list {
            match item {
                WriteItem::Record { record, value } => {
                    let mut guard = guards
                        .remove(&record_addr(record))
                        .expect("write latch held");
                    guard.value = Some(value.clone());
                    guard.version = new_version;
                    guard.valid = true;
                }
                WriteItem::Page { page, .. } => {
                    page.hv_ver.store(new_version, Ordering::Release);
                    page.hv_sem.fetch_sub(1, Ordering::Release);
                }
            }
        }

        TxnOutcome {
            committed: true,
            ser_order,
        }
    }

    /// Walks `page_list` in traversal order, validating interleaved
    /// records record-wise and skipping whole subtrees whose pages are
    /// provably untouched.
    fn validate_reads(&self, guards: &HashMap<usize, RecordWriteGuard<K, V>>) -> bool {
        let mut record_idx = 0;
        let mut page_idx = 0;

        while page_idx < self.page_list.len() {
            let entry = &self.page_list[page_idx];

            while record_idx < entry.record_start && record_idx < self.record_list.len() {
                if !self.validate_record(record_idx, guards) {
                    return false;
                }
                record_idx += 1;
            }

            let sem = entry.page.hv_sem.load(Ordering::Acquire);
            let only_me = sem == 1 && self.write_page_set.contains(&page_addr(&entry.page));
            if sem > 0 && !only_me {
                // Another writer may be mid-commit under this subtree;
                // fall through to record-wise validation.
                page_idx += 1;
                continue;
            }
            if entry.page.hv_ver.load(Ordering::Acquire) == entry.version {
                // Untouched subtree: jump both lists past it.
                page_idx = entry.page_skip_to.max(page_idx + 1);
                record_idx = record_idx.max(entry.record_end);
                continue;
            }
            page_idx += 1;
        }

        while record_idx < self.record_list.len() {
            if !self.validate_record(record_idx, guards) {
                return false;
            }
            record_idx += 1;
        }
        true
    }

    fn validate_record(
        &self,
        idx: usize,
        guards: &HashMap<usize, RecordWriteGuard<K, V>>,
    ) -> bool {
        let entry = &self.record_list[idx];
        let addr = record_addr(&entry.record);
        let current = match guards.get(&addr) {
            Some(guard) => guard.version,
            None => match entry.record.try_read() {
                Some(guard) => guard.version,
                None => {
                    debug!("silo-hv abort: read-set record latched by a writer");
                    return false;
                }
            },
        };
        if current != entry.version {
            debug!("silo-hv abort: read-set version changed");
            return false;
        }
        true
    }

    fn release_page_sems(&self) {
        for item in &self.write_list {
            if let WriteItem::Page { page, .. } = item {
                page.hv_sem.fetch_sub(1, Ordering::Release);
            }
        }
    }
}
