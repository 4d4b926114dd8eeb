use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::Result;
use futures::future::BoxFuture;
use slotprint::{GuessRow, GuessStore, Slot, StoreError};

/// In-memory table keyed by slot with the same last-write-wins semantics as
/// the Postgres upsert.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<Slot, GuessRow>>,
    upserts: AtomicUsize,
    failing_upserts: AtomicUsize,
    failing_creates: AtomicUsize,
    creates: AtomicUsize,
    replaced: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: impl IntoIterator<Item = GuessRow>) -> Self {
        let store = Self::default();
        store
            .rows
            .lock()
            .expect("memory store poisoned")
            .extend(rows.into_iter().map(|row| (row.slot, row)));
        store
    }

    pub fn rows(&self) -> Vec<GuessRow> {
        self.rows
            .lock()
            .expect("memory store poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().expect("memory store poisoned").len()
    }

    pub fn max(&self) -> Option<Slot> {
        self.rows
            .lock()
            .expect("memory store poisoned")
            .keys()
            .next_back()
            .copied()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn replace_calls(&self) -> usize {
        self.replaced.load(Ordering::SeqCst)
    }

    pub fn create_table_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Makes the next `count` table preparations fail, like a database that
    /// is not accepting connections yet.
    pub fn fail_next_create_tables(&self, count: usize) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` upserts fail without writing anything.
    pub fn fail_next_upserts(&self, count: usize) {
        self.failing_upserts.store(count, Ordering::SeqCst);
    }
}

impl GuessStore for MemoryStore {
    fn create_table(&self, replace: bool) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.creates.fetch_add(1, Ordering::SeqCst);
            let pending_failures = self.failing_creates.load(Ordering::SeqCst);
            if pending_failures > 0 {
                self.failing_creates
                    .store(pending_failures - 1, Ordering::SeqCst);
                return Err(
                    StoreError::new("create_table", anyhow::anyhow!("connection refused")).into(),
                );
            }

            if replace {
                self.replaced.fetch_add(1, Ordering::SeqCst);
                self.rows.lock().expect("memory store poisoned").clear();
            }
            Ok(())
        })
    }

    fn upsert<'a>(&'a self, rows: &'a [GuessRow]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.upserts.fetch_add(1, Ordering::SeqCst);
            let pending_failures = self.failing_upserts.load(Ordering::SeqCst);
            if pending_failures > 0 {
                self.failing_upserts
                    .store(pending_failures - 1, Ordering::SeqCst);
                return Err(StoreError::new("upsert", anyhow::anyhow!("connection reset")).into());
            }

            let mut table = self.rows.lock().expect("memory store poisoned");
            for row in rows {
                table.insert(row.slot, row.clone());
            }
            Ok(())
        })
    }

    fn max_slot(&self) -> BoxFuture<'_, Result<Option<Slot>>> {
        Box::pin(async move { Ok(self.max()) })
    }
}
