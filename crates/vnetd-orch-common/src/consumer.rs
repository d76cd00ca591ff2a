//! Batched consumption of keyed table change events.

use std::collections::{BTreeMap, VecDeque};

/// Operation type carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Set operation (add or update).
    Set,
    /// Delete operation.
    Del,
}

impl Operation {
    /// Returns true if this is a Set operation.
    pub fn is_set(&self) -> bool {
        matches!(self, Operation::Set)
    }

    /// Returns true if this is a Del operation.
    pub fn is_del(&self) -> bool {
        matches!(self, Operation::Del)
    }
}

/// Field-value pairs of one event.
pub type FieldValues = Vec<(String, String)>;

/// One change event: a compound key, an operation, and field-values.
#[derive(Debug, Clone)]
pub struct KeyOpFieldsValues {
    /// The compound key (e.g., "Vnet_2000" or "Vnet_2000:10.0.0.0/24").
    pub key: String,
    /// The operation (Set or Del).
    pub op: Operation,
    /// Field-value pairs; empty for Del operations.
    pub fvs: FieldValues,
}

impl KeyOpFieldsValues {
    /// Creates a Set event.
    pub fn set(key: impl Into<String>, fvs: FieldValues) -> Self {
        Self {
            key: key.into(),
            op: Operation::Set,
            fvs,
        }
    }

    /// Creates a Del event.
    pub fn del(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op: Operation::Del,
            fvs: vec![],
        }
    }

    /// Returns the value of a field, if present.
    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.fvs
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }
}

/// Configuration for a [`Consumer`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Table name this consumer is attached to.
    pub table_name: String,
    /// Batch size hint for the delivery mechanism.
    pub batch_size: usize,
}

impl ConsumerConfig {
    /// Creates a consumer config for the named table.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            batch_size: 128,
        }
    }

    /// Overrides the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Consumer for one logical table.
///
/// Buffers incoming events per key and hands them out in key order with
/// the delivery-mechanism coalescing rules applied:
///
/// - consecutive SETs on a key merge, newer field values winning;
/// - a DEL supersedes pending SETs on its key;
/// - DEL followed by SET keeps both, in order.
///
/// Events an orch could not apply yet are pushed back with [`retry`] and
/// reappear on the next drain.
///
/// [`retry`]: Consumer::retry
pub struct Consumer {
    config: ConsumerConfig,
    to_sync: BTreeMap<String, VecDeque<KeyOpFieldsValues>>,
    pending: usize,
}

impl Consumer {
    /// Creates a consumer with the given configuration.
    pub fn new(config: ConsumerConfig) -> Self {
        Self {
            config,
            to_sync: BTreeMap::new(),
            pending: 0,
        }
    }

    /// Returns the table name.
    pub fn table_name(&self) -> &str {
        &self.config.table_name
    }

    /// Returns true if events are pending.
    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    /// Returns the number of pending events.
    pub fn pending_count(&self) -> usize {
        self.pending
    }

    /// Enqueues a batch of events, applying the coalescing rules.
    pub fn add_to_sync(&mut self, events: impl IntoIterator<Item = KeyOpFieldsValues>) {
        for event in events {
            self.enqueue(event);
        }
    }

    fn enqueue(&mut self, event: KeyOpFieldsValues) {
        let queue = self.to_sync.entry(event.key.clone()).or_default();
        match event.op {
            Operation::Del => {
                // A DEL makes everything queued before it for this key moot.
                self.pending -= queue.len();
                queue.clear();
                queue.push_back(event);
                self.pending += 1;
            }
            Operation::Set => {
                if let Some(last) = queue.back_mut() {
                    if last.op == Operation::Set {
                        for (field, value) in event.fvs {
                            match last.fvs.iter_mut().find(|(f, _)| *f == field) {
                                Some(existing) => existing.1 = value,
                                None => last.fvs.push((field, value)),
                            }
                        }
                        return;
                    }
                }
                queue.push_back(event);
                self.pending += 1;
            }
        }
    }

    /// Removes and returns all pending events, grouped by key in key order.
    pub fn drain(&mut self) -> Vec<KeyOpFieldsValues> {
        let mut out = Vec::with_capacity(self.pending);
        for (_, mut queue) in std::mem::take(&mut self.to_sync) {
            out.extend(queue.drain(..));
        }
        self.pending = 0;
        out
    }

    /// Pushes an event back for the next pass.
    ///
    /// The event goes to the front of its key's queue so ordering within
    /// the key is preserved.
    pub fn retry(&mut self, event: KeyOpFieldsValues) {
        let queue = self.to_sync.entry(event.key.clone()).or_default();
        queue.push_front(event);
        self.pending += 1;
    }

    /// Dumps pending events for debugging.
    pub fn dump(&self) -> Vec<String> {
        self.to_sync
            .iter()
            .flat_map(|(key, queue)| {
                queue.iter().map(move |e| {
                    format!(
                        "{} {} {:?}",
                        if e.op.is_set() { "SET" } else { "DEL" },
                        key,
                        e.fvs
                    )
                })
            })
            .collect()
    }
}
