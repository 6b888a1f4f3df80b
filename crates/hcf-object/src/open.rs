use std::collections::HashMap;

use hcf_types::Address;

use crate::error::{ObjectError, ObjectResult};
use crate::header::ObjectKind;

#[derive(Clone, Copy, Debug)]
struct OpenRecord {
    kind: ObjectKind,
    count: usize,
}

/// Open counts for the object headers of one container.
#[derive(Debug, Default)]
pub struct OpenObjects {
    records: HashMap<Address, OpenRecord>,
}

impl OpenObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more open of `addr` and return the new count.
    ///
    /// Reaching an already open object as a different kind means the
    /// metadata and the open table disagree.
    pub fn open(&mut self, addr: Address, kind: ObjectKind) -> ObjectResult<usize> {
        let record = self
            .records
            .entry(addr)
            .or_insert(OpenRecord { kind, count: 0 });
        if record.kind != kind {
            return Err(ObjectError::InconsistentState {
                addr,
                open_as: record.kind,
                requested: kind,
            });
        }
        record.count += 1;
        Ok(record.count)
    }

    /// Drop one open of `addr` and return how many remain.
    pub fn close(&mut self, addr: Address) -> ObjectResult<usize> {
        let record = self
            .records
            .get_mut(&addr)
            .ok_or(ObjectError::NotOpen(addr))?;
        record.count -= 1;
        let remaining = record.count;
        if remaining == 0 {
            self.records.remove(&addr);
        }
        Ok(remaining)
    }

    pub fn count(&self, addr: Address) -> usize {
        self.records.get(&addr).map_or(0, |r| r.count)
    }

    pub fn is_open(&self, addr: Address) -> bool {
        self.records.contains_key(&addr)
    }

    pub fn kind(&self, addr: Address) -> Option<ObjectKind> {
        self.records.get(&addr).map(|r| r.kind)
    }

    /// Number of distinct open objects.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
