// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present ARI Contributors

//! Generic RIB object store for miscellaneous configuration-shaped state
//! (e.g. `/local/address`, `/dif/name`) that does not warrant a typed
//! structure of its own the way DFT/LFDB/Neighbor-Candidates do. Kept from
//! the original flat-map RIB design for the long tail of small facts a DIF
//! member tracks about itself, with a change log so neighbours can request
//! an incremental sync instead of a full snapshot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::RibError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RibValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Bytes(Vec<u8>),
}

impl RibValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            RibValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RibValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            RibValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RibObject {
    pub name: String,
    pub class: String,
    pub value: RibValue,
    pub version: u64,
    pub last_modified: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RibChange {
    Created(RibObject),
    Updated(RibObject),
    Deleted(String),
}

#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: HashMap<String, RibObject>,
    version: u64,
    change_log: Vec<(u64, RibChange)>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    pub fn current_version(&self) -> u64 {
        self.version
    }

    pub fn create(&mut self, name: String, class: String, value: RibValue) -> Result<u64, RibError> {
        if self.objects.contains_key(&name) {
            return Err(RibError::AlreadyExists(name));
        }
        let version = self.bump();
        let obj = RibObject {
            name: name.clone(),
            class,
            value,
            version,
            last_modified: version,
        };
        self.objects.insert(name, obj.clone());
        self.change_log.push((version, RibChange::Created(obj)));
        Ok(version)
    }

    pub fn read(&self, name: &str) -> Result<RibObject, RibError> {
        self.objects
            .get(name)
            .cloned()
            .ok_or_else(|| RibError::NotFound(name.to_string()))
    }

    pub fn update(&mut self, name: &str, value: RibValue) -> Result<u64, RibError> {
        let version = self.bump();
        let obj = self
            .objects
            .get_mut(name)
            .ok_or_else(|| RibError::NotFound(name.to_string()))?;
        obj.value = value;
        obj.version = version;
        obj.last_modified = version;
        self.change_log.push((version, RibChange::Updated(obj.clone())));
        Ok(version)
    }

    pub fn delete(&mut self, name: &str) -> Result<u64, RibError> {
        if !self.objects.contains_key(name) {
            return Err(RibError::NotFound(name.to_string()));
        }
        self.objects.remove(name);
        let version = self.bump();
        self.change_log.push((version, RibChange::Deleted(name.to_string())));
        Ok(version)
    }

    pub fn list_by_class(&self, class: &str) -> Vec<RibObject> {
        self.objects
            .values()
            .filter(|o| o.class == class)
            .cloned()
            .collect()
    }

    pub fn list_all(&self) -> Vec<RibObject> {
        self.objects.values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.objects.len()
    }

    /// Returns every change after `since_version`, or an error if the
    /// change log no longer covers that range (caller should fall back to
    /// a full snapshot).
    pub fn get_changes_since(&self, since_version: u64) -> Result<Vec<RibChange>, RibError> {
        if let Some((oldest, _)) = self.change_log.first() {
            if since_version + 1 < *oldest {
                return Err(RibError::OperationFailed(
                    "requested version predates change log retention".into(),
                ));
            }
        }
        Ok(self
            .change_log
            .iter()
            .filter(|(v, _)| *v > since_version)
            .map(|(_, c)| c.clone())
            .collect())
    }

    pub fn clear(&mut self) {
        self.objects.clear();
        self.change_log.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_read_round_trips() {
        let mut store = ObjectStore::new();
        store
            .create("/x".into(), "test".into(), RibValue::Integer(5))
            .unwrap();
        assert_eq!(store.read("/x").unwrap().value.as_integer(), Some(5));
    }

    #[test]
    fn create_twice_fails() {
        let mut store = ObjectStore::new();
        store
            .create("/x".into(), "test".into(), RibValue::Integer(5))
            .unwrap();
        assert!(store
            .create("/x".into(), "test".into(), RibValue::Integer(6))
            .is_err());
    }

    #[test]
    fn changes_since_tracks_creates_updates_deletes() {
        let mut store = ObjectStore::new();
        store
            .create("/a".into(), "t".into(), RibValue::Integer(1))
            .unwrap();
        let v1 = store.current_version();
        store
            .create("/b".into(), "t".into(), RibValue::Integer(2))
            .unwrap();
        let changes = store.get_changes_since(v1).unwrap();
        assert_eq!(changes.len(), 1);
        store.update("/a", RibValue::Integer(9)).unwrap();
        let v3 = store.current_version();
        store.delete("/b").unwrap();
        let changes = store.get_changes_since(v3).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(matches!(changes[0], RibChange::Deleted(_)));
    }
}
