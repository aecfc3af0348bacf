// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Key-value tables backing the cib.

use crate::error::Error;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// A table of values keyed by their string `db_key`. Keys are ordered
/// bytewise and can be scanned by prefix.
pub trait Table<V>: Send {
    fn get(&self, key: &str) -> Result<Option<V>, Error>;

    fn add(&mut self, key: &str, value: &V) -> Result<(), Error>;

    /// Remove a row, returning it if it was present.
    fn delete(&mut self, key: &str) -> Result<Option<V>, Error>;

    /// Every row whose key starts with `prefix`, in key order. An empty
    /// prefix scans the whole table.
    fn scan(&self, prefix: &str) -> Result<Vec<(String, V)>, Error>;

    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemTable<V> {
    rows: BTreeMap<String, V>,
}

impl<V> Default for MemTable<V> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

impl<V: Clone + Send> Table<V> for MemTable<V> {
    fn get(&self, key: &str) -> Result<Option<V>, Error> {
        Ok(self.rows.get(key).cloned())
    }

    fn add(&mut self, key: &str, value: &V) -> Result<(), Error> {
        self.rows.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<Option<V>, Error> {
        Ok(self.rows.remove(key))
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, V)>, Error> {
        Ok(self
            .rows
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// A table stored in a sled tree with JSON encoded values.
pub struct SledTable<V> {
    tree: sled::Tree,
    _value: PhantomData<fn() -> V>,
}

impl<V> SledTable<V> {
    pub fn open(db: &sled::Db, name: &str) -> Result<Self, Error> {
        Ok(Self {
            tree: db.open_tree(name)?,
            _value: PhantomData,
        })
    }
}

impl<V: Serialize + DeserializeOwned> Table<V> for SledTable<V> {
    fn get(&self, key: &str) -> Result<Option<V>, Error> {
        match self.tree.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn add(&mut self, key: &str, value: &V) -> Result<(), Error> {
        let value = serde_json::to_vec(value)?;
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<Option<V>, Error> {
        match self.tree.remove(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, prefix: &str) -> Result<Vec<(String, V)>, Error> {
        self.tree
            .scan_prefix(prefix)
            .map(|item| -> Result<(String, V), Error> {
                let (key, value) = item?;
                let key = String::from_utf8_lossy(&key).to_string();
                Ok((key, serde_json::from_slice(&value)?))
            })
            .collect()
    }

    fn flush(&self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }
}
