//! Get/set contract shared by the feed cache and the session store.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};

/// Externally synchronized key-value store. Last writer wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

/// A store backed by one keyspace partition.
#[derive(Clone)]
pub struct PartitionStore {
    partition: PartitionHandle,
}

impl PartitionStore {
    pub fn new(keyspace: &Keyspace, name: &str) -> Result<PartitionStore> {
        let partition = keyspace.open_partition(name, PartitionCreateOptions::default())?;
        Ok(PartitionStore { partition })
    }
}

impl KeyValueStore for PartitionStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.partition.get(key)?.map(|bytes| bytes.to_vec()))
    }
    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.partition.insert(key, value)?;
        Ok(())
    }
    fn delete(&self, key: &str) -> Result<()> {
        self.partition.remove(key)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or_default()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self.entries.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        Ok(entries.get(key).cloned())
    }
    fn set(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| anyhow!("memory store poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use fjall::Config;
    use tempfile::tempdir;

    use super::{KeyValueStore, MemoryStore, PartitionStore};

    fn exercise(store: &dyn KeyValueStore) -> Result<()> {
        assert_eq!(store.get("k")?, None);
        store.set("k", b"one".to_vec())?;
        store.set("k", b"two".to_vec())?;
        assert_eq!(store.get("k")?, Some(b"two".to_vec()));
        store.delete("k")?;
        store.delete("k")?;
        assert_eq!(store.get("k")?, None);
        Ok(())
    }

    #[test]
    fn memory_store_contract() -> Result<()> {
        let store = MemoryStore::new();
        exercise(&store)?;
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn partition_store_contract() -> Result<()> {
        let tmp_dir = tempdir()?;
        let keyspace = Config::new(tmp_dir.path()).temporary(true).open()?;
        exercise(&PartitionStore::new(&keyspace, "kv_test")?)
    }
}
