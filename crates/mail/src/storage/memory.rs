//! In-memory outbox ledger
//!
//! Used by tests and by hosts that do not need the ledger to survive a
//! restart.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

use super::OutboxStore;
use crate::models::OutboxEntry;

/// In-memory implementation of OutboxStore
pub struct InMemoryOutbox {
    entries: RwLock<HashMap<String, OutboxEntry>>,
}

impl InMemoryOutbox {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn sorted(mut entries: Vec<OutboxEntry>) -> Vec<OutboxEntry> {
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        entries
    }
}

impl Default for InMemoryOutbox {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboxStore for InMemoryOutbox {
    fn save(&self, entry: &OutboxEntry) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<OutboxEntry>> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(id).cloned())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        entries.remove(id);
        Ok(())
    }

    fn list_for_account(&self, account_id: &str) -> Result<Vec<OutboxEntry>> {
        let entries = self.entries.read().unwrap();
        Ok(Self::sorted(
            entries
                .values()
                .filter(|e| e.account_id == account_id)
                .cloned()
                .collect(),
        ))
    }

    fn list_all(&self) -> Result<Vec<OutboxEntry>> {
        let entries = self.entries.read().unwrap();
        Ok(Self::sorted(entries.values().cloned().collect()))
    }

    fn count(&self) -> Result<usize> {
        Ok(self.entries.read().unwrap().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutboxStatus;

    fn entry(account: &str, message_id: &str) -> OutboxEntry {
        OutboxEntry::staged(account, message_id, message_id, "Hello", vec!["bob@x".into()])
    }

    #[test]
    fn test_save_get_remove() {
        let store = InMemoryOutbox::new();
        let e = entry("work", "<m1@x>");

        store.save(&e).unwrap();
        assert_eq!(store.get(&e.id).unwrap(), Some(e.clone()));
        assert_eq!(store.count().unwrap(), 1);

        store.remove(&e.id).unwrap();
        assert!(store.get(&e.id).unwrap().is_none());
        // Removing twice is fine
        store.remove(&e.id).unwrap();
    }

    #[test]
    fn test_save_replaces() {
        let store = InMemoryOutbox::new();
        let e = entry("work", "<m1@x>");
        store.save(&e).unwrap();

        let failed = e.clone().failed("timeout");
        store.save(&failed).unwrap();

        let loaded = store.get(&e.id).unwrap().unwrap();
        assert_eq!(loaded.status, OutboxStatus::Failed);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_list_for_account() {
        let store = InMemoryOutbox::new();
        store.save(&entry("work", "<m1@x>")).unwrap();
        store.save(&entry("home", "<m2@x>")).unwrap();
        store.save(&entry("work", "<m3@x>")).unwrap();

        let work = store.list_for_account("work").unwrap();
        assert_eq!(work.len(), 2);
        assert!(work.iter().all(|e| e.account_id == "work"));
        assert_eq!(store.list_all().unwrap().len(), 3);
    }
}
