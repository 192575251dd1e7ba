//! Map where several alias keys resolve to one value

use std::collections::HashMap;

/// A value store addressable through any of several string aliases.
///
/// Guide channels are matched against playlists by channel id, XMLTV id, or
/// display name; all aliases of one channel must land on the same programme
/// list. Inserting under a key that already aliases another record re-points
/// that alias to the new record.
#[derive(Debug, Clone, Default)]
pub struct MultiKeyMap<V> {
    records: HashMap<u64, (Vec<String>, V)>,
    aliases: HashMap<String, u64>,
    next_id: u64,
}

impl<V> MultiKeyMap<V> {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            aliases: HashMap::new(),
            next_id: 0,
        }
    }

    /// Insert a value reachable through every key in `keys`
    pub fn insert(&mut self, keys: Vec<String>, value: V) {
        let id = self.next_id;
        self.next_id += 1;
        for key in &keys {
            if let Some(old_id) = self.aliases.insert(key.clone(), id) {
                self.detach_alias(old_id, key);
            }
        }
        self.records.insert(id, (keys, value));
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        let id = self.aliases.get(key)?;
        self.records.get(id).map(|(_, value)| value)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        let id = *self.aliases.get(key)?;
        self.records.get_mut(&id).map(|(_, value)| value)
    }

    /// All aliases of the record that `key` belongs to
    pub fn keys_for(&self, key: &str) -> Option<&[String]> {
        let id = self.aliases.get(key)?;
        self.records.get(id).map(|(keys, _)| keys.as_slice())
    }

    /// Remove the whole record that `key` belongs to
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let id = self.aliases.remove(key)?;
        let (keys, value) = self.records.remove(&id)?;
        for alias in keys {
            self.aliases.remove(&alias);
        }
        Some(value)
    }

    /// Resolve a record by the first key, creating it when absent
    ///
    /// Only the first key identifies the record; two records may carry the
    /// same secondary alias (a shared display name) without being merged.
    /// Remaining keys are attached as aliases, stolen from whichever record
    /// held them before (last wins).
    pub fn get_or_insert_with(&mut self, keys: Vec<String>, default: impl FnOnce() -> V) -> &mut V {
        let primary = keys.first().cloned().unwrap_or_default();
        let id = match self.aliases.get(&primary).copied() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                self.records.insert(id, (Vec::new(), default()));
                id
            }
        };
        for key in keys {
            if let Some(old_id) = self.aliases.insert(key.clone(), id) {
                if old_id != id {
                    self.detach_alias(old_id, &key);
                }
            }
            let (record_keys, _) = self.records.get_mut(&id).expect("record just resolved");
            if !record_keys.contains(&key) {
                record_keys.push(key);
            }
        }
        &mut self.records.get_mut(&id).expect("record just resolved").1
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut V> {
        self.records.values_mut().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[String], &V)> {
        self.records
            .values()
            .map(|(keys, value)| (keys.as_slice(), value))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn detach_alias(&mut self, record_id: u64, key: &str) {
        if let Some((keys, _)) = self.records.get_mut(&record_id) {
            keys.retain(|k| k != key);
            if keys.is_empty() {
                self.records.remove(&record_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_aliases_resolve_to_same_value() {
        let mut map = MultiKeyMap::new();
        map.insert(vec!["101".into(), "bbc.one.uk".into(), "bbc one".into()], 42);
        assert_eq!(map.get("101"), Some(&42));
        assert_eq!(map.get("bbc.one.uk"), Some(&42));
        assert_eq!(map.get("bbc one"), Some(&42));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn colliding_alias_repoints_to_newer_record() {
        let mut map = MultiKeyMap::new();
        map.insert(vec!["a".into(), "shared".into()], 1);
        map.insert(vec!["b".into(), "shared".into()], 2);
        assert_eq!(map.get("shared"), Some(&2));
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.get("b"), Some(&2));
    }

    #[test]
    fn remove_drops_every_alias() {
        let mut map = MultiKeyMap::new();
        map.insert(vec!["a".into(), "b".into()], 7);
        assert_eq!(map.remove("b"), Some(7));
        assert_eq!(map.get("a"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn get_or_insert_merges_new_aliases() {
        let mut map: MultiKeyMap<Vec<u32>> = MultiKeyMap::new();
        map.get_or_insert_with(vec!["id1".into()], Vec::new).push(1);
        map.get_or_insert_with(vec!["id1".into(), "name1".into()], Vec::new)
            .push(2);
        assert_eq!(map.get("name1"), Some(&vec![1, 2]));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn records_sharing_a_secondary_alias_stay_separate() {
        let mut map: MultiKeyMap<Vec<&str>> = MultiKeyMap::new();
        map.get_or_insert_with(vec!["news.east".into(), "news".into()], Vec::new)
            .push("East Bulletin");
        map.get_or_insert_with(vec!["news.west".into(), "news".into()], Vec::new)
            .push("West Bulletin");
        assert_eq!(map.get("news.east"), Some(&vec!["East Bulletin"]));
        assert_eq!(map.get("news.west"), Some(&vec!["West Bulletin"]));
        // The contested alias lands on the later record
        assert_eq!(map.get("news"), Some(&vec!["West Bulletin"]));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn late_aliases_are_tracked_for_removal() {
        let mut map: MultiKeyMap<u32> = MultiKeyMap::new();
        map.get_or_insert_with(vec!["id1".into()], || 1);
        map.get_or_insert_with(vec!["id1".into(), "name1".into()], || 0);
        assert!(map
            .keys_for("id1")
            .unwrap()
            .contains(&"name1".to_string()));
        map.remove("id1");
        assert_eq!(map.get("name1"), None);
        assert!(map.is_empty());
    }
}
