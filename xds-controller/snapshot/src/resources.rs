use std::collections::{btree_map, BTreeMap};

/// A named collection whose version is the XOR of its items' hashes.
///
/// Inserting an item and then removing it restores the previous version, and the version does not
/// depend on the order in which items were added.
#[derive(Clone, Debug, PartialEq)]
pub struct XorSet<T> {
    items: BTreeMap<String, (u64, T)>,
    version: u64,
}

/// One slot of a snapshot: a version string and the resources it names.
#[derive(Clone, Debug, PartialEq)]
pub struct Resources<T> {
    pub version: String,
    pub items: BTreeMap<String, T>,
}

// === impl XorSet ===

impl<T> Default for XorSet<T> {
    fn default() -> Self {
        Self {
            items: BTreeMap::new(),
            version: 0,
        }
    }
}

impl<T> XorSet<T> {
    /// Inserts `item` under `name`, replacing (and un-hashing) any previous item of that name.
    pub fn insert(&mut self, name: impl ToString, hash: u64, item: T) -> Option<T> {
        self.version ^= hash;
        let prior = self.items.insert(name.to_string(), (hash, item))?;
        self.version ^= prior.0;
        Some(prior.1)
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        let (hash, item) = self.items.remove(name)?;
        self.version ^= hash;
        Some(item)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.items.get(name).map(|(_, item)| item)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.items.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> + '_ {
        self.items.iter().map(|(k, (_, v))| (k.as_str(), v))
    }
}

impl<T> FromIterator<(String, u64, T)> for XorSet<T> {
    fn from_iter<I: IntoIterator<Item = (String, u64, T)>>(iter: I) -> Self {
        let mut set = Self::default();
        for (name, hash, item) in iter {
            set.insert(name, hash, item);
        }
        set
    }
}

impl<T: Clone> XorSet<T> {
    pub fn to_resources(&self) -> Resources<T> {
        Resources {
            version: self.version.to_string(),
            items: self
                .items
                .iter()
                .map(|(k, (_, v))| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

// === impl Resources ===

impl<T> Default for Resources<T> {
    fn default() -> Self {
        Self {
            version: 0.to_string(),
            items: BTreeMap::new(),
        }
    }
}

impl<T> Resources<T> {
    pub fn get(&self, name: &str) -> Option<&T> {
        self.items.get(name)
    }

    pub fn names(&self) -> btree_map::Keys<'_, String, T> {
        self.items.keys()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
