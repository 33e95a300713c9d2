//! In-memory key-value store: strings and lists with lazy TTL expiry.
//!
//! A [`Store`] is a plain `HashMap` augmented with two counters
//! (`key_count`, `expiry_count`) that are kept exactly in sync with the
//! map's contents on every insert, delete, overwrite, and lazy expiry.
//! There is no background reaper: an expired entry is only ever removed
//! the next time it is looked up (`get_string`, `lrange`, ...).

mod error;
mod value;

pub use error::StoreError;
pub use value::{Entry, Value};

use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_millis() as u64
}

#[derive(Default)]
pub struct Store {
    map: HashMap<Bytes, Entry>,
    key_count: usize,
    expiry_count: usize,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `key`. If the prior value was of a
    /// different kind, it is simply dropped in favor of the new one.
    pub fn set(&mut self, key: Bytes, value: Value, expires_at_ms: u64) {
        let new_has_expiry = expires_at_ms > 0;
        let new_entry = Entry {
            value,
            expires_at_ms,
        };
        match self.map.insert(key, new_entry) {
            Some(old) => {
                if old.has_expiry() && !new_has_expiry {
                    self.expiry_count -= 1;
                } else if !old.has_expiry() && new_has_expiry {
                    self.expiry_count += 1;
                }
            }
            None => {
                self.key_count += 1;
                if new_has_expiry {
                    self.expiry_count += 1;
                }
            }
        }
    }

    /// Returns the live value for `key` as a string, or `None` if absent
    /// or expired. Fails with [`StoreError::TypeMismatch`] if the key
    /// holds a list.
    pub fn get_string(&mut self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        match self.get_value(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(Value::List(_)) => Err(StoreError::TypeMismatch),
        }
    }

    /// Returns the live value for `key`, applying lazy expiry.
    pub fn get_value(&mut self, key: &[u8]) -> Option<&Value> {
        if self.expire_if_needed(key) {
            return None;
        }
        self.map.get(key).map(|e| &e.value)
    }

    /// Returns whether `key` is present, without triggering lazy expiry
    /// (per the store's documented `exists` contract).
    pub fn exists(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Returns `key`'s current `expires_at_ms` (0 if it has none), or
    /// `None` if the key is absent. Does not trigger lazy expiry; used by
    /// callers that have already established the key is live (e.g. `SET
    /// ... KEEPTTL`).
    pub fn peek_expires_at_ms(&self, key: &[u8]) -> Option<u64> {
        self.map.get(key).map(|e| e.expires_at_ms)
    }

    /// Removes `key` if present. Returns whether a deletion occurred.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.map.remove(key) {
            Some(entry) => {
                self.key_count -= 1;
                if entry.has_expiry() {
                    self.expiry_count -= 1;
                }
                true
            }
            None => false,
        }
    }

    /// Pushes `items` onto the front of the list at `key`, creating it if
    /// absent. Fails with [`StoreError::TypeMismatch`] against a string.
    /// Returns the new length.
    pub fn lpush<I>(&mut self, key: &[u8], items: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = Bytes>,
    {
        self.expire_if_needed(key);
        let list = self.list_mut_or_create(key)?;
        for item in items {
            list.push_front(item);
        }
        Ok(list.len())
    }

    /// Pushes `items` onto the back of the list at `key`, creating it if
    /// absent. Fails with [`StoreError::TypeMismatch`] against a string.
    /// Returns the new length.
    pub fn rpush<I>(&mut self, key: &[u8], items: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = Bytes>,
    {
        self.expire_if_needed(key);
        let list = self.list_mut_or_create(key)?;
        for item in items {
            list.push_back(item);
        }
        Ok(list.len())
    }

    /// Returns the slice `[start, end]` (inclusive, negative-index
    /// normalized) of the list at `key`. Missing key, or a range that
    /// normalizes to empty, returns an empty vector.
    pub fn lrange(&mut self, key: &[u8], start: i64, end: i64) -> Result<Vec<Bytes>, StoreError> {
        if self.expire_if_needed(key) {
            return Ok(Vec::new());
        }
        let Some(entry) = self.map.get(key) else {
            return Ok(Vec::new());
        };
        let Value::List(list) = &entry.value else {
            return Err(StoreError::TypeMismatch);
        };

        let len = list.len() as i64;
        if len == 0 {
            return Ok(Vec::new());
        }
        let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
        let start = norm(start);
        let end = norm(end).min(len - 1);
        if start > end || start >= len {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((end - start + 1) as usize)
            .cloned()
            .collect())
    }

    /// Adds `delta` to the integer value of `key`, creating it at `0`
    /// first if absent. Fails with [`StoreError::TypeMismatch`] against a
    /// list, [`StoreError::NotAnInteger`] if the existing string isn't a
    /// base-10 `i64`, or [`StoreError::IncrementOverflow`] if the result
    /// would not fit in an `i64`. A pre-existing expiration is preserved.
    pub fn incrby(&mut self, key: &[u8], delta: i64) -> Result<i64, StoreError> {
        self.expire_if_needed(key);
        let expires_at_ms = self.map.get(key).map_or(0, |e| e.expires_at_ms);
        let current = match self.map.get(key) {
            None => 0,
            Some(Entry { value: Value::Str(s), .. }) => std::str::from_utf8(s)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or(StoreError::NotAnInteger)?,
            Some(Entry { value: Value::List(_), .. }) => return Err(StoreError::TypeMismatch),
        };
        let updated = current.checked_add(delta).ok_or(StoreError::IncrementOverflow)?;
        self.set(
            Bytes::copy_from_slice(key),
            Value::Str(Bytes::from(updated.to_string())),
            expires_at_ms,
        );
        Ok(updated)
    }

    /// Number of live keys. O(1).
    pub fn dbsize(&self) -> usize {
        self.key_count
    }

    /// Number of live keys carrying an expiration. O(1).
    pub fn expiry_count(&self) -> usize {
        self.expiry_count
    }

    /// Iterates over all live (unexpired as of `now_ms`) entries, for use
    /// by the snapshot writer. Does not mutate the store or trigger
    /// lazy expiry removal; callers that need an authoritative count
    /// should filter with `Entry::is_expired_at`.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &Entry)> {
        self.map.iter()
    }

    fn list_mut_or_create(&mut self, key: &[u8]) -> Result<&mut VecDeque<Bytes>, StoreError> {
        if !self.map.contains_key(key) {
            self.map.insert(
                Bytes::copy_from_slice(key),
                Entry {
                    value: Value::List(VecDeque::new()),
                    expires_at_ms: 0,
                },
            );
            self.key_count += 1;
        }
        let entry = self.map.get_mut(key).expect("just inserted or already present");
        match &mut entry.value {
            Value::List(list) => Ok(list),
            Value::Str(_) => Err(StoreError::TypeMismatch),
        }
    }

    /// Removes `key` if it is present and its expiration has passed.
    /// Returns whether the key is now absent due to expiry (or was
    /// already absent).
    fn expire_if_needed(&mut self, key: &[u8]) -> bool {
        let now = now_ms();
        match self.map.get(key) {
            Some(entry) if entry.is_expired_at(now) => {
                self.map.remove(key);
                self.key_count -= 1;
                self.expiry_count -= 1;
                true
            }
            Some(_) => false,
            None => true,
        }
    }
}
