//! DHT routing table module
//!
//! Implements the Kademlia routing table for the DHT.
//!
//! Buckets with an index closer to 0 hold contacts closer to the local node.
//! The index is `BUCKET_COUNT - shared_prefix_len`, so the local node itself
//! (prefix 160) lands in bucket 0 and a key differing in the very first bit
//! would land at 160, which is clamped to the last bucket.

use crate::dht::contact::Contact;
use crate::dht::key::{Key, KEY_BITS};
use std::fmt::Write;
use tracing::debug;

/// Number of buckets in the routing table
pub const BUCKET_COUNT: usize = KEY_BITS;

/// Default bucket capacity
pub const DEFAULT_K: usize = 20;

/// Result of offering a contact to a bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Contact was new and has been appended
    Inserted,
    /// Contact was known and moved to the most-recently-seen position
    Refreshed,
    /// Bucket is full; the caller should probe `least_recent`
    Full { least_recent: Contact },
}

/// A bucket in the routing table.
///
/// Contacts are ordered from least-recently seen (front) to most-recently
/// seen (back). No key appears twice.
#[derive(Debug, Clone)]
pub struct KBucket {
    contacts: Vec<Contact>,
    capacity: usize,
}

impl KBucket {
    /// Create a new empty bucket
    pub fn new(capacity: usize) -> Self {
        Self {
            contacts: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a bucket from a contact list received from a peer.
    ///
    /// Duplicate keys are dropped, first occurrence wins.
    pub fn from_contacts(contacts: impl IntoIterator<Item = Contact>) -> Self {
        let mut contacts_vec: Vec<Contact> = Vec::new();
        for contact in contacts {
            if !contacts_vec.contains(&contact) {
                contacts_vec.push(contact);
            }
        }
        let capacity = contacts_vec.len().max(DEFAULT_K);
        Self {
            contacts: contacts_vec,
            capacity,
        }
    }

    /// Position of a key in the bucket
    pub fn has(&self, key: &Key) -> Option<usize> {
        self.contacts.iter().position(|c| c.key == *key)
    }

    /// Contact at `index`.
    ///
    /// # Panics
    /// If `index` was not obtained from [`KBucket::has`] on this bucket.
    pub fn get(&self, index: usize) -> &Contact {
        &self.contacts[index]
    }

    /// Insert or refresh a contact
    pub fn add(&mut self, contact: Contact) -> InsertOutcome {
        if let Some(pos) = self.has(&contact.key) {
            self.contacts.remove(pos);
            self.contacts.push(contact);
            return InsertOutcome::Refreshed;
        }

        if self.is_full() {
            return InsertOutcome::Full {
                least_recent: self.contacts[0],
            };
        }

        self.contacts.push(contact);
        InsertOutcome::Inserted
    }

    /// Evict `stale` and append `contact` in its place.
    ///
    /// Returns false when `stale` is no longer in the bucket, or when
    /// `contact` is already present.
    pub fn replace(&mut self, stale: &Key, contact: Contact) -> bool {
        if self.has(&contact.key).is_some() {
            return false;
        }
        match self.has(stale) {
            Some(pos) => {
                self.contacts.remove(pos);
                self.contacts.push(contact);
                true
            }
            None => false,
        }
    }

    /// Move a known contact to the most-recently-seen position
    pub fn touch(&mut self, key: &Key) -> bool {
        match self.has(key) {
            Some(pos) => {
                let contact = self.contacts.remove(pos);
                self.contacts.push(contact);
                true
            }
            None => false,
        }
    }

    /// Remove a contact from the bucket
    pub fn remove(&mut self, key: &Key) -> bool {
        let before = self.contacts.len();
        self.contacts.retain(|c| c.key != *key);
        self.contacts.len() != before
    }

    /// Contacts from least to most recently seen
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Consume the bucket into its contacts
    pub fn into_contacts(self) -> Vec<Contact> {
        self.contacts
    }

    /// Get the number of contacts in the bucket
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Check if the bucket is empty
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Check if the bucket is full
    pub fn is_full(&self) -> bool {
        self.contacts.len() >= self.capacity
    }

    /// Maximum number of contacts
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Human-readable listing of the bucket
    pub fn describe(&self) -> String {
        let described: Vec<String> = self.contacts.iter().map(|c| c.to_string()).collect();
        described.join(", ")
    }
}

/// Bucket index for a shared prefix length
pub fn bucket_index(prefix_len: usize) -> usize {
    let index = BUCKET_COUNT.saturating_sub(prefix_len);
    if index == BUCKET_COUNT {
        index - 1
    } else {
        index
    }
}

/// Kademlia routing table
#[derive(Debug)]
pub struct RoutingTable {
    /// Our own contact
    our: Contact,
    buckets: Vec<KBucket>,
    k: usize,
}

impl RoutingTable {
    /// Create a new routing table holding only the local node
    pub fn new(our: Contact, k: usize) -> Self {
        let buckets = (0..BUCKET_COUNT).map(|_| KBucket::new(k)).collect();
        let mut table = Self { our, buckets, k };
        table.add(our);
        table
    }

    /// Our own contact
    pub fn our_contact(&self) -> Contact {
        self.our
    }

    /// Update the local node's address, e.g. after binding port 0
    pub fn set_our_addr(&mut self, addr: std::net::SocketAddr) {
        self.our.addr = addr;
        self.buckets[0].add(self.our);
    }

    /// Bucket capacity
    pub fn k(&self) -> usize {
        self.k
    }

    /// Index of the bucket responsible for `key`
    pub fn index_of(&self, key: &Key) -> usize {
        bucket_index(self.our.key.shared_prefix_len(key))
    }

    /// Offer a contact to its bucket
    pub fn add(&mut self, contact: Contact) -> (usize, InsertOutcome) {
        let index = self.index_of(&contact.key);
        let outcome = self.buckets[index].add(contact);
        debug!("Routing table add {} -> bucket {} ({:?})", contact, index, outcome);
        (index, outcome)
    }

    /// Evict `stale` in favour of `contact` in the bucket they share
    pub fn replace(&mut self, stale: &Key, contact: Contact) -> bool {
        let index = self.index_of(&contact.key);
        if index != self.index_of(stale) || *stale == self.our.key {
            return false;
        }
        self.buckets[index].replace(stale, contact)
    }

    /// Mark a known contact as most recently seen
    pub fn touch(&mut self, key: &Key) -> bool {
        let index = self.index_of(key);
        self.buckets[index].touch(key)
    }

    /// Remove a contact. The local node cannot be removed.
    pub fn remove(&mut self, key: &Key) -> bool {
        if *key == self.our.key {
            return false;
        }
        let index = self.index_of(key);
        self.buckets[index].remove(key)
    }

    /// Look up a contact by key
    pub fn get(&self, key: &Key) -> Option<Contact> {
        let bucket = &self.buckets[self.index_of(key)];
        bucket.has(key).map(|i| *bucket.get(i))
    }

    /// Check whether a key is known
    pub fn contains(&self, key: &Key) -> bool {
        self.get(key).is_some()
    }

    /// Closest non-empty bucket for a contact
    pub fn find_closest_bucket(&self, contact: &Contact) -> KBucket {
        self.find_closest_bucket_by_id(&contact.key)
    }

    /// Closest non-empty bucket for a key.
    ///
    /// Starts at the ideal bucket and walks toward index 0 until a non-empty
    /// one is found; bucket 0 is returned even if empty.
    pub fn find_closest_bucket_by_id(&self, key: &Key) -> KBucket {
        let mut index = self.index_of(key);
        while self.buckets[index].is_empty() && index > 0 {
            index -= 1;
        }
        self.buckets[index].clone()
    }

    /// Membership test against a specific bucket.
    ///
    /// # Panics
    /// If `index > BUCKET_COUNT`. An index equal to `BUCKET_COUNT` is clamped
    /// to the last bucket.
    pub fn is_in_bucket(&self, contact: &Contact, index: usize) -> bool {
        if index > BUCKET_COUNT {
            panic!("Invalid bucket index {}", index);
        }
        let index = index.min(BUCKET_COUNT - 1);
        self.buckets[index].has(&contact.key).is_some()
    }

    /// Bucket at `index`
    ///
    /// # Panics
    /// If `index >= BUCKET_COUNT`.
    pub fn bucket(&self, index: usize) -> &KBucket {
        &self.buckets[index]
    }

    /// The maximum-distance bucket
    pub fn last_bucket(&self) -> &KBucket {
        &self.buckets[BUCKET_COUNT - 1]
    }

    /// The most distant non-empty bucket
    pub fn last_not_empty_bucket(&self) -> &KBucket {
        self.buckets
            .iter()
            .rev()
            .find(|b| !b.is_empty())
            .unwrap_or_else(|| self.last_bucket())
    }

    /// Up to `count` known contacts sorted by XOR distance to `target`
    pub fn closest_contacts(&self, target: &Key, count: usize) -> Vec<Contact> {
        let mut all: Vec<Contact> = self.contacts();
        all.sort_by_key(|c| c.distance_to(target));
        all.truncate(count);
        all
    }

    /// Every contact in the table, nearest bucket first
    pub fn contacts(&self) -> Vec<Contact> {
        self.buckets
            .iter()
            .flat_map(|b| b.contacts().iter().copied())
            .collect()
    }

    /// Number of contacts, including the local node
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    /// Whether only the local node is known
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Human-readable dump of every non-empty bucket
    pub fn describe(&self) -> String {
        let mut out = format!("Routing table of {}\n", self.our.describe());
        for (i, bucket) in self.buckets.iter().enumerate() {
            if !bucket.is_empty() {
                let _ = writeln!(out, "Bucket {} [{}]", i, bucket.describe());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(bytes: [u8; 20], port: u16) -> Contact {
        Contact::new(Key::new(bytes), format!("127.0.0.1:{}", port).parse().unwrap())
    }

    fn key_with_last_byte(prefix: u8, last: u8) -> [u8; 20] {
        let mut id = [prefix; 20];
        id[19] = last;
        id
    }

    #[test]
    fn test_routing_table_new() {
        let our = contact([1u8; 20], 4000);
        let table = RoutingTable::new(our, DEFAULT_K);
        assert_eq!(table.our_contact(), our);
        assert_eq!(table.len(), 1);
        assert!(table.is_in_bucket(&our, 0));
        assert!(table.is_empty());
    }

    #[test]
    fn test_bucket_index_bounds() {
        assert_eq!(bucket_index(KEY_BITS), 0);
        assert_eq!(bucket_index(0), BUCKET_COUNT - 1);
        assert_eq!(bucket_index(1), BUCKET_COUNT - 1);
        assert_eq!(bucket_index(2), BUCKET_COUNT - 2);
        for prefix in 0..=KEY_BITS {
            assert!(bucket_index(prefix) < BUCKET_COUNT);
        }
    }

    #[test]
    fn test_index_of() {
        let table = RoutingTable::new(contact([0u8; 20], 4000), DEFAULT_K);
        assert_eq!(table.index_of(&Key::ZERO), 0);
        assert_eq!(table.index_of(&Key::MAX), BUCKET_COUNT - 1);
        assert_eq!(table.index_of(&Key::ZERO.with_flipped_bit(159)), 1);
    }

    #[test]
    fn test_add_places_contact_in_its_band() {
        let mut table = RoutingTable::new(contact([0u8; 20], 4000), DEFAULT_K);
        let other = contact(key_with_last_byte(0, 0b0000_0100), 4001);
        let (index, outcome) = table.add(other);
        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(index, table.index_of(&other.key));
        assert!(table.is_in_bucket(&other, index));
        assert!(table.find_closest_bucket(&other).has(&other.key).is_some());
    }

    #[test]
    fn test_add_is_idempotent_on_membership() {
        let mut table = RoutingTable::new(contact([0u8; 20], 4000), DEFAULT_K);
        let other = contact([0x0Fu8; 20], 4001);
        let (index, _) = table.add(other);
        let (again, outcome) = table.add(other);
        assert_eq!(index, again);
        assert_eq!(outcome, InsertOutcome::Refreshed);
        assert_eq!(table.bucket(index).len(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_find_closest_bucket_walks_toward_zero() {
        let mut table = RoutingTable::new(contact([0u8; 20], 4000), DEFAULT_K);
        let near = contact(key_with_last_byte(0, 0b0000_0011), 4001);
        let (near_index, _) = table.add(near);
        assert_eq!(near_index, 2);

        // Ideal bucket for MAX is 159 and empty; the walk reaches bucket 2
        let bucket = table.find_closest_bucket_by_id(&Key::MAX);
        assert!(bucket.has(&near.key).is_some());
    }

    #[test]
    fn test_find_closest_bucket_falls_back_to_self() {
        let our = contact([0u8; 20], 4000);
        let table = RoutingTable::new(our, DEFAULT_K);
        let bucket = table.find_closest_bucket_by_id(&Key::MAX);
        assert_eq!(bucket.contacts(), &[our]);
    }

    #[test]
    #[should_panic(expected = "Invalid bucket index")]
    fn test_is_in_bucket_out_of_range_panics() {
        let our = contact([0u8; 20], 4000);
        let table = RoutingTable::new(our, DEFAULT_K);
        table.is_in_bucket(&our, BUCKET_COUNT + 1);
    }

    #[test]
    fn test_is_in_bucket_clamps_last_index() {
        let mut table = RoutingTable::new(contact([0u8; 20], 4000), DEFAULT_K);
        let far = contact([0xFFu8; 20], 4001);
        table.add(far);
        assert!(table.is_in_bucket(&far, BUCKET_COUNT));
    }

    #[test]
    fn test_last_buckets() {
        let our = contact([0u8; 20], 4000);
        let mut table = RoutingTable::new(our, DEFAULT_K);
        assert!(table.last_bucket().is_empty());
        assert_eq!(table.last_not_empty_bucket().contacts(), &[our]);

        let far = contact([0xFFu8; 20], 4001);
        table.add(far);
        assert_eq!(table.last_bucket().contacts(), &[far]);
        assert_eq!(table.last_not_empty_bucket().contacts(), &[far]);
    }

    #[test]
    fn test_closest_contacts_sorted() {
        let mut table = RoutingTable::new(contact([0u8; 20], 4000), DEFAULT_K);
        table.add(contact([0xF0u8; 20], 4001));
        table.add(contact([0x0Fu8; 20], 4002));
        table.add(contact([0xFFu8; 20], 4003));

        let closest = table.closest_contacts(&Key::MAX, 3);
        assert_eq!(closest.len(), 3);
        assert_eq!(closest[0].key, Key::MAX);
        assert_eq!(closest[1].key, Key::new([0xF0u8; 20]));
        assert_eq!(closest[2].key, Key::new([0x0Fu8; 20]));
    }

    #[test]
    fn test_replace_and_remove() {
        let mut table = RoutingTable::new(contact([0u8; 20], 4000), 2);
        let a = contact(key_with_last_byte(0xFF, 1), 4001);
        let b = contact(key_with_last_byte(0xFF, 2), 4002);
        let c = contact(key_with_last_byte(0xFF, 3), 4003);
        table.add(a);
        table.add(b);
        assert_eq!(table.add(c).1, InsertOutcome::Full { least_recent: a });

        assert!(table.replace(&a.key, c));
        assert!(!table.contains(&a.key));
        assert!(table.contains(&c.key));

        assert!(table.remove(&b.key));
        assert!(!table.contains(&b.key));
        assert!(!table.remove(&Key::ZERO));
        assert!(table.contains(&Key::ZERO));
    }

    #[test]
    fn test_set_our_addr_updates_self_record() {
        let mut table = RoutingTable::new(contact([0u8; 20], 0), DEFAULT_K);
        let addr: std::net::SocketAddr = "127.0.0.1:5555".parse().unwrap();
        table.set_our_addr(addr);
        assert_eq!(table.our_contact().addr, addr);
        assert_eq!(table.get(&Key::ZERO).unwrap().addr, addr);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_describe_lists_buckets() {
        let mut table = RoutingTable::new(contact([0u8; 20], 4000), DEFAULT_K);
        table.add(contact([0xFFu8; 20], 4001));
        let text = table.describe();
        assert!(text.contains("Bucket 0 ["));
        assert!(text.contains("Bucket 159 ["));
    }

    #[test]
    fn test_kbucket_add_node() {
        let mut bucket = KBucket::new(DEFAULT_K);
        assert!(bucket.is_empty());
        assert_eq!(bucket.add(contact([2u8; 20], 4001)), InsertOutcome::Inserted);
        assert_eq!(bucket.add(contact([3u8; 20], 4002)), InsertOutcome::Inserted);
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn test_kbucket_refresh_moves_to_tail_and_updates_address() {
        let mut bucket = KBucket::new(DEFAULT_K);
        bucket.add(contact([2u8; 20], 4001));
        bucket.add(contact([3u8; 20], 4002));

        assert_eq!(bucket.add(contact([2u8; 20], 5001)), InsertOutcome::Refreshed);
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.get(0).key, Key::new([3u8; 20]));
        assert_eq!(bucket.get(1).key, Key::new([2u8; 20]));
        assert_eq!(bucket.get(1).addr.port(), 5001);
    }

    #[test]
    fn test_kbucket_full_reports_least_recent() {
        let mut bucket = KBucket::new(3);
        for i in 0..3u8 {
            bucket.add(contact(key_with_last_byte(2, i), 4000 + i as u16));
        }
        assert!(bucket.is_full());

        bucket.touch(&Key::new(key_with_last_byte(2, 0)));
        let outcome = bucket.add(contact(key_with_last_byte(2, 9), 4009));
        assert_eq!(
            outcome,
            InsertOutcome::Full {
                least_recent: contact(key_with_last_byte(2, 1), 4001)
            }
        );
        assert_eq!(bucket.len(), 3);
    }

    #[test]
    fn test_kbucket_never_holds_duplicates() {
        let mut bucket = KBucket::new(4);
        let keys = [1u8, 2, 1, 3, 2, 1, 4, 4];
        for (i, k) in keys.iter().enumerate() {
            bucket.add(contact([*k; 20], 4000 + i as u16));
        }
        let mut seen = std::collections::HashSet::new();
        for c in bucket.contacts() {
            assert!(seen.insert(c.key));
        }
        assert_eq!(bucket.len(), 4);
    }

    #[test]
    fn test_kbucket_replace_rejects_known_contact() {
        let mut bucket = KBucket::new(2);
        let a = contact([1u8; 20], 4001);
        let b = contact([2u8; 20], 4002);
        bucket.add(a);
        bucket.add(b);
        assert!(!bucket.replace(&a.key, b));
        assert!(!bucket.replace(&Key::MAX, contact([9u8; 20], 4009)));
        assert!(bucket.replace(&a.key, contact([9u8; 20], 4009)));
        assert!(bucket.has(&a.key).is_none());
    }

    #[test]
    fn test_kbucket_from_contacts_dedups() {
        let a = contact([1u8; 20], 4001);
        let b = contact([2u8; 20], 4002);
        let bucket = KBucket::from_contacts(vec![a, b, a]);
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket.has(&b.key), Some(1));
    }

    #[test]
    #[should_panic]
    fn test_kbucket_get_invalid_index_panics() {
        let bucket = KBucket::new(DEFAULT_K);
        bucket.get(0);
    }
}
