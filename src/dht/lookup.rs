//! Node lookup module
//!
//! Bookkeeping for a single FIND_NODE resolution. The search walks contact
//! lists depth first: every list a peer returns becomes a new level that is
//! exhausted before the search falls back to the level that produced it.
//!
//! Termination does not depend on the network behaving: each key is queried
//! at most once, a level keeps only the `width` contacts closest to the
//! target, no more than `max_hops` levels are ever stacked and the whole
//! lookup issues at most `max_hops * width` queries.

use crate::dht::contact::Contact;
use crate::dht::key::Key;
use crate::dht::routing::KBucket;
use std::collections::{HashSet, VecDeque};
use tracing::trace;

/// Default bound on the number of stacked levels
pub const DEFAULT_MAX_HOPS: usize = 8;

/// What a peer's answer did to the search
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStep {
    /// The answer contained the target
    Found(Contact),
    /// The answer opened a new level with this many fresh contacts
    Descended(usize),
    /// Nothing usable; continue with the current level
    NoProgress,
}

/// State of one lookup
#[derive(Debug)]
pub struct NodeLookup {
    target: Key,
    our_key: Key,
    max_hops: usize,
    width: usize,
    budget: usize,
    visited: HashSet<Key>,
    levels: Vec<VecDeque<Contact>>,
    queried: usize,
}

impl NodeLookup {
    /// Start a lookup for `target` seeded with `seed`.
    ///
    /// `width` bounds the contacts kept per level, usually the bucket
    /// capacity. The local node is never a candidate.
    pub fn new(our_key: Key, target: Key, seed: Vec<Contact>, max_hops: usize, width: usize) -> Self {
        let max_hops = max_hops.max(1);
        let width = width.max(1);
        let mut lookup = Self {
            target,
            our_key,
            max_hops,
            width,
            budget: max_hops.saturating_mul(width),
            visited: HashSet::new(),
            levels: Vec::new(),
            queried: 0,
        };
        lookup.push_level(seed);
        lookup
    }

    /// Key being searched for
    pub fn target(&self) -> Key {
        self.target
    }

    /// Number of stacked levels
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Number of contacts handed out so far
    pub fn queried(&self) -> usize {
        self.queried
    }

    /// Maximum number of contacts this lookup will hand out
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Whether the query budget is used up
    pub fn is_exhausted(&self) -> bool {
        self.queried >= self.budget
    }

    /// Whether `key` has been handed out already
    pub fn is_visited(&self, key: &Key) -> bool {
        self.visited.contains(key)
    }

    /// Next contact to query, or None once every level is exhausted
    pub fn next_candidate(&mut self) -> Option<Contact> {
        if self.is_exhausted() {
            return None;
        }
        while let Some(level) = self.levels.last_mut() {
            match level.pop_front() {
                Some(contact) => {
                    if contact.key == self.our_key || !self.visited.insert(contact.key) {
                        continue;
                    }
                    self.queried += 1;
                    return Some(contact);
                }
                None => {
                    self.levels.pop();
                }
            }
        }
        None
    }

    /// Feed the contact list a peer returned
    pub fn on_response(&mut self, nodes: &[Contact]) -> LookupStep {
        if let Some(found) = nodes.iter().find(|c| c.key == self.target) {
            return LookupStep::Found(*found);
        }
        if self.levels.len() >= self.max_hops {
            trace!("Lookup for {} at hop limit {}", self.target, self.max_hops);
            return LookupStep::NoProgress;
        }
        let pushed = self.push_level(nodes.to_vec());
        if pushed == 0 {
            LookupStep::NoProgress
        } else {
            LookupStep::Descended(pushed)
        }
    }

    fn push_level(&mut self, contacts: Vec<Contact>) -> usize {
        let our_key = self.our_key;
        let visited = &self.visited;
        let mut fresh = KBucket::from_contacts(
            contacts
                .into_iter()
                .filter(|c| c.key != our_key && !visited.contains(&c.key)),
        )
        .into_contacts();
        fresh.sort_by_key(|c| c.distance_to(&self.target));
        fresh.truncate(self.width);
        let count = fresh.len();
        if count > 0 {
            self.levels.push(fresh.into());
        }
        count
    }
}
