// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Weighted buckets kept in two orderings at once.
//!
//! Buckets live in an arena of slots and are addressed by [`BucketId`]. The by-value ordering is
//! strictly ascending under the caller's total order; the by-weight ordering is non-increasing by
//! weight. Each bucket records its own position in the by-weight ordering so that a weight change
//! only touches the entries it moves past.

use std::cmp::Ordering;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BucketId(usize);

#[derive(Debug, Clone)]
pub(crate) struct Bucket<T> {
    pub(crate) value: T,
    pub(crate) weight: u64,
    rank: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Buckets<T> {
    slots: Vec<Option<Bucket<T>>>,
    free: Vec<usize>,
    by_value: Vec<BucketId>,
    by_weight: Vec<BucketId>,
}

impl<T> Default for Buckets<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Buckets<T> {
    pub fn new() -> Self {
        Buckets {
            slots: Vec::new(),
            free: Vec::new(),
            by_value: Vec::new(),
            by_weight: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_value.is_empty()
    }

    pub fn get(&self, id: BucketId) -> &Bucket<T> {
        match &self.slots[id.0] {
            Some(bucket) => bucket,
            None => unreachable!("bucket {id:?} has been released"),
        }
    }

    fn get_mut(&mut self, id: BucketId) -> &mut Bucket<T> {
        match &mut self.slots[id.0] {
            Some(bucket) => bucket,
            None => unreachable!("bucket {id:?} has been released"),
        }
    }

    /// Returns the bucket at `pos` in the by-value ordering.
    pub fn at(&self, pos: usize) -> BucketId {
        self.by_value[pos]
    }

    pub fn heaviest(&self) -> Option<BucketId> {
        self.by_weight.first().copied()
    }

    pub fn lightest(&self) -> Option<BucketId> {
        self.by_weight.last().copied()
    }

    /// Buckets in ascending value order.
    pub fn iter_by_value(&self) -> impl Iterator<Item = &Bucket<T>> {
        self.by_value.iter().map(|id| self.get(*id))
    }

    /// Buckets in non-increasing weight order.
    pub fn iter_by_weight(&self) -> impl Iterator<Item = &Bucket<T>> {
        self.by_weight.iter().map(|id| self.get(*id))
    }

    /// Binary searches the by-value ordering.
    ///
    /// `f` compares a retained value against the target, see [`slice::binary_search_by`].
    pub fn search_by<F>(&self, mut f: F) -> Result<usize, usize>
    where
        F: FnMut(&T) -> Ordering,
    {
        self.by_value
            .binary_search_by(|id| f(&self.get(*id).value))
    }

    /// Inserts a zero-weight bucket at `pos` of the by-value ordering.
    ///
    /// The bucket goes to the tail of the by-weight ordering; give it weight with
    /// [`add_weight`](Self::add_weight) before the next search.
    pub fn insert(&mut self, pos: usize, value: T) -> BucketId {
        let bucket = Bucket {
            value,
            weight: 0,
            rank: self.by_weight.len(),
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(bucket);
                BucketId(slot)
            }
            None => {
                self.slots.push(Some(bucket));
                BucketId(self.slots.len() - 1)
            }
        };
        self.by_value.insert(pos, id);
        self.by_weight.push(id);
        id
    }

    /// Removes the bucket at `pos` of the by-value ordering from both orderings.
    pub fn remove(&mut self, pos: usize) -> Bucket<T> {
        let id = self.by_value.remove(pos);
        let bucket = match self.slots[id.0].take() {
            Some(bucket) => bucket,
            None => unreachable!("bucket {id:?} has been released"),
        };
        self.by_weight.remove(bucket.rank);
        for rank in bucket.rank..self.by_weight.len() {
            let moved = self.by_weight[rank];
            self.get_mut(moved).rank = rank;
        }
        self.free.push(id.0);
        bucket
    }

    /// Replaces the value of a bucket, returning the old one.
    ///
    /// The caller keeps the by-value ordering strictly ascending.
    pub fn replace_value(&mut self, id: BucketId, value: T) -> T {
        std::mem::replace(&mut self.get_mut(id).value, value)
    }

    /// Adds `n` to the weight of a bucket and moves it toward the front of the by-weight
    /// ordering past every lighter neighbor.
    pub fn add_weight(&mut self, id: BucketId, n: u64) {
        debug_assert!(n > 0, "weight adjustment must not be zero");
        let bucket = self.get_mut(id);
        bucket.weight += n;
        let weight = bucket.weight;
        let mut rank = bucket.rank;
        while rank > 0 && self.get(self.by_weight[rank - 1]).weight < weight {
            self.swap_ranks(rank - 1, rank);
            rank -= 1;
        }
    }

    /// Subtracts `n` from the weight of a bucket and moves it toward the back of the by-weight
    /// ordering past every heavier neighbor.
    pub fn sub_weight(&mut self, id: BucketId, n: u64) {
        debug_assert!(n > 0, "weight adjustment must not be zero");
        let bucket = self.get_mut(id);
        bucket.weight = match bucket.weight.checked_sub(n) {
            Some(weight) => weight,
            None => unreachable!("bucket {id:?} cannot give away {n} of {}", bucket.weight),
        };
        let weight = bucket.weight;
        let mut rank = bucket.rank;
        while rank + 1 < self.by_weight.len() && self.get(self.by_weight[rank + 1]).weight > weight
        {
            self.swap_ranks(rank, rank + 1);
            rank += 1;
        }
    }

    fn swap_ranks(&mut self, a: usize, b: usize) {
        self.by_weight.swap(a, b);
        let (id_a, id_b) = (self.by_weight[a], self.by_weight[b]);
        self.get_mut(id_a).rank = a;
        self.get_mut(id_b).rank = b;
    }

    /// Verifies both orderings and their cross references.
    pub fn check_invariants<F>(&self, mut compare: F) -> Result<(), Error>
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        if self.by_value.len() != self.by_weight.len() {
            return Err(Error::invariant_violated("orderings hold different bucket counts")
                .with_context("by_value", self.by_value.len())
                .with_context("by_weight", self.by_weight.len()));
        }

        for (pos, pair) in self.by_value.windows(2).enumerate() {
            let (a, b) = (self.get(pair[0]), self.get(pair[1]));
            if compare(&a.value, &b.value) != Ordering::Less {
                return Err(Error::invariant_violated("values are not strictly ascending")
                    .with_context("position", pos + 1));
            }
        }

        for (rank, id) in self.by_weight.iter().enumerate() {
            let bucket = self.get(*id);
            if bucket.rank != rank {
                return Err(Error::invariant_violated("bucket rank is stale")
                    .with_context("rank", rank)
                    .with_context("recorded", bucket.rank));
            }
            if bucket.weight == 0 {
                return Err(Error::invariant_violated("bucket has no weight")
                    .with_context("rank", rank));
            }
            if rank > 0 && self.get(self.by_weight[rank - 1]).weight < bucket.weight {
                return Err(Error::invariant_violated("weights are not non-increasing")
                    .with_context("rank", rank));
            }
        }

        if self.slots.iter().flatten().count() != self.by_value.len() {
            return Err(Error::invariant_violated("orderings and arena disagree")
                .with_context("live_slots", self.slots.iter().flatten().count())
                .with_context("by_value", self.by_value.len()));
        }

        Ok(())
    }
}
