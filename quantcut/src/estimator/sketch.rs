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

use std::cmp::Ordering;

use tracing::debug;
use tracing::trace;

use super::DEFAULT_PRECISION;
use super::buckets::BucketId;
use super::buckets::Buckets;
use super::divide::Dividable;
use super::iter::Iter;
use super::partition::desired_weight;
use super::partition::split_indices;
use crate::error::Error;

/// Maximum number of split rounds run by a single [`Estimator::sample`] call.
const MAX_BALANCE_STEPS: usize = 3;

/// Upper bound of the total weight; the edge halves added during extraction must fit in `u64`.
const MAX_TOTAL_WEIGHT: u64 = i64::MAX as u64;

/// Streaming estimator of the values that cut a weighted distribution into equal-mass groups.
///
/// See the [module documentation](super) for more details.
#[derive(Debug, Clone)]
pub struct Estimator<T, D> {
    desired_cut: usize,
    precision: f64,
    max_samples: usize,
    total_weight: u64,
    buckets: Buckets<T>,
    divider: D,
}

impl<T, D> Estimator<T, D>
where
    T: Clone,
    D: Dividable<T>,
{
    /// Creates an estimator for `desired_cut` groups with [`DEFAULT_PRECISION`].
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid) if
    /// `desired_cut` is zero.
    ///
    /// # Examples
    ///
    /// ```
    /// # use quantcut::estimator::{Estimator, Midpoint};
    /// let estimator = Estimator::<i64, _>::new(Midpoint, 4).unwrap();
    /// assert_eq!(estimator.desired_cut(), 4);
    /// assert_eq!(estimator.max_samples(), 40);
    /// ```
    pub fn new(divider: D, desired_cut: usize) -> Result<Self, Error> {
        Self::with_precision(divider, desired_cut, DEFAULT_PRECISION)
    }

    /// Creates an estimator for `desired_cut` groups keeping at most
    /// `ceil(desired_cut / (1 - precision))` buckets.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::ConfigInvalid`](crate::error::ErrorKind::ConfigInvalid) if
    /// `desired_cut` is zero or `precision` is not in `(0, 1)`.
    pub fn with_precision(divider: D, desired_cut: usize, precision: f64) -> Result<Self, Error> {
        if desired_cut < 1 {
            return Err(Error::config_invalid("desired cut must be at least 1")
                .with_context("desired_cut", desired_cut));
        }
        if !(precision > 0.0 && precision < 1.0) {
            return Err(Error::config_invalid("precision must be in (0, 1)")
                .with_context("precision", precision));
        }

        Ok(Estimator {
            desired_cut,
            precision,
            max_samples: compute_max_samples(desired_cut, precision),
            total_weight: 0,
            buckets: Buckets::new(),
            divider,
        })
    }

    /// Returns the number of groups [`estimate`](Self::estimate) cuts the distribution into.
    pub fn desired_cut(&self) -> usize {
        self.desired_cut
    }

    /// Returns the precision this estimator was configured with.
    pub fn precision(&self) -> f64 {
        self.precision
    }

    /// Returns the maximum number of buckets retained.
    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Returns true if the estimator has not seen any data.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Returns the number of retained buckets.
    pub fn num_retained(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the largest cut [`estimate`](Self::estimate) could currently serve.
    pub fn max_achievable_cut(&self) -> usize {
        self.buckets.len()
    }

    /// Returns total weight of the stream.
    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Returns an iterator over the retained `(value, weight)` buckets in ascending value order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter::new(&self.buckets)
    }

    /// Updates the estimator with a single observation of `value`.
    ///
    /// # Errors
    ///
    /// See [`Estimator::sample`].
    pub fn update(&mut self, value: T) -> Result<(), Error> {
        self.sample(value, 1)
    }

    /// Updates the estimator with `weight` observations of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidArgument`](crate::error::ErrorKind::InvalidArgument) if
    /// `weight` is not positive, or if the total weight would exceed `i64::MAX`. The estimator
    /// is left unchanged in both cases.
    pub fn sample(&mut self, value: T, weight: i64) -> Result<(), Error> {
        if weight <= 0 {
            return Err(Error::invalid_argument("weight must be positive")
                .with_context("weight", weight));
        }
        let weight = weight as u64;
        let total_weight = self
            .total_weight
            .checked_add(weight)
            .filter(|total| *total <= MAX_TOTAL_WEIGHT)
            .ok_or_else(|| {
                Error::invalid_argument("total weight would exceed i64::MAX")
                    .with_context("weight", weight)
                    .with_context("total_weight", self.total_weight)
            })?;

        let target = match self
            .buckets
            .search_by(|probe| self.divider.compare(probe, &value))
        {
            Ok(pos) => self.buckets.at(pos),
            Err(pos) if self.buckets.len() < self.max_samples => self.buckets.insert(pos, value),
            Err(pos) if pos == self.buckets.len() => {
                // the last bucket stretches up to the new maximum
                let last = self.buckets.at(pos - 1);
                self.buckets.replace_value(last, value);
                last
            }
            Err(pos) => self.buckets.at(pos),
        };
        self.buckets.add_weight(target, weight);
        self.total_weight = total_weight;

        self.balance();
        Ok(())
    }

    /// Returns the `desired_cut - 1` values that cut the observed weight into groups of roughly
    /// equal mass, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::SampleUnderrun`](crate::error::ErrorKind::SampleUnderrun) if fewer
    /// than `desired_cut` buckets are retained; the error reports the achievable cut. Returns
    /// [`ErrorKind::InvariantViolated`](crate::error::ErrorKind::InvariantViolated), with the
    /// failed check as its source, if the retained buckets are inconsistent.
    ///
    /// # Examples
    ///
    /// ```
    /// # use quantcut::estimator::{Estimator, Midpoint};
    /// let mut estimator = Estimator::new(Midpoint, 2).unwrap();
    /// for value in 1..=9i64 {
    ///     estimator.sample(value, 1).unwrap();
    /// }
    /// assert_eq!(estimator.estimate().unwrap(), vec![4]);
    /// ```
    pub fn estimate(&self) -> Result<Vec<T>, Error> {
        self.check_invariants().map_err(|err| {
            Error::invariant_violated("cannot estimate from inconsistent buckets").set_source(err)
        })?;

        let retained = self.buckets.len();
        if retained < self.desired_cut {
            return Err(Error::sample_underrun(retained, self.desired_cut));
        }

        let weights: Vec<u64> = self.buckets.iter_by_value().map(|b| b.weight).collect();
        debug!(
            retained,
            total_weight = self.total_weight,
            desired_weight = desired_weight(&weights, self.desired_cut),
            "estimating cut points"
        );
        trace!(by_value = ?weights, "bucket weights");
        trace!(
            by_weight = ?self.buckets.iter_by_weight().map(|b| b.weight).collect::<Vec<_>>(),
            "bucket weights"
        );

        let splits = split_indices(&weights, self.desired_cut)?;
        Ok(splits
            .into_iter()
            .map(|pos| self.buckets.get(self.buckets.at(pos)).value.clone())
            .collect())
    }

    /// Checks that the retained buckets are strictly ascending by value and non-increasing by
    /// weight, and that both orderings hold the same buckets.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvariantViolated`](crate::error::ErrorKind::InvariantViolated) if
    /// any check fails.
    pub fn check_invariants(&self) -> Result<(), Error> {
        self.buckets
            .check_invariants(|a, b| self.divider.compare(a, b))?;
        let weight: u64 = self.buckets.iter_by_value().map(|b| b.weight).sum();
        if weight != self.total_weight {
            return Err(Error::invariant_violated("retained weight differs from total weight")
                .with_context("retained", weight)
                .with_context("total", self.total_weight));
        }
        Ok(())
    }

    fn needs_balance(&self) -> bool {
        let len = self.buckets.len();
        if len <= 1 {
            return false;
        }
        let Some(heaviest) = self.buckets.heaviest() else {
            return false;
        };
        let average = self.total_weight as f64 / len as f64;
        self.buckets.get(heaviest).weight as f64 > (average * 2.0).ceil()
    }

    fn balance(&mut self) {
        for _ in 0..MAX_BALANCE_STEPS {
            if !self.needs_balance() || !self.split_heaviest() {
                return;
            }
            while self.buckets.len() > self.max_samples {
                self.evict_lightest();
            }
        }
    }

    /// Splits the heaviest bucket in two, placing the new half at the midpoint between it and
    /// its predecessor. Returns false if the divider has no value strictly between them.
    fn split_heaviest(&mut self) -> bool {
        let Some(heavy) = self.buckets.heaviest() else {
            return false;
        };
        let pos = self.position_of(heavy);
        let lower = pos
            .checked_sub(1)
            .map(|prev| &self.buckets.get(self.buckets.at(prev)).value);
        let upper = &self.buckets.get(heavy).value;

        let mid = self.divider.divide(lower, upper);
        let strictly_between = self.divider.compare(&mid, upper) == Ordering::Less
            && lower.is_none_or(|lower| self.divider.compare(lower, &mid) == Ordering::Less);
        if !strictly_between {
            debug!(position = pos, "no value left between neighbors, split refused");
            return false;
        }

        let weight = self.buckets.get(heavy).weight;
        let half = weight / 2;
        self.buckets.sub_weight(heavy, half);
        let id = self.buckets.insert(pos, mid);
        self.buckets.add_weight(id, half);
        debug!(position = pos, weight, "split heavy bucket");
        true
    }

    /// Folds the lightest bucket into a neighbor: the predecessor unless the successor is
    /// strictly heavier.
    fn evict_lightest(&mut self) {
        let Some(light) = self.buckets.lightest() else {
            return;
        };
        let pos = self.position_of(light);
        let prev = pos.checked_sub(1).map(|p| self.buckets.at(p));
        let next = (pos + 1 < self.buckets.len()).then(|| self.buckets.at(pos + 1));
        let target = match (prev, next) {
            (Some(prev), Some(next))
                if self.buckets.get(next).weight > self.buckets.get(prev).weight =>
            {
                next
            }
            (Some(prev), _) => prev,
            (None, Some(next)) => next,
            (None, None) => return,
        };

        let evicted = self.buckets.remove(pos);
        self.buckets.add_weight(target, evicted.weight);
        trace!(position = pos, weight = evicted.weight, "merged lightest bucket");
    }

    fn position_of(&self, id: BucketId) -> usize {
        let value = &self.buckets.get(id).value;
        match self
            .buckets
            .search_by(|probe| self.divider.compare(probe, value))
        {
            Ok(pos) => pos,
            Err(_) => unreachable!("bucket {id:?} is missing from the value ordering"),
        }
    }
}

/// Computes `ceil(desired_cut / (1 - precision))`.
///
/// `1 - precision` carries binary rounding error, so a quotient within rounding noise of an
/// integer is taken as that integer.
fn compute_max_samples(desired_cut: usize, precision: f64) -> usize {
    let raw = desired_cut as f64 / (1.0 - precision);
    let nearest = raw.round();
    if (raw - nearest).abs() <= raw * 1e-9 {
        nearest as usize
    } else {
        raw.ceil() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::estimator::Midpoint;

    /// Divides at a fixed offset below the upper bound and counts the calls.
    #[derive(Debug, Default)]
    struct RecordingDivider {
        calls: std::cell::Cell<usize>,
    }

    impl Dividable<i64> for RecordingDivider {
        fn compare(&self, a: &i64, b: &i64) -> Ordering {
            a.cmp(b)
        }

        fn divide(&self, lower: Option<&i64>, upper: &i64) -> i64 {
            self.calls.set(self.calls.get() + 1);
            match lower {
                Some(lower) => lower + (upper - lower) / 3,
                None => upper - 100,
            }
        }
    }

    fn weights(estimator: &Estimator<i64, impl Dividable<i64>>) -> Vec<(i64, u64)> {
        estimator.iter().map(|(v, w)| (*v, w)).collect()
    }

    #[test]
    fn test_max_samples() {
        assert_eq!(compute_max_samples(10, 0.9), 100);
        assert_eq!(compute_max_samples(1, 0.9), 10);
        assert_eq!(compute_max_samples(5, 0.5), 10);
        assert_eq!(compute_max_samples(1, 0.3), 2);
        assert_eq!(compute_max_samples(3, 0.99), 300);
        assert_eq!(compute_max_samples(7, 0.25), 10);
    }

    #[test]
    fn test_split_uses_divider_midpoint() {
        let mut estimator = Estimator::new(RecordingDivider::default(), 2).unwrap();
        for value in [0, 30, 60] {
            estimator.sample(value, 1).unwrap();
        }
        assert_eq!(estimator.divider.calls.get(), 0);

        // heavy = 30 with 9 of 11, 9 > ceil(2 * 11 / 3) = 8
        estimator.sample(30, 8).unwrap();
        assert_eq!(estimator.divider.calls.get(), 1);
        assert_eq!(
            weights(&estimator),
            vec![(0, 1), (10, 4), (30, 5), (60, 1)]
        );
        assert_eq!(estimator.total_weight(), 11);
        estimator.check_invariants().unwrap();
    }

    #[test]
    fn test_split_without_predecessor() {
        let mut estimator = Estimator::new(RecordingDivider::default(), 2).unwrap();
        for value in [500, 600, 700] {
            estimator.sample(value, 1).unwrap();
        }
        // heavy = 500 with 7 of 9, 7 > ceil(2 * 9 / 3) = 6
        estimator.sample(500, 6).unwrap();
        assert_eq!(estimator.divider.calls.get(), 1);
        assert_eq!(
            weights(&estimator),
            vec![(400, 3), (500, 4), (600, 1), (700, 1)]
        );
        estimator.check_invariants().unwrap();
    }

    #[test]
    fn test_two_buckets_never_split() {
        let mut estimator = Estimator::new(RecordingDivider::default(), 2).unwrap();
        estimator.sample(0, 1).unwrap();
        estimator.sample(30, 1).unwrap();
        estimator.sample(30, 100).unwrap();
        assert_eq!(estimator.divider.calls.get(), 0);
        assert_eq!(weights(&estimator), vec![(0, 1), (30, 101)]);
    }

    #[test]
    fn test_odd_weight_split_conserves_weight() {
        let mut estimator = Estimator::new(Midpoint, 2).unwrap();
        estimator.sample(0i64, 1).unwrap();
        estimator.sample(100, 1).unwrap();
        estimator.sample(200, 1).unwrap();
        // heavy = 100 with weight 7, total 9, average 3, 7 > 6 splits into 3 + 4
        estimator.sample(100, 6).unwrap();
        assert_eq!(
            weights(&estimator),
            vec![(0, 1), (50, 3), (100, 4), (200, 1)]
        );
        assert_eq!(estimator.total_weight(), 9);
    }

    #[test]
    fn test_split_refused_without_room() {
        let mut estimator = Estimator::new(Midpoint, 2).unwrap();
        estimator.sample(1i64, 1).unwrap();
        estimator.sample(2, 1).unwrap();
        estimator.sample(3, 1).unwrap();
        // 2 is heavy but nothing lies strictly between 1 and 2
        estimator.sample(2, 10).unwrap();
        assert_eq!(weights(&estimator), vec![(1, 1), (2, 11), (3, 1)]);
        estimator.check_invariants().unwrap();
    }

    #[test]
    fn test_folding_at_capacity() {
        // max_samples = ceil(1 / 0.5) = 2
        let mut estimator = Estimator::with_precision(Midpoint, 1, 0.5).unwrap();
        assert_eq!(estimator.max_samples(), 2);
        estimator.sample(0i64, 1).unwrap();
        estimator.sample(100, 1).unwrap();

        // above every bucket: the last one stretches up to 150
        estimator.sample(150, 1).unwrap();
        assert_eq!(weights(&estimator), vec![(0, 1), (150, 2)]);

        // between buckets: folds into the one above
        estimator.sample(120, 1).unwrap();
        assert_eq!(weights(&estimator), vec![(0, 1), (150, 3)]);

        // below every bucket: folds into the first
        estimator.sample(-5, 2).unwrap();
        assert_eq!(weights(&estimator), vec![(0, 3), (150, 3)]);
        assert_eq!(estimator.total_weight(), 6);
        estimator.check_invariants().unwrap();
    }

    #[test]
    fn test_eviction_merges_into_neighbor() {
        // max_samples = ceil(2 / (1 - 1/3)) = 3
        let mut estimator = Estimator::with_precision(Midpoint, 2, 1.0 / 3.0).unwrap();
        assert_eq!(estimator.max_samples(), 3);
        estimator.sample(0i64, 2).unwrap();
        estimator.sample(100, 1).unwrap();
        estimator.sample(200, 3).unwrap();
        assert_eq!(weights(&estimator), vec![(0, 2), (100, 1), (200, 3)]);

        // heavy = 200 with 9 of 12, average 4, 9 > 8 splits: (150, 4) and (200, 5); then the
        // lightest bucket (100, 1) merges into its successor, which outweighs its predecessor.
        estimator.sample(200, 6).unwrap();
        assert_eq!(weights(&estimator), vec![(0, 2), (150, 5), (200, 5)]);
        assert_eq!(estimator.num_retained(), 3);
        assert_eq!(estimator.total_weight(), 12);
        estimator.check_invariants().unwrap();
    }

    #[test]
    fn test_sample_rejects_non_positive_weight() {
        let mut estimator = Estimator::new(Midpoint, 2).unwrap();
        let err = estimator.sample(1i64, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = estimator.sample(1i64, -3).unwrap_err();
        assert_eq!(err.context_value("weight"), Some("-3"));
        assert!(estimator.is_empty());
    }

    #[test]
    fn test_nan_is_sampled_like_any_value() {
        let mut estimator = Estimator::new(Midpoint, 2).unwrap();
        estimator.sample(1.0f64, 3).unwrap();
        estimator.sample(f64::NAN, 5).unwrap();
        estimator.update(f64::NAN).unwrap();
        assert_eq!(estimator.total_weight(), 9);
        assert_eq!(estimator.num_retained(), 2);
        let (last, weight) = estimator.iter().last().unwrap();
        assert!(last.is_nan());
        assert_eq!(weight, 6);
        estimator.check_invariants().unwrap();
    }

    fn sampled(pairs: &[(i64, i64)]) -> Estimator<i64, Midpoint> {
        let mut estimator = Estimator::new(Midpoint, 2).unwrap();
        for &(value, weight) in pairs {
            estimator.sample(value, weight).unwrap();
        }
        assert_eq!(estimator.num_retained(), pairs.len());
        estimator
    }

    #[test]
    fn test_eviction_prefers_predecessor_on_tie() {
        let mut estimator = sampled(&[(0, 5), (10, 1), (20, 5)]);
        estimator.evict_lightest();
        assert_eq!(weights(&estimator), vec![(0, 6), (20, 5)]);
        estimator.check_invariants().unwrap();
    }

    #[test]
    fn test_eviction_prefers_heavier_predecessor() {
        let mut estimator = sampled(&[(0, 7), (10, 1), (20, 4)]);
        estimator.evict_lightest();
        assert_eq!(weights(&estimator), vec![(0, 8), (20, 4)]);
        estimator.check_invariants().unwrap();
    }

    #[test]
    fn test_eviction_of_first_bucket() {
        let mut estimator = sampled(&[(0, 1), (10, 3), (20, 5)]);
        estimator.evict_lightest();
        assert_eq!(weights(&estimator), vec![(10, 4), (20, 5)]);
        estimator.check_invariants().unwrap();
    }

    #[test]
    fn test_eviction_of_last_bucket() {
        let mut estimator = sampled(&[(0, 5), (10, 3), (20, 1)]);
        estimator.evict_lightest();
        assert_eq!(weights(&estimator), vec![(0, 5), (10, 4)]);
        estimator.check_invariants().unwrap();
    }

    #[test]
    fn test_total_weight_is_bounded() {
        let mut estimator = Estimator::new(Midpoint, 1).unwrap();
        estimator.sample(1i64, i64::MAX).unwrap();
        let err = estimator.sample(2, i64::MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.context_value("total_weight"), Some("9223372036854775807"));
        let err = estimator.update(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        assert_eq!(weights(&estimator), vec![(1, i64::MAX as u64)]);
        assert_eq!(estimator.total_weight(), i64::MAX as u64);
        assert_eq!(estimator.estimate().unwrap(), Vec::<i64>::new());
    }

    #[test]
    fn test_estimate_near_weight_limit() {
        let mut estimator = Estimator::new(Midpoint, 2).unwrap();
        estimator.sample(1i64, i64::MAX / 2).unwrap();
        estimator.sample(2, i64::MAX / 2).unwrap();
        estimator.sample(3, 1).unwrap();
        assert_eq!(estimator.total_weight(), i64::MAX as u64);
        assert!(estimator.sample(4, 1).is_err());
        assert_eq!(estimator.num_retained(), 3);
        estimator.check_invariants().unwrap();
        assert_eq!(estimator.estimate().unwrap(), vec![1]);
    }

    #[test]
    fn test_inconsistent_buckets_are_reported() {
        use std::error::Error as _;

        let mut estimator = sampled(&[(0, 2), (10, 2)]);
        estimator.total_weight += 1;
        let err = estimator.estimate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvariantViolated);
        let source = err.source().unwrap().to_string();
        assert!(source.contains("retained weight differs"), "{source}");
    }
}
