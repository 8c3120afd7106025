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

//! Partitioning of bucket weights into groups of roughly equal mass.

use crate::error::Error;

/// Target weight of each group for the given bucket weights in value order.
///
/// Half of the outermost buckets is added on each side to stand for the mass beyond them.
pub(crate) fn desired_weight(weights: &[u64], desired_cut: usize) -> f64 {
    let (half_first, half_last) = edge_halves(weights);
    let gross = weights.iter().sum::<u64>() + half_first + half_last;
    gross as f64 / desired_cut as f64
}

fn edge_halves(weights: &[u64]) -> (u64, u64) {
    match weights {
        [] => (0, 0),
        [only] => (only / 2, 0),
        [first, .., last] => (first / 2, last / 2),
    }
}

/// Computes the `desired_cut - 1` split indices for bucket weights given in value order.
///
/// Each index is the last bucket of its group; the final group runs from the bucket after the
/// last index to the end. Indices are strictly increasing and every group, the final one
/// included, holds at least one bucket.
///
/// # Contract
///
/// * `desired_cut >= 1`
/// * `weights.len() >= desired_cut`
/// * the weights sum to at most `i64::MAX`, so the sums with both edge halves fit in `u64`
pub(crate) fn split_indices(weights: &[u64], desired_cut: usize) -> Result<Vec<usize>, Error> {
    debug_assert!(desired_cut >= 1, "desired cut must be at least 1");
    debug_assert!(weights.len() >= desired_cut, "not enough buckets to cut");

    let num_splits = desired_cut - 1;
    if num_splits == 0 {
        return Ok(Vec::new());
    }

    let len = weights.len();
    let (half_first, half_last) = edge_halves(weights);
    let desired = desired_weight(weights, desired_cut);

    let mut splits = Vec::with_capacity(num_splits);
    let mut index = 0;
    for i in 0..num_splits {
        // one bucket stays behind for every group after this one
        let limit = len - (num_splits - i);
        let mut group = weights[index] + if i == 0 { half_first } else { 0 };
        index += 1;
        while index < limit && (group + weights[index]) as f64 <= desired {
            group += weights[index];
            index += 1;
        }
        splits.push(index - 1);
    }

    correct_final_group(weights, &mut splits, desired, half_last)?;
    Ok(splits)
}

/// Moves buckets out of an overweight final group into the groups before it.
///
/// The final group is overweight when its mass minus its first bucket still exceeds `desired`.
/// Each step moves the last split one bucket forward and then cascades backward while the
/// group that grew is overweight by the same rule.
fn correct_final_group(
    weights: &[u64],
    splits: &mut [usize],
    desired: f64,
    half_last: u64,
) -> Result<(), Error> {
    let len = weights.len();
    let last = splits.len() - 1;

    for _ in 0..len {
        let first = splits[last] + 1;
        if first + 1 >= len {
            // a single-bucket final group has nothing to give away
            return Ok(());
        }
        let remaining = weights[first..].iter().sum::<u64>() + half_last;
        if (remaining - weights[first]) as f64 <= desired {
            return Ok(());
        }
        cascade_backward(weights, splits, desired)?;
    }

    Err(Error::invariant_violated("final group correction did not converge")
        .with_context("buckets", len)
        .with_context("splits", splits.len()))
}

fn cascade_backward(weights: &[u64], splits: &mut [usize], desired: f64) -> Result<(), Error> {
    let mut target = splits.len() - 1;

    for _ in 0..=splits.len() {
        splits[target] += 1;
        if target == 0 {
            return Ok(());
        }
        let start = splits[target - 1] + 1;
        let tail = weights[start + 1..=splits[target]].iter().sum::<u64>();
        if tail as f64 <= desired {
            return Ok(());
        }
        target -= 1;
    }

    Err(Error::invariant_violated("backward correction exceeded its step cap")
        .with_context("splits", splits.len()))
}
