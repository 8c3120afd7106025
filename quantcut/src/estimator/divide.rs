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

/// Total order plus midpoint operation over the domain of an [`Estimator`].
///
/// [`Estimator`]: super::Estimator
pub trait Dividable<T> {
    /// Compare two values.
    fn compare(&self, a: &T, b: &T) -> Ordering;

    /// Returns a value strictly between `lower` and `upper`.
    ///
    /// `lower` is `None` when `upper` is the smallest retained value; the implementation decides
    /// which value stands in for the missing lower bound.
    fn divide(&self, lower: Option<&T>, upper: &T) -> T;
}

/// Arithmetic midpoint over primitive numbers and lexicographic midpoint over byte strings.
///
/// Without a lower bound, numbers divide one unit below `upper` and byte strings divide against
/// the empty string. Floats follow [`f64::total_cmp`], so NaN is an ordinary value above
/// positive infinity.
///
/// # Examples
///
/// ```
/// # use quantcut::estimator::{Dividable, Midpoint};
/// assert_eq!(Midpoint.divide(Some(&10i64), &20), 15);
/// assert_eq!(Midpoint.divide(None, &20i64), 19);
/// assert_eq!(Midpoint.divide(Some(&1.0f64), &2.0), 1.5);
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Midpoint;

macro_rules! impl_integer_midpoint {
    ($($t:ty),*) => {
        $(
            impl Dividable<$t> for Midpoint {
                fn compare(&self, a: &$t, b: &$t) -> Ordering {
                    a.cmp(b)
                }

                fn divide(&self, lower: Option<&$t>, upper: &$t) -> $t {
                    match lower {
                        // floor((a + b) / 2) stays inside [a, b] so the cast cannot truncate
                        Some(lower) => (*lower as i128 + *upper as i128).div_euclid(2) as $t,
                        None => upper.saturating_sub(1),
                    }
                }
            }
        )*
    };
}

impl_integer_midpoint!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_float_midpoint {
    ($($t:ty),*) => {
        $(
            impl Dividable<$t> for Midpoint {
                fn compare(&self, a: &$t, b: &$t) -> Ordering {
                    a.total_cmp(b)
                }

                fn divide(&self, lower: Option<&$t>, upper: &$t) -> $t {
                    match lower {
                        Some(lower) => lower + (upper - lower) / 2.0,
                        None => upper - 1.0,
                    }
                }
            }
        )*
    };
}

impl_float_midpoint!(f32, f64);

impl Dividable<Vec<u8>> for Midpoint {
    fn compare(&self, a: &Vec<u8>, b: &Vec<u8>) -> Ordering {
        a.cmp(b)
    }

    fn divide(&self, lower: Option<&Vec<u8>>, upper: &Vec<u8>) -> Vec<u8> {
        let lower = lower.map(Vec::as_slice).unwrap_or_default();
        if let Some(zeros) = upper.strip_prefix(lower) {
            if zeros.iter().all(|&b| b == 0) {
                // Only zero bytes separate the bounds, so padding would erase the difference.
                // With a single zero byte nothing lies between and this returns `upper`.
                let mut mid = lower.to_vec();
                mid.push(0);
                return mid;
            }
        }
        bytes_midpoint(lower, upper)
    }
}

/// Averages two byte strings read as base-256 fractions, both padded with zeros to one byte
/// longer than the longer input.
///
/// For `lower < upper`, unless `upper` is `lower` followed by zero bytes, the result is strictly
/// between them in lexicographic order: it is no less than the padded `lower`, which extends
/// `lower`, and it is less than the padded `upper`, and no string of that length lies in
/// `[upper, padded upper)`.
fn bytes_midpoint(lower: &[u8], upper: &[u8]) -> Vec<u8> {
    let len = lower.len().max(upper.len()) + 1;
    let digit = |bytes: &[u8], i: usize| bytes.get(i).copied().unwrap_or(0) as u16;

    let mut sum = vec![0u16; len];
    let mut carry = 0u16;
    for i in (0..len).rev() {
        let s = digit(lower, i) + digit(upper, i) + carry;
        sum[i] = s & 0xff;
        carry = s >> 8;
    }

    let mut remainder = carry;
    sum.into_iter()
        .map(|s| {
            let acc = (remainder << 8) | s;
            remainder = acc & 1;
            (acc >> 1) as u8
        })
        .collect()
}
