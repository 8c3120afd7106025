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

//! Streaming estimator of equal-weight cut points.
//!
//! The estimator ingests weighted observations of any totally ordered type one at a time and
//! keeps at most `ceil(desired_cut / (1 - precision))` weighted buckets. From those buckets it
//! extracts `desired_cut - 1` values that split the observed weight into `desired_cut` groups of
//! roughly equal mass, i.e. approximate quantile boundaries.
//!
//! The domain is described by a [`Dividable`]: a total order plus a midpoint operation used when
//! a bucket grows too heavy and is split. [`Midpoint`] covers primitive numbers and byte strings.
//!
//! Every bucket holds the weight of the observations folded into it, so the retained weight
//! always equals the weight ingested. Memory is bounded by the bucket cap regardless of the
//! length of the stream, and each operation costs time proportional to that cap.
//!
//! The estimator is not synchronized; share it across threads behind a lock.
//!
//! # Usage
//!
//! ```rust
//! # use quantcut::estimator::{Estimator, Midpoint};
//! let mut estimator = Estimator::new(Midpoint, 4).unwrap();
//! for value in 0..1000i64 {
//!     estimator.sample(value, 1).unwrap();
//! }
//! let cuts = estimator.estimate().unwrap();
//! assert_eq!(cuts.len(), 3);
//! assert!(cuts.windows(2).all(|pair| pair[0] < pair[1]));
//! ```
//!
//! # Tracing
//!
//! Splits, merges and extraction emit `tracing` events at debug and trace level; install a
//! subscriber to observe them.

mod buckets;
mod divide;
mod iter;
mod partition;
mod sketch;

pub use self::divide::Dividable;
pub use self::divide::Midpoint;
pub use self::iter::Iter;
pub use self::sketch::Estimator;

/// Default value of parameter precision.
pub const DEFAULT_PRECISION: f64 = 0.9;
