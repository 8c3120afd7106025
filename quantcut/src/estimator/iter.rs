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

use super::buckets::Buckets;

/// Iterator over the retained `(value, weight)` buckets of an [`Estimator`], in ascending value
/// order.
///
/// [`Estimator`]: super::Estimator
#[derive(Debug)]
pub struct Iter<'a, T> {
    buckets: &'a Buckets<T>,
    index: usize,
}

impl<'a, T> Iter<'a, T> {
    pub(super) fn new(buckets: &'a Buckets<T>) -> Self {
        Iter { buckets, index: 0 }
    }
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (&'a T, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.index < self.buckets.len() {
            let bucket = self.buckets.get(self.buckets.at(self.index));
            self.index += 1;
            Some((&bucket.value, bucket.weight))
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.buckets.len() - self.index;
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
