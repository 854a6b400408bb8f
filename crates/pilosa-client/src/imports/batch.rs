// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixed-size batching over a fallible record source.

use crate::error::Result;

/// Upper bound on the up-front allocation of one batch.
const PREALLOCATE_LIMIT: usize = 4096;

/// Groups records into batches of at most `size`.
///
/// A read error ends the sequence: it is yielded once, and the records
/// gathered so far for the current batch are dropped.
pub(crate) struct Batches<I> {
    inner: I,
    size: usize,
    done: bool,
}

impl<I> Batches<I> {
    pub(crate) fn new(inner: I, size: usize) -> Self {
        Self {
            inner,
            size: size.max(1),
            done: false,
        }
    }
}

impl<T, I> Iterator for Batches<I>
where
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut batch = Vec::with_capacity(self.size.min(PREALLOCATE_LIMIT));
        while batch.len() < self.size {
            match self.inner.next() {
                Some(Ok(record)) => batch.push(record),
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if batch.is_empty() {
            None
        } else {
            Some(Ok(batch))
        }
    }
}
