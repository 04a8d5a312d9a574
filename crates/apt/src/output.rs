// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bounded capture of subprocess output.
//!
//! Stdout and stderr are kept for error reporting, not archival: a capture
//! holds at most `limit` bytes. When a stream overflows, bytes are dropped
//! from the middle so the head (invocation context) and the tail (the part
//! apt-get prints its error into) both survive, and the rendered text marks
//! the seam.

use std::collections::VecDeque;

/// Marker spliced where the middle of an overflowing stream was dropped.
pub const TRUNCATION_MARK: &str = "\n…[output truncated]…\n";

/// Default per-stream capture limit.
pub const DEFAULT_CAPTURE_LIMIT: usize = 2 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct BoundedBuffer {
    head: Vec<u8>,
    tail: VecDeque<u8>,
    head_limit: usize,
    tail_limit: usize,
    truncated: bool,
}

impl BoundedBuffer {
    pub fn new(limit: usize) -> Self {
        let head_limit = limit / 2;
        Self {
            head: Vec::new(),
            tail: VecDeque::new(),
            head_limit,
            tail_limit: limit - head_limit,
            truncated: false,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        let mut rest = bytes;
        if self.head.len() < self.head_limit {
            let take = rest.len().min(self.head_limit - self.head.len());
            self.head.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        if rest.is_empty() {
            return;
        }
        self.tail.extend(rest.iter().copied());
        while self.tail.len() > self.tail_limit {
            self.tail.pop_front();
            self.truncated = true;
        }
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Render the captured bytes, lossily, with the truncation mark spliced
    /// in if the middle was dropped.
    pub fn contents(&self) -> String {
        let tail = || {
            let (a, b) = self.tail.as_slices();
            let mut v = Vec::with_capacity(self.tail.len());
            v.extend_from_slice(a);
            v.extend_from_slice(b);
            v
        };
        if !self.truncated {
            if self.tail.is_empty() {
                return String::from_utf8_lossy(&self.head).into_owned();
            }
            let mut all = self.head.clone();
            all.extend_from_slice(&tail());
            return String::from_utf8_lossy(&all).into_owned();
        }
        let mut out = String::from_utf8_lossy(&self.head).into_owned();
        out.push_str(TRUNCATION_MARK);
        out.push_str(&String::from_utf8_lossy(&tail()));
        out
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
