// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Time-ordered numeric ids for stores without a native sequence.
//!
//! Layout (53 bits): milliseconds since 2025-01-01 (41 bits), then the
//! node id (8 bits), then a per-millisecond sequence (4 bits). Values stay
//! below 2^53 for roughly 70 years, so they survive a round trip through
//! JavaScript numbers. Generators with different node ids never produce
//! the same id.

use std::sync::atomic::{AtomicU64, Ordering};

/// 2025-01-01T00:00:00Z in Unix milliseconds.
const ID_EPOCH_MS: i64 = 1_735_689_600_000;
const NODE_BITS: u32 = 8;
const SEQUENCE_BITS: u32 = 4;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Monotonic id source, safe to share between tasks.
#[derive(Debug)]
pub struct IdGenerator {
    node: u8,
    /// Last (millisecond, sequence) pair handed out, packed without the node.
    last: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    /// Generator with a random node id.
    pub fn new() -> Self {
        Self::with_node(rand::random())
    }

    /// Generator with a fixed node id, for deployments that assign them.
    pub fn with_node(node: u8) -> Self {
        Self {
            node,
            last: AtomicU64::new(0),
        }
    }

    pub fn node(&self) -> u8 {
        self.node
    }

    /// Next id; strictly greater than every id this generator returned before.
    ///
    /// A burst beyond the per-millisecond sequence borrows from the next
    /// millisecond.
    pub fn next(&self) -> u64 {
        let candidate = Self::tick(chrono::Utc::now().timestamp_millis());
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return self.compose(next),
                Err(actual) => last = actual,
            }
        }
    }

    fn tick(now_ms: i64) -> u64 {
        let elapsed = (now_ms - ID_EPOCH_MS).max(0) as u64;
        elapsed << SEQUENCE_BITS
    }

    fn compose(&self, tick: u64) -> u64 {
        let millis = tick >> SEQUENCE_BITS;
        let sequence = tick & SEQUENCE_MASK;
        (millis << (NODE_BITS + SEQUENCE_BITS))
            | (u64::from(self.node) << SEQUENCE_BITS)
            | sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_strictly_increase() {
        let gen = IdGenerator::new();
        let mut previous = 0;
        for _ in 0..10_000 {
            let id = gen.next();
            assert!(id > previous);
            previous = id;
        }
    }

    #[test]
    fn test_ids_fit_in_js_number() {
        // 2090-01-01
        let far_future_ms = 3_786_825_600_000;
        let gen = IdGenerator::with_node(u8::MAX);
        let id = gen.compose(IdGenerator::tick(far_future_ms) | SEQUENCE_MASK);
        assert!(id < (1u64 << 53));
    }

    #[test]
    fn test_generators_on_different_nodes_never_collide() {
        let a = IdGenerator::with_node(1);
        let b = IdGenerator::with_node(2);
        let mut seen = HashSet::new();
        for _ in 0..1_000 {
            assert!(seen.insert(a.next()));
            assert!(seen.insert(b.next()));
        }
    }

    #[test]
    fn test_node_id_is_embedded() {
        let gen = IdGenerator::with_node(0xA5);
        let id = gen.next();
        assert_eq!((id >> SEQUENCE_BITS) & 0xFF, 0xA5);
    }
}
