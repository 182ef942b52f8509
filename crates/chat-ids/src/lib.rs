// chat-ids: monotonic id generation and the deterministic direct-conversation
// pair id.
//
// Ids are allocated in blocks from a durable Postgres counter row so a
// process restart never repeats an id; within a block, handing out the next
// value is a lock-free atomic increment.

use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("counter block exhausted without a refill")]
    BlockExhausted,
}

/// Default number of ids claimed from the database per round-trip.
pub const DEFAULT_BLOCK_SIZE: i64 = 1000;

/// Allocates 16-hex-digit ids backed by a named counter row in `id_counters`.
pub struct IdAllocator {
    pool: PgPool,
    counter_name: String,
    block_size: i64,
    next: AtomicU64,
    end_exclusive: AtomicU64,
    refill: tokio::sync::Mutex<()>,
}

impl IdAllocator {
    pub fn new(pool: PgPool, counter_name: impl Into<String>) -> Self {
        Self::with_block_size(pool, counter_name, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(pool: PgPool, counter_name: impl Into<String>, block_size: i64) -> Self {
        Self {
            pool,
            counter_name: counter_name.into(),
            block_size,
            next: AtomicU64::new(0),
            end_exclusive: AtomicU64::new(0),
            refill: tokio::sync::Mutex::new(()),
        }
    }

    /// Returns the next id as a 16-hex-digit lowercased `0x`-prefixed string.
    pub async fn next_id(&self) -> Result<String, IdError> {
        Ok(format!("{:#018x}", self.next_u64().await?))
    }

    async fn next_u64(&self) -> Result<u64, IdError> {
        loop {
            let candidate = self.next.fetch_add(1, Ordering::SeqCst);
            if candidate < self.end_exclusive.load(Ordering::SeqCst) {
                return Ok(candidate);
            }
            self.refill_block().await?;
        }
    }

    async fn refill_block(&self) -> Result<(), IdError> {
        let _guard = self.refill.lock().await;
        // Another task may have refilled while we waited for the lock.
        if self.next.load(Ordering::SeqCst) < self.end_exclusive.load(Ordering::SeqCst) {
            return Ok(());
        }
        let row: (i64,) = sqlx::query_as(
            "UPDATE id_counters SET value = value + $1 WHERE name = $2 RETURNING value",
        )
        .bind(self.block_size)
        .bind(&self.counter_name)
        .fetch_one(&self.pool)
        .await?;
        let new_value = row.0;
        let start = (new_value - self.block_size) as u64;
        let end = new_value as u64;
        self.next.store(start, Ordering::SeqCst);
        self.end_exclusive.store(end, Ordering::SeqCst);
        if start >= end {
            return Err(IdError::BlockExhausted);
        }
        Ok(())
    }
}

/// Deterministic id for a direct conversation between two users: the two
/// numeric ids sorted ascending and joined with `_`, e.g.
/// `combine_id("0x0000000000000001", "0x0000000000000002") == "1_2"`.
///
/// Symmetric: `combine_id(a, b) == combine_id(b, a)`.
pub fn combine_id(a: &str, b: &str) -> String {
    let av = parse_numeric(a);
    let bv = parse_numeric(b);
    if av <= bv {
        format!("{av}_{bv}")
    } else {
        format!("{bv}_{av}")
    }
}

/// Parses a uid in either of the two forms this crate hands out: the
/// `0x`-prefixed 16-hex-digit form `next_id()` produces, or a bare decimal
/// string (used by callers/tests that don't round-trip through the
/// allocator). The `0x` prefix is the disambiguator -- without it, an
/// all-decimal-digit hex value like `"10"` would otherwise be ambiguous
/// between hex 0x10 (16) and decimal 10.
fn parse_numeric(id: &str) -> u64 {
    match id.strip_prefix("0x").or_else(|| id.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).unwrap_or(0),
        None => id.parse::<u64>().unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_id_is_symmetric() {
        assert_eq!(combine_id("1", "2"), combine_id("2", "1"));
    }

    #[test]
    fn combine_id_orders_numerically_not_lexically() {
        // lexical ordering would put "10" before "2"; numeric must not.
        assert_eq!(combine_id("10", "2"), "2_10");
    }

    #[test]
    fn combine_id_joins_with_underscore() {
        assert_eq!(combine_id("1", "1"), "1_1");
    }

    #[test]
    fn combine_id_joins_decimal_values_not_raw_hex_ids() {
        // A real uid is the 16-hex-digit `0x...` form `next_id()` produces;
        // the joined id must be the decimal value, not that raw string.
        assert_eq!(
            combine_id("0x0000000000000001", "0x0000000000000002"),
            "1_2"
        );
        assert_eq!(
            combine_id("0x0000000000000002", "0x0000000000000001"),
            "1_2"
        );
    }

    #[test]
    fn combine_id_reads_hex_ids_as_hex_even_when_all_digits() {
        // 0x10 is 16, not 10 -- a hex string made entirely of decimal digits
        // must not be misread as its decimal value.
        assert_eq!(
            combine_id("0x0000000000000010", "0x0000000000000001"),
            "1_16"
        );
    }
}
