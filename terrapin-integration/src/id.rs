use crate::clock::SharedClock;
use rand::Rng;
use smol_str::{SmolStr, format_smolstr};
use std::sync::atomic::{AtomicU64, Ordering};

/// Mints globally unique, lexicographically sortable identifiers.
///
/// Ids are time-prefixed (`{millis:013}` zero-padded decimal) followed by a
/// process-monotonic sequence and a short random suffix, so ids produced
/// later always sort after ids produced earlier, and concurrent minting never
/// collides.
#[derive(Debug)]
pub struct IdGenerator {
    clock: SharedClock,
    sequence: AtomicU64,
}

impl IdGenerator {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            sequence: AtomicU64::new(0),
        }
    }

    /// Mint the next id with the provided domain prefix, eg/ `ord`.
    pub fn next(&self, prefix: &str) -> SmolStr {
        let millis = self.clock.now().timestamp_millis().max(0) as u64;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        let entropy: u16 = rand::rng().random();

        format_smolstr!("{prefix}_{millis:013}{sequence:06}{entropy:04x}")
    }

    pub fn order_id(&self) -> SmolStr {
        self.next("ord")
    }

    pub fn fill_id(&self) -> SmolStr {
        self.next("fil")
    }

    pub fn event_id(&self) -> SmolStr {
        self.next("evt")
    }

    pub fn connection_id(&self) -> SmolStr {
        self.next("con")
    }
}
