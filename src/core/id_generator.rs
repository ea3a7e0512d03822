// src/core/id_generator.rs

//! Snowflake-style unique id generation.
//!
//! ```text
//! +---+------------------------+---------------------+-----------------+
//! | 0 | 38 bits ms since epoch | 13 bits machine id  | 12 bits sequence|
//! +---+------------------------+---------------------+-----------------+
//! ```

use crate::core::GateError;
use rand::Rng;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// 2018-03-01T00:00:00Z in unix milliseconds.
pub const ID_EPOCH_MS: i64 = 1_519_833_600_000;
pub const MACHINE_ID_BITS: u32 = 13;
pub const SEQUENCE_BITS: u32 = 12;

const MACHINE_ID_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + MACHINE_ID_BITS;
const MAX_MACHINE_ID: i64 = (1 << MACHINE_ID_BITS) - 1;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
/// The last sequence value of a millisecond is left unused.
const MAX_SEQUENCE: i64 = SEQUENCE_MASK - 1;
/// Each millisecond starts at a random sequence below this.
const START_SEQUENCE_SPREAD: i64 = 10;

/// Lock-free monotonic id generator for one machine.
#[derive(Debug)]
pub struct IdGenerator {
    machine_id: i64,
    last_id: AtomicI64,
}

impl IdGenerator {
    pub fn new(machine_id: u16) -> Result<Self, GateError> {
        let machine_id = i64::from(machine_id);
        if machine_id > MAX_MACHINE_ID {
            return Err(GateError::InvalidConfig(format!(
                "machine id {machine_id} exceeds the maximum of {MAX_MACHINE_ID}"
            )));
        }
        info!(
            machine_id,
            "Id generator ready ({} machine bits, {} sequence bits).",
            MACHINE_ID_BITS,
            SEQUENCE_BITS
        );
        let initial = ((now_ms() - ID_EPOCH_MS) << TIMESTAMP_SHIFT)
            | (machine_id << MACHINE_ID_SHIFT)
            | random_start_sequence();
        Ok(Self {
            machine_id,
            last_id: AtomicI64::new(initial),
        })
    }

    pub fn machine_id(&self) -> u16 {
        self.machine_id as u16
    }

    /// Returns a new id, strictly greater than every id this generator returned before.
    pub fn next_id(&self) -> i64 {
        loop {
            let old = self.last_id.load(Ordering::Acquire);
            let last_interval = old >> TIMESTAMP_SHIFT;
            let mut interval = now_ms() - ID_EPOCH_MS;

            let sequence = if interval < last_interval {
                // Clock moved backwards; wait for it to catch up.
                std::thread::yield_now();
                continue;
            } else if interval == last_interval {
                let sequence = old & SEQUENCE_MASK;
                if sequence >= MAX_SEQUENCE {
                    interval = wait_next_ms(last_interval);
                    random_start_sequence()
                } else {
                    sequence + 1
                }
            } else {
                random_start_sequence()
            };

            let id = (interval << TIMESTAMP_SHIFT) | (self.machine_id << MACHINE_ID_SHIFT) | sequence;
            if self
                .last_id
                .compare_exchange(old, id, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return id;
            }
            std::hint::spin_loop();
        }
    }

    /// Splits an id into (unix ms, machine id, sequence).
    pub fn decompose(id: i64) -> (i64, u16, u16) {
        (
            (id >> TIMESTAMP_SHIFT) + ID_EPOCH_MS,
            ((id >> MACHINE_ID_SHIFT) & MAX_MACHINE_ID) as u16,
            (id & SEQUENCE_MASK) as u16,
        )
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(ID_EPOCH_MS)
}

fn wait_next_ms(last_interval: i64) -> i64 {
    loop {
        let interval = now_ms() - ID_EPOCH_MS;
        if interval > last_interval {
            return interval;
        }
        std::thread::yield_now();
    }
}

fn random_start_sequence() -> i64 {
    rand::thread_rng().gen_range(0..START_SEQUENCE_SPREAD)
}
