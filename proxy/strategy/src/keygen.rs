// Copyright 2022 SphereEx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sharding_error::error::ConfigurationError;
use tracing::debug;

use crate::value::Value;

/// 2016-11-01T00:00:00Z in milliseconds.
pub const SNOWFLAKE_EPOCH: i64 = 1477929600000;

const WORKER_ID_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_SHIFT: u32 = WORKER_ID_BITS + SEQUENCE_BITS;

pub const MAX_WORKER_ID: i64 = 1 << WORKER_ID_BITS;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KeyGeneratorType {
    Snowflake,
    Increment,
}

impl Default for KeyGeneratorType {
    fn default() -> Self {
        KeyGeneratorType::Snowflake
    }
}

pub trait KeyGenerator: Send + Sync {
    fn next(&self, logic_table: &str) -> Value;
}

pub fn build_key_generator(
    kind: KeyGeneratorType,
    worker_id: i64,
) -> Result<Arc<dyn KeyGenerator>, ConfigurationError> {
    let generator: Arc<dyn KeyGenerator> = match kind {
        KeyGeneratorType::Snowflake => Arc::new(SnowflakeKeyGenerator::new(worker_id)?),
        KeyGeneratorType::Increment => Arc::new(IncrementKeyGenerator::default()),
    };
    Ok(generator)
}

/// Generators handed out to every rule snapshot built from one registry. A
/// reload reuses them, so counters and sequences carry over.
#[derive(Default)]
pub struct KeyGenerators {
    generators: Mutex<HashMap<(KeyGeneratorType, i64), Arc<dyn KeyGenerator>>>,
}

impl KeyGenerators {
    pub fn new() -> Self {
        KeyGenerators::default()
    }

    pub fn get_or_build(
        &self,
        kind: KeyGeneratorType,
        worker_id: i64,
    ) -> Result<Arc<dyn KeyGenerator>, ConfigurationError> {
        // Increment counters do not depend on the worker id.
        let key = match kind {
            KeyGeneratorType::Snowflake => (kind, worker_id),
            KeyGeneratorType::Increment => (kind, 0),
        };

        let mut generators = self.generators.lock();
        if let Some(generator) = generators.get(&key) {
            return Ok(generator.clone());
        }

        let generator = build_key_generator(kind, worker_id)?;
        generators.insert(key, generator.clone());
        Ok(generator)
    }
}

impl fmt::Debug for KeyGenerators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let generators = self.generators.lock();
        f.debug_struct("KeyGenerators").field("kinds", &generators.keys().collect::<Vec<_>>()).finish()
    }
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: i64,
    sequence: i64,
}

/// 41 bits of milliseconds since [`SNOWFLAKE_EPOCH`], 10 bits of worker id and
/// a 12 bits sequence. Keys are unique across tables.
#[derive(Debug)]
pub struct SnowflakeKeyGenerator {
    worker_id: i64,
    state: Mutex<SnowflakeState>,
    clock: fn() -> i64,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl SnowflakeKeyGenerator {
    pub fn new(worker_id: i64) -> Result<Self, ConfigurationError> {
        Self::with_clock(worker_id, now_millis)
    }

    fn with_clock(worker_id: i64, clock: fn() -> i64) -> Result<Self, ConfigurationError> {
        if !(0..MAX_WORKER_ID).contains(&worker_id) {
            return Err(ConfigurationError::InvalidWorkerId(worker_id));
        }

        Ok(SnowflakeKeyGenerator { worker_id, state: Mutex::new(SnowflakeState::default()), clock })
    }

    pub fn worker_id(&self) -> i64 {
        self.worker_id
    }

    fn next_id(&self) -> i64 {
        let mut state = self.state.lock();
        let mut now = (self.clock)();

        if now < state.last_ms {
            debug!(last = state.last_ms, now, "clock moved backwards, reuse last timestamp");
            now = state.last_ms;
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                now = self.wait_next_millis(state.last_ms);
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        ((now - SNOWFLAKE_EPOCH) << TIMESTAMP_SHIFT) | (self.worker_id << SEQUENCE_BITS) | state.sequence
    }

    // A regressed clock would spin for the whole regression, step the logical
    // time instead.
    fn wait_next_millis(&self, last_ms: i64) -> i64 {
        let mut now = (self.clock)();
        if now < last_ms {
            return last_ms + 1;
        }
        while now <= last_ms {
            std::hint::spin_loop();
            now = (self.clock)();
        }
        now
    }
}

impl KeyGenerator for SnowflakeKeyGenerator {
    fn next(&self, _logic_table: &str) -> Value {
        Value::Int(self.next_id())
    }
}

/// Per table counter starting at 1.
#[derive(Debug, Default)]
pub struct IncrementKeyGenerator {
    counters: Mutex<HashMap<String, i64>>,
}

impl KeyGenerator for IncrementKeyGenerator {
    fn next(&self, logic_table: &str) -> Value {
        let mut counters = self.counters.lock();
        let counter = counters.entry(logic_table.to_ascii_lowercase()).or_insert(0);
        *counter += 1;
        Value::Int(*counter)
    }
}

#[cfg(test)]
mod test {
    use std::{collections::HashSet, thread};

    use super::*;

    #[test]
    fn test_snowflake_layout() {
        fn fixed() -> i64 {
            SNOWFLAKE_EPOCH + 1
        }

        let generator = SnowflakeKeyGenerator::with_clock(3, fixed).unwrap();
        let first = generator.next_id();
        assert_eq!(first >> TIMESTAMP_SHIFT, 1);
        assert_eq!((first >> SEQUENCE_BITS) & (MAX_WORKER_ID - 1), 3);
        assert_eq!(first & SEQUENCE_MASK, 0);

        let second = generator.next_id();
        assert_eq!(second & SEQUENCE_MASK, 1);
    }

    #[test]
    fn test_snowflake_clock_regression() {
        fn backwards() -> i64 {
            SNOWFLAKE_EPOCH
        }

        let generator = SnowflakeKeyGenerator::with_clock(0, backwards).unwrap();
        generator.state.lock().last_ms = SNOWFLAKE_EPOCH + 10;
        let id = generator.next_id();
        assert_eq!(id >> TIMESTAMP_SHIFT, 10);
    }

    #[test]
    fn test_snowflake_sequence_exhausted() {
        fn fixed() -> i64 {
            SNOWFLAKE_EPOCH + 5
        }

        let generator = SnowflakeKeyGenerator::with_clock(0, fixed).unwrap();
        generator.state.lock().last_ms = SNOWFLAKE_EPOCH + 6;
        generator.state.lock().sequence = SEQUENCE_MASK;
        let id = generator.next_id();
        assert_eq!(id >> TIMESTAMP_SHIFT, 7);
        assert_eq!(id & SEQUENCE_MASK, 0);
    }

    #[test]
    fn test_invalid_worker_id() {
        assert!(matches!(SnowflakeKeyGenerator::new(1024), Err(ConfigurationError::InvalidWorkerId(1024))));
        assert!(matches!(SnowflakeKeyGenerator::new(-1), Err(ConfigurationError::InvalidWorkerId(-1))));
    }

    #[test]
    fn test_concurrent_keys_are_distinct() {
        let generator = build_key_generator(KeyGeneratorType::Snowflake, 1).unwrap();
        let handles = (0..8)
            .map(|_| {
                let generator = generator.clone();
                thread::spawn(move || (0..1000).map(|_| generator.next("t_order")).collect::<Vec<_>>())
            })
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        for handle in handles {
            for key in handle.join().unwrap() {
                if let Value::Int(key) = key {
                    assert!(seen.insert(key));
                }
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn test_key_generators_reused() {
        let generators = KeyGenerators::new();
        let a = generators.get_or_build(KeyGeneratorType::Increment, 1).unwrap();
        let b = generators.get_or_build(KeyGeneratorType::Increment, 2).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let c = generators.get_or_build(KeyGeneratorType::Snowflake, 1).unwrap();
        let d = generators.get_or_build(KeyGeneratorType::Snowflake, 2).unwrap();
        assert!(!Arc::ptr_eq(&c, &d));
        assert!(matches!(
            generators.get_or_build(KeyGeneratorType::Snowflake, MAX_WORKER_ID),
            Err(ConfigurationError::InvalidWorkerId(_))
        ));
    }

    #[test]
    fn test_increment_per_table() {
        let generator = IncrementKeyGenerator::default();
        assert_eq!(generator.next("t_order"), Value::Int(1));
        assert_eq!(generator.next("t_order"), Value::Int(2));
        assert_eq!(generator.next("T_USER"), Value::Int(1));
    }
}
