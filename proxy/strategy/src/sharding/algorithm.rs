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

use crc32fast::Hasher;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sharding_error::error::RoutingError;

use crate::value::Value;

lazy_static! {
    static ref NUMERIC_SUFFIX: Regex = Regex::new(r"(\d+)$").unwrap();
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShardingAlgorithmName {
    Mod,
    Crc32Mod,
}

pub trait CalcShardingIdx<I> {
    fn calc(self, algo: &ShardingAlgorithmName, sharding_count: I) -> Option<u64>;
}

impl CalcShardingIdx<u64> for i64 {
    fn calc(self, algo: &ShardingAlgorithmName, sharding_count: u64) -> Option<u64> {
        if sharding_count == 0 {
            return None;
        }

        match algo {
            ShardingAlgorithmName::Mod => {
                let count = i64::try_from(sharding_count).ok()?;
                Some(self.rem_euclid(count) as u64)
            }
            ShardingAlgorithmName::Crc32Mod => Some(crc32(&self.to_be_bytes()) % sharding_count),
        }
    }
}

impl CalcShardingIdx<u64> for &str {
    fn calc(self, algo: &ShardingAlgorithmName, sharding_count: u64) -> Option<u64> {
        if sharding_count == 0 {
            return None;
        }

        match algo {
            ShardingAlgorithmName::Mod => None,
            ShardingAlgorithmName::Crc32Mod => Some(crc32(self.as_bytes()) % sharding_count),
        }
    }
}

fn crc32(bytes: &[u8]) -> u64 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Slot of a single sharding value. Text that is not an integer only works
/// with `crc32_mod`.
pub fn slot_of(
    algo: &ShardingAlgorithmName,
    value: &Value,
    sharding_count: u64,
) -> Result<u64, RoutingError> {
    let slot = match (value.as_i64(), value) {
        (Some(val), _) => val.calc(algo, sharding_count),
        (None, Value::Text(val)) => val.as_str().calc(algo, sharding_count),
        _ => None,
    };
    slot.ok_or_else(|| RoutingError::InvalidShardingValue(value.to_string()))
}

pub fn numeric_suffix(name: &str) -> Option<u64> {
    NUMERIC_SUFFIX.captures(name).and_then(|caps| caps[1].parse::<u64>().ok())
}

/// Picks the candidate whose trailing number equals `slot`. Candidates
/// without any numeric suffix are addressed by position instead.
pub fn select_candidate(candidates: &[String], slot: u64) -> Option<&String> {
    if candidates.iter().any(|x| numeric_suffix(x).is_some()) {
        return candidates.iter().find(|x| numeric_suffix(x) == Some(slot));
    }

    usize::try_from(slot).ok().and_then(|idx| candidates.get(idx))
}
