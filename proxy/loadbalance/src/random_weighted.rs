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

use chrono::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{balance::LoadBalance, node::Node};

#[derive(Debug)]
pub struct RandomWeighted {
    pub items: Vec<Node>,
    pub n: i64,
    pub sum_of_weights: i64,
    pub r: StdRng,
}

impl Default for RandomWeighted {
    fn default() -> RandomWeighted {
        RandomWeighted::with_seed(Utc::now().timestamp_subsec_nanos().into())
    }
}

impl RandomWeighted {
    pub fn with_seed(seed: u64) -> RandomWeighted {
        RandomWeighted { items: vec![], n: 0, sum_of_weights: 0, r: StdRng::seed_from_u64(seed) }
    }
}

impl LoadBalance for RandomWeighted {
    // next: get next node
    fn next(&mut self) -> Option<&Node> {
        if self.n == 0 {
            return None;
        }

        if self.sum_of_weights <= 0 {
            return None;
        }
        let mut random_weight = self.r.gen_range(0..self.sum_of_weights) + 1;
        for i in &self.items {
            random_weight -= i.weight;
            if random_weight <= 0 {
                return Some(i);
            }
        }
        self.items.last()
    }

    // add: add node
    fn add(&mut self, node: Node) {
        if !self.item_exists(&node) {
            self.sum_of_weights += node.weight;
            self.n += 1;
            self.items.push(node);
        }
    }

    // item_exists: node exists
    fn item_exists(&self, node: &Node) -> bool {
        self.items.iter().any(|x| x.name == node.name)
    }

    // get_all: get all nodes
    fn get_all(&self) -> &[Node] {
        &self.items
    }
}
