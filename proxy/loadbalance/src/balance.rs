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

use serde::{Deserialize, Serialize};

use crate::{node::Node, random_weighted::RandomWeighted, roundrobin_weighted::RoundRobinWeighted};

pub struct Balance;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmName {
    Random,
    RoundRobin,
}

impl Default for AlgorithmName {
    fn default() -> Self {
        AlgorithmName::Random
    }
}

pub trait LoadBalance {
    fn next(&mut self) -> Option<&Node>;
    fn add(&mut self, node: Node);
    fn item_exists(&self, node: &Node) -> bool;
    fn get_all(&self) -> &[Node];
}

#[derive(Debug)]
pub enum BalanceType {
    Random(RandomWeighted),
    RoundRobin(RoundRobinWeighted),
}

impl LoadBalance for BalanceType {
    fn next(&mut self) -> Option<&Node> {
        match self {
            BalanceType::Random(inner_random) => inner_random.next(),
            BalanceType::RoundRobin(inner_roundrobin) => inner_roundrobin.next(),
        }
    }

    fn add(&mut self, node: Node) {
        match self {
            BalanceType::Random(inner_random) => inner_random.add(node),
            BalanceType::RoundRobin(inner_roundrobin) => inner_roundrobin.add(node),
        }
    }

    fn item_exists(&self, node: &Node) -> bool {
        match self {
            BalanceType::Random(inner_random) => inner_random.item_exists(node),
            BalanceType::RoundRobin(inner_roundrobin) => inner_roundrobin.item_exists(node),
        }
    }

    fn get_all(&self) -> &[Node] {
        match self {
            BalanceType::Random(inner_random) => inner_random.get_all(),
            BalanceType::RoundRobin(inner_roundrobin) => inner_roundrobin.get_all(),
        }
    }
}

impl Balance {
    pub fn build_balance(&self, algorithm_name: AlgorithmName) -> BalanceType {
        match algorithm_name {
            AlgorithmName::Random => BalanceType::Random(RandomWeighted::default()),
            AlgorithmName::RoundRobin => BalanceType::RoundRobin(RoundRobinWeighted::default()),
        }
    }

    pub fn build_balance_with_nodes(
        &self,
        algorithm_name: AlgorithmName,
        nodes: impl IntoIterator<Item = Node>,
    ) -> BalanceType {
        let mut balance = self.build_balance(algorithm_name);
        for node in nodes {
            balance.add(node);
        }
        balance
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_build_balance() {
        let nodes = vec![Node::new("ds_slave_0"), Node::new("ds_slave_1")];
        let mut balance = Balance.build_balance_with_nodes(AlgorithmName::RoundRobin, nodes);
        assert!(matches!(balance, BalanceType::RoundRobin(_)));
        assert_eq!(balance.get_all().len(), 2);

        balance.add(Node::new("ds_slave_0"));
        assert_eq!(balance.get_all().len(), 2);
        assert!(balance.item_exists(&Node::new("ds_slave_1")));

        let names = (0..4).map(|_| balance.next().unwrap().name.clone()).collect::<Vec<_>>();
        assert_eq!(names, vec!["ds_slave_0", "ds_slave_1", "ds_slave_0", "ds_slave_1"]);
    }

    #[test]
    fn test_empty_balance() {
        let mut balance = Balance.build_balance(AlgorithmName::Random);
        assert!(balance.next().is_none());
    }
}
