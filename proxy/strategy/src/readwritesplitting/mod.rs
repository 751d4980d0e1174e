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

use loadbalance::balance::{Balance, BalanceType, LoadBalance};
use parking_lot::Mutex;
use sharding_error::error::ConfigurationError;
use tracing::debug;

use crate::{
    config::{MasterSlaveRuleConfig, TargetRole},
    result::{RouteUnit, SQLRouteResult, SQLUnit},
    stmt::{ParsedStatement, StatementKind},
    value::Value,
};

/// Queries go to a replica unless the caller forces the master, everything
/// else is a write.
pub fn target_role(kind: StatementKind, force_master: bool) -> TargetRole {
    if kind.is_query() && !force_master {
        TargetRole::Read
    } else {
        TargetRole::ReadWrite
    }
}

/// Read/write splitting over one master and its weighted replicas.
#[derive(Debug)]
pub struct MasterSlaveRouter {
    name: String,
    master: String,
    balance: Mutex<BalanceType>,
}

impl MasterSlaveRouter {
    pub fn new(config: &MasterSlaveRuleConfig) -> Result<Self, ConfigurationError> {
        if config.master.trim().is_empty() {
            return Err(ConfigurationError::MissingMaster(config.name.clone()));
        }

        let balance = Balance.build_balance_with_nodes(config.load_balance, config.slaves.iter().cloned());
        Ok(MasterSlaveRouter {
            name: config.name.clone(),
            master: config.master.clone(),
            balance: Mutex::new(balance),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    pub fn route(&self, kind: StatementKind, force_master: bool) -> String {
        let role = target_role(kind, force_master);
        if role == TargetRole::ReadWrite {
            return self.master.clone();
        }

        // Replicas the balancer cannot pick, e.g. all weighted 0, still take
        // the reads. Only a group without replicas reads from the master.
        let mut balance = self.balance.lock();
        let picked = balance.next().map(|x| x.name.clone());
        let slave = picked.or_else(|| balance.get_all().first().map(|x| x.name.clone()));

        match slave {
            Some(slave) => {
                debug!(group = %self.name, slave = %slave, "route read to slave");
                slave
            }
            None => self.master.clone(),
        }
    }

    /// One unit carrying the statement as is and every parameter set.
    pub fn route_statement<'a>(
        &self,
        statement: &'a ParsedStatement,
        parameter_sets: &[Vec<Value>],
        force_master: bool,
    ) -> SQLRouteResult<'a> {
        let data_source = self.route(statement.kind, force_master);
        let mut result = SQLRouteResult::new(statement);
        result.route_units.push(RouteUnit::new(
            &data_source,
            SQLUnit::new(statement.sql.clone(), parameter_sets.to_vec()),
        ));
        result
    }
}
