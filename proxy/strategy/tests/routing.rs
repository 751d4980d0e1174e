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

use std::{collections::HashSet, sync::Arc, thread};

use strategy::{
    config::SchemaConfig,
    schema::{LogicSchema, RuleRegistry},
    stmt::{Column, Expr, ParsedStatement, Predicate, StatementKind},
    value::Value,
    Route, RouteHints, RouteInput,
};

const SHARDING_SCHEMA: &str = r#"
    name = "sharding_db"

    [sharding]
    data_sources = ["ds_0", "ds_1"]

    [[sharding.table]]
    logic_table = "t_order"
    actual_data_nodes = "ds_${0..1}.t_order_${0..2}"
    key_generator = { column = "order_id", type = "snowflake" }
    database_strategy = { type = "inline", sharding_column = "user_id", algorithm_expression = "ds_${user_id % 2}" }
    table_strategy = { type = "inline", sharding_column = "order_id", algorithm_expression = "t_order_${order_id % 3}" }
"#;

const MASTER_SLAVE_SCHEMA: &str = r#"
    name = "ms_db"

    [master_slave]
    name = "ms_ds"
    master = "ds_master"
    load_balance = "round_robin"
    slaves = [{ name = "ds_slave_0" }, { name = "ds_slave_1" }]
"#;

fn schema(config: &str) -> LogicSchema {
    let config: SchemaConfig = toml::from_str(config).unwrap();
    LogicSchema::build(&config).unwrap()
}

fn select(sql: &str, predicate: Option<Predicate>) -> ParsedStatement {
    let mut builder = ParsedStatement::builder(sql, StatementKind::Select).table("t_order");
    if let Some(predicate) = predicate {
        builder = builder.predicate(predicate);
    }
    builder.build().unwrap()
}

#[test]
fn test_no_condition_reaches_every_node_once() {
    let schema = schema(SHARDING_SCHEMA);
    let stmt = select("SELECT * FROM t_order", None);

    let result = schema.dispatch(RouteInput::new(&stmt, &[])).unwrap();
    let nodes = result
        .route_units
        .iter()
        .map(|x| format!("{}.{}", x.data_source, x.sql_unit.sql.trim_start_matches("SELECT * FROM ")))
        .collect::<Vec<_>>();

    assert_eq!(nodes.len(), 6);
    assert_eq!(nodes.iter().collect::<HashSet<_>>().len(), 6);
    assert_eq!(nodes[0], "ds_0.t_order_0");
    assert_eq!(nodes[5], "ds_1.t_order_2");
}

#[test]
fn test_full_equality_routes_single_unit() {
    let schema = schema(SHARDING_SCHEMA);
    let stmt = select(
        "SELECT * FROM t_order WHERE user_id = ? AND order_id = ?",
        Some(Predicate::And(vec![
            Predicate::eq(Column::new("user_id"), Expr::param(0)),
            Predicate::eq(Column::new("order_id"), Expr::param(1)),
        ])),
    );

    let params = [vec![Value::Int(7), Value::Int(5)]];
    let result = schema.dispatch(RouteInput::new(&stmt, &params)).unwrap();
    assert!(result.is_single_route());
    assert_eq!(result.route_units[0].data_source, "ds_1");
    assert_eq!(result.route_units[0].sql_unit.sql, "SELECT * FROM t_order_2 WHERE user_id = ? AND order_id = ?");
}

#[test]
fn test_batch_entries_share_units() {
    let schema = schema(SHARDING_SCHEMA);
    let stmt = ParsedStatement::builder("DELETE FROM t_order WHERE user_id = ? AND order_id = ?", StatementKind::Delete)
        .table("t_order")
        .predicate(Predicate::And(vec![
            Predicate::eq(Column::new("user_id"), Expr::param(0)),
            Predicate::eq(Column::new("order_id"), Expr::param(1)),
        ]))
        .build()
        .unwrap();

    let one = vec![Value::Int(1), Value::Int(1)];
    let two = vec![Value::Int(2), Value::Int(2)];
    let params = [one.clone(), two.clone(), one.clone()];
    let result = schema.dispatch(RouteInput::new(&stmt, &params)).unwrap();

    assert_eq!(result.route_units.len(), 2);
    assert_eq!(result.route_units[0].data_source, "ds_1");
    assert_eq!(result.route_units[0].sql_unit.parameter_sets, vec![one.clone(), one]);
    assert_eq!(result.route_units[1].data_source, "ds_0");
    assert_eq!(result.route_units[1].sql_unit.parameter_sets, vec![two]);
}

#[test]
fn test_routing_is_repeatable() {
    let schema = schema(SHARDING_SCHEMA);
    let stmt = select(
        "SELECT * FROM t_order WHERE user_id IN (?, ?)",
        Some(Predicate::in_list(Column::new("user_id"), vec![Expr::param(0), Expr::param(1)])),
    );

    let params = [vec![Value::Int(1), Value::Int(3)]];
    let first = schema.dispatch(RouteInput::new(&stmt, &params)).unwrap();
    let second = schema.dispatch(RouteInput::new(&stmt, &params)).unwrap();
    assert_eq!(first.route_units, second.route_units);
    assert_eq!(first.data_sources(), vec!["ds_1"]);
    assert_eq!(first.route_units.len(), 3);
}

#[test]
fn test_concurrent_inserts_generate_distinct_keys() {
    let schema = Arc::new(schema(SHARDING_SCHEMA));
    let handles = (0..4)
        .map(|user| {
            let schema = schema.clone();
            thread::spawn(move || {
                let stmt = ParsedStatement::builder("INSERT INTO t_order (user_id, status) VALUES (?, ?)", StatementKind::Insert)
                    .table("t_order")
                    .insert(&["user_id", "status"], vec![vec![Expr::param(0), Expr::param(1)]])
                    .build()
                    .unwrap();

                let mut keys = vec![];
                for _ in 0..200 {
                    let params = [vec![Value::Int(user), Value::from("new")]];
                    let result = schema.dispatch(RouteInput::new(&stmt, &params)).unwrap();
                    assert_eq!(result.route_units.len(), 1);
                    keys.extend(result.generated_keys.unwrap().values);
                }
                keys
            })
        })
        .collect::<Vec<_>>();

    let mut seen = HashSet::new();
    for handle in handles {
        for key in handle.join().unwrap() {
            assert!(seen.insert(key.as_i64().unwrap()));
        }
    }
    assert_eq!(seen.len(), 800);
}

#[test]
fn test_master_slave_schema() {
    let schema = schema(MASTER_SLAVE_SCHEMA);
    let query = select("SELECT * FROM t_order", None);
    let update = ParsedStatement::builder("UPDATE t_order SET status = 1", StatementKind::Update)
        .table("t_order")
        .build()
        .unwrap();

    let reads = (0..4)
        .map(|_| schema.dispatch(RouteInput::new(&query, &[])).unwrap().route_units[0].data_source.clone())
        .collect::<Vec<_>>();
    assert_eq!(reads, vec!["ds_slave_0", "ds_slave_1", "ds_slave_0", "ds_slave_1"]);

    let result = schema.dispatch(RouteInput::new(&update, &[])).unwrap();
    assert_eq!(result.data_sources(), vec!["ds_master"]);

    let result = schema.dispatch(RouteInput::new(&query, &[]).with_force_master(true)).unwrap();
    assert_eq!(result.data_sources(), vec!["ds_master"]);
    assert_eq!(result.route_units[0].sql_unit.sql, "SELECT * FROM t_order");
}

#[test]
fn test_hints_are_ignored_without_hint_strategy() {
    let schema = schema(SHARDING_SCHEMA);
    let stmt = select(
        "SELECT * FROM t_order WHERE user_id = 2",
        Some(Predicate::eq(Column::new("user_id"), Expr::literal(2))),
    );

    let hints = RouteHints { database_values: vec![Value::Int(1)], table_values: vec![] };
    let result = schema.dispatch(RouteInput::new(&stmt, &[]).with_hints(&hints)).unwrap();
    assert_eq!(result.data_sources(), vec!["ds_0"]);
}

#[test]
fn test_registry_reload_between_snapshots() {
    let sharding: SchemaConfig = toml::from_str(SHARDING_SCHEMA).unwrap();
    let master_slave: SchemaConfig = toml::from_str(MASTER_SLAVE_SCHEMA).unwrap();
    let registry = RuleRegistry::build(&sharding).unwrap();

    let before = registry.snapshot();
    registry.reload(&master_slave).unwrap();
    let after = registry.snapshot();

    let stmt = select("SELECT * FROM t_order", None);
    assert_eq!(before.dispatch(RouteInput::new(&stmt, &[])).unwrap().route_units.len(), 6);
    assert_eq!(after.dispatch(RouteInput::new(&stmt, &[])).unwrap().data_sources(), vec!["ds_slave_0"]);
}
