//! Ready-made dashboards for tests.

use crate::core::{Cell, Variable};

use super::RecordingExecutor;

/// A constant bucket picker feeding a query variable, and one cell using both.
///
/// | name        | kind     | depends on |
/// |-------------|----------|------------|
/// | `static`    | constant |            |
/// | `dependent` | query    | `static`   |
pub fn docker_dashboard() -> (Vec<Variable>, Vec<Cell>) {
    let variables = vec![
        Variable::constant("static", "static", ["beans", "defbuck"]),
        Variable::query(
            "dependent",
            "dependent",
            r#"from(bucket: v.static) |> range(start: v.timeRangeStart) |> keep(columns: ["container_name"])"#,
        ),
    ];
    let cells = vec![Cell::new(
        "docker",
        r#"from(bucket: v.static) |> range(start: v.timeRangeStart) |> filter(fn: (r) => r.container_name == v.dependent)"#,
    )];
    (variables, cells)
}

/// Answers for [`docker_dashboard`]: `beans` has no containers, `defbuck` has two.
pub fn docker_responses(executor: RecordingExecutor) -> RecordingExecutor {
    executor
        .respond(r#"from(bucket: "defbuck")"#, ["beans", "cool"])
        .respond(r#"from(bucket: "beans")"#, Vec::<String>::new())
}

/// A CSV constant, a map and a query variable, each used by its own cell.
pub fn selection_dashboard() -> (Vec<Variable>, Vec<Cell>) {
    let variables = vec![
        Variable::constant("csv", "CSVVariable", ["c1", "c2", "c3"]),
        Variable::map("map", "MapVariable", [("k1", "v1"), ("k2", "v2")]),
        Variable::query("query", "QueryVariable", "buckets() |> filter(fn: (r) => r.name != v.CSVVariable)"),
    ];
    let cells = vec![
        Cell::new("csv-cell", "from(bucket: v.CSVVariable)"),
        Cell::new("map-cell", "from(bucket: v.MapVariable)"),
        Cell::new("query-cell", "from(bucket: v.QueryVariable)"),
    ];
    (variables, cells)
}

/// Answers for [`selection_dashboard`]'s query variable.
pub fn selection_responses(executor: RecordingExecutor) -> RecordingExecutor {
    executor.respond("buckets()", ["b1", "b2"])
}
