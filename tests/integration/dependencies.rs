//! Dependent variables, cycles and failure propagation.

use std::sync::Arc;

use dashvars::core::{Cell, CellId, ResolveError, Variable, VariableId};
use dashvars::session::CellStatus;
use dashvars::store::VariableStatus;
use dashvars::test_utils::{RecordingExecutor, fixtures};

use crate::common::{dash, session};

#[tokio::test]
async fn test_empty_upstream_result_leaves_dependents_loading() {
    let executor = Arc::new(fixtures::docker_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::docker_dashboard();
    let session = session(variables, cells, executor.clone());
    let dash = dash(&session);
    let docker = CellId::new("docker");

    let report = session.mount("").await.unwrap();
    assert_eq!(report.loading, vec![VariableId::new("dependent")]);
    assert_eq!(
        executor.calls(),
        vec![r#"from(bucket: "beans") |> range(start: now() - 1h) |> keep(columns: ["container_name"])"#]
    );

    let dependent = session.view(&dash, "dependent").await.unwrap();
    assert_eq!(dependent.status, "loading");
    assert!(dependent.values.is_empty());
    assert_eq!(
        session.cell_status(&dash, &docker).await.unwrap(),
        CellStatus::Loading {
            waiting_on: vec!["dependent".to_string()]
        }
    );

    session.select(&dash, "static", "defbuck").await.unwrap();
    let dependent = session.view(&dash, "dependent").await.unwrap();
    assert_eq!(dependent.status, "ready");
    assert_eq!(dependent.values, vec!["beans", "cool"]);
    assert_eq!(dependent.selected.as_deref(), Some("beans"));
    assert_eq!(
        session.cell_status(&dash, &docker).await.unwrap(),
        CellStatus::Ready {
            query: concat!(
                r#"from(bucket: "defbuck") |> range(start: now() - 1h) "#,
                r#"|> filter(fn: (r) => r.container_name == "beans")"#
            )
            .to_string()
        }
    );
    assert_eq!(session.search().await, "?lower=now%28%29%20-%201h&vars%5Bstatic%5D=defbuck");

    // Switching back reuses the earlier result and clears the URL parameter
    session.select(&dash, "static", "beans").await.unwrap();
    assert_eq!(executor.call_count(), 2);
    assert_eq!(session.view(&dash, "dependent").await.unwrap().status, "loading");
    assert_eq!(session.search().await, "?lower=now%28%29%20-%201h");
}

#[tokio::test]
async fn test_cycle_marks_members_and_spares_the_rest() {
    let executor = Arc::new(RecordingExecutor::new());
    let variables = vec![
        Variable::query("a", "a", "from(bucket: v.b)"),
        Variable::query("b", "b", "from(bucket: v.a)"),
        Variable::constant("c", "c", ["c1"]),
    ];
    let cells = vec![Cell::new("broken", "from(bucket: v.a)"), Cell::new("fine", "from(bucket: v.c)")];
    let session = session(variables, cells, executor.clone());
    let dash = dash(&session);

    let report = session.mount("").await.unwrap();
    assert_eq!(report.failed.len(), 2);
    assert_eq!(executor.call_count(), 0);
    assert_eq!(session.graph().cycles().len(), 1);

    let a = session.hydrated(&dash, "a").await.unwrap();
    assert!(matches!(a.status, VariableStatus::Error(ResolveError::CycleDetected { .. })));

    match session.cell_status(&dash, &CellId::new("broken")).await.unwrap() {
        CellStatus::Error {
            variable,
            error,
        } => {
            assert_eq!(variable, "a");
            assert!(matches!(error, ResolveError::CycleDetected { .. }));
        }
        other => panic!("expected an error, got {other:?}"),
    }
    assert_eq!(
        session.cell_status(&dash, &CellId::new("fine")).await.unwrap(),
        CellStatus::Ready {
            query: r#"from(bucket: "c1")"#.to_string()
        }
    );
}

#[tokio::test]
async fn test_failure_propagates_downstream() {
    let executor = Arc::new(RecordingExecutor::new().fail("broken", "bucket not found"));
    let variables = vec![
        Variable::query("up", "up", "from(bucket: broken)"),
        Variable::query("down", "down", "from(bucket: v.up)"),
    ];
    let cells = vec![Cell::new("cell", "from(bucket: v.down)")];
    let session = session(variables, cells, executor.clone());
    let dash = dash(&session);

    let report = session.mount("").await.unwrap();
    assert_eq!(report.failed.len(), 2);
    assert_eq!(executor.call_count(), 1);

    let up = session.view(&dash, "up").await.unwrap();
    assert_eq!(up.status, "error");
    assert!(up.error.unwrap().contains("bucket not found"));

    let down = session.hydrated(&dash, "down").await.unwrap();
    assert_eq!(
        down.status,
        VariableStatus::Error(ResolveError::DependencyFailed {
            variable: "down".to_string(),
            upstream: "up".to_string(),
        })
    );
    assert!(matches!(
        session.cell_status(&dash, &CellId::new("cell")).await.unwrap(),
        CellStatus::Error { .. }
    ));
}

#[tokio::test]
async fn test_failures_are_cached_until_refresh() {
    let executor = Arc::new(RecordingExecutor::new().fail("broken", "timeout"));
    let variables = vec![Variable::query("q", "q", "from(bucket: broken)")];
    let cells = vec![Cell::new("cell", "from(bucket: v.q)")];
    let session = session(variables, cells, executor.clone());
    let dash = dash(&session);

    session.mount("").await.unwrap();
    session.resolve(&dash).await.unwrap();
    assert_eq!(executor.call_count(), 1);
    assert_eq!(session.view(&dash, "q").await.unwrap().status, "error");

    executor.set_response("broken", ["recovered"]);
    let report = session.refresh(&dash).await.unwrap();
    assert_eq!(report.ready, vec![VariableId::new("q")]);
    assert_eq!(executor.call_count(), 2);
    assert_eq!(
        session.cell_status(&dash, &CellId::new("cell")).await.unwrap(),
        CellStatus::Ready {
            query: r#"from(bucket: "recovered")"#.to_string()
        }
    );
}
