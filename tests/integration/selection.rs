//! Default and explicit selections.

use std::sync::Arc;

use dashvars::core::{CellId, DashvarError, Variable};
use dashvars::session::CellStatus;
use dashvars::test_utils::{RecordingExecutor, fixtures};

use crate::common::{dash, session};

#[tokio::test]
async fn test_mount_selects_first_value_by_default() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::selection_dashboard();
    let session = session(variables, cells, executor.clone());
    let dash = dash(&session);

    let report = session.mount("").await.unwrap();
    assert_eq!(report.ready.len(), 3);
    assert!(report.failed.is_empty());

    let csv = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c1"));
    assert!(!csv.explicit);

    let query = session.hydrated(&dash, "QueryVariable").await.unwrap();
    assert_eq!(query.values, vec!["b1", "b2"]);
    assert_eq!(query.selected_value(), Some("b1"));

    assert_eq!(executor.calls(), vec![r#"buckets() |> filter(fn: (r) => r.name != "c1")"#]);
}

#[tokio::test]
async fn test_map_variable_substitutes_value_for_key() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::selection_dashboard();
    let session = session(variables, cells, executor);
    let dash = dash(&session);
    session.mount("").await.unwrap();

    let cell = CellId::new("map-cell");
    assert_eq!(
        session.cell_status(&dash, &cell).await.unwrap(),
        CellStatus::Ready {
            query: r#"from(bucket: "v1")"#.to_string()
        }
    );

    session.select(&dash, "MapVariable", "k2").await.unwrap();
    let view = session.view(&dash, "MapVariable").await.unwrap();
    assert_eq!(view.selected.as_deref(), Some("k2"));
    assert_eq!(view.substitution.as_deref(), Some("v2"));
    assert_eq!(
        session.cell_status(&dash, &cell).await.unwrap(),
        CellStatus::Ready {
            query: r#"from(bucket: "v2")"#.to_string()
        }
    );
}

#[tokio::test]
async fn test_selection_reexecutes_dependent_queries() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::selection_dashboard();
    let session = session(variables, cells, executor.clone());
    let dash = dash(&session);
    session.mount("").await.unwrap();

    session.select(&dash, "CSVVariable", "c2").await.unwrap();
    assert_eq!(executor.calls_matching(r#"r.name != "c2""#), 1);
    assert_eq!(executor.call_count(), 2);

    let csv = session.hydrated(&dash, "csv").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c2"));
    assert!(csv.explicit);

    // Back to a combination already seen: served from the cache
    session.select(&dash, "csv", "c1").await.unwrap();
    assert_eq!(executor.call_count(), 2);
}

#[tokio::test]
async fn test_select_rejects_unavailable_value() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::selection_dashboard();
    let session = session(variables, cells, executor);
    let dash = dash(&session);
    session.mount("").await.unwrap();

    let err = session.select(&dash, "CSVVariable", "c9").await.unwrap_err();
    assert_eq!(
        err,
        DashvarError::ValueNotAvailable {
            variable: "CSVVariable".to_string(),
            value: "c9".to_string(),
        }
    );
    let csv = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c1"));
    assert!(!csv.explicit);

    let err = session.select(&dash, "Nope", "x").await.unwrap_err();
    assert!(matches!(err, DashvarError::UnknownVariable { .. }));
}

#[tokio::test]
async fn test_persisted_selection_is_the_default() {
    let executor = Arc::new(RecordingExecutor::new());
    let variables = vec![Variable::constant("csv", "CSVVariable", ["c1", "c2", "c3"]).with_selected("c2")];
    let cells = vec![dashvars::core::Cell::new("cell", "from(bucket: v.CSVVariable)")];
    let session = session(variables, cells, executor);
    let dash = dash(&session);
    session.mount("").await.unwrap();

    let csv = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c2"));
    assert!(!csv.is_non_default());
    assert_eq!(session.search().await, "?lower=now%28%29%20-%201h");

    session.select(&dash, "CSVVariable", "c1").await.unwrap();
    assert_eq!(session.search().await, "?lower=now%28%29%20-%201h&vars%5BCSVVariable%5D=c1");
}

#[tokio::test]
async fn test_variables_in_scope_follow_definition_order() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::selection_dashboard();
    let session = session(variables, cells, executor);
    let dash = dash(&session);
    session.mount("").await.unwrap();

    let names: Vec<String> = session.variables_in_scope(&dash).await.unwrap().into_iter().map(|v| v.name).collect();
    assert_eq!(names, vec!["CSVVariable", "MapVariable", "QueryVariable"]);
}

#[tokio::test]
async fn test_overlapping_selections_keep_latest_results() {
    let executor = Arc::new(
        RecordingExecutor::new()
            .with_latency(std::time::Duration::from_millis(200))
            .respond(r#"hosts("c1")"#, ["x1"])
            .respond(r#"hosts("c3")"#, ["y1"]),
    );
    let variables = vec![
        Variable::constant("csv", "CSVVariable", ["c1", "c2", "c3"]),
        Variable::query("q", "q", "hosts(v.CSVVariable)"),
    ];
    let cells = vec![dashvars::core::Cell::new("cell", "from(bucket: v.CSVVariable) |> filter(v.q)")];
    let session = session(variables, cells, executor.clone());
    let dash = dash(&session);
    session.mount("").await.unwrap();

    // The slow pass for c3 finishes after the cached pass for c1
    let (slow, fast) = tokio::join!(session.select(&dash, "CSVVariable", "c3"), async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        session.select(&dash, "CSVVariable", "c1").await
    });
    assert!(slow.unwrap().superseded);
    assert!(!fast.unwrap().superseded);

    let csv = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c1"));
    let q = session.hydrated(&dash, "q").await.unwrap();
    assert_eq!(q.values, vec!["x1"]);
    assert_eq!(
        session.cell_status(&dash, &CellId::new("cell")).await.unwrap(),
        CellStatus::Ready {
            query: r#"from(bucket: "c1") |> filter("x1")"#.to_string()
        }
    );
    assert_eq!(session.search().await, "?lower=now%28%29%20-%201h");
    assert_eq!(executor.calls_matching(r#"hosts("c3")"#), 1);
}
