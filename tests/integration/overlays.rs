//! Cell-editor overlays: isolation, commit, discard and teardown.

use std::sync::Arc;
use std::time::Duration;

use dashvars::core::{Cell, CellId, DashvarError, Variable};
use dashvars::session::{CellStatus, DashboardSession};
use dashvars::test_utils::{RecordingExecutor, fixtures};

use crate::common::{dash, session};

#[tokio::test]
async fn test_overlay_changes_are_isolated_until_commit() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::selection_dashboard();
    let session = session(variables, cells, executor.clone());
    let dash = dash(&session);
    session.mount("").await.unwrap();

    let overlay = session.open_overlay(&dash, Some(&CellId::new("query-cell"))).await.unwrap();
    assert!(overlay.as_str().starts_with("dash/overlay-"));
    // Results computed by the dashboard are reused
    assert_eq!(executor.call_count(), 1);

    session.select(&overlay, "CSVVariable", "c3").await.unwrap();
    assert_eq!(executor.calls_matching(r#"r.name != "c3""#), 1);

    let in_overlay = session.hydrated(&overlay, "CSVVariable").await.unwrap();
    let on_dashboard = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(in_overlay.selected_value(), Some("c3"));
    assert_eq!(on_dashboard.selected_value(), Some("c1"));

    let cell = session.commit_overlay(&overlay).await.unwrap();
    assert_eq!(cell.id, CellId::new("query-cell"));
    let on_dashboard = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(on_dashboard.selected_value(), Some("c3"));
    assert!(on_dashboard.explicit);

    // The overlay's result came back with the commit
    assert_eq!(executor.calls_matching(r#"r.name != "c3""#), 1);
    assert!(matches!(
        session.hydrated(&overlay, "CSVVariable").await,
        Err(DashvarError::UnknownContext { .. })
    ));
}

#[tokio::test]
async fn test_discard_leaves_dashboard_untouched() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::selection_dashboard();
    let session = session(variables, cells, executor);
    let dash = dash(&session);
    session.mount("").await.unwrap();

    let cell = CellId::new("map-cell");
    let before_search = session.search().await;
    let before_cells = session.cells().await;
    let before_status = session.cell_status(&dash, &cell).await.unwrap();

    let overlay = session.open_overlay(&dash, Some(&cell)).await.unwrap();
    session.set_draft_query(&overlay, "from(bucket: v.MapVariable) |> filter(v.CSVVariable)").await.unwrap();
    session.select(&overlay, "MapVariable", "k2").await.unwrap();
    session.select(&overlay, "CSVVariable", "c3").await.unwrap();
    assert_eq!(
        session.cell_status(&overlay, &cell).await.unwrap(),
        CellStatus::Ready {
            query: r#"from(bucket: "v2") |> filter("c3")"#.to_string()
        }
    );
    session.discard_overlay(&overlay).await.unwrap();

    assert_eq!(session.cells().await, before_cells);
    assert_eq!(session.cell_status(&dash, &cell).await.unwrap(), before_status);
    assert_eq!(
        before_status,
        CellStatus::Ready {
            query: r#"from(bucket: "v1")"#.to_string()
        }
    );
    let map = session.hydrated(&dash, "MapVariable").await.unwrap();
    assert_eq!(map.selected_value(), Some("k1"));
    assert_eq!(session.hydrated(&dash, "CSVVariable").await.unwrap().selected_value(), Some("c1"));
    assert_eq!(session.search().await, before_search);
    assert!(matches!(
        session.discard_overlay(&overlay).await,
        Err(DashvarError::UnknownContext { .. })
    ));
}

#[tokio::test]
async fn test_new_cell_overlay_commits_a_cell() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::selection_dashboard();
    let session = session(variables, cells, executor);
    let dash = dash(&session);
    session.mount("").await.unwrap();

    let overlay = session.open_overlay(&dash, None).await.unwrap();
    session.set_draft_query(&overlay, "from(bucket: v.MapVariable)").await.unwrap();
    session.select(&overlay, "MapVariable", "k2").await.unwrap();

    let draft_id = session.cells().await.len();
    assert_eq!(draft_id, 3, "drafts are not cells until committed");

    let cell = session.commit_overlay(&overlay).await.unwrap();
    assert!(cell.id.as_str().starts_with("cell-"));
    assert_eq!(cell.query, "from(bucket: v.MapVariable)");

    let cells = session.cells().await;
    assert_eq!(cells.len(), 4);
    assert_eq!(cells[3].id, cell.id);
    assert_eq!(
        session.cell_status(&dash, &cell.id).await.unwrap(),
        CellStatus::Ready {
            query: r#"from(bucket: "v2")"#.to_string()
        }
    );
    assert_eq!(session.search().await, "?lower=now%28%29%20-%201h&vars%5BMapVariable%5D=k2");
}

#[tokio::test]
async fn test_draft_query_drives_overlay_cell_status() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::selection_dashboard();
    let session = session(variables, cells, executor);
    let dash = dash(&session);
    session.mount("").await.unwrap();

    let cell = CellId::new("csv-cell");
    let overlay = session.open_overlay(&dash, Some(&cell)).await.unwrap();
    session.set_draft_query(&overlay, "from(bucket: v.QueryVariable)").await.unwrap();

    assert_eq!(
        session.cell_status(&overlay, &cell).await.unwrap(),
        CellStatus::Ready {
            query: r#"from(bucket: "b1")"#.to_string()
        }
    );
    // The persisted cell keeps its query until the overlay is committed
    assert_eq!(
        session.cell_status(&dash, &cell).await.unwrap(),
        CellStatus::Ready {
            query: r#"from(bucket: "c1")"#.to_string()
        }
    );
}

#[tokio::test]
async fn test_set_draft_query_requires_overlay() {
    let executor = Arc::new(RecordingExecutor::new());
    let (variables, cells) = fixtures::selection_dashboard();
    let session = session(variables, cells, executor);
    let dash = dash(&session);

    let err = session.set_draft_query(&dash, "from(bucket: v.CSVVariable)").await.unwrap_err();
    assert!(matches!(err, DashvarError::NotAnOverlay { .. }));
    let err = session.open_overlay(&dash, Some(&CellId::new("missing"))).await.unwrap_err();
    assert!(matches!(err, DashvarError::UnknownCell { .. }));
}

#[tokio::test]
async fn test_discard_during_resolution_drops_results() {
    let executor = Arc::new(RecordingExecutor::new().with_latency(Duration::from_millis(200)).respond("slow(", ["s1"]));
    let variables = vec![
        Variable::constant("csv", "CSVVariable", ["c1", "c2"]),
        Variable::query("q", "q", "slow(v.CSVVariable)"),
    ];
    let cells = vec![Cell::new("cell", "from(bucket: v.q)")];
    let session = session(variables, cells, executor.clone());
    let dash = dash(&session);
    session.mount("").await.unwrap();
    assert_eq!(executor.call_count(), 1);

    let overlay = session.open_overlay(&dash, Some(&CellId::new("cell"))).await.unwrap();
    assert_eq!(executor.call_count(), 1);

    let (selected, discarded) = tokio::join!(session.select(&overlay, "CSVVariable", "c2"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.discard_overlay(&overlay).await
    });
    discarded.unwrap();
    match selected {
        Ok(report) => assert!(report.cancelled),
        Err(DashvarError::UnknownContext { .. }) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }

    // The dashboard never saw the overlay's pick
    let csv = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c1"));
    assert_eq!(
        session.cell_status(&dash, &CellId::new("cell")).await.unwrap(),
        CellStatus::Ready {
            query: r#"from(bucket: "s1")"#.to_string()
        }
    );
}

#[tokio::test]
async fn test_unmount_closes_every_context() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::selection_dashboard();
    let session: DashboardSession = session(variables, cells, executor);
    let dash = dash(&session);
    session.mount("").await.unwrap();
    let overlay = session.open_overlay(&dash, None).await.unwrap();

    session.unmount().await;
    assert!(matches!(session.resolve(&dash).await, Err(DashvarError::UnknownContext { .. })));
    assert!(matches!(session.resolve(&overlay).await, Err(DashvarError::UnknownContext { .. })));
}
