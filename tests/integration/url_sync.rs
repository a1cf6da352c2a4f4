//! URL seeding on mount and write-back after changes.

use std::sync::Arc;

use dashvars::core::{CellId, TimeRange};
use dashvars::test_utils::{RecordingExecutor, fixtures};

use crate::common::{dash, session};

const LOWER: &str = "?lower=now%28%29%20-%201h";

fn selection_session(executor: Arc<RecordingExecutor>) -> dashvars::session::DashboardSession {
    let (variables, cells) = fixtures::selection_dashboard();
    session(variables, cells, executor)
}

#[tokio::test]
async fn test_mount_writes_default_lower_bound() {
    let session = selection_session(Arc::new(fixtures::selection_responses(RecordingExecutor::new())));
    session.mount("").await.unwrap();
    assert_eq!(session.search().await, LOWER);
}

#[tokio::test]
async fn test_url_selection_survives_mount_and_commits_update_it() {
    let session = selection_session(Arc::new(fixtures::selection_responses(RecordingExecutor::new())));
    let dash = dash(&session);
    let seeded = "?lower=now%28%29%20-%201h&vars%5BCSVVariable%5D=c3";

    session.mount(seeded).await.unwrap();
    assert_eq!(session.search().await, seeded);
    let csv = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c3"));
    assert!(csv.explicit);

    // Change it from a cell editor and save
    let cell = CellId::new("csv-cell");
    let overlay = session.open_overlay(&dash, Some(&cell)).await.unwrap();
    let inherited = session.hydrated(&overlay, "CSVVariable").await.unwrap();
    assert_eq!(inherited.selected_value(), Some("c3"));
    session.select(&overlay, "CSVVariable", "c2").await.unwrap();
    assert_eq!(session.search().await, seeded, "overlay changes stay out of the URL");
    session.commit_overlay(&overlay).await.unwrap();

    assert_eq!(session.search().await, format!("{LOWER}&vars%5BCSVVariable%5D=c2"));
    let csv = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c2"));

    // Selecting the default again drops the parameter
    let overlay = session.open_overlay(&dash, Some(&cell)).await.unwrap();
    session.select(&overlay, "CSVVariable", "c1").await.unwrap();
    session.commit_overlay(&overlay).await.unwrap();
    assert_eq!(session.search().await, LOWER);
}

#[tokio::test]
async fn test_dashboard_selections_rewrite_the_url_param() {
    let session = selection_session(Arc::new(fixtures::selection_responses(RecordingExecutor::new())));
    let dash = dash(&session);
    session.mount("?lower=now%28%29%20-%201h&foo=bar").await.unwrap();

    session.select(&dash, "CSVVariable", "c3").await.unwrap();
    assert_eq!(session.search().await, "?lower=now%28%29%20-%201h&foo=bar&vars%5BCSVVariable%5D=c3");

    session.select(&dash, "CSVVariable", "c2").await.unwrap();
    assert_eq!(session.search().await, "?lower=now%28%29%20-%201h&foo=bar&vars%5BCSVVariable%5D=c2");

    session.select(&dash, "MapVariable", "k2").await.unwrap();
    assert_eq!(
        session.search().await,
        "?lower=now%28%29%20-%201h&foo=bar&vars%5BCSVVariable%5D=c2&vars%5BMapVariable%5D=k2"
    );
}

#[tokio::test]
async fn test_url_accepts_unencoded_parameters() {
    let session = selection_session(Arc::new(fixtures::selection_responses(RecordingExecutor::new())));
    let dash = dash(&session);

    session.mount("?lower=now()%20-%206h&vars[CSVVariable]=c2").await.unwrap();
    assert_eq!(session.time_range().await, TimeRange::since("now() - 6h"));
    let csv = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c2"));
    assert_eq!(session.search().await, "?lower=now%28%29%20-%206h&vars%5BCSVVariable%5D=c2");
}

#[tokio::test]
async fn test_stale_url_selection_falls_back_to_default() {
    let session = selection_session(Arc::new(fixtures::selection_responses(RecordingExecutor::new())));
    let dash = dash(&session);

    session.mount("?vars%5BCSVVariable%5D=c9").await.unwrap();
    let csv = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c1"));
    assert!(!csv.explicit);
    assert_eq!(session.search().await, LOWER);
}

#[tokio::test]
async fn test_url_selection_for_query_variable() {
    let executor = Arc::new(fixtures::selection_responses(RecordingExecutor::new()));
    let session = selection_session(executor.clone());
    let dash = dash(&session);

    session.mount("?vars%5BQueryVariable%5D=b2").await.unwrap();
    let query = session.hydrated(&dash, "QueryVariable").await.unwrap();
    assert_eq!(query.selected_value(), Some("b2"));
    assert_eq!(
        session.cell_status(&dash, &CellId::new("query-cell")).await.unwrap(),
        dashvars::session::CellStatus::Ready {
            query: r#"from(bucket: "b2")"#.to_string()
        }
    );
    assert_eq!(session.search().await, format!("{LOWER}&vars%5BQueryVariable%5D=b2"));
}

#[tokio::test]
async fn test_unknown_url_variable_is_ignored() {
    let session = selection_session(Arc::new(fixtures::selection_responses(RecordingExecutor::new())));
    let dash = dash(&session);

    let report = session.mount("?vars%5BNope%5D=x").await.unwrap();
    assert!(report.failed.is_empty());
    let csv = session.hydrated(&dash, "CSVVariable").await.unwrap();
    assert_eq!(csv.selected_value(), Some("c1"));
}

#[tokio::test]
async fn test_map_selection_writes_key_to_url() {
    let session = selection_session(Arc::new(fixtures::selection_responses(RecordingExecutor::new())));
    let dash = dash(&session);
    session.mount("").await.unwrap();

    session.select(&dash, "MapVariable", "k2").await.unwrap();
    assert_eq!(session.search().await, format!("{LOWER}&vars%5BMapVariable%5D=k2"));
}

#[tokio::test]
async fn test_time_range_change_updates_url_and_requeries() {
    let executor = Arc::new(fixtures::docker_responses(RecordingExecutor::new()));
    let (variables, cells) = fixtures::docker_dashboard();
    let session = session(variables, cells, executor.clone());
    session.mount("").await.unwrap();
    assert_eq!(executor.call_count(), 1);

    session.set_time_range(TimeRange::since("now() - 24h")).await.unwrap();
    assert_eq!(session.search().await, "?lower=now%28%29%20-%2024h");
    assert_eq!(executor.call_count(), 2);
    assert_eq!(executor.calls_matching("range(start: now() - 24h)"), 1);
}
