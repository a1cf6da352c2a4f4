//! The `dashvars` binary end to end.

use assert_cmd::Command;
use predicates::prelude::*;

use crate::common::{CYCLIC_DASHBOARD, DOCKER_DASHBOARD, TestProject};

#[test]
fn test_resolve_text_output() {
    let project = TestProject::new().unwrap();
    project.write_file("dash.toml", DOCKER_DASHBOARD).unwrap();

    let output = project.run_dashvars(&["resolve", "dash.toml"]).unwrap();
    assert!(output.success, "stderr: {}", output.stderr);
    assert!(output.stdout.contains("Dashboard dash1"));
    assert!(output.stdout.contains("static [constant] ready: beans"));
    assert!(output.stdout.contains("dependent [query] loading"));
    assert!(output.stdout.contains("docker: waiting on dependent"));
    assert!(output.stdout.contains("URL ?lower=now%28%29%20-%201h"));
}

#[test]
fn test_resolve_with_selection_as_json() {
    let project = TestProject::new().unwrap();
    project.write_file("dash.toml", DOCKER_DASHBOARD).unwrap();

    let output =
        project.run_dashvars(&["resolve", "dash.toml", "--select", "static=defbuck", "--format", "json"]).unwrap();
    assert!(output.success, "stderr: {}", output.stderr);

    let json: serde_json::Value = serde_json::from_str(&output.stdout).unwrap();
    assert_eq!(json["dashboard"], "dash1");
    assert_eq!(json["search"], "?lower=now%28%29%20-%201h&vars%5Bstatic%5D=defbuck");
    assert_eq!(json["executions"], 2);
    assert_eq!(json["cells"][0]["status"], "ready");
    assert_eq!(
        json["cells"][0]["query"],
        r#"from(bucket: "defbuck") |> filter(fn: (r) => r.container_name == "beans")"#
    );
    assert_eq!(json["variables"][1]["name"], "dependent");
    assert_eq!(json["variables"][1]["values"], serde_json::json!(["beans", "cool"]));
}

#[test]
fn test_resolve_from_url_and_lower_bound() {
    let project = TestProject::new().unwrap();
    project.write_file("dash.toml", DOCKER_DASHBOARD).unwrap();

    let output = project
        .run_dashvars(&[
            "resolve",
            "dash.toml",
            "--url",
            "?vars%5Bstatic%5D=defbuck",
            "--lower",
            "now() - 2d",
            "--format",
            "json",
        ])
        .unwrap();
    assert!(output.success, "stderr: {}", output.stderr);

    let json: serde_json::Value = serde_json::from_str(&output.stdout).unwrap();
    assert_eq!(json["time_range"]["lower"], "now() - 2d");
    assert_eq!(json["search"], "?vars%5Bstatic%5D=defbuck&lower=now%28%29%20-%202d");
    assert_eq!(json["variables"][0]["selected"], "defbuck");
    assert_eq!(json["variables"][0]["explicit"], true);
}

#[test]
fn test_resolve_rejects_unavailable_selection() {
    let project = TestProject::new().unwrap();
    project.write_file("dash.toml", DOCKER_DASHBOARD).unwrap();

    let output = project.run_dashvars(&["resolve", "dash.toml", "--select", "static=nope"]).unwrap();
    assert!(!output.success);
    assert!(output.stderr.contains("Value 'nope' is not available for variable 'static'"));
}

#[test]
fn test_resolve_missing_file() {
    let project = TestProject::new().unwrap();

    let output = project.run_dashvars(&["resolve", "missing.toml"]).unwrap();
    assert!(!output.success);
    assert!(output.stderr.contains("Failed to read dashboard"));
}

#[test]
fn test_graph_lists_dependencies() {
    let project = TestProject::new().unwrap();
    project.write_file("dash.toml", DOCKER_DASHBOARD).unwrap();

    let output = project.run_dashvars(&["graph", "dash.toml", "--format", "json"]).unwrap();
    assert!(output.success, "stderr: {}", output.stderr);

    let json: serde_json::Value = serde_json::from_str(&output.stdout).unwrap();
    assert_eq!(json["order"], serde_json::json!(["static", "dependent"]));
    assert_eq!(json["variables"][1]["depends_on"], serde_json::json!(["static"]));
    assert_eq!(json["cycles"], serde_json::json!([]));

    let output = project.run_dashvars(&["graph", "dash.toml"]).unwrap();
    assert!(output.success);
    assert!(output.stdout.contains("2 variables, 1 references"));
    assert!(output.stdout.contains("order: static → dependent"));
}

#[test]
fn test_validate_valid_and_cyclic_dashboards() {
    let project = TestProject::new().unwrap();
    project.write_file("dash.toml", DOCKER_DASHBOARD).unwrap();
    project.write_file("cyclic.toml", CYCLIC_DASHBOARD).unwrap();

    let output = project.run_dashvars(&["validate", "dash.toml"]).unwrap();
    assert!(output.success, "stderr: {}", output.stderr);
    assert!(output.stdout.contains("Valid dashboard: 2 variables, 1 cells"));

    let output = project.run_dashvars(&["validate", "cyclic.toml"]).unwrap();
    assert!(!output.success);
    assert!(output.stdout.contains("Circular variable reference"));
    assert!(output.stderr.contains("Validation failed with 1 error(s)"));
}

#[test]
fn test_validate_strict_promotes_warnings() {
    let project = TestProject::new().unwrap();
    project
        .write_file(
            "warn.toml",
            r#"
id = "warn"

[[variables]]
id = "c"
name = "CSVVariable"
type = "constant"
values = ["c1"]

[[cells]]
id = "cell"
query = "from(bucket: v.missing)"
"#,
        )
        .unwrap();

    let output = project.run_dashvars(&["validate", "warn.toml"]).unwrap();
    assert!(output.success, "stderr: {}", output.stderr);
    assert!(output.stdout.contains("Warning: Cell 'cell' references unknown variable 'missing'"));

    let output = project.run_dashvars(&["validate", "warn.toml", "--strict"]).unwrap();
    assert!(!output.success);
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("dashvars")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("graph"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_verbose_and_quiet_conflict() {
    Command::cargo_bin("dashvars")
        .unwrap()
        .args(["--verbose", "--quiet", "validate", "dash.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}
