use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

fn sweep_command(config_dir: &Path, args: &[&str]) -> Command {
    let binary_path = env!("CARGO_BIN_EXE_holeice-sweep");
    let mut command = Command::new(binary_path);
    command
        .args(args)
        .arg("--config")
        .arg(config_dir.join("sweep.json"))
        .env_remove("SGE_TASK_ID")
        .env_remove("RUST_LOG");
    command
}

fn run_sweep(config_dir: &Path, args: &[&str]) -> Output {
    sweep_command(config_dir, args)
        .output()
        .expect("holeice-sweep should start")
}

fn write_config(dir: &Path, config: &Value) {
    fs::write(
        dir.join("sweep.json"),
        serde_json::to_string_pretty(config).expect("config should serialize"),
    )
    .expect("config should be written");
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Two distances by two scattering factors; the simulator is a shell script
/// that logs its arguments and writes a result record whose statistic
/// equals the scattering factor.
fn scan_config(dir: &Path) -> Value {
    let script = dir.join("simulate.sh");
    fs::write(
        &script,
        "#!/bin/sh\n\
         echo \"simulating scattering=$1 distance=$2\"\n\
         mkdir -p \"$3\"\n\
         printf '{\"chi_squared_results\": {\"ref\": {\"chi^2_nu\": \"%s\", \"nu\": \"12\"}}}' \"$1\" > \"$3/options.json\"\n\
         echo hits > \"$3/hits.txt\"\n\
         echo frame > \"$3/frames.i3\"\n",
    )
    .expect("script should be written");

    json!({
        "name": "hole ice scattering scan",
        "axes": [
            { "name": "distance", "label": "dst", "values": [1.0, 2.0] },
            { "name": "scattering", "label": "sca", "values": [0.1, 0.5] }
        ],
        "fixed": { "output": dir.join("current").to_string_lossy() },
        "simulation": {
            "program": "sh",
            "args": [script.to_string_lossy(), "{scattering}", "{distance}", "{output}"],
            "log_name": "angular_acceptance"
        },
        "collect": {
            "output_dir": "current",
            "remove_patterns": ["*.i3"],
            "expected_files": ["hits.txt"]
        },
        "aggregate": { "group_by": ["distance"] }
    })
}

#[test]
fn list_prints_the_grid_with_one_based_indices() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_config(temp.path(), &scan_config(temp.path()));

    let output = run_sweep(temp.path(), &["list"]);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    let lines: Vec<&str> = stdout.lines().collect();
    assert!(lines[0].trim_start().starts_with("1  dst1.0_sca0.1"));
    assert!(lines[2].trim_start().starts_with("3  dst2.0_sca0.1"));
    assert!(lines[2].ends_with("distance=2.0, scattering=0.1"));
    assert_eq!(lines[4], "4 parameter sets");
}

#[test]
fn axis_overrides_change_the_grid() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_config(temp.path(), &scan_config(temp.path()));

    let output = run_sweep(temp.path(), &["list", "--axis", "distance=1.0,2.0,3.0"]);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(stdout_of(&output).contains("6 parameter sets"));

    let output = run_sweep(temp.path(), &["list", "--axis", "radius=1"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr_of(&output).contains("ERROR: [CONFIG.INVALID] axis 'radius' is not configured"));
}

#[test]
fn invalid_configuration_is_a_fatal_configuration_error() {
    let temp = TempDir::new().expect("tempdir should be created");
    let mut config = scan_config(temp.path());
    config["axes"][1]["values"] = json!([]);
    write_config(temp.path(), &config);

    let output = run_sweep(temp.path(), &["run"]);
    assert_eq!(output.status.code(), Some(2));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("ERROR: [CONFIG.AXIS_EMPTY]"), "stderr: {stderr}");
    assert!(stderr.contains("FATAL EXIT CODE: 2"));
    assert!(!temp.path().join("results").exists());
}

#[test]
fn unknown_subcommands_are_usage_errors() {
    let temp = TempDir::new().expect("tempdir should be created");
    let output = run_sweep(temp.path(), &["sweep"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr_of(&output).contains("ERROR: [CONFIG.CLI_USAGE]"));
}

#[cfg(unix)]
#[test]
fn local_sweep_collects_aggregates_and_resumes() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_config(temp.path(), &scan_config(temp.path()));

    let output = run_sweep(temp.path(), &["run"]);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("Sweep status: OK (local)"), "stdout: {stdout}");
    assert!(stdout.contains("Jobs: 4 selected (0 skipped, 4 collected, 0 failed"));
    assert!(stdout.contains("Best chi^2_nu: 0.1"));

    let result_dir = temp.path().join("results/dst2.0_sca0.5");
    assert!(result_dir.join("hits.txt").is_file());
    assert!(!result_dir.join("frames.i3").exists());
    assert!(
        fs::read_to_string(result_dir.join("angular_acceptance.log"))
            .expect("log should be collected")
            .contains("simulating scattering=0.5 distance=2.0")
    );
    let record: Value = serde_json::from_str(
        &fs::read_to_string(result_dir.join("options.json")).expect("record should exist"),
    )
    .expect("record should parse");
    assert_eq!(record["distance"], json!(2.0));
    assert_eq!(record["parameter_set_index"], json!(4));

    let table = fs::read_to_string(temp.path().join("tmp/dst1.0.csv")).expect("table");
    assert_eq!(
        table,
        "distance scattering chi^2_nu nu\n1.0 0.1 0.1 12\n1.0 0.5 0.5 12\n"
    );

    let output = run_sweep(temp.path(), &["run"]);
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(stdout_of(&output).contains("Skipping already existing run"));

    let report: Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join("tmp/sweep-report.json")).expect("report"),
    )
    .expect("report should parse");
    assert_eq!(report["skipped_count"], json!(4));
    assert_eq!(report["collected_count"], json!(0));
    assert_eq!(report["aggregate"]["rows"], json!(4));
}

#[cfg(unix)]
#[test]
fn cluster_task_runs_exactly_its_parameter_set() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_config(temp.path(), &scan_config(temp.path()));

    let output = sweep_command(temp.path(), &["run"])
        .env("SGE_TASK_ID", "3")
        .output()
        .expect("holeice-sweep should start");
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert!(stdout_of(&output).contains("This is cluster task 3."));

    let results: Vec<String> = fs::read_dir(temp.path().join("results"))
        .expect("results dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(results, vec!["dst2.0_sca0.1"]);
    assert!(!temp.path().join("tmp/dst1.0.csv").exists());
    assert!(temp.path().join("tmp/task3/sweep-report.json").is_file());

    let output = sweep_command(temp.path(), &["run"])
        .env("SGE_TASK_ID", "5")
        .output()
        .expect("holeice-sweep should start");
    assert_eq!(output.status.code(), Some(2));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("ERROR: [CONFIG.INDEX_OUT_OF_RANGE]"), "stderr: {stderr}");

    let output = sweep_command(temp.path(), &["run"])
        .env("SGE_TASK_ID", "three")
        .output()
        .expect("holeice-sweep should start");
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr_of(&output).contains("ERROR: [CONFIG.TASK_INDEX]"));
}

#[cfg(unix)]
#[test]
fn failed_cluster_task_exits_with_one() {
    let temp = TempDir::new().expect("tempdir should be created");
    let mut config = scan_config(temp.path());
    config["collect"]["expected_files"] = json!(["hits.txt", "angular_acceptance.root"]);
    write_config(temp.path(), &config);

    let output = sweep_command(temp.path(), &["run"])
        .env("SGE_TASK_ID", "1")
        .output()
        .expect("holeice-sweep should start");
    assert_eq!(output.status.code(), Some(1), "stdout: {}", stdout_of(&output));
    assert!(stdout_of(&output).contains("Sweep status: FAILURES"));
}

#[cfg(unix)]
#[test]
fn submit_builds_one_array_job_over_the_grid() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().expect("tempdir should be created");
    let qsub = temp.path().join("qsub");
    let submitted = temp.path().join("submitted.txt");
    fs::write(
        &qsub,
        format!("#!/bin/sh\necho \"$@\" > \"{}\"\n", submitted.display()),
    )
    .expect("fake qsub should be written");
    fs::set_permissions(&qsub, fs::Permissions::from_mode(0o755)).expect("chmod");

    let mut config = scan_config(temp.path());
    config["cluster"] = json!({
        "submit_program": qsub.to_string_lossy(),
        "status_program": "true"
    });
    write_config(temp.path(), &config);

    let output = sweep_command(temp.path(), &["run", "--submit-to-cluster", "--cpu"])
        .env("USER", "alice")
        .output()
        .expect("holeice-sweep should start");
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(
        fs::read_to_string(&submitted).expect("qsub should have run").trim(),
        "-l tmpdir_size=10G -l s_rt=1:00:00 -l h_rss=2G -m ae -t 1-4 batch-job.sh --cpu"
    );
    assert!(!temp.path().join("results").exists());
    assert!(stdout_of(&output).contains("Submitted an array job with 4 tasks"));
}

#[cfg(unix)]
#[test]
fn aggregate_command_scans_explicit_roots() {
    let temp = TempDir::new().expect("tempdir should be created");
    write_config(temp.path(), &scan_config(temp.path()));
    let root = temp.path().join("copied-results/node7/dst1.0_sca0.5");
    fs::create_dir_all(&root).expect("root should be created");
    fs::write(
        root.join("options.json"),
        r#"{ "distance": 1.0, "scattering": 0.5,
             "chi_squared_results": { "ref": { "chi^2_nu": "2.25", "nu": "12" } } }"#,
    )
    .expect("record should be written");
    fs::write(
        temp.path().join("copied-results/node7/options.json"),
        "{ \"distance\": 1.0 }",
    )
    .expect("record should be written");

    let copied = temp.path().join("copied-results");
    let output = sweep_command(temp.path(), &["aggregate"])
        .arg(&copied)
        .output()
        .expect("holeice-sweep should start");
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("Aggregate: 1 rows, 1 dropped records"), "stdout: {stdout}");
    assert!(stdout.contains("Best chi^2_nu: 2.25 at distance=1.0, scattering=0.5"));

    let summary: Value = serde_json::from_str(
        &fs::read_to_string(temp.path().join("tmp/aggregate-summary.json")).expect("summary"),
    )
    .expect("summary should parse");
    assert_eq!(summary["groups"][0]["name"], json!("dst1.0"));
}
