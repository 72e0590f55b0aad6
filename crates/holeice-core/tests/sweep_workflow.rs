use holeice_core::common::SweepConfig;
use holeice_core::domain::ParameterValue;
use holeice_core::modules::stage::{Capture, StageError, StageInvocation, StageOutcome};
use holeice_core::modules::{ProcessRunner, ResultAggregator, RunOptions, StageRunner, SweepRunner};
use holeice_core::sweep::{JobIndexer, RunMode};
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// Counts `WARN` events emitted while it is the default subscriber.
#[derive(Clone, Default)]
struct WarningCounter(Arc<AtomicUsize>);

impl WarningCounter {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl<S: Subscriber> Layer<S> for WarningCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Writes a log and a result record per run; the statistic is the
/// scattering value so the best fit is predictable.
struct RecordingSimulator {
    output_dir: PathBuf,
    command_lines: RefCell<Vec<String>>,
}

impl RecordingSimulator {
    fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            command_lines: RefCell::new(Vec::new()),
        }
    }

    fn argument(invocation: &StageInvocation, prefix: &str) -> String {
        invocation
            .args
            .iter()
            .find_map(|arg| arg.strip_prefix(prefix))
            .expect("argument should be bound")
            .to_string()
    }
}

impl StageRunner for RecordingSimulator {
    fn run(&self, invocation: &StageInvocation) -> Result<StageOutcome, StageError> {
        self.command_lines.borrow_mut().push(invocation.command_line());
        if let Capture::File(log) = &invocation.stdout {
            fs::write(log, "Propagating photons\n").expect("log should be written");
        }
        fs::create_dir_all(&self.output_dir).expect("output dir should be created");
        let scattering = Self::argument(invocation, "--scattering=");
        fs::write(
            self.output_dir.join("options.json"),
            format!(r#"{{ "chi_squared_results": {{ "ref": {{ "chi^2_nu": "{scattering}" }} }} }}"#),
        )
        .expect("record should be written");

        let mut outcome = StageOutcome::success();
        if Self::argument(invocation, "--index=") == "2" {
            outcome.stderr_output = "WARNING: photon left the hole ice cylinder\n".to_string();
        }
        Ok(outcome)
    }
}

fn write_sweep(root: &Path) -> SweepConfig {
    let path = root.join("sweep.json");
    fs::write(
        &path,
        r#"{
          "name": "hole ice distance scan",
          "axes": [
            { "name": "distance", "label": "dst", "values": [1.0, 2.0] },
            { "name": "scattering", "label": "sca", "values": [0.1, 0.5] }
          ],
          "derived": [
            { "kind": "dom_radii_to_meters", "from": "distance", "name": "distance_m" }
          ],
          "simulation": {
            "program": "hole-ice-simulator",
            "args": ["--distance-m={distance_m}", "--scattering={scattering}", "--index={index}"]
          },
          "collect": { "output_dir": "current", "expected_files": ["options.json"] }
        }"#,
    )
    .expect("config should be written");
    SweepConfig::load(&path).expect("config should load")
}

#[test]
fn grid_order_matches_cluster_task_indices() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_sweep(temp.path());
    let grid = config.grid().expect("grid should build");
    let indexer = JobIndexer::new(&grid);

    let names: Vec<String> = grid.iter().map(|(_, set)| set.directory_name()).collect();
    assert_eq!(
        names,
        vec!["dst1.0_sca0.1", "dst1.0_sca0.5", "dst2.0_sca0.1", "dst2.0_sca0.5"]
    );

    let selected = indexer
        .select(RunMode::ClusterTask { index: 3 })
        .expect("index 3 should exist");
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].parameters.get("distance"), Some(ParameterValue::Float(2.0)));
    assert_eq!(selected[0].parameters.get("scattering"), Some(ParameterValue::Float(0.1)));
    assert!(indexer.select(RunMode::ClusterTask { index: 0 }).is_err());
}

#[test]
fn local_sweep_binds_derived_fields_and_flags_stderr_output() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_sweep(temp.path());
    let simulator = RecordingSimulator::new(temp.path().join("current"));

    let report = SweepRunner::new(&config, &simulator)
        .run(&RunOptions::default())
        .expect("sweep should run");

    let command_lines = simulator.command_lines.borrow();
    assert_eq!(command_lines.len(), 4);
    assert_eq!(
        command_lines[0],
        "hole-ice-simulator --distance-m=0.1651 --scattering=0.1 --index=1"
    );
    assert_eq!(
        command_lines[3],
        "hole-ice-simulator --distance-m=0.3302 --scattering=0.5 --index=4"
    );

    assert_eq!(report.collected_count, 4);
    assert_eq!(report.failed_count, 0);
    assert_eq!(report.failure_signal_count, 1);
    assert!(report.jobs[1].failure_signal);

    let result_dir = temp.path().join("results/dst1.0_sca0.5");
    assert!(result_dir.join("options.json").is_file());
    assert!(result_dir.join("simulation.log").is_file());

    let aggregate = report.aggregate.expect("local runs aggregate");
    assert_eq!(aggregate.rows, 4);
    let best = aggregate.best.expect("best fit should exist");
    assert_eq!(best.value, 0.1);
    assert!(temp.path().join("tmp/sweep-report.json").is_file());
}

#[test]
fn aggregation_keeps_valid_records_and_reports_the_rest() {
    let temp = TempDir::new().expect("tempdir should be created");
    let config = write_sweep(temp.path());
    let grid = config.grid().expect("grid should build");

    let records = [
        ("dst1.0_sca0.1", r#"{ "distance": 1.0, "scattering": 0.1, "chi_squared_results": { "a": { "chi^2_nu": 4.0 } } }"#),
        ("dst1.0_sca0.5", r#"{ "distance": 1.0, "scattering": 0.5, "chi_squared_results": { "a": { "chi^2_nu": 1.5 } } }"#),
        ("dst2.0_sca0.1", r#"{ "distance": 2.0, "scattering": 0.1, "chi_squared_results": { "a": { "chi^2_nu": 2.0 } } }"#),
        ("dst2.0_sca0.5", r#"{ "distance": 2.0, "scattering": 0.5 }"#),
    ];
    for (dir, content) in records {
        let dir = temp.path().join("results").join(dir);
        fs::create_dir_all(&dir).expect("result dir should be created");
        fs::write(dir.join("options.json"), content).expect("record should be written");
    }

    let aggregator = ResultAggregator::for_sweep(&config, grid.parameter_names())
        .expect("aggregator should build");
    let warnings = WarningCounter::default();
    let subscriber = tracing_subscriber::registry().with(warnings.clone());
    let table = tracing::subscriber::with_default(subscriber, || {
        aggregator.scan(&config.result_roots())
    })
    .expect("scan should succeed");
    assert_eq!(table.len(), 3);
    assert_eq!(warnings.count(), 1);
    assert_eq!(table.dropped().len(), 1);
    assert!(table.dropped()[0].path.ends_with("dst2.0_sca0.5/options.json"));

    let summary = aggregator
        .write_outputs::<ProcessRunner>(&table, &config.staging_dir, None)
        .expect("outputs should be written");
    let best = summary.best.expect("best fit should exist");
    assert_eq!(best.value, 1.5);
    assert_eq!(best.parameters["scattering"], serde_json::json!(0.5));
    assert!(temp.path().join("tmp/all.csv").is_file());
}
