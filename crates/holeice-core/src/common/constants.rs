//! Physical and layout constants shared by the sweep phases.

/// Radius of an IceCube digital optical module in metres.
pub const DOM_RADIUS_METERS: f64 = 0.165_10;

/// Mean cosine of the scattering angle of bulk ice, `<cos theta>`.
pub const MEAN_SCATTERING_ANGLE_COSINE: f64 = 0.94;

pub const DEFAULT_TASK_ENV: &str = "SGE_TASK_ID";
pub const DEFAULT_RESULTS_DIR: &str = "results";
pub const DEFAULT_CLUSTER_RESULTS_DIR: &str = "cluster-results";
pub const DEFAULT_STAGING_DIR: &str = "tmp";
pub const DEFAULT_RECORD_FILE: &str = "options.json";
pub const DEFAULT_RECORD_GLOB: &str = "**/options.json";
pub const DEFAULT_STATISTIC_KEY: &str = "chi_squared_results";
pub const DEFAULT_LOG_NAME: &str = "simulation";
pub const REPORT_FILE_NAME: &str = "sweep-report.json";

/// Number of trailing log lines echoed when a stage reports errors.
pub const LOG_TAIL_LINES: usize = 20;
