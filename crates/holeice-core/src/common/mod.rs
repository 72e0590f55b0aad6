pub mod config;
pub mod constants;

pub use config::{
    BUILTIN_PLACEHOLDERS, ConfigError, PrerequisiteConfig, SweepConfig, parse_axis_override,
};
