mod types;

pub use types::{CellOperatorConfig, ExporterGate, ProbeConfig, ProbeMode};

#[cfg(test)]
pub(crate) use types::base as test_config;
