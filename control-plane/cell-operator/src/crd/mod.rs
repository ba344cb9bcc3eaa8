pub mod cell;
pub mod monitoring;

pub use cell::{
    Cell, CellSpec, CellStatus, ExporterRecord, ExporterStatus, MetricsSpec,
    WorkloadRecord, WorkloadStatus,
};
