//! Label construction. Each function returns a new map.

use std::collections::BTreeMap;

use kube::ResourceExt;

use crate::crd::Cell;

pub const NAME: &str = "app.kubernetes.io/name";
pub const INSTANCE: &str = "app.kubernetes.io/instance";
pub const COMPONENT: &str = "app.kubernetes.io/component";
pub const PART_OF: &str = "app.kubernetes.io/part-of";
pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

pub const PART_OF_VALUE: &str = "monitoring-cell";
pub const MANAGED_BY_VALUE: &str = "cell-operator";

/// Labels common to everything a cell owns: the cell's own labels plus
/// the ownership markers.
pub fn cell_labels(cell: &Cell) -> BTreeMap<String, String> {
    let mut labels = cell.labels().clone();
    labels.insert(PART_OF.into(), PART_OF_VALUE.into());
    labels.insert(MANAGED_BY.into(), MANAGED_BY_VALUE.into());
    labels.insert(INSTANCE.into(), cell.name_any());
    labels
}

/// Object labels for one component of the stack.
pub fn component_labels(cell: &Cell, component: &str) -> BTreeMap<String, String> {
    let mut labels = cell_labels(cell);
    labels.insert(NAME.into(), component.into());
    labels
}

/// Stable pod selector for one component. Does not include user labels,
/// so edits to the cell's labels never orphan running pods.
pub fn selector_labels(cell: &Cell, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME.to_string(), component.to_string()),
        (INSTANCE.to_string(), cell.name_any()),
    ])
}
