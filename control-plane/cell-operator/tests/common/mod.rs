#![allow(dead_code)]

use cell_operator::crd::{Cell, CellSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

// DNS-1123 safe numeric suffix for unique names
pub const DIGITS: [char; 10] = ['0', '1', '2', '3', '4', '5', '6', '7', '8', '9'];
pub fn uniq(prefix: &str) -> String {
    format!("{prefix}-{}", nanoid::nanoid!(6, &DIGITS))
}

pub struct EnvGuard {
    key: &'static str,
    old: Option<String>,
}
impl Drop for EnvGuard {
    fn drop(&mut self) {
        unsafe {
            if let Some(ref v) = self.old {
                std::env::set_var(self.key, v);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }
}
pub fn set_env(key: &'static str, val: &str) -> EnvGuard {
    let old = std::env::var(key).ok();
    unsafe {
        std::env::set_var(key, val);
    }
    EnvGuard { key, old }
}

/// A cell as the API server would hand it to the controller.
pub fn cell(name: &str, ns: &str, gitpod_ns: &str) -> Cell {
    let mut cell = Cell::new(
        name,
        CellSpec {
            cluster_name: "it".into(),
            gitpod_namespace: gitpod_ns.into(),
            ..Default::default()
        },
    );
    cell.metadata = ObjectMeta {
        name: Some(name.into()),
        namespace: Some(ns.into()),
        uid: Some(format!("uid-{name}")),
        ..Default::default()
    };
    cell
}
