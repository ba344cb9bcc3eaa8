use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;
use tracing::warn;

#[derive(Envconfig, Clone, Debug)]
pub struct CellOperatorConfig {
    #[envconfig(from = "CELL_OPERATOR_HTTP_PORT", default = "8080")]
    pub http_port: u16,

    /// Only watch cells in this namespace. Unset watches all namespaces.
    #[envconfig(from = "CELL_OPERATOR_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[envconfig(from = "CELL_OPERATOR_FIELD_MANAGER", default = "cell-operator")]
    pub field_manager: String,

    /// Delay before re-running a pass that left the cell not ready.
    #[envconfig(from = "CELL_OPERATOR_REQUEUE_SECS", default = "5")]
    pub requeue_secs: u64,

    /// Deadline for one pass. 0 disables it.
    #[envconfig(from = "CELL_OPERATOR_PASS_TIMEOUT_SECS", default = "120")]
    pub pass_timeout_secs: u64,

    #[envconfig(from = "CELL_OPERATOR_ERROR_BACKOFF_BASE_SECS", default = "5")]
    pub error_backoff_base_secs: u64,

    #[envconfig(from = "CELL_OPERATOR_ERROR_BACKOFF_MAX_SECS", default = "300")]
    pub error_backoff_max_secs: u64,

    /// `prometheus-ready` or `always`
    #[envconfig(from = "CELL_OPERATOR_EXPORTER_GATE", default = "prometheus-ready")]
    pub exporter_gate: String,

    #[envconfig(nested)]
    pub probe: ProbeConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct ProbeConfig {
    /// `proxy` (API server pod proxy) or `http`
    #[envconfig(from = "CELL_OPERATOR_PROBE_MODE", default = "proxy")]
    pub mode: String,

    #[envconfig(from = "CELL_OPERATOR_PROM_PORT", default = "9090")]
    pub port: u16,

    /// Base URL used in `http` mode; `{cell}` and `{namespace}` are substituted.
    /// Env: CELL_OPERATOR_PROM_URL_TEMPLATE
    #[envconfig(from = "CELL_OPERATOR_PROM_URL_TEMPLATE")]
    pub url_template: Option<String>,

    #[envconfig(from = "CELL_OPERATOR_PROM_QUERY_TIMEOUT_SECS", default = "5")]
    pub query_timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            mode: "proxy".into(),
            port: 9090,
            url_template: None,
            query_timeout_secs: 5,
        }
    }
}

/// When exporter readiness queries run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExporterGate {
    /// Only once the cell's Prometheus reports ready; otherwise exporters
    /// stay `Reconciling`.
    #[default]
    PrometheusReady,
    /// Every pass.
    Always,
}

impl FromStr for ExporterGate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prometheus-ready" | "prometheusready" | "gated" => Ok(ExporterGate::PrometheusReady),
            "always" => Ok(ExporterGate::Always),
            other => Err(format!("unknown exporter gate '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProbeMode {
    #[default]
    Proxy,
    Http,
}

impl FromStr for ProbeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy" => Ok(ProbeMode::Proxy),
            "http" => Ok(ProbeMode::Http),
            other => Err(format!("unknown probe mode '{other}'")),
        }
    }
}

fn parse_or_default<T: FromStr<Err = String> + Default>(raw: &str) -> T {
    raw.parse().unwrap_or_else(|e| {
        warn!(error = %e, "falling back to default");
        T::default()
    })
}

impl CellOperatorConfig {
    pub fn exporter_gate(&self) -> ExporterGate {
        parse_or_default(&self.exporter_gate)
    }

    pub fn requeue(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    pub fn pass_timeout(&self) -> Option<Duration> {
        (self.pass_timeout_secs > 0).then(|| Duration::from_secs(self.pass_timeout_secs))
    }

    /// Delay before retrying a cell whose last `failures` passes errored.
    pub fn error_backoff(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(16);
        let secs = self
            .error_backoff_base_secs
            .saturating_mul(1u64 << exp)
            .min(self.error_backoff_max_secs);
        Duration::from_secs(secs.max(1))
    }
}

impl ProbeConfig {
    pub fn mode(&self) -> ProbeMode {
        parse_or_default(&self.mode)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

#[cfg(test)]
pub(crate) fn base() -> CellOperatorConfig {
    CellOperatorConfig {
        http_port: 8080,
        watch_namespace: None,
        field_manager: "cell-operator".into(),
        requeue_secs: 5,
        pass_timeout_secs: 120,
        error_backoff_base_secs: 5,
        error_backoff_max_secs: 300,
        exporter_gate: "prometheus-ready".into(),
        probe: ProbeConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_parsing_falls_back_to_gated() {
        let mut cfg = base();
        assert_eq!(cfg.exporter_gate(), ExporterGate::PrometheusReady);
        cfg.exporter_gate = "Always".into();
        assert_eq!(cfg.exporter_gate(), ExporterGate::Always);
        cfg.exporter_gate = "sometimes".into();
        assert_eq!(cfg.exporter_gate(), ExporterGate::PrometheusReady);
    }

    #[test]
    fn probe_mode_parsing() {
        let mut probe = ProbeConfig::default();
        assert_eq!(probe.mode(), ProbeMode::Proxy);
        probe.mode = "HTTP".into();
        assert_eq!(probe.mode(), ProbeMode::Http);
    }

    #[test]
    fn error_backoff_doubles_until_cap() {
        let cfg = base();
        assert_eq!(cfg.error_backoff(1), Duration::from_secs(5));
        assert_eq!(cfg.error_backoff(2), Duration::from_secs(10));
        assert_eq!(cfg.error_backoff(4), Duration::from_secs(40));
        assert_eq!(cfg.error_backoff(10), Duration::from_secs(300));
        assert_eq!(cfg.error_backoff(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let mut cfg = base();
        assert_eq!(cfg.pass_timeout(), Some(Duration::from_secs(120)));
        cfg.pass_timeout_secs = 0;
        assert_eq!(cfg.pass_timeout(), None);
    }
}
