//! Prometheus metrics.
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `fingerlink_enrollments_total` | counter | `scheme`, `outcome` |
//! | `fingerlink_attendance_total` | counter | `scheme`, `outcome` |
//! | `fingerlink_match_distance` | histogram | `scheme` |
//! | `fingerlink_orphan_vectors_total` | counter | `scheme`, `source` |
//! | `fingerlink_device_commands_total` | counter | `mode`, `status` |
//!
//! Storage backends add `fingerlink_storage_operations_total` and
//! `fingerlink_storage_operation_duration_ms`.

use crate::config::MetricsSettings;
use crate::models::SchemeId;
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::thread;

/// Workflow outcome label. `success` or the error kind.
#[must_use]
pub fn outcome_label<T>(result: &Result<T>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    }
}

/// Counts one enrollment-side workflow run.
pub fn record_enrollment(scheme: SchemeId, outcome: &'static str) {
    metrics::counter!(
        "fingerlink_enrollments_total",
        "scheme" => scheme.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Counts one attendance-side workflow run.
pub fn record_attendance(scheme: Option<SchemeId>, outcome: &'static str) {
    metrics::counter!(
        "fingerlink_attendance_total",
        "scheme" => scheme.map_or("qr", |s| s.as_str()),
        "outcome" => outcome
    )
    .increment(1);
}

/// Records the distance of a 1-NN candidate.
pub fn record_match_distance(scheme: SchemeId, distance: f32) {
    metrics::histogram!("fingerlink_match_distance", "scheme" => scheme.as_str())
        .record(f64::from(distance));
}

/// Counts orphan vectors seen by a workflow or the reconciliation pass.
pub fn record_orphans(scheme: SchemeId, source: &'static str, count: usize) {
    metrics::counter!(
        "fingerlink_orphan_vectors_total",
        "scheme" => scheme.as_str(),
        "source" => source
    )
    .increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Counts one device command publish.
pub fn record_device_command(mode: &'static str, status: &'static str) {
    metrics::counter!(
        "fingerlink_device_commands_total",
        "mode" => mode,
        "status" => status
    )
    .increment(1);
}

/// Installs the Prometheus recorder and HTTP exporter when enabled.
///
/// # Errors
///
/// Returns an error if a recorder is already installed or the exporter
/// cannot be started.
pub fn install_prometheus(settings: &MetricsSettings) -> Result<Option<PrometheusHandle>> {
    if !settings.enabled {
        return Ok(None);
    }
    let listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), settings.port);
    let builder = PrometheusBuilder::new().with_http_listener(listen_addr);
    install_listener(builder).map(Some)
}

fn install_listener(builder: PrometheusBuilder) -> Result<PrometheusHandle> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return install_with_runtime(builder, &handle);
    }
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::operation("metrics_runtime_init", e))?;
    let handle = runtime.handle().clone();
    let prometheus = install_with_runtime(builder, &handle)?;
    thread::Builder::new()
        .name("metrics-exporter-prometheus-http".to_string())
        .spawn(move || runtime.block_on(async { std::future::pending::<()>().await }))
        .map_err(|e| Error::operation("metrics_runtime_thread", e))?;
    Ok(prometheus)
}

fn install_with_runtime(
    builder: PrometheusBuilder,
    runtime_handle: &tokio::runtime::Handle,
) -> Result<PrometheusHandle> {
    let (recorder, exporter) = {
        let _guard = runtime_handle.enter();
        builder
            .build()
            .map_err(|e| Error::operation("metrics_exporter_build", e))?
    };
    let handle = recorder.handle();
    set_global_recorder(recorder)?;
    runtime_handle.spawn(exporter);
    Ok(handle)
}

fn set_global_recorder(recorder: PrometheusRecorder) -> Result<()> {
    metrics::set_global_recorder(recorder).map_err(|e| Error::operation("metrics_recorder_install", e))
}
