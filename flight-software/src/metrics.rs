//! Prometheus metrics for the mission executive.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use hardware::error_counter::{CounterValue, DEVICE_COUNT};
use hardware::Device;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

use crate::experiments::IterationResult;
use crate::mission::PassSummary;

pub struct ObcMetrics {
    registry: Registry,
    passes: IntCounter,
    update_warnings: IntCounter,
    descriptor_panics: IntCounter,
    experiments_completed: IntCounterVec,
    fdir_counters: IntGaugeVec,
    mission_time: IntGauge,
}

impl ObcMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("obc".to_string()), None)?;

        let passes = IntCounter::new("mission_passes_total", "Completed mission loop passes")?;
        let update_warnings = IntCounter::new(
            "mission_update_warnings_total",
            "Update hooks that could not refresh their part of the snapshot",
        )?;
        let descriptor_panics = IntCounter::new(
            "mission_descriptor_panics_total",
            "Update or action hooks that panicked",
        )?;
        let experiments_completed = IntCounterVec::new(
            Opts::new("experiments_completed_total", "Finished experiment runs"),
            &["result"],
        )?;
        let fdir_counters = IntGaugeVec::new(
            Opts::new("fdir_error_counter", "Current FDIR error counter value"),
            &["device"],
        )?;
        let mission_time = IntGauge::new("mission_time_ms", "Mission time in milliseconds")?;

        registry.register(Box::new(passes.clone()))?;
        registry.register(Box::new(update_warnings.clone()))?;
        registry.register(Box::new(descriptor_panics.clone()))?;
        registry.register(Box::new(experiments_completed.clone()))?;
        registry.register(Box::new(fdir_counters.clone()))?;
        registry.register(Box::new(mission_time.clone()))?;

        Ok(Self {
            registry,
            passes,
            update_warnings,
            descriptor_panics,
            experiments_completed,
            fdir_counters,
            mission_time,
        })
    }

    pub fn record_pass(&self, summary: &PassSummary) {
        self.passes.inc();
        self.update_warnings.inc_by(summary.warnings as u64);
        self.descriptor_panics.inc_by(summary.panics as u64);
    }

    pub fn record_experiment(&self, result: IterationResult) {
        let label = match result {
            IterationResult::Finished => "finished",
            IterationResult::Failure => "failure",
            IterationResult::Abort => "abort",
            IterationResult::LoopImmediately | IterationResult::WaitForNextCycle => "interrupted",
        };
        self.experiments_completed.with_label_values(&[label]).inc();
    }

    pub fn observe_fdir(&self, values: &[CounterValue; DEVICE_COUNT]) {
        for device in Device::all() {
            self.fdir_counters
                .with_label_values(&[device.name()])
                .set(i64::from(values[device.index()]));
        }
    }

    pub fn set_mission_time(&self, time: Duration) {
        self.mission_time.set(time.as_millis() as i64);
    }

    pub fn passes(&self) -> u64 {
        self.passes.get()
    }

    /// Render every metric in the text exposition format.
    pub fn gather(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Router serving `GET /metrics`.
pub fn router(metrics: Arc<ObcMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<ObcMetrics>>) -> impl IntoResponse {
    match metrics.gather() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        ),
        Err(e) => {
            warn!("Unable to encode metrics: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string(),
            )
        }
    }
}
