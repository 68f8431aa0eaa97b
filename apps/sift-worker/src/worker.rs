use std::{sync::Arc, time::Duration as StdDuration};

use time::{Duration, OffsetDateTime};
use tokio::time as tokio_time;

use sift_service::Service;
use sift_storage::docs;

const POLL_INTERVAL_MS: u64 = 500;
const REEMBED_INTERVAL_SECONDS: i64 = 60;
const REEMBED_BATCH: u32 = 64;

/// Maintenance loop: drain the pending-index queue every poll, sweep every
/// tenant for stale vectors on a slower cadence. Failed entries requeue
/// themselves with backoff, so the loop itself never spins on one job.
pub async fn run_worker(service: Arc<Service>) -> color_eyre::Result<()> {
	let mut last_reembed = OffsetDateTime::now_utc();

	loop {
		match service.reconcile_pending().await {
			Ok(report) if report.processed + report.failed > 0 => {
				tracing::info!(
					processed = report.processed,
					failed = report.failed,
					"Pending-index reconciliation pass finished."
				);
			},
			Ok(_) => {},
			Err(err) => {
				tracing::error!(error = %err, "Pending-index reconciliation failed.");
			},
		}

		let now = OffsetDateTime::now_utc();

		if now - last_reembed >= Duration::seconds(REEMBED_INTERVAL_SECONDS) {
			reembed_all_tenants(&service).await;

			last_reembed = now;
		}

		tokio_time::sleep(StdDuration::from_millis(POLL_INTERVAL_MS)).await;
	}
}

async fn reembed_all_tenants(service: &Service) {
	let tenants = match docs::list_tenants(&service.db.pool).await {
		Ok(tenants) => tenants,
		Err(err) => {
			tracing::error!(error = %err, "Failed to list tenants for the re-embedding sweep.");

			return;
		},
	};

	for tenant_id in tenants {
		match service.reembed_stale(&tenant_id, REEMBED_BATCH).await {
			Ok(report) if report.marked_stale + report.reembedded > 0 => {
				tracing::info!(
					tenant_id = %report.tenant_id,
					marked_stale = report.marked_stale,
					reembedded = report.reembedded,
					failures = report.failures,
					"Stale vectors re-embedded."
				);
			},
			Ok(_) => {},
			Err(err) => {
				tracing::error!(%tenant_id, error = %err, "Re-embedding failed for tenant.");
			},
		}
	}
}
