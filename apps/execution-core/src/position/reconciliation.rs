//! Periodic comparison of local position state against venue truth.
//!
//! The venue is authoritative. A pass takes read snapshots of both
//! sides, classifies divergences, and always reports them before any
//! correction. Auto-sync, when enabled, adopts the venue's view.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::Notify;

use crate::config::ReconciliationConfig;
use crate::events::EventBus;
use crate::models::{
    Discrepancy, DiscrepancyKind, DiscrepancySeverity, ExecutionEvent, Instrument,
    ManagedPosition, VenuePosition,
};
use crate::venue::{ExecutionVenue, VenueError};

use super::PositionManager;

/// Classify divergences between a local snapshot and a venue snapshot.
///
/// Venue rows with zero quantity are treated as absent. Quantity deltas
/// within `qty_tolerance` are ignored; mismatches at or above
/// `critical_delta_ratio` of the larger side are critical, smaller ones
/// are warnings. Missing positions on either side are always critical.
#[must_use]
pub fn diff_positions(
    local: &[ManagedPosition],
    venue: &[VenuePosition],
    config: &ReconciliationConfig,
) -> Vec<Discrepancy> {
    let mut venue_by_instrument: HashMap<&Instrument, &VenuePosition> = venue
        .iter()
        .filter(|p| !p.quantity.is_zero())
        .map(|p| (&p.instrument, p))
        .collect();

    let mut discrepancies = Vec::new();
    for position in local {
        let local_signed = position.signed_quantity();
        if let Some(venue_position) = venue_by_instrument.remove(&position.instrument) {
            let delta = (local_signed - venue_position.quantity).abs();
            if delta <= config.qty_tolerance {
                continue;
            }
            let larger = local_signed.abs().max(venue_position.quantity.abs());
            let severity =
                if larger > Decimal::ZERO && delta / larger >= config.critical_delta_ratio {
                    DiscrepancySeverity::Critical
                } else {
                    DiscrepancySeverity::Warning
                };
            discrepancies.push(Discrepancy {
                instrument: position.instrument.clone(),
                kind: DiscrepancyKind::QuantityMismatch,
                severity,
                local_quantity: Some(local_signed),
                venue_quantity: Some(venue_position.quantity),
                delta,
                detected_at: Utc::now(),
            });
        } else {
            discrepancies.push(Discrepancy {
                instrument: position.instrument.clone(),
                kind: DiscrepancyKind::LocalOnly,
                severity: DiscrepancySeverity::Critical,
                local_quantity: Some(local_signed),
                venue_quantity: None,
                delta: local_signed.abs(),
                detected_at: Utc::now(),
            });
        }
    }
    for venue_position in venue_by_instrument.into_values() {
        discrepancies.push(Discrepancy {
            instrument: venue_position.instrument.clone(),
            kind: DiscrepancyKind::VenueOnly,
            severity: DiscrepancySeverity::Critical,
            local_quantity: None,
            venue_quantity: Some(venue_position.quantity),
            delta: venue_position.quantity.abs(),
            detected_at: Utc::now(),
        });
    }
    discrepancies.sort_by(|a, b| a.instrument.cmp(&b.instrument));
    discrepancies
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    /// Instruments in the union of the local and venue sets.
    pub positions_compared: usize,
    /// Divergences found, ordered by instrument.
    pub discrepancies: Vec<Discrepancy>,
    /// Discrepancies corrected by auto-sync.
    pub auto_synced: usize,
    /// When the pass started.
    pub started_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// True when local and venue agreed within tolerance.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }

    /// Highest severity found, when any divergence exists.
    #[must_use]
    pub fn max_severity(&self) -> Option<DiscrepancySeverity> {
        self.discrepancies.iter().map(|d| d.severity).max()
    }
}

/// Drives reconciliation passes against a venue.
pub struct Reconciler {
    positions: Arc<PositionManager>,
    venue: Arc<dyn ExecutionVenue>,
    events: EventBus,
    config: ReconciliationConfig,
}

impl Reconciler {
    /// Build a reconciler over the given manager and venue.
    #[must_use]
    pub fn new(
        positions: Arc<PositionManager>,
        venue: Arc<dyn ExecutionVenue>,
        events: EventBus,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            positions,
            venue,
            events,
            config,
        }
    }

    /// Interval between scheduled passes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_secs)
    }

    /// Run a single pass.
    ///
    /// Snapshots are taken up front; order submission is never blocked
    /// while the pass runs. Every discrepancy is published as a
    /// POSITION_DISCREPANCY event before any sync is applied.
    ///
    /// # Errors
    ///
    /// Returns the venue error when the position snapshot could not be
    /// fetched.
    pub async fn run_once(&self) -> Result<ReconciliationReport, VenueError> {
        let started_at = Utc::now();
        let venue_positions = self.venue.get_positions().await?;
        let local = self.positions.open_positions();
        let discrepancies = diff_positions(&local, &venue_positions, &self.config);

        let mut compared: HashSet<&Instrument> = local.iter().map(|p| &p.instrument).collect();
        compared.extend(
            venue_positions
                .iter()
                .filter(|p| !p.quantity.is_zero())
                .map(|p| &p.instrument),
        );

        for discrepancy in &discrepancies {
            tracing::warn!(
                instrument = %discrepancy.instrument,
                kind = %discrepancy.kind,
                severity = %discrepancy.severity,
                delta = %discrepancy.delta,
                "position discrepancy"
            );
            self.events
                .publish(ExecutionEvent::PositionDiscrepancy(discrepancy.clone()));
        }

        let auto_synced = if self.config.auto_sync {
            self.sync(&discrepancies, &venue_positions)
        } else {
            0
        };

        let report = ReconciliationReport {
            positions_compared: compared.len(),
            discrepancies,
            auto_synced,
            started_at,
        };
        if report.is_clean() {
            tracing::debug!(
                compared = report.positions_compared,
                venue = self.venue.venue_name(),
                "reconciliation clean"
            );
        } else {
            tracing::warn!(
                compared = report.positions_compared,
                discrepancies = report.discrepancies.len(),
                auto_synced = report.auto_synced,
                venue = self.venue.venue_name(),
                "reconciliation found divergence"
            );
        }
        Ok(report)
    }

    /// Adopt the venue's view for each reported discrepancy.
    fn sync(&self, discrepancies: &[Discrepancy], venue_positions: &[VenuePosition]) -> usize {
        let mut synced = 0;
        for discrepancy in discrepancies {
            let venue_position = venue_positions
                .iter()
                .find(|p| p.instrument == discrepancy.instrument);
            let applied = match discrepancy.kind {
                DiscrepancyKind::LocalOnly => {
                    self.positions.force_close(&discrepancy.instrument).is_some()
                }
                DiscrepancyKind::VenueOnly => venue_position
                    .is_some_and(|p| self.positions.adopt_venue_position(p).is_some()),
                DiscrepancyKind::QuantityMismatch => {
                    venue_position.is_some_and(|p| self.positions.force_quantity(p).is_some())
                }
            };
            if applied {
                tracing::info!(
                    instrument = %discrepancy.instrument,
                    kind = %discrepancy.kind,
                    "position synced to venue"
                );
                synced += 1;
            }
        }
        synced
    }

    /// Run passes until the task is aborted: one every `interval`, plus
    /// an immediate pass whenever the trigger fires.
    pub async fn run_loop(&self, trigger: Arc<Notify>) {
        let interval = self.interval();
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = trigger.notified() => {
                    tracing::info!("early reconciliation requested");
                }
            }
            if let Err(error) = self.run_once().await {
                tracing::error!(%error, "reconciliation pass failed");
                self.events.publish(ExecutionEvent::error(
                    None,
                    None,
                    format!("reconciliation failed: {error}"),
                ));
            }
        }
    }
}
