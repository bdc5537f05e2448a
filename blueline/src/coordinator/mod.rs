//! Fan-in coordinator: per-plan progress tracking.
//!
//! One addressable state holder per plan id. All signals for one plan are
//! serialized against that plan's entry; distinct plans proceed fully
//! independently. The coordinator only observes the pipeline, it never
//! drives it, and it can be queried by anything at any time.

mod routes;
mod state;

pub use routes::{dispatch, RouteReply};
pub use state::{PlanProgress, ProcessingPhase};

use dashmap::DashMap;
use tracing::warn;

/// Aggregates asynchronous per-sheet completion signals into a coarse
/// lifecycle phase per plan.
///
/// Mutation goes through the map's per-entry locking, which gives the
/// single-writer-per-plan guarantee the state machine needs.
#[derive(Debug, Default)]
pub struct FanInCoordinator {
    plans: DashMap<String, PlanProgress>,
}

impl FanInCoordinator {
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes (or resets) tracking for a plan.
    pub fn initialize(&self, plan_id: &str, expected_sheets: usize) {
        self.plans
            .insert(plan_id.to_string(), PlanProgress::new(expected_sheets));
    }

    /// Returns a snapshot of a plan's progress, or `None` before initialize.
    #[must_use]
    pub fn get_state(&self, plan_id: &str) -> Option<PlanProgress> {
        self.plans.get(plan_id).map(|entry| entry.clone())
    }

    /// Signals a generated sheet image.
    pub fn sheet_image_generated(&self, plan_id: &str, sheet_id: &str) {
        self.with_plan(plan_id, |progress| {
            progress.sheet_image_generated(sheet_id);
        });
    }

    /// Signals extracted sheet metadata.
    pub fn sheet_metadata_extracted(
        &self,
        plan_id: &str,
        sheet_id: &str,
        is_valid: bool,
        sheet_number: Option<&str>,
    ) {
        self.with_plan(plan_id, |progress| {
            progress.sheet_metadata_extracted(sheet_id, is_valid, sheet_number);
        });
    }

    /// Signals completed callout detection for a sheet.
    pub fn sheet_callouts_detected(&self, plan_id: &str, sheet_id: &str) {
        self.with_plan(plan_id, |progress| {
            progress.sheet_callouts_detected(sheet_id);
        });
    }

    /// Signals completed layout detection for a sheet.
    pub fn sheet_layout_detected(&self, plan_id: &str, sheet_id: &str) {
        self.with_plan(plan_id, |progress| {
            progress.sheet_layout_detected(sheet_id);
        });
    }

    /// Signals a generated tile pyramid for a sheet.
    pub fn sheet_tiles_generated(&self, plan_id: &str, sheet_id: &str) {
        self.with_plan(plan_id, |progress| {
            progress.sheet_tiles_generated(sheet_id);
        });
    }

    /// Forces a plan into the terminal failed phase.
    ///
    /// Unlike the milestone signals, this works before `initialize`: a run
    /// can die before the sheet count is known, and the failure must still
    /// be visible to `get_state`. An unknown plan gets a fresh entry with
    /// zero expected sheets, already failed.
    pub fn mark_failed(&self, plan_id: &str, error: &str) {
        self.plans
            .entry(plan_id.to_string())
            .or_insert_with(|| PlanProgress::new(0))
            .mark_failed(error);
    }

    fn with_plan<F: FnOnce(&mut PlanProgress)>(&self, plan_id: &str, apply: F) {
        match self.plans.get_mut(plan_id) {
            Some(mut entry) => apply(&mut entry),
            None => warn!(plan_id, "signal for uninitialized plan, ignoring"),
        }
    }
}
