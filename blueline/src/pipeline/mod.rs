//! Plan-processing pipeline definition.
//!
//! This module provides:
//! - The domain model for per-sheet artifacts
//! - Progress bands for the fixed stage order
//! - The step graph driving one plan through the engine

mod model;
mod progress;
mod run;


pub use model::{
    CalloutDetection, CalloutMarker, GridBubble, LayoutDetection, LayoutRegion, RegionClass,
    RunSummary, SheetDescriptor, SheetMetadata, TileSummary,
};
pub use progress::{ProgressBand, DETECTION, METADATA, RENDER, TILES};
pub use run::{process_plan, PipelineConfig, PipelineDeps, PlanInput};
