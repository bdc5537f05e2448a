//! The plan-processing step graph.
//!
//! Fixed stage order: announce start, rasterize, then per-sheet render,
//! metadata extraction, detection (callouts and layout, independently
//! retried and non-fatal), best-effort region extraction, tiling, and the
//! completion announcement. Per-sheet steps carry the sheet id in their
//! name so a resumed run re-enters the loop at the first unfinished sheet.
//!
//! Mandatory-stage failures abort the run; the outer handler emits a
//! best-effort `processingFailed`, marks the coordinator failed, and
//! re-raises.

use crate::coordinator::FanInCoordinator;
use crate::engine::{RetryPolicy, StepEngine, StepSpec};
use crate::errors::{PipelineError, StepError};
use crate::events::EventEmitter;
use crate::gateway::{ProcessingGateway, ServiceRequest, ServiceResponse};
use crate::pipeline::model::{
    CalloutDetection, LayoutDetection, LayoutRegion, RegionClass, RunSummary, SheetDescriptor,
    SheetMetadata, TileSummary,
};
use crate::pipeline::progress;
use crate::store::{ArtifactStore, PlanScope};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input reference for one pipeline run.
#[derive(Debug, Clone)]
pub struct PlanInput {
    /// The plan id; doubles as the run id.
    pub plan_id: String,
    /// Owning project.
    pub project_id: Uuid,
    /// Owning organization.
    pub org_id: Uuid,
    /// Display name for telemetry.
    pub display_name: String,
    /// Declared page count from the upload, when known.
    pub page_count: Option<u32>,
}

impl PlanInput {
    /// Storage scope of this plan.
    #[must_use]
    pub fn scope(&self) -> PlanScope {
        PlanScope {
            org_id: self.org_id,
            project_id: self.project_id,
            plan_id: self.plan_id.clone(),
        }
    }
}

/// Retry and timeout policy for the stage families.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Policy for mandatory stages (rasterize, render, metadata, tiles).
    pub mandatory_retry: RetryPolicy,
    /// Smaller policy for the non-critical detection stages.
    pub detection_retry: RetryPolicy,
    /// Per-attempt timeout for every step.
    pub step_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mandatory_retry: RetryPolicy::new().with_attempt_limit(3),
            detection_retry: RetryPolicy::new()
                .with_attempt_limit(2)
                .with_base_delay_ms(500),
            step_timeout: Duration::from_secs(120),
        }
    }
}

impl PipelineConfig {
    fn mandatory_step(&self, name: impl Into<String>) -> StepSpec {
        StepSpec::new(name)
            .with_retry(self.mandatory_retry.clone())
            .with_timeout(self.step_timeout)
    }

    fn detection_step(&self, name: impl Into<String>) -> StepSpec {
        StepSpec::new(name)
            .with_retry(self.detection_retry.clone())
            .with_timeout(self.step_timeout)
    }
}

/// Collaborator handles one run needs.
#[derive(Debug, Clone)]
pub struct PipelineDeps {
    /// The durable step engine.
    pub engine: StepEngine,
    /// Processing service gateway.
    pub gateway: ProcessingGateway,
    /// Artifact storage accessor.
    pub store: ArtifactStore,
    /// Best-effort event emitter.
    pub events: EventEmitter,
    /// Fan-in progress tracker.
    pub coordinator: Arc<FanInCoordinator>,
    /// Stage policies.
    pub config: PipelineConfig,
}

#[derive(Deserialize)]
struct RasterizeBody {
    sheets: Vec<SheetDescriptor>,
}

fn base_request(input: &PlanInput, operation: &str) -> ServiceRequest {
    let mut request = ServiceRequest::new(operation)
        .with_field("plan-id", &input.plan_id)
        .with_field("project-id", input.project_id.to_string())
        .with_field("org-id", input.org_id.to_string());
    if let Some(count) = input.page_count {
        request = request.with_field("page-count", count.to_string());
    }
    request
}

fn zoom_field(response: &ServiceResponse, key: &str) -> Option<u8> {
    // Lifted binary-response headers arrive as strings; plain JSON bodies
    // may carry the zoom levels as numbers.
    if let Some(text) = response.body_str(key) {
        return text.parse().ok();
    }
    response
        .body
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .and_then(|value| u8::try_from(value).ok())
}

/// Runs the full pipeline for one plan.
///
/// # Errors
///
/// Returns [`PipelineError`] when a mandatory stage fails terminally. The
/// failure event and the coordinator's failed phase are best-effort side
/// channels and never mask the original error.
pub async fn process_plan(
    deps: &PipelineDeps,
    input: &PlanInput,
) -> Result<RunSummary, PipelineError> {
    match run_stages(deps, input).await {
        Ok(summary) => {
            info!(
                plan_id = %input.plan_id,
                sheets = summary.sheet_count,
                valid = summary.valid_sheet_count,
                "plan processing completed"
            );
            Ok(summary)
        }
        Err(err) => {
            warn!(plan_id = %input.plan_id, error = %err, "plan processing failed");
            deps.events
                .emit_named(
                    "processingFailed",
                    &input.plan_id,
                    json!({ "error": err.to_string() }),
                )
                .await;
            deps.coordinator.mark_failed(&input.plan_id, &err.to_string());
            Err(err)
        }
    }
}

#[allow(clippy::too_many_lines)]
async fn run_stages(deps: &PipelineDeps, input: &PlanInput) -> Result<RunSummary, PipelineError> {
    let engine = &deps.engine;
    let gateway = &deps.gateway;
    let store = &deps.store;
    let events = &deps.events;
    let coordinator = deps.coordinator.as_ref();
    let config = &deps.config;

    let run_id = input.plan_id.as_str();
    let plan_id = input.plan_id.as_str();
    let scope = &input.scope();

    // Stage 0: announce the run.
    let display_name = input.display_name.as_str();
    engine
        .run_step::<(), _, _>(run_id, &config.mandatory_step("emit-started"), || async move {
            events
                .emit_named(
                    "processingStarted",
                    plan_id,
                    json!({ "displayName": display_name }),
                )
                .await;
            events.progress(plan_id, 0).await;
            Ok(())
        })
        .await?;

    // Stage 1: rasterize the whole document once. Missing source is fatal.
    let sheets: Vec<SheetDescriptor> = engine
        .run_step(
            run_id,
            &config.mandatory_step("generate-images"),
            || async move {
                let source = store.fetch_source(scope).await?;
                let response = gateway
                    .call(base_request(input, "generate-images").with_payload(source))
                    .await?;
                let body: RasterizeBody = response.body_as("generate-images")?;
                // Initializing inside the step keeps a memo-hit resume from
                // resetting milestone sets the run already populated.
                coordinator.initialize(plan_id, body.sheets.len());
                Ok::<_, StepError>(body.sheets)
            },
        )
        .await?;

    // Stage 2: render and upload each sheet.
    for (index, sheet) in sheets.iter().enumerate() {
        let step = config.mandatory_step(format!("render-page-{}", sheet.sheet_id));
        engine
            .run_step::<(), _, _>(run_id, &step, || async move {
                let source = store.fetch_source(scope).await?;
                let response = gateway
                    .call(
                        base_request(input, "render-page")
                            .with_payload(source)
                            .with_field("page-number", sheet.page_number.to_string()),
                    )
                    .await?;
                let raster = response.payload.ok_or_else(|| {
                    StepError::retryable("render-page returned no raster payload")
                })?;
                store.put_sheet_image(scope, &sheet.sheet_id, raster).await?;
                events
                    .emit_named(
                        "pageImageGenerated",
                        plan_id,
                        json!({
                            "sheetId": sheet.sheet_id,
                            "pageNumber": sheet.page_number,
                            "width": sheet.width,
                            "height": sheet.height,
                        }),
                    )
                    .await;
                coordinator.sheet_image_generated(plan_id, &sheet.sheet_id);
                Ok(())
            })
            .await?;
        events
            .progress(plan_id, progress::RENDER.at(index, sheets.len()))
            .await;
    }

    // Stage 3: extract metadata for each sheet.
    let mut metadata: Vec<(String, SheetMetadata)> = Vec::with_capacity(sheets.len());
    for (index, sheet) in sheets.iter().enumerate() {
        let step = config.mandatory_step(format!("extract-metadata-{}", sheet.sheet_id));
        let extracted: SheetMetadata = engine
            .run_step(run_id, &step, || async move {
                let image = store.fetch_sheet_image(scope, &sheet.sheet_id).await?;
                let response = gateway
                    .call(
                        base_request(input, "extract-metadata")
                            .with_payload(image)
                            .with_field("page-number", sheet.page_number.to_string()),
                    )
                    .await?;
                let extracted: SheetMetadata = response.body_as("extract-metadata")?;
                let is_valid = extracted.resolved_number().is_some();
                events
                    .emit_named(
                        "pageMetadataExtracted",
                        plan_id,
                        json!({
                            "sheetId": sheet.sheet_id,
                            "isValid": is_valid,
                            "sheetNumber": extracted.sheet_number,
                            "title": extracted.title,
                        }),
                    )
                    .await;
                coordinator.sheet_metadata_extracted(
                    plan_id,
                    &sheet.sheet_id,
                    is_valid,
                    extracted.resolved_number(),
                );
                Ok::<_, StepError>(extracted)
            })
            .await?;
        metadata.push((sheet.sheet_id.clone(), extracted));
        events
            .progress(plan_id, progress::METADATA.at(index, sheets.len()))
            .await;
    }

    // Stage 4: the valid-sheet set and identifier map gate everything after.
    let sheet_numbers: BTreeMap<String, String> = metadata
        .iter()
        .filter_map(|(sheet_id, extracted)| {
            extracted
                .resolved_number()
                .map(|number| (sheet_id.clone(), number.to_string()))
        })
        .collect();
    let valid_sheets: Vec<&SheetDescriptor> = sheets
        .iter()
        .filter(|sheet| sheet_numbers.contains_key(&sheet.sheet_id))
        .collect();
    let known_numbers: Vec<&str> = sheet_numbers.values().map(String::as_str).collect();
    events
        .emit_named(
            "metadataCompleted",
            plan_id,
            json!({
                "validSheetCount": valid_sheets.len(),
                "sheetNumbers": sheet_numbers,
            }),
        )
        .await;

    // Stage 5: callout detection per valid sheet. Exhausted retries skip
    // the sheet, never the run.
    let mut callouts_skipped = Vec::new();
    for sheet in &valid_sheets {
        let step = config.detection_step(format!("detect-callouts-{}", sheet.sheet_id));
        let known = &known_numbers;
        let outcome: Result<CalloutDetection, _> = engine
            .run_step(run_id, &step, || async move {
                let image = store.fetch_sheet_image(scope, &sheet.sheet_id).await?;
                let response = gateway
                    .call(
                        base_request(input, "detect-callouts")
                            .with_payload(image)
                            .with_field("known-sheets", json!(known).to_string()),
                    )
                    .await?;
                let detection: CalloutDetection = response.body_as("detect-callouts")?;
                events
                    .emit_named(
                        "calloutsDetected",
                        plan_id,
                        json!({
                            "sheetId": sheet.sheet_id,
                            "callouts": detection.callouts,
                        }),
                    )
                    .await;
                if !detection.grid_bubbles.is_empty() {
                    events
                        .emit_named(
                            "gridBubblesDetected",
                            plan_id,
                            json!({
                                "sheetId": sheet.sheet_id,
                                "gridBubbles": detection.grid_bubbles,
                            }),
                        )
                        .await;
                }
                coordinator.sheet_callouts_detected(plan_id, &sheet.sheet_id);
                Ok::<_, StepError>(detection)
            })
            .await;
        if let Err(err) = outcome {
            warn!(
                plan_id,
                sheet_id = %sheet.sheet_id,
                error = %err,
                "callout detection failed, skipping sheet"
            );
            callouts_skipped.push(sheet.sheet_id.clone());
        }
    }

    // Stage 6: layout detection per valid sheet, same skip semantics.
    let mut layouts_skipped = Vec::new();
    let mut detected_regions: Vec<(String, Vec<LayoutRegion>)> = Vec::new();
    for (index, sheet) in valid_sheets.iter().enumerate() {
        let step = config.detection_step(format!("detect-layout-{}", sheet.sheet_id));
        let outcome: Result<LayoutDetection, _> = engine
            .run_step(run_id, &step, || async move {
                let image = store.fetch_sheet_image(scope, &sheet.sheet_id).await?;
                let response = gateway
                    .call(base_request(input, "detect-layout").with_payload(image))
                    .await?;
                let detection: LayoutDetection = response.body_as("detect-layout")?;
                events
                    .emit_named(
                        "sheetLayoutDetected",
                        plan_id,
                        json!({
                            "sheetId": sheet.sheet_id,
                            "regions": detection.regions,
                        }),
                    )
                    .await;
                coordinator.sheet_layout_detected(plan_id, &sheet.sheet_id);
                Ok::<_, StepError>(detection)
            })
            .await;
        match outcome {
            Ok(detection) if !detection.regions.is_empty() => {
                detected_regions.push((sheet.sheet_id.clone(), detection.regions));
            }
            Ok(_) => {}
            Err(err) => {
                warn!(
                    plan_id,
                    sheet_id = %sheet.sheet_id,
                    error = %err,
                    "layout detection failed, skipping sheet"
                );
                layouts_skipped.push(sheet.sheet_id.clone());
            }
        }
        events
            .progress(plan_id, progress::DETECTION.at(index, valid_sheets.len()))
            .await;
    }

    // Stage 7: best-effort content extraction from detected regions, one
    // step per (region class, sheet). Failures never abort anything.
    for (sheet_id, regions) in &detected_regions {
        for class in [RegionClass::Schedule, RegionClass::Notes, RegionClass::Legend] {
            let of_class: Vec<&LayoutRegion> = regions
                .iter()
                .filter(|region| region.region_class == class)
                .collect();
            if of_class.is_empty() {
                continue;
            }
            let sheet_id = sheet_id.as_str();
            let regions_json = json!(of_class).to_string();
            let regions_field = regions_json.as_str();
            let step =
                config.detection_step(format!("{}-{}", class.extraction_operation(), sheet_id));
            let outcome: Result<serde_json::Value, _> = engine
                .run_step(run_id, &step, || async move {
                    let image = store.fetch_sheet_image(scope, sheet_id).await?;
                    let response = gateway
                        .call(
                            base_request(input, class.extraction_operation())
                                .with_payload(image)
                                .with_field("regions", regions_field),
                        )
                        .await?;
                    events
                        .emit_named(
                            class.extraction_event(),
                            plan_id,
                            json!({
                                "sheetId": sheet_id,
                                "content": response.body.clone(),
                            }),
                        )
                        .await;
                    Ok::<_, StepError>(response.body)
                })
                .await;
            if let Err(err) = outcome {
                warn!(
                    plan_id,
                    sheet_id,
                    class = ?class,
                    error = %err,
                    "region extraction failed, skipping region class"
                );
            }
        }
    }

    // Stage 8: tile pyramid per valid sheet.
    for (index, sheet) in valid_sheets.iter().enumerate() {
        let step = config.mandatory_step(format!("generate-tiles-{}", sheet.sheet_id));
        let tiles: TileSummary = engine
            .run_step(run_id, &step, || async move {
                let image = store.fetch_sheet_image(scope, &sheet.sheet_id).await?;
                let response = gateway
                    .call(base_request(input, "generate-tiles").with_payload(image))
                    .await?;
                let archive = response.payload.clone().ok_or_else(|| {
                    StepError::retryable("generate-tiles returned no archive payload")
                })?;
                let min_zoom = zoom_field(&response, "min-zoom")
                    .ok_or_else(|| StepError::retryable("tile response missing min-zoom"))?;
                let max_zoom = zoom_field(&response, "max-zoom")
                    .ok_or_else(|| StepError::retryable("tile response missing max-zoom"))?;
                let summary = TileSummary { min_zoom, max_zoom };
                store
                    .put_tile_archive(scope, &sheet.sheet_id, archive)
                    .await?;
                events
                    .emit_named(
                        "tilesGenerated",
                        plan_id,
                        json!({
                            "sheetId": sheet.sheet_id,
                            "minZoom": summary.min_zoom,
                            "maxZoom": summary.max_zoom,
                        }),
                    )
                    .await;
                coordinator.sheet_tiles_generated(plan_id, &sheet.sheet_id);
                Ok::<_, StepError>(summary)
            })
            .await?;
        debug!(
            plan_id,
            sheet_id = %sheet.sheet_id,
            min_zoom = tiles.min_zoom,
            max_zoom = tiles.max_zoom,
            "tile pyramid stored"
        );
        events
            .progress(plan_id, progress::TILES.at(index, valid_sheets.len()))
            .await;
    }

    // Stage 9: final summary.
    let summary = RunSummary {
        sheet_count: sheets.len(),
        valid_sheet_count: valid_sheets.len(),
        sheet_numbers,
        callouts_skipped,
        layouts_skipped,
    };
    let valid_count = summary.valid_sheet_count;
    engine
        .run_step::<(), _, _>(run_id, &config.mandatory_step("emit-completed"), || async move {
            events
                .emit_named(
                    "processingCompleted",
                    plan_id,
                    json!({ "validSheetCount": valid_count }),
                )
                .await;
            events.progress(plan_id, 100).await;
            Ok(())
        })
        .await?;

    Ok(summary)
}
