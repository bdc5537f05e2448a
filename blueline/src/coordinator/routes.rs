//! HTTP-like dispatch surface over the coordinator.
//!
//! The deployed coordinator is reachable per plan; this module maps its
//! routes onto [`FanInCoordinator`] signals without binding to a concrete
//! server. Unknown routes answer 404; `getState` before `initialize`
//! answers 200 with a null body.

use super::FanInCoordinator;
use serde::Deserialize;
use serde_json::json;

/// Reply of one dispatched route call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReply {
    /// HTTP-like status code.
    pub status: u16,
    /// JSON reply body.
    pub body: serde_json::Value,
}

impl RouteReply {
    fn ok(body: serde_json::Value) -> Self {
        Self { status: 200, body }
    }

    fn bad_request(message: &str) -> Self {
        Self {
            status: 400,
            body: json!({ "error": message }),
        }
    }

    fn not_found(route: &str) -> Self {
        Self {
            status: 404,
            body: json!({ "error": format!("unknown route: {route}") }),
        }
    }
}

#[derive(Deserialize)]
struct InitializeBody {
    #[serde(rename = "expectedPageCount")]
    expected_page_count: usize,
}

#[derive(Deserialize)]
struct SheetBody {
    #[serde(rename = "pageId")]
    page_id: String,
}

#[derive(Deserialize)]
struct MetadataBody {
    #[serde(rename = "pageId")]
    page_id: String,
    #[serde(rename = "isValid")]
    is_valid: bool,
    identifier: Option<String>,
}

#[derive(Deserialize)]
struct MarkFailedBody {
    error: String,
}

fn parse<T: serde::de::DeserializeOwned>(body: serde_json::Value) -> Result<T, RouteReply> {
    serde_json::from_value(body).map_err(|err| RouteReply::bad_request(&err.to_string()))
}

/// Dispatches one route call for a plan.
#[must_use]
pub fn dispatch(
    coordinator: &FanInCoordinator,
    plan_id: &str,
    route: &str,
    body: serde_json::Value,
) -> RouteReply {
    let outcome = match route {
        "/initialize" => parse::<InitializeBody>(body).map(|b| {
            coordinator.initialize(plan_id, b.expected_page_count);
        }),
        "/getState" => {
            return match coordinator.get_state(plan_id) {
                Some(state) => RouteReply::ok(json!(state)),
                None => RouteReply::ok(serde_json::Value::Null),
            };
        }
        "/sheetImageGenerated" => parse::<SheetBody>(body).map(|b| {
            coordinator.sheet_image_generated(plan_id, &b.page_id);
        }),
        "/sheetMetadataExtracted" => parse::<MetadataBody>(body).map(|b| {
            coordinator.sheet_metadata_extracted(
                plan_id,
                &b.page_id,
                b.is_valid,
                b.identifier.as_deref(),
            );
        }),
        "/sheetCalloutsDetected" => parse::<SheetBody>(body).map(|b| {
            coordinator.sheet_callouts_detected(plan_id, &b.page_id);
        }),
        "/sheetLayoutDetected" => parse::<SheetBody>(body).map(|b| {
            coordinator.sheet_layout_detected(plan_id, &b.page_id);
        }),
        "/sheetTilesGenerated" => parse::<SheetBody>(body).map(|b| {
            coordinator.sheet_tiles_generated(plan_id, &b.page_id);
        }),
        "/markFailed" => parse::<MarkFailedBody>(body).map(|b| {
            coordinator.mark_failed(plan_id, &b.error);
        }),
        other => return RouteReply::not_found(other),
    };

    match outcome {
        Ok(()) => RouteReply::ok(json!({ "ok": true })),
        Err(reply) => reply,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ProcessingPhase;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_get_state_before_initialize_is_null_with_200() {
        let coordinator = FanInCoordinator::new();
        let reply = dispatch(&coordinator, "plan-1", "/getState", serde_json::Value::Null);

        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, serde_json::Value::Null);
    }

    #[test]
    fn test_unknown_route_is_404() {
        let coordinator = FanInCoordinator::new();
        let reply = dispatch(&coordinator, "plan-1", "/definitelyNot", serde_json::Value::Null);
        assert_eq!(reply.status, 404);
    }

    #[test]
    fn test_malformed_body_is_400() {
        let coordinator = FanInCoordinator::new();
        let reply = dispatch(
            &coordinator,
            "plan-1",
            "/initialize",
            json!({"expectedPageCount": "three"}),
        );
        assert_eq!(reply.status, 400);
    }

    #[test]
    fn test_full_signal_flow_over_routes() {
        let coordinator = FanInCoordinator::new();

        let reply = dispatch(
            &coordinator,
            "plan-1",
            "/initialize",
            json!({"expectedPageCount": 2}),
        );
        assert_eq!(reply.status, 200);

        dispatch(
            &coordinator,
            "plan-1",
            "/sheetImageGenerated",
            json!({"pageId": "p0"}),
        );
        dispatch(
            &coordinator,
            "plan-1",
            "/sheetImageGenerated",
            json!({"pageId": "p1"}),
        );
        dispatch(
            &coordinator,
            "plan-1",
            "/sheetMetadataExtracted",
            json!({"pageId": "p0", "isValid": true, "identifier": "A-101"}),
        );
        dispatch(
            &coordinator,
            "plan-1",
            "/sheetMetadataExtracted",
            json!({"pageId": "p1", "isValid": false, "identifier": null}),
        );
        dispatch(
            &coordinator,
            "plan-1",
            "/sheetCalloutsDetected",
            json!({"pageId": "p0"}),
        );
        dispatch(
            &coordinator,
            "plan-1",
            "/sheetLayoutDetected",
            json!({"pageId": "p0"}),
        );
        dispatch(
            &coordinator,
            "plan-1",
            "/sheetTilesGenerated",
            json!({"pageId": "p0"}),
        );

        let reply = dispatch(&coordinator, "plan-1", "/getState", serde_json::Value::Null);
        assert_eq!(reply.body["phase"], json!("complete"));
        assert_eq!(reply.body["expected_sheets"], json!(2));
    }

    #[test]
    fn test_mark_failed_route_works_before_initialize() {
        let coordinator = FanInCoordinator::new();
        dispatch(
            &coordinator,
            "plan-1",
            "/markFailed",
            json!({"error": "source document missing"}),
        );

        let reply = dispatch(&coordinator, "plan-1", "/getState", serde_json::Value::Null);
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["phase"], json!("failed"));
        assert_eq!(reply.body["last_error"], json!("source document missing"));
    }

    #[test]
    fn test_mark_failed_route_records_error() {
        let coordinator = FanInCoordinator::new();
        dispatch(
            &coordinator,
            "plan-1",
            "/initialize",
            json!({"expectedPageCount": 1}),
        );
        dispatch(
            &coordinator,
            "plan-1",
            "/markFailed",
            json!({"error": "Detection timeout"}),
        );

        let state = coordinator.get_state("plan-1").unwrap();
        assert_eq!(state.phase, ProcessingPhase::Failed);
        assert_eq!(state.last_error.as_deref(), Some("Detection timeout"));
    }
}
