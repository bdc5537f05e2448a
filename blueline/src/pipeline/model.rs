//! Domain types flowing through the pipeline steps.
//!
//! Every step result is serde-serializable: the engine memoizes results as
//! JSON, so these types double as the durable step-record schema.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One sheet of the source document, as reported by rasterization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetDescriptor {
    /// Stable sheet identifier assigned during rasterization.
    pub sheet_id: String,
    /// 1-based page number within the document.
    pub page_number: u32,
    /// Raster width in pixels.
    pub width: u32,
    /// Raster height in pixels.
    pub height: u32,
}

/// Extracted metadata for one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetMetadata {
    /// True when the extractor recognized a sheet number on the title block.
    pub is_valid: bool,
    /// The recognized sheet number, e.g. `A-101`.
    pub sheet_number: Option<String>,
    /// The sheet title, when present.
    pub title: Option<String>,
}

impl SheetMetadata {
    /// A sheet is usable downstream when it is valid and carries a
    /// non-empty sheet number.
    #[must_use]
    pub fn resolved_number(&self) -> Option<&str> {
        if !self.is_valid {
            return None;
        }
        self.sheet_number.as_deref().filter(|n| !n.is_empty())
    }
}

/// A detected callout cross-reference marker on a sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalloutMarker {
    /// Bounding box in sheet pixel coordinates: x, y, width, height.
    pub bbox: [f64; 4],
    /// The sheet number the callout points to, when resolved.
    pub target_sheet_number: Option<String>,
    /// Raw text of the marker.
    pub text: String,
}

/// A supplementary grid bubble marker reported by the callout detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridBubble {
    /// Bounding box in sheet pixel coordinates: x, y, width, height.
    pub bbox: [f64; 4],
    /// Grid axis label, e.g. `A` or `3`.
    pub label: String,
}

/// Classification of a detected layout region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionClass {
    /// Tabular schedule region.
    Schedule,
    /// Free-text notes region.
    Notes,
    /// Legend or crop-key region.
    Legend,
}

impl RegionClass {
    /// Service operation extracting content from this region class.
    #[must_use]
    pub const fn extraction_operation(self) -> &'static str {
        match self {
            Self::Schedule => "extract-schedule",
            Self::Notes => "extract-notes",
            Self::Legend => "extract-legend",
        }
    }

    /// Event name emitted when content of this class was extracted.
    #[must_use]
    pub const fn extraction_event(self) -> &'static str {
        match self {
            Self::Schedule => "scheduleExtracted",
            Self::Notes => "notesExtracted",
            Self::Legend => "legendExtracted",
        }
    }
}

/// A detected layout region on a sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutRegion {
    /// Region classification.
    pub region_class: RegionClass,
    /// Bounding box in sheet pixel coordinates: x, y, width, height.
    pub bbox: [f64; 4],
}

/// Result of callout detection for one sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalloutDetection {
    /// Detected callout markers.
    pub callouts: Vec<CalloutMarker>,
    /// Supplementary grid bubbles, when the detector reports them.
    #[serde(default)]
    pub grid_bubbles: Vec<GridBubble>,
}

/// Result of layout detection for one sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutDetection {
    /// Detected regions.
    pub regions: Vec<LayoutRegion>,
}

/// Result of tile generation for one sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSummary {
    /// Minimum zoom level of the pyramid.
    pub min_zoom: u8,
    /// Maximum zoom level of the pyramid.
    pub max_zoom: u8,
}

/// Summary of one completed pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total sheets rasterized.
    pub sheet_count: usize,
    /// Sheets that passed metadata validation.
    pub valid_sheet_count: usize,
    /// Resolved sheet numbers, keyed by sheet id.
    pub sheet_numbers: BTreeMap<String, String>,
    /// Valid sheets skipped by callout detection after exhausted retries.
    pub callouts_skipped: Vec<String>,
    /// Valid sheets skipped by layout detection after exhausted retries.
    pub layouts_skipped: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolved_number_requires_validity() {
        let metadata = SheetMetadata {
            is_valid: false,
            sheet_number: Some("A-101".to_string()),
            title: None,
        };
        assert_eq!(metadata.resolved_number(), None);
    }

    #[test]
    fn test_resolved_number_rejects_empty() {
        let metadata = SheetMetadata {
            is_valid: true,
            sheet_number: Some(String::new()),
            title: None,
        };
        assert_eq!(metadata.resolved_number(), None);
    }

    #[test]
    fn test_resolved_number_happy_path() {
        let metadata = SheetMetadata {
            is_valid: true,
            sheet_number: Some("A-101".to_string()),
            title: Some("Floor Plan".to_string()),
        };
        assert_eq!(metadata.resolved_number(), Some("A-101"));
    }

    #[test]
    fn test_region_class_operations() {
        assert_eq!(
            RegionClass::Schedule.extraction_operation(),
            "extract-schedule"
        );
        assert_eq!(RegionClass::Legend.extraction_event(), "legendExtracted");
    }

    #[test]
    fn test_descriptor_roundtrips_through_json() {
        let descriptor = SheetDescriptor {
            sheet_id: "s0".to_string(),
            page_number: 1,
            width: 3400,
            height: 2200,
        };
        let json = serde_json::to_value(&descriptor).unwrap();
        let back: SheetDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(descriptor, back);
    }
}
