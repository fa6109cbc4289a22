//! User-editable extraction inputs: patterns, tolerances, and app settings.
//!
//! These are inputs to the core, not owned by it. They serialize under the
//! `settings` key of a project snapshot, keyed by category name the way the
//! review UI stores them.

use serde::{Deserialize, Serialize};

use crate::models::BoundingBox;

/// Two-part instrument pattern: function code above loop number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentPattern {
    pub func: String,
    pub num: String,
}

impl Default for InstrumentPattern {
    fn default() -> Self {
        Self {
            func: "[A-Z]{2,4}".to_string(),
            num: r"\d{3,4}[A-Z]?".to_string(),
        }
    }
}

/// Regex patterns per category. An empty pattern disables that category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    #[serde(rename = "Line", default)]
    pub line: String,
    #[serde(rename = "Instrument", default)]
    pub instrument: InstrumentPattern,
    #[serde(rename = "DrawingNumber", default)]
    pub drawing_number: String,
    #[serde(rename = "NotesAndHolds", default)]
    pub notes_and_holds: String,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            line: r#"\d{1,2}"?-[A-Z]{1,4}-\d{3,6}(?:-[A-Z0-9]+)*"#.to_string(),
            instrument: InstrumentPattern::default(),
            drawing_number: r"[A-Z0-9]{3,}(?:-[A-Z0-9]{2,}){2,}".to_string(),
            notes_and_holds: r"(?:NOTE|HOLD)\s*\d+(?:\s*[,&]\s*\d+)*".to_string(),
        }
    }
}

/// Proximity thresholds for instrument part pairing and auto-linking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentTolerance {
    pub vertical: f64,
    pub horizontal: f64,
    pub auto_link_distance: f64,
}

impl Default for InstrumentTolerance {
    fn default() -> Self {
        Self {
            vertical: 20.0,
            horizontal: 20.0,
            auto_link_distance: 50.0,
        }
    }
}

/// Tolerances keyed by category. Only instruments carry any today.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ToleranceConfig {
    #[serde(rename = "Instrument", default)]
    pub instrument: InstrumentTolerance,
}

impl ToleranceConfig {
    pub fn instrument(vertical: f64, horizontal: f64, auto_link_distance: f64) -> Self {
        Self {
            instrument: InstrumentTolerance {
                vertical,
                horizontal,
                auto_link_distance,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AreaUnit {
    #[default]
    Percent,
    Pixels,
}

/// Optional rectangle (display coordinates) restricting where the
/// drawing-number heuristic looks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawingSearchArea {
    pub enabled: bool,
    pub unit: AreaUnit,
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Default for DrawingSearchArea {
    fn default() -> Self {
        Self {
            enabled: false,
            unit: AreaUnit::Percent,
            left: 50.0,
            top: 50.0,
            right: 100.0,
            bottom: 100.0,
        }
    }
}

impl DrawingSearchArea {
    /// Resolve the area to an absolute rectangle for a page of the given
    /// display size.
    pub fn resolve(&self, page_width: f64, page_height: f64) -> BoundingBox {
        match self.unit {
            AreaUnit::Pixels => BoundingBox::new(self.left, self.top, self.right, self.bottom),
            AreaUnit::Percent => BoundingBox::new(
                self.left / 100.0 * page_width,
                self.top / 100.0 * page_height,
                self.right / 100.0 * page_width,
                self.bottom / 100.0 * page_height,
            ),
        }
    }
}

/// Sheet-number lookup to the right of the chosen drawing number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetNumberSettings {
    pub enabled: bool,
    pub pattern: String,
    /// Maximum horizontal gap in pixels between drawing number and sheet.
    pub tolerance: f64,
}

impl Default for SheetNumberSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            pattern: r"(?:SH(?:EE)?T\.?\s*)?\d{1,3}(?:\s*OF\s*\d{1,3})?".to_string(),
            tolerance: 50.0,
        }
    }
}

/// Tunables for the note description detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDescriptionPattern {
    /// Minimum left edge, as a fraction of page width, for a note start.
    pub min_x_position: f64,
    /// Pixel slack around the first text line's X-extent.
    pub alignment_tolerance: f64,
    /// Vertical gap that ends a description outright.
    pub max_y_gap: f64,
    /// Typical line gap; gaps beyond 2.5× this count as paragraph breaks.
    pub max_line_gap: f64,
}

impl Default for NoteDescriptionPattern {
    fn default() -> Self {
        Self {
            min_x_position: 0.5,
            alignment_tolerance: 10.0,
            max_y_gap: 60.0,
            max_line_gap: 15.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub auto_remove_whitespace: bool,
    pub combine_drawing_and_sheet: bool,
    /// Also accept a single run such as `PT-101` as an instrument tag.
    pub detect_combined_instruments: bool,
    pub drawing_search_area: DrawingSearchArea,
    pub sheet_number: SheetNumberSettings,
    pub note_description: NoteDescriptionPattern,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auto_remove_whitespace: true,
            combine_drawing_and_sheet: false,
            detect_combined_instruments: false,
            drawing_search_area: DrawingSearchArea::default(),
            sheet_number: SheetNumberSettings::default(),
            note_description: NoteDescriptionPattern::default(),
        }
    }
}

/// The `settings` block of a project snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectSettings {
    pub patterns: PatternConfig,
    pub tolerances: ToleranceConfig,
    pub app_settings: AppSettings,
}
