//! TOML configuration for the `pidtag` CLI.
//!
//! The file mirrors the project settings stored in a project snapshot, in
//! snake_case, plus two CLI-only sections: `[optimizer]` search ranges and
//! `[export.instrument_types]`. Every key is optional; a missing file means
//! all defaults.
//!
//! ```toml
//! [patterns]
//! line = '\d{1,2}"?-[A-Z]{1,4}-\d{3,6}(?:-[A-Z0-9]+)*'
//!
//! [patterns.instrument]
//! func = '[A-Z]{2,4}'
//! num = '\d{3,4}[A-Z]?'
//!
//! [tolerances]
//! vertical = 20.0
//! horizontal = 20.0
//! auto_link_distance = 50.0
//!
//! [export.instrument_types.PT]
//! instrument_type = "Pressure Transmitter"
//! io_type = "AI"
//! ```
//!
//! Run `pidtag init` to write a commented copy of the defaults.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use pid_tagger_core::export::{InstrumentTypeEntry, InstrumentTypeTable};
use pid_tagger_core::extract::pattern_errors;
use pid_tagger_core::optimize::tolerance::SearchRange;
use pid_tagger_core::optimize::ToleranceSearchSpace;
use pid_tagger_core::settings::{
    AppSettings, AreaUnit, DrawingSearchArea, InstrumentPattern, NoteDescriptionPattern, PatternConfig,
    ProjectSettings, SheetNumberSettings, ToleranceConfig,
};

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub patterns: PatternsConfig,
    pub tolerances: TolerancesConfig,
    pub app: AppConfig,
    pub notes: NotesConfig,
    pub optimizer: OptimizerConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PatternsConfig {
    pub line: String,
    pub drawing_number: String,
    pub notes_and_holds: String,
    pub instrument: InstrumentPatternConfig,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        let core = PatternConfig::default();
        Self {
            line: core.line,
            drawing_number: core.drawing_number,
            notes_and_holds: core.notes_and_holds,
            instrument: InstrumentPatternConfig {
                func: core.instrument.func,
                num: core.instrument.num,
            },
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct InstrumentPatternConfig {
    pub func: String,
    pub num: String,
}

impl Default for InstrumentPatternConfig {
    fn default() -> Self {
        PatternsConfig::default().instrument
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TolerancesConfig {
    #[serde(default = "default_tolerance")]
    pub vertical: f64,
    #[serde(default = "default_tolerance")]
    pub horizontal: f64,
    #[serde(default = "default_auto_link_distance")]
    pub auto_link_distance: f64,
}

fn default_tolerance() -> f64 {
    20.0
}
fn default_auto_link_distance() -> f64 {
    50.0
}

impl Default for TolerancesConfig {
    fn default() -> Self {
        Self {
            vertical: default_tolerance(),
            horizontal: default_tolerance(),
            auto_link_distance: default_auto_link_distance(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub auto_remove_whitespace: bool,
    pub combine_drawing_and_sheet: bool,
    pub detect_combined_instruments: bool,
    pub drawing_search_area: SearchAreaConfig,
    pub sheet_number: SheetNumberConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        let core = AppSettings::default();
        Self {
            auto_remove_whitespace: core.auto_remove_whitespace,
            combine_drawing_and_sheet: core.combine_drawing_and_sheet,
            detect_combined_instruments: core.detect_combined_instruments,
            drawing_search_area: SearchAreaConfig::default(),
            sheet_number: SheetNumberConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SearchAreaConfig {
    pub enabled: bool,
    /// `percent` of the page size or absolute `pixels`.
    pub unit: String,
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Default for SearchAreaConfig {
    fn default() -> Self {
        let core = DrawingSearchArea::default();
        Self {
            enabled: core.enabled,
            unit: "percent".to_string(),
            left: core.left,
            top: core.top,
            right: core.right,
            bottom: core.bottom,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SheetNumberConfig {
    pub enabled: bool,
    pub pattern: String,
    pub tolerance: f64,
}

impl Default for SheetNumberConfig {
    fn default() -> Self {
        let core = SheetNumberSettings::default();
        Self {
            enabled: core.enabled,
            pattern: core.pattern,
            tolerance: core.tolerance,
        }
    }
}

/// Note description detector tunables.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct NotesConfig {
    pub min_x_position: f64,
    pub alignment_tolerance: f64,
    pub max_y_gap: f64,
    pub max_line_gap: f64,
}

impl Default for NotesConfig {
    fn default() -> Self {
        let core = NoteDescriptionPattern::default();
        Self {
            min_x_position: core.min_x_position,
            alignment_tolerance: core.alignment_tolerance,
            max_y_gap: core.max_y_gap,
            max_line_gap: core.max_line_gap,
        }
    }
}

/// Search ranges for `pidtag optimize tolerances` (full mode).
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    pub vertical: [f64; 3],
    pub horizontal: [f64; 3],
    pub auto_link_distance: [f64; 3],
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        let space = ToleranceSearchSpace::default();
        let triple = |r: SearchRange| [r.min, r.max, r.step];
        Self {
            vertical: triple(space.vertical),
            horizontal: triple(space.horizontal),
            auto_link_distance: triple(space.auto_link_distance),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// Keyed by function-code prefix, e.g. `[export.instrument_types.PT]`.
    pub instrument_types: BTreeMap<String, InstrumentTypeEntry>,
}

impl Config {
    /// All defaults. Used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    pub fn pattern_config(&self) -> PatternConfig {
        PatternConfig {
            line: self.patterns.line.clone(),
            instrument: InstrumentPattern {
                func: self.patterns.instrument.func.clone(),
                num: self.patterns.instrument.num.clone(),
            },
            drawing_number: self.patterns.drawing_number.clone(),
            notes_and_holds: self.patterns.notes_and_holds.clone(),
        }
    }

    pub fn tolerance_config(&self) -> ToleranceConfig {
        ToleranceConfig::instrument(
            self.tolerances.vertical,
            self.tolerances.horizontal,
            self.tolerances.auto_link_distance,
        )
    }

    pub fn app_settings(&self) -> AppSettings {
        let area = &self.app.drawing_search_area;
        AppSettings {
            auto_remove_whitespace: self.app.auto_remove_whitespace,
            combine_drawing_and_sheet: self.app.combine_drawing_and_sheet,
            detect_combined_instruments: self.app.detect_combined_instruments,
            drawing_search_area: DrawingSearchArea {
                enabled: area.enabled,
                unit: if area.unit == "pixels" {
                    AreaUnit::Pixels
                } else {
                    AreaUnit::Percent
                },
                left: area.left,
                top: area.top,
                right: area.right,
                bottom: area.bottom,
            },
            sheet_number: SheetNumberSettings {
                enabled: self.app.sheet_number.enabled,
                pattern: self.app.sheet_number.pattern.clone(),
                tolerance: self.app.sheet_number.tolerance,
            },
            note_description: NoteDescriptionPattern {
                min_x_position: self.notes.min_x_position,
                alignment_tolerance: self.notes.alignment_tolerance,
                max_y_gap: self.notes.max_y_gap,
                max_line_gap: self.notes.max_line_gap,
            },
        }
    }

    /// The settings block stored in a new project.
    pub fn project_settings(&self) -> ProjectSettings {
        ProjectSettings {
            patterns: self.pattern_config(),
            tolerances: self.tolerance_config(),
            app_settings: self.app_settings(),
        }
    }

    pub fn search_space(&self) -> ToleranceSearchSpace {
        let range = |[min, max, step]: [f64; 3]| SearchRange::new(min, max, step);
        ToleranceSearchSpace {
            vertical: range(self.optimizer.vertical),
            horizontal: range(self.optimizer.horizontal),
            auto_link_distance: range(self.optimizer.auto_link_distance),
        }
    }

    pub fn instrument_types(&self) -> InstrumentTypeTable {
        InstrumentTypeTable::new(self.export.instrument_types.clone())
    }
}

/// Load and validate the config file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::minimal());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let t = &config.tolerances;
    for (name, value) in [
        ("vertical", t.vertical),
        ("horizontal", t.horizontal),
        ("auto_link_distance", t.auto_link_distance),
    ] {
        if !value.is_finite() || value < 0.0 {
            bail!("tolerances.{} must be a non-negative number", name);
        }
    }

    if !(0.0..=1.0).contains(&config.notes.min_x_position) {
        bail!("notes.min_x_position must be in [0.0, 1.0]");
    }
    for (name, value) in [
        ("alignment_tolerance", config.notes.alignment_tolerance),
        ("max_y_gap", config.notes.max_y_gap),
        ("max_line_gap", config.notes.max_line_gap),
    ] {
        if value < 0.0 {
            bail!("notes.{} must be >= 0", name);
        }
    }

    match config.app.drawing_search_area.unit.as_str() {
        "percent" | "pixels" => {}
        other => bail!(
            "Unknown app.drawing_search_area.unit: '{}'. Must be percent or pixels.",
            other
        ),
    }

    for (name, [min, max, step]) in [
        ("vertical", config.optimizer.vertical),
        ("horizontal", config.optimizer.horizontal),
        ("auto_link_distance", config.optimizer.auto_link_distance),
    ] {
        if min < 0.0 || max < min || step <= 0.0 {
            bail!(
                "optimizer.{} must be [min, max, step] with 0 <= min <= max and step > 0",
                name
            );
        }
    }

    let errors = pattern_errors(&config.pattern_config(), &config.app_settings());
    if !errors.is_empty() {
        bail!("invalid pattern(s):\n  {}", errors.join("\n  "));
    }
    Ok(())
}

/// Commented default config written by `pidtag init`.
pub const DEFAULT_CONFIG: &str = r#"# pidtag configuration
#
# Every key is optional. Values shown are the defaults.

[patterns]
# Regexes are matched case-insensitively against single text runs.
line = '\d{1,2}"?-[A-Z]{1,4}-\d{3,6}(?:-[A-Z0-9]+)*'
drawing_number = '[A-Z0-9]{3,}(?:-[A-Z0-9]{2,}){2,}'
notes_and_holds = '(?:NOTE|HOLD)\s*\d+(?:\s*[,&]\s*\d+)*'

[patterns.instrument]
# Function code above, loop number below. Matched case-sensitively.
func = '[A-Z]{2,4}'
num = '\d{3,4}[A-Z]?'

[tolerances]
vertical = 20.0
horizontal = 20.0
auto_link_distance = 50.0

[app]
auto_remove_whitespace = true
combine_drawing_and_sheet = false
detect_combined_instruments = false

[app.drawing_search_area]
enabled = false
unit = "percent"
left = 50.0
top = 50.0
right = 100.0
bottom = 100.0

[app.sheet_number]
enabled = false
pattern = '(?:SH(?:EE)?T\.?\s*)?\d{1,3}(?:\s*OF\s*\d{1,3})?'
tolerance = 50.0

[notes]
min_x_position = 0.5
alignment_tolerance = 10.0
max_y_gap = 60.0
max_line_gap = 15.0

[optimizer]
# [min, max, step]
vertical = [5.0, 40.0, 5.0]
horizontal = [5.0, 40.0, 5.0]
auto_link_distance = [20.0, 100.0, 10.0]

# Instrument list lookup by function-code prefix (longest prefix wins).
# [export.instrument_types.PT]
# instrument_type = "Pressure Transmitter"
# io_type = "AI"
"#;

/// Write [`DEFAULT_CONFIG`] to `path`, refusing to overwrite.
pub fn init_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Config file already exists: {}", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}
