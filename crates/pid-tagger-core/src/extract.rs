//! Three-pass tag extraction over one page of text runs.
//!
//! Turns raw text runs into categorized [`Tag`]s plus leftover
//! [`RawTextItem`]s. Each run is consumed at most once across all passes.
//!
//! # Passes
//!
//! 1. **Split instrument merge**: pair a function-code run (e.g. `PT`)
//!    with the closest loop-number run (e.g. `101`) strictly below it,
//!    within the vertical/horizontal tolerances. Emits `PT-101`.
//! 2. **Single-token categories**: test Line, then NotesAndHolds
//!    regexes (case-insensitive, all matches). A run that matches anything
//!    is consumed.
//! 3. **Drawing number**: score every DrawingNumber match and keep the
//!    single best one per page, optionally joined with a sheet number on
//!    the same line.
//!
//! Whatever remains becomes a [`RawTextItem`].
//!
//! A pattern that fails to compile is logged and skipped; extraction never
//! aborts a page.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use anyhow::Result;

use crate::geometry::{display_size, reference_corner, text_run_bbox};
use crate::models::{BoundingBox, Category, RawTextItem, Tag};
use crate::page::{PageContent, PageSource, Viewport};
use crate::progress::ProgressSink;
use crate::settings::{AppSettings, PatternConfig, ToleranceConfig};

/// Allowed horizontal overlap (px) between a drawing number and the sheet
/// number to its right.
const SHEET_OVERLAP_SLACK: f64 = 2.0;

/// Minimum vertical overlap for two boxes to count as the same line.
const SAME_LINE_OVERLAP: f64 = 0.5;

static FIVE_DIGIT_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{5}[A-Z]").unwrap());

/// Output of extracting one page.
#[derive(Debug, Clone, Default)]
pub struct PageExtraction {
    pub page: u32,
    pub tags: Vec<Tag>,
    pub raw_items: Vec<RawTextItem>,
    /// Runs skipped because they were blank or had non-finite geometry.
    pub dropped_runs: usize,
}

/// Category regexes compiled once for a page (or a whole optimizer run).
#[derive(Debug, Clone, Default)]
pub struct CompiledPatterns {
    func: Option<Regex>,
    num: Option<Regex>,
    line: Option<Regex>,
    notes_and_holds: Option<Regex>,
    drawing_number: Option<Regex>,
    combined_instrument: Option<Regex>,
    sheet_number: Option<Regex>,
}

impl CompiledPatterns {
    pub fn compile(patterns: &PatternConfig, app: &AppSettings) -> Self {
        let func = compile_pattern("Instrument.func", &patterns.instrument.func, true, false);
        let num = compile_pattern("Instrument.num", &patterns.instrument.num, true, false);
        let combined_instrument = if app.detect_combined_instruments && func.is_some() && num.is_some() {
            let source = format!(
                r"(?:{})[-\s]?(?:{})",
                patterns.instrument.func, patterns.instrument.num
            );
            compile_pattern("Instrument", &source, true, false)
        } else {
            None
        };
        let sheet_number = if app.sheet_number.enabled {
            compile_pattern("SheetNumber", &app.sheet_number.pattern, false, true)
        } else {
            None
        };

        Self {
            func,
            num,
            line: compile_pattern("Line", &patterns.line, false, true),
            notes_and_holds: compile_pattern("NotesAndHolds", &patterns.notes_and_holds, false, true),
            drawing_number: compile_pattern("DrawingNumber", &patterns.drawing_number, false, true),
            combined_instrument,
            sheet_number,
        }
    }
}

/// Compile one user pattern, logging and discarding it on failure.
fn compile_pattern(label: &str, pattern: &str, anchored: bool, case_insensitive: bool) -> Option<Regex> {
    if pattern.trim().is_empty() {
        return None;
    }
    let source = if anchored {
        format!("^(?:{})$", pattern)
    } else {
        pattern.to_string()
    };
    match RegexBuilder::new(&source)
        .case_insensitive(case_insensitive)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(category = label, error = %e, "skipping malformed pattern");
            None
        }
    }
}

/// Every pattern that fails to compile, as `category: error` lines.
///
/// Extraction tolerates these by skipping the pattern; callers that load
/// settings from a file use this to reject them up front.
pub fn pattern_errors(patterns: &PatternConfig, app: &AppSettings) -> Vec<String> {
    let mut checks = vec![
        ("Instrument.func", patterns.instrument.func.as_str()),
        ("Instrument.num", patterns.instrument.num.as_str()),
        ("Line", patterns.line.as_str()),
        ("NotesAndHolds", patterns.notes_and_holds.as_str()),
        ("DrawingNumber", patterns.drawing_number.as_str()),
    ];
    if app.sheet_number.enabled {
        checks.push(("SheetNumber", app.sheet_number.pattern.as_str()));
    }
    checks
        .into_iter()
        .filter(|(_, p)| !p.trim().is_empty())
        .filter_map(|(label, p)| Regex::new(p).err().map(|e| format!("{}: {}", label, e)))
        .collect()
}

/// A text run with its display-space box, ready for matching.
#[derive(Debug, Clone)]
pub struct PositionedRun {
    pub text: String,
    pub bbox: BoundingBox,
}

/// A page whose runs have been positioned once, so repeated extraction
/// (as the optimizers do) skips the coordinate transform.
#[derive(Debug, Clone)]
pub struct PreparedPage {
    pub page: u32,
    pub viewport: Option<Viewport>,
    pub runs: Vec<PositionedRun>,
    pub dropped_runs: usize,
}

impl PreparedPage {
    pub fn new(content: &PageContent) -> Self {
        let mut runs = Vec::with_capacity(content.text_runs.len());
        let mut dropped_runs = 0;
        for run in &content.text_runs {
            let text = run.text.trim();
            if text.is_empty() {
                dropped_runs += 1;
                continue;
            }
            match text_run_bbox(run, content.viewport.as_ref()) {
                Some(bbox) => runs.push(PositionedRun {
                    text: text.to_string(),
                    bbox,
                }),
                None => {
                    warn!(page = content.page_number, text, "dropping run with non-finite geometry");
                    dropped_runs += 1;
                }
            }
        }
        Self {
            page: content.page_number,
            viewport: content.viewport,
            runs,
            dropped_runs,
        }
    }

    /// Displayed page size, falling back to the content extent when the
    /// page came without a viewport.
    pub fn size(&self) -> (f64, f64) {
        match &self.viewport {
            Some(vp) => display_size(vp),
            None => {
                let extent = self.extent();
                (extent.x2, extent.y2)
            }
        }
    }

    fn extent(&self) -> BoundingBox {
        BoundingBox::union_all(self.runs.iter().map(|r| &r.bbox))
            .unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }
}

/// Extract tags and leftover raw items from one page.
pub fn extract_page_tags(
    page: &PageContent,
    patterns: &PatternConfig,
    tolerances: &ToleranceConfig,
    app: &AppSettings,
) -> PageExtraction {
    let compiled = CompiledPatterns::compile(patterns, app);
    extract_prepared(&PreparedPage::new(page), &compiled, tolerances, app)
}

/// Extract every page of an in-memory document.
pub fn extract_document(
    pages: &[PageContent],
    patterns: &PatternConfig,
    tolerances: &ToleranceConfig,
    app: &AppSettings,
) -> Vec<PageExtraction> {
    let compiled = CompiledPatterns::compile(patterns, app);
    pages
        .iter()
        .map(|p| extract_prepared(&PreparedPage::new(p), &compiled, tolerances, app))
        .collect()
}

/// Extract every page of a [`PageSource`], reporting progress per page.
pub async fn extract_all<S: PageSource + ?Sized>(
    source: &S,
    patterns: &PatternConfig,
    tolerances: &ToleranceConfig,
    app: &AppSettings,
    progress: &dyn ProgressSink,
) -> Result<Vec<PageExtraction>> {
    let compiled = CompiledPatterns::compile(patterns, app);
    let total = source.page_count();
    let mut out = Vec::with_capacity(total as usize);
    for page_number in 1..=total {
        let content = source.page(page_number).await?;
        out.push(extract_prepared(
            &PreparedPage::new(&content),
            &compiled,
            tolerances,
            app,
        ));
        progress.progress(
            page_number as f64 / total as f64 * 100.0,
            &format!("extracted page {} of {}", page_number, total),
        );
    }
    Ok(out)
}

/// Run all three passes over an already positioned page.
pub fn extract_prepared(
    page: &PreparedPage,
    patterns: &CompiledPatterns,
    tolerances: &ToleranceConfig,
    app: &AppSettings,
) -> PageExtraction {
    let runs = &page.runs;
    let mut consumed = vec![false; runs.len()];
    let mut tags = Vec::new();

    // One raw item per run so tags built from the same run share its id.
    let sources: Vec<RawTextItem> = runs
        .iter()
        .map(|r| RawTextItem::new(r.text.clone(), page.page, r.bbox))
        .collect();

    merge_split_instruments(page, patterns, tolerances, app, &sources, &mut consumed, &mut tags);
    categorize_single_tokens(page, patterns, app, &sources, &mut consumed, &mut tags);
    select_drawing_number(page, patterns, app, &sources, &mut consumed, &mut tags);

    let raw_items = sources
        .into_iter()
        .zip(consumed.iter())
        .filter(|(_, used)| !**used)
        .map(|(item, _)| item)
        .collect();

    PageExtraction {
        page: page.page,
        tags,
        raw_items,
        dropped_runs: page.dropped_runs,
    }
}

fn merge_split_instruments(
    page: &PreparedPage,
    patterns: &CompiledPatterns,
    tolerances: &ToleranceConfig,
    app: &AppSettings,
    sources: &[RawTextItem],
    consumed: &mut [bool],
    tags: &mut Vec<Tag>,
) {
    let (Some(func_re), Some(num_re)) = (&patterns.func, &patterns.num) else {
        return;
    };
    let tol = &tolerances.instrument;
    let runs = &page.runs;

    let funcs: Vec<usize> = (0..runs.len())
        .filter(|&i| !runs[i].text.eq_ignore_ascii_case("FF") && func_re.is_match(&runs[i].text))
        .collect();
    let nums: Vec<usize> = (0..runs.len())
        .filter(|&i| num_re.is_match(&runs[i].text))
        .collect();

    for &fi in &funcs {
        if consumed[fi] {
            continue;
        }
        let (fx, fy) = runs[fi].bbox.center();
        let mut best: Option<(usize, f64)> = None;
        for &ni in &nums {
            if ni == fi || consumed[ni] {
                continue;
            }
            let (nx, ny) = runs[ni].bbox.center();
            // Function code sits strictly above the number.
            if fy >= ny {
                continue;
            }
            let dx = (nx - fx).abs();
            let dy = ny - fy;
            if dx > tol.horizontal || dy > tol.vertical {
                continue;
            }
            let dist_sq = dx * dx + dy * dy;
            if best.map_or(true, |(_, d)| dist_sq < d) {
                best = Some((ni, dist_sq));
            }
        }

        if let Some((ni, _)) = best {
            consumed[fi] = true;
            consumed[ni] = true;
            let text = normalize_tag_text(
                &format!("{}-{}", runs[fi].text, runs[ni].text),
                Category::Instrument,
                app,
            );
            let bbox = runs[fi].bbox.union(&runs[ni].bbox);
            debug!(page = page.page, tag = %text, "merged split instrument tag");
            tags.push(
                Tag::new(text, page.page, bbox, Category::Instrument)
                    .with_source_items(vec![sources[fi].clone(), sources[ni].clone()]),
            );
        }
    }
}

fn categorize_single_tokens(
    page: &PreparedPage,
    patterns: &CompiledPatterns,
    app: &AppSettings,
    sources: &[RawTextItem],
    consumed: &mut [bool],
    tags: &mut Vec<Tag>,
) {
    let ordered = [
        (Category::Line, &patterns.line),
        (Category::NotesAndHolds, &patterns.notes_and_holds),
    ];

    for (i, run) in page.runs.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        let mut matched = false;
        for (category, re) in ordered {
            let Some(re) = re else { continue };
            for m in re.find_iter(&run.text) {
                if m.as_str().is_empty() || starts_with_ff(m.as_str()) {
                    continue;
                }
                let text = normalize_tag_text(m.as_str(), category, app);
                tags.push(
                    Tag::new(text, page.page, run.bbox, category)
                        .with_source_items(vec![sources[i].clone()]),
                );
                matched = true;
            }
        }

        if !matched {
            if let Some(re) = &patterns.combined_instrument {
                if re.is_match(&run.text) && !starts_with_ff(&run.text) {
                    let text = normalize_tag_text(&run.text, Category::Instrument, app);
                    tags.push(
                        Tag::new(text, page.page, run.bbox, Category::Instrument)
                            .with_source_items(vec![sources[i].clone()]),
                    );
                    matched = true;
                }
            }
        }

        if matched {
            consumed[i] = true;
        }
    }
}

struct DrawingCandidate {
    index: usize,
    text: String,
    score: f64,
}

fn select_drawing_number(
    page: &PreparedPage,
    patterns: &CompiledPatterns,
    app: &AppSettings,
    sources: &[RawTextItem],
    consumed: &mut [bool],
    tags: &mut Vec<Tag>,
) {
    let Some(re) = &patterns.drawing_number else {
        return;
    };
    let runs = &page.runs;
    let (width, height) = page.size();
    let area = app
        .drawing_search_area
        .enabled
        .then(|| app.drawing_search_area.resolve(width, height));
    let reference = reference_corner(page.viewport.as_ref(), &page.extent());

    let mut best: Option<DrawingCandidate> = None;
    for (i, run) in runs.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        if let Some(area) = &area {
            let (cx, cy) = run.bbox.center();
            if !area.contains_point(cx, cy) {
                continue;
            }
        }
        for m in re.find_iter(&run.text) {
            if m.as_str().is_empty() {
                continue;
            }
            let score = drawing_number_score(m.as_str(), &run.bbox, reference);
            if best.as_ref().map_or(true, |b| score > b.score) {
                best = Some(DrawingCandidate {
                    index: i,
                    text: m.as_str().to_string(),
                    score,
                });
            }
        }
    }

    let Some(best) = best else {
        return;
    };
    consumed[best.index] = true;

    let mut text = normalize_tag_text(&best.text, Category::DrawingNumber, app);
    let mut bbox = runs[best.index].bbox;
    let mut items = vec![sources[best.index].clone()];

    if let Some(sheet_re) = &patterns.sheet_number {
        if let Some((si, sheet)) = find_sheet_number(
            runs,
            consumed,
            best.index,
            sheet_re,
            app.sheet_number.tolerance,
        ) {
            consumed[si] = true;
            bbox = bbox.union(&runs[si].bbox);
            items.push(sources[si].clone());
            if app.combine_drawing_and_sheet {
                text = format!(
                    "{}-{}",
                    text,
                    normalize_tag_text(&sheet, Category::DrawingNumber, app)
                );
            }
        }
    }

    debug!(page = page.page, tag = %text, score = best.score, "selected drawing number");
    tags.push(Tag::new(text, page.page, bbox, Category::DrawingNumber).with_source_items(items));
}

/// Heuristic quality of a drawing-number candidate.
///
/// Rewards well-formed numbers and penalizes distance from the page's
/// bottom-right reference corner.
pub fn drawing_number_score(text: &str, bbox: &BoundingBox, reference: (f64, f64)) -> f64 {
    let mut score = 0.0;
    if !text.starts_with('-') {
        score += 1000.0;
    }
    if text.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        score += 500.0;
    }
    if FIVE_DIGIT_PREFIX.is_match(text) {
        score += 300.0;
    }
    if text.split('-').count() >= 3 {
        score += 200.0;
    }
    if text.chars().count() > 15 {
        score += 100.0;
    }
    let (cx, cy) = bbox.center();
    score - 0.1 * (cx - reference.0).hypot(cy - reference.1)
}

/// Find a sheet-number run on the same line, to the right of the drawing
/// number, within `tolerance` pixels. Nearest wins.
fn find_sheet_number(
    runs: &[PositionedRun],
    consumed: &[bool],
    drawing: usize,
    sheet_re: &Regex,
    tolerance: f64,
) -> Option<(usize, String)> {
    let anchor = runs[drawing].bbox;
    let mut best: Option<(usize, String, f64)> = None;
    for (i, run) in runs.iter().enumerate() {
        if i == drawing || consumed[i] {
            continue;
        }
        if run.bbox.vertical_overlap_ratio(&anchor) < SAME_LINE_OVERLAP {
            continue;
        }
        let gap = run.bbox.x1 - anchor.x2;
        if gap < -SHEET_OVERLAP_SLACK || gap > tolerance {
            continue;
        }
        let Some(m) = sheet_re.find(&run.text) else {
            continue;
        };
        if best.as_ref().map_or(true, |(_, _, g)| gap < *g) {
            best = Some((i, m.as_str().to_string(), gap));
        }
    }
    best.map(|(i, text, _)| (i, text))
}

fn starts_with_ff(text: &str) -> bool {
    text.get(..2).is_some_and(|p| p.eq_ignore_ascii_case("FF"))
}

/// Apply the whitespace policy: stripped when `autoRemoveWhitespace` is on,
/// except NotesAndHolds which always keeps its spacing.
pub fn normalize_tag_text(text: &str, category: Category, app: &AppSettings) -> String {
    if app.auto_remove_whitespace && category != Category::NotesAndHolds {
        text.chars().filter(|c| !c.is_whitespace()).collect()
    } else {
        text.trim().to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::page::{TextRun, Viewport};
    use crate::settings::InstrumentPattern;
    use std::collections::HashSet;

    pub(crate) const PAGE_W: f64 = 1000.0;
    pub(crate) const PAGE_H: f64 = 800.0;

    /// A run whose display box starts at `(x, y)` with the given width and
    /// glyph height (the box is `1.2 × h` tall including descent).
    pub(crate) fn run_at(text: &str, x: f64, y: f64, w: f64, h: f64) -> TextRun {
        TextRun {
            text: text.to_string(),
            transform: [h, 0.0, 0.0, h, x, PAGE_H - y - h],
            width: w,
            height: h,
        }
    }

    pub(crate) fn page(runs: Vec<TextRun>) -> PageContent {
        PageContent {
            page_number: 1,
            text_runs: runs,
            viewport: Some(Viewport::unrotated(PAGE_W, PAGE_H)),
        }
    }

    fn instrument_only() -> PatternConfig {
        PatternConfig {
            line: String::new(),
            instrument: InstrumentPattern {
                func: "[A-Z]{2,4}".to_string(),
                num: r"\d{3,4}".to_string(),
            },
            drawing_number: String::new(),
            notes_and_holds: String::new(),
        }
    }

    fn tol(v: f64, h: f64) -> ToleranceConfig {
        ToleranceConfig::instrument(v, h, 50.0)
    }

    #[test]
    fn malformed_patterns_are_reported() {
        let mut patterns = PatternConfig::default();
        assert!(pattern_errors(&patterns, &AppSettings::default()).is_empty());
        patterns.line = "([A-Z".to_string();
        let errors = pattern_errors(&patterns, &AppSettings::default());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Line:"));
    }

    #[test]
    fn split_instrument_merges_function_above_number() {
        let p = page(vec![
            run_at("PT", 100.0, 100.0, 14.0, 10.0),
            run_at("101", 98.0, 112.0, 18.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &instrument_only(), &tol(20.0, 20.0), &AppSettings::default());
        assert_eq!(out.tags.len(), 1);
        assert_eq!(out.tags[0].text, "PT-101");
        assert_eq!(out.tags[0].category, Category::Instrument);
        assert_eq!(out.tags[0].source_items.as_ref().unwrap().len(), 2);
        assert!(out.raw_items.is_empty());
    }

    #[test]
    fn document_extraction_keeps_pages_apart() {
        let first = page(vec![run_at("PT", 100.0, 100.0, 14.0, 10.0), run_at("101", 98.0, 112.0, 18.0, 10.0)]);
        let second = PageContent {
            page_number: 2,
            ..page(vec![run_at("FT", 100.0, 100.0, 14.0, 10.0), run_at("7", 500.0, 500.0, 8.0, 10.0)])
        };
        let out = extract_document(&[first, second], &instrument_only(), &tol(20.0, 20.0), &AppSettings::default());
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].page, out[0].tags.len()), (1, 1));
        assert_eq!((out[1].page, out[1].tags.len()), (2, 0));
        assert!(out[1].raw_items.iter().all(|r| r.page == 2));
        assert_eq!(out[1].raw_items.len(), 2);
    }

    #[test]
    fn function_below_number_does_not_pair() {
        let p = page(vec![
            run_at("101", 98.0, 100.0, 18.0, 10.0),
            run_at("PT", 100.0, 112.0, 14.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &instrument_only(), &tol(20.0, 20.0), &AppSettings::default());
        assert!(out.tags.is_empty());
        assert_eq!(out.raw_items.len(), 2);
    }

    #[test]
    fn closest_number_wins() {
        let p = page(vec![
            run_at("TIC", 100.0, 100.0, 20.0, 10.0),
            run_at("205", 100.0, 125.0, 20.0, 10.0),
            run_at("206", 100.0, 112.0, 20.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &instrument_only(), &tol(40.0, 20.0), &AppSettings::default());
        assert_eq!(out.tags.len(), 1);
        assert_eq!(out.tags[0].text, "TIC-206");
        assert_eq!(out.raw_items.len(), 1);
        assert_eq!(out.raw_items[0].text, "205");
    }

    #[test]
    fn out_of_tolerance_parts_stay_raw() {
        let p = page(vec![
            run_at("PT", 100.0, 100.0, 14.0, 10.0),
            run_at("101", 160.0, 112.0, 18.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &instrument_only(), &tol(20.0, 20.0), &AppSettings::default());
        assert!(out.tags.is_empty());
    }

    #[test]
    fn ff_is_never_a_function_code() {
        let p = page(vec![
            run_at("FF", 100.0, 100.0, 14.0, 10.0),
            run_at("101", 100.0, 112.0, 14.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &instrument_only(), &tol(20.0, 20.0), &AppSettings::default());
        assert!(out.tags.is_empty());
    }

    #[test]
    fn line_and_note_patterns_emit_every_match() {
        let patterns = PatternConfig {
            drawing_number: String::new(),
            ..PatternConfig::default()
        };
        let p = page(vec![
            run_at(r#"6"-P-1001-A1 / 4"-P-1002"#, 100.0, 300.0, 200.0, 10.0),
            run_at("SEE NOTE 3", 400.0, 300.0, 80.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &patterns, &tol(20.0, 20.0), &AppSettings::default());
        let lines: Vec<&str> = out
            .tags
            .iter()
            .filter(|t| t.category == Category::Line)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(lines, vec![r#"6"-P-1001-A1"#, r#"4"-P-1002"#]);
        let notes: Vec<&str> = out
            .tags
            .iter()
            .filter(|t| t.category == Category::NotesAndHolds)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(notes, vec!["NOTE 3"]);
        assert!(out.raw_items.is_empty());
    }

    #[test]
    fn matches_starting_with_ff_are_skipped() {
        let patterns = PatternConfig {
            line: "[A-Z]{2}-\\d{3}".to_string(),
            ..instrument_only()
        };
        let p = page(vec![run_at("FF-100", 100.0, 300.0, 60.0, 10.0)]);
        let out = extract_page_tags(&p, &patterns, &tol(20.0, 20.0), &AppSettings::default());
        assert!(out.tags.is_empty());
        assert_eq!(out.raw_items.len(), 1);
    }

    #[test]
    fn whitespace_policy_spares_notes() {
        let patterns = PatternConfig {
            line: r"L \d+".to_string(),
            notes_and_holds: r"HOLD \d+".to_string(),
            ..instrument_only()
        };
        let p = page(vec![
            run_at("L 100", 100.0, 300.0, 60.0, 10.0),
            run_at("HOLD 2", 300.0, 300.0, 60.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &patterns, &tol(20.0, 20.0), &AppSettings::default());
        let texts: HashSet<&str> = out.tags.iter().map(|t| t.text.as_str()).collect();
        assert!(texts.contains("L100"));
        assert!(texts.contains("HOLD 2"));
    }

    #[test]
    fn malformed_pattern_is_skipped_not_fatal() {
        let patterns = PatternConfig {
            line: "([unclosed".to_string(),
            notes_and_holds: r"NOTE \d+".to_string(),
            ..instrument_only()
        };
        let p = page(vec![run_at("NOTE 7", 100.0, 300.0, 60.0, 10.0)]);
        let out = extract_page_tags(&p, &patterns, &tol(20.0, 20.0), &AppSettings::default());
        assert_eq!(out.tags.len(), 1);
        assert_eq!(out.tags[0].text, "NOTE 7");
    }

    fn drawing_only() -> PatternConfig {
        PatternConfig {
            drawing_number: r"[A-Z0-9]{3,}(?:-[A-Z0-9]{2,}){2,}".to_string(),
            ..instrument_only()
        }
    }

    #[test]
    fn single_drawing_number_prefers_bottom_right() {
        let p = page(vec![
            run_at("ABC-100-XY", 50.0, 50.0, 80.0, 10.0),
            run_at("12345A-100-XY", 880.0, 770.0, 100.0, 10.0),
            run_at("ABC-200-ZZ", 500.0, 400.0, 80.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &drawing_only(), &tol(20.0, 20.0), &AppSettings::default());
        let drawings: Vec<&Tag> = out
            .tags
            .iter()
            .filter(|t| t.category == Category::DrawingNumber)
            .collect();
        assert_eq!(drawings.len(), 1);
        assert_eq!(drawings[0].text, "12345A-100-XY");
        assert_eq!(out.raw_items.len(), 2);
    }

    #[test]
    fn search_area_excludes_outside_candidates() {
        let mut app = AppSettings::default();
        app.drawing_search_area.enabled = true;
        app.drawing_search_area.left = 0.0;
        app.drawing_search_area.top = 0.0;
        app.drawing_search_area.right = 20.0;
        app.drawing_search_area.bottom = 20.0;
        let p = page(vec![
            run_at("ABC-100-XY", 50.0, 50.0, 80.0, 10.0),
            run_at("12345A-100-XY", 880.0, 770.0, 100.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &drawing_only(), &tol(20.0, 20.0), &app);
        assert_eq!(out.tags.len(), 1);
        assert_eq!(out.tags[0].text, "ABC-100-XY");
    }

    #[test]
    fn sheet_number_joins_drawing_when_combined() {
        let mut app = AppSettings::default();
        app.sheet_number.enabled = true;
        app.sheet_number.pattern = r"\d{1,3}".to_string();
        app.combine_drawing_and_sheet = true;
        let p = page(vec![
            run_at("12345A-100-XY", 800.0, 770.0, 100.0, 10.0),
            run_at("02", 920.0, 770.0, 12.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &drawing_only(), &tol(20.0, 20.0), &app);
        assert_eq!(out.tags.len(), 1);
        assert_eq!(out.tags[0].text, "12345A-100-XY-02");
        assert!((out.tags[0].bbox.x2 - 932.0).abs() < 1e-6);
        assert!(out.raw_items.is_empty());
    }

    #[test]
    fn drawing_score_ranks_format_over_distance() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let good = drawing_number_score("12345A-01-02", &bbox, (100.0, 100.0));
        let dash = drawing_number_score("-12345A", &bbox, (100.0, 100.0));
        assert!(good > dash);
    }

    #[test]
    fn combined_instrument_detection_is_opt_in() {
        let p = page(vec![run_at("PT-101", 100.0, 100.0, 40.0, 10.0)]);
        let off = extract_page_tags(&p, &instrument_only(), &tol(20.0, 20.0), &AppSettings::default());
        assert!(off.tags.is_empty());

        let app = AppSettings {
            detect_combined_instruments: true,
            ..AppSettings::default()
        };
        let on = extract_page_tags(&p, &instrument_only(), &tol(20.0, 20.0), &app);
        assert_eq!(on.tags.len(), 1);
        assert_eq!(on.tags[0].text, "PT-101");
    }

    #[test]
    fn every_run_is_accounted_for_once() {
        let p = page(vec![
            run_at("PT", 100.0, 100.0, 14.0, 10.0),
            run_at("101", 98.0, 112.0, 18.0, 10.0),
            run_at(r#"6"-P-1001"#, 300.0, 300.0, 60.0, 10.0),
            run_at("NOTE 4", 400.0, 300.0, 60.0, 10.0),
            run_at("12345A-100-XY", 880.0, 770.0, 100.0, 10.0),
            run_at("loose text", 500.0, 500.0, 60.0, 10.0),
            run_at("   ", 500.0, 550.0, 10.0, 10.0),
        ]);
        let out = extract_page_tags(&p, &PatternConfig::default(), &tol(20.0, 20.0), &AppSettings::default());
        let mut ids: HashSet<String> = HashSet::new();
        let mut total = 0;
        for tag in &out.tags {
            for item in tag.source_items.as_deref().unwrap_or_default() {
                if ids.insert(item.id.clone()) {
                    total += 1;
                }
            }
        }
        for item in &out.raw_items {
            assert!(ids.insert(item.id.clone()), "raw item also consumed by a tag");
            total += 1;
        }
        assert_eq!(total + out.dropped_runs, p.text_runs.len());
        assert_eq!(out.dropped_runs, 1);
    }
}
