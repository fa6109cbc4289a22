//! Instrument tolerance search.
//!
//! Both searches load a small sample of pages once, position their runs
//! once, then re-run extraction for every candidate tolerance and keep the
//! best-scoring one. The starting tolerance is always evaluated first and
//! only a strictly better candidate replaces it, so the returned score is
//! never below the baseline.
//!
//! ```text
//! full:   vertical × horizontal grid ──▶ autoLinkDistance sweep
//! quick:  4 presets on one page ──▶ ±5 px on vertical ──▶ ±5 px on horizontal
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use crate::extract::{extract_prepared, CompiledPatterns, PageExtraction, PreparedPage};
use crate::models::{Category, Tag};
use crate::page::PageSource;
use crate::progress::ProgressSink;
use crate::relationships::auto_link_annotations;
use crate::settings::{AppSettings, InstrumentTolerance, PatternConfig, ToleranceConfig};

static CANONICAL_INSTRUMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{2,4}[-\s]?\d{3,4}[A-Z]?$").unwrap());

/// Average instrument tags per page above which detection is penalized.
const DENSITY_LIMIT: f64 = 100.0;

/// Annotations per instrument beyond which auto-linking counts as piling up.
const ANNOTATIONS_PER_INSTRUMENT: usize = 2;

/// Common tolerance presets tried by the quick search: (vertical,
/// horizontal, autoLinkDistance).
pub const QUICK_PRESETS: [(f64, f64, f64); 4] = [
    (20.0, 20.0, 50.0),
    (10.0, 10.0, 30.0),
    (15.0, 25.0, 40.0),
    (30.0, 30.0, 75.0),
];

const FINE_TUNE_RADIUS: f64 = 5.0;
const FINE_TUNE_STEP: f64 = 1.0;

/// An inclusive range of candidate values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl SearchRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// Every value from `min` to `max` in `step` increments. A non-positive
    /// step or an inverted range yields just `min`.
    pub fn values(&self) -> Vec<f64> {
        if self.step <= 0.0 || self.max < self.min {
            return vec![self.min];
        }
        let count = ((self.max - self.min) / self.step + 1e-9).floor() as usize + 1;
        (0..count).map(|i| self.min + i as f64 * self.step).collect()
    }
}

/// Ranges searched by [`optimize_tolerances`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToleranceSearchSpace {
    pub vertical: SearchRange,
    pub horizontal: SearchRange,
    pub auto_link_distance: SearchRange,
}

impl Default for ToleranceSearchSpace {
    fn default() -> Self {
        Self {
            vertical: SearchRange::new(5.0, 40.0, 5.0),
            horizontal: SearchRange::new(5.0, 40.0, 5.0),
            auto_link_distance: SearchRange::new(20.0, 100.0, 10.0),
        }
    }
}

/// Best tolerances found plus how they scored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToleranceOptimization {
    pub tolerances: ToleranceConfig,
    pub score: f64,
    /// Score of the starting tolerances on the same pages.
    pub baseline_score: f64,
    /// Instrument tags detected with the returned tolerances.
    pub tag_count: usize,
    pub page_tag_counts: BTreeMap<u32, usize>,
    pub pages_tested: Vec<u32>,
    pub evaluations: usize,
    pub improved: bool,
}

impl ToleranceOptimization {
    fn nothing_to_test(initial: &ToleranceConfig) -> Self {
        Self {
            tolerances: *initial,
            score: 0.0,
            baseline_score: 0.0,
            tag_count: 0,
            page_tag_counts: BTreeMap::new(),
            pages_tested: Vec::new(),
            evaluations: 0,
            improved: false,
        }
    }
}

/// Pages to evaluate for a document of `total` pages.
///
/// Short documents use every page. Up to ten pages, the first three are
/// skipped as likely title and legend sheets. Longer documents take three
/// pages spread across the 20–80% range.
pub fn sample_pages(total: u32) -> Vec<u32> {
    match total {
        0 => Vec::new(),
        1..=3 => (1..=total).collect(),
        4..=10 => (4..=total.min(6)).collect(),
        _ => {
            let lo = ((total as f64 * 0.2).ceil() as u32).max(1);
            let hi = (total as f64 * 0.8).floor() as u32;
            let mut pages = vec![lo, (lo + hi) / 2, hi];
            pages.dedup();
            pages
        }
    }
}

/// Detection quality of one extraction run over the sampled pages.
///
/// `ln(n + 1) × 10` for the instrument count, `30 ×` the fraction that look
/// like canonical ISA tags, `5 ×` the pages with any instrument (capped at
/// 20), minus a penalty when the average per page exceeds 100.
pub fn detection_score(extractions: &[PageExtraction]) -> f64 {
    let instruments: Vec<&Tag> = extractions
        .iter()
        .flat_map(|e| e.tags.iter())
        .filter(|t| t.category == Category::Instrument)
        .collect();
    if instruments.is_empty() || extractions.is_empty() {
        return 0.0;
    }

    let n = instruments.len() as f64;
    let canonical = instruments
        .iter()
        .filter(|t| CANONICAL_INSTRUMENT.is_match(&t.text))
        .count() as f64;
    let pages_with_tags = extractions
        .iter()
        .filter(|e| e.tags.iter().any(|t| t.category == Category::Instrument))
        .count() as f64;
    let average = n / extractions.len() as f64;
    let density_penalty = if average > DENSITY_LIMIT {
        (average - DENSITY_LIMIT) * 0.5
    } else {
        0.0
    };

    (n + 1.0).ln() * 10.0 + 30.0 * (canonical / n) + (5.0 * pages_with_tags).min(20.0) - density_penalty
}

/// Reward for auto-linking leftovers to instruments at `distance`, less a
/// penalty for instruments that collect more than a couple of annotations.
fn annotation_score(extractions: &[PageExtraction], distance: f64) -> f64 {
    let mut linked = 0usize;
    let mut per_instrument: HashMap<String, usize> = HashMap::new();
    for e in extractions {
        let outcome = auto_link_annotations(&e.tags, &e.raw_items, &[], distance);
        linked += outcome.relationships.len();
        for r in outcome.relationships {
            *per_instrument.entry(r.from).or_default() += 1;
        }
    }
    let overloaded: usize = per_instrument
        .values()
        .map(|&c| c.saturating_sub(ANNOTATIONS_PER_INSTRUMENT))
        .sum();
    (linked as f64 + 1.0).ln() * 5.0 - 2.0 * overloaded as f64
}

#[derive(Debug, Clone, Default)]
struct Evaluation {
    score: f64,
    tag_count: usize,
    page_tag_counts: BTreeMap<u32, usize>,
}

/// Re-runs extraction over pre-positioned pages.
struct Evaluator<'a> {
    pages: Vec<PreparedPage>,
    patterns: CompiledPatterns,
    app: &'a AppSettings,
    evaluations: usize,
}

impl<'a> Evaluator<'a> {
    fn new(pages: Vec<PreparedPage>, patterns: &PatternConfig, app: &'a AppSettings) -> Self {
        Self {
            pages,
            patterns: CompiledPatterns::compile(patterns, app),
            app,
            evaluations: 0,
        }
    }

    fn page_numbers(&self) -> Vec<u32> {
        self.pages.iter().map(|p| p.page).collect()
    }

    fn evaluate(&mut self, tol: &InstrumentTolerance) -> Evaluation {
        self.evaluations += 1;
        let config = ToleranceConfig { instrument: *tol };
        let extractions: Vec<PageExtraction> = self
            .pages
            .iter()
            .map(|p| extract_prepared(p, &self.patterns, &config, self.app))
            .collect();

        let page_tag_counts: BTreeMap<u32, usize> = extractions
            .iter()
            .map(|e| {
                let n = e.tags.iter().filter(|t| t.category == Category::Instrument).count();
                (e.page, n)
            })
            .collect();
        let tag_count = page_tag_counts.values().sum();
        let score = detection_score(&extractions) + annotation_score(&extractions, tol.auto_link_distance);
        debug!(
            vertical = tol.vertical,
            horizontal = tol.horizontal,
            auto_link_distance = tol.auto_link_distance,
            score,
            tag_count,
            "tolerance evaluated"
        );
        Evaluation {
            score,
            tag_count,
            page_tag_counts,
        }
    }
}

/// Tracks the best candidate seen, starting from the baseline.
struct Best {
    tolerance: InstrumentTolerance,
    evaluation: Evaluation,
    baseline_score: f64,
}

impl Best {
    fn start(tolerance: InstrumentTolerance, evaluation: Evaluation) -> Self {
        let baseline_score = evaluation.score;
        Self {
            tolerance,
            evaluation,
            baseline_score,
        }
    }

    fn offer(&mut self, tolerance: InstrumentTolerance, evaluation: Evaluation) {
        if evaluation.score > self.evaluation.score {
            self.tolerance = tolerance;
            self.evaluation = evaluation;
        }
    }

    fn finish(self, evaluator: &Evaluator<'_>) -> ToleranceOptimization {
        ToleranceOptimization {
            tolerances: ToleranceConfig {
                instrument: self.tolerance,
            },
            score: self.evaluation.score,
            baseline_score: self.baseline_score,
            tag_count: self.evaluation.tag_count,
            page_tag_counts: self.evaluation.page_tag_counts,
            pages_tested: evaluator.page_numbers(),
            evaluations: evaluator.evaluations,
            improved: self.evaluation.score > self.baseline_score,
        }
    }
}

async fn load_pages<S: PageSource + ?Sized>(source: &S, numbers: &[u32]) -> Vec<PreparedPage> {
    let mut pages = Vec::with_capacity(numbers.len());
    for &n in numbers {
        match source.page(n).await {
            Ok(content) => pages.push(PreparedPage::new(&content)),
            Err(e) => warn!(page = n, error = %e, "skipping page that failed to load"),
        }
    }
    pages
}

fn report(progress: &dyn ProgressSink, done: usize, total: usize, tol: &InstrumentTolerance, score: f64) {
    progress.progress(
        done as f64 / total.max(1) as f64 * 100.0,
        &format!(
            "v={} h={} d={} scored {:.1}",
            tol.vertical, tol.horizontal, tol.auto_link_distance, score
        ),
    );
}

/// Coordinate search over the full [`ToleranceSearchSpace`].
///
/// Grid-searches vertical × horizontal with the starting auto-link
/// distance, then sweeps auto-link distance with the best pair. Pages that
/// fail to load are skipped; if none load, the starting tolerances come
/// back with a score of 0.
pub async fn optimize_tolerances<S: PageSource + ?Sized>(
    source: &S,
    patterns: &PatternConfig,
    initial: &ToleranceConfig,
    app: &AppSettings,
    space: &ToleranceSearchSpace,
    progress: &dyn ProgressSink,
) -> ToleranceOptimization {
    let pages = load_pages(source, &sample_pages(source.page_count())).await;
    if pages.is_empty() {
        return ToleranceOptimization::nothing_to_test(initial);
    }

    let mut evaluator = Evaluator::new(pages, patterns, app);
    let start = initial.instrument;
    let mut best = Best::start(start, evaluator.evaluate(&start));

    let verticals = space.vertical.values();
    let horizontals = space.horizontal.values();
    let distances = space.auto_link_distance.values();
    let total = verticals.len() * horizontals.len() + distances.len();
    let mut done = 0;

    for &vertical in &verticals {
        for &horizontal in &horizontals {
            let candidate = InstrumentTolerance {
                vertical,
                horizontal,
                auto_link_distance: start.auto_link_distance,
            };
            let eval = evaluator.evaluate(&candidate);
            done += 1;
            report(progress, done, total, &candidate, eval.score);
            best.offer(candidate, eval);
        }
    }

    let pair = best.tolerance;
    for &auto_link_distance in &distances {
        let candidate = InstrumentTolerance {
            auto_link_distance,
            ..pair
        };
        let eval = evaluator.evaluate(&candidate);
        done += 1;
        report(progress, done, total, &candidate, eval.score);
        best.offer(candidate, eval);
    }

    best.finish(&evaluator)
}

/// Two-phase search on one representative page: the best of
/// [`QUICK_PRESETS`], then ±5 px fine tuning of vertical and horizontal.
pub async fn quick_optimize_tolerances<S: PageSource + ?Sized>(
    source: &S,
    patterns: &PatternConfig,
    initial: &ToleranceConfig,
    app: &AppSettings,
    progress: &dyn ProgressSink,
) -> ToleranceOptimization {
    let sample = sample_pages(source.page_count());
    let Some(&representative) = sample.get(sample.len() / 2) else {
        return ToleranceOptimization::nothing_to_test(initial);
    };
    let pages = load_pages(source, &[representative]).await;
    if pages.is_empty() {
        return ToleranceOptimization::nothing_to_test(initial);
    }

    let mut evaluator = Evaluator::new(pages, patterns, app);
    let start = initial.instrument;
    let mut best = Best::start(start, evaluator.evaluate(&start));

    let fine_steps = (2.0 * FINE_TUNE_RADIUS / FINE_TUNE_STEP) as usize + 1;
    let total = QUICK_PRESETS.len() + 2 * fine_steps;
    let mut done = 0;

    for (vertical, horizontal, auto_link_distance) in QUICK_PRESETS {
        let candidate = InstrumentTolerance {
            vertical,
            horizontal,
            auto_link_distance,
        };
        let eval = evaluator.evaluate(&candidate);
        done += 1;
        report(progress, done, total, &candidate, eval.score);
        best.offer(candidate, eval);
    }

    let anchor = best.tolerance;
    let around = |center: f64| {
        SearchRange::new(
            (center - FINE_TUNE_RADIUS).max(0.0),
            center + FINE_TUNE_RADIUS,
            FINE_TUNE_STEP,
        )
        .values()
    };

    for vertical in around(anchor.vertical) {
        let candidate = InstrumentTolerance { vertical, ..anchor };
        let eval = evaluator.evaluate(&candidate);
        done += 1;
        report(progress, done, total, &candidate, eval.score);
        best.offer(candidate, eval);
    }

    let anchor = best.tolerance;
    for horizontal in around(anchor.horizontal) {
        let candidate = InstrumentTolerance { horizontal, ..anchor };
        let eval = evaluator.evaluate(&candidate);
        done += 1;
        report(progress, done, total, &candidate, eval.score);
        best.offer(candidate, eval);
    }

    best.finish(&evaluator)
}
