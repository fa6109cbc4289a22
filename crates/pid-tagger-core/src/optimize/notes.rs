//! Note-connection calibration and the production note linker.
//!
//! The optimizer sizes each NotesAndHolds tag's search radius as a multiple
//! of that tag's own diagonal and assigns notes to instruments 1:1, globally
//! nearest pair first. It only calibrates the multiplier.
//!
//! [`create_optimized_note_connections`] is what actually creates Note
//! relationships. It anchors the radius on the *instrument* instead
//! (diagonal × [`PRODUCTION_MULTIPLIER`]) and picks, per instrument, the
//! closest note rectangle the circle touches.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::models::{Category, Relationship, RelationshipType, Tag};
use crate::progress::ProgressSink;
use crate::relationships::RelationshipIndex;

pub const FULL_MULTIPLIERS: [f64; 6] = [3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
pub const QUICK_MULTIPLIERS: [f64; 3] = [4.0, 5.0, 6.0];

/// Instrument diagonal multiple used when creating Note relationships.
pub const PRODUCTION_MULTIPLIER: f64 = 3.0;

/// Flat reward for a strictly one-to-one assignment.
const ONE_TO_ONE_BONUS: f64 = 10.0;

/// One proposed note → instrument assignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteConnection {
    pub note_id: String,
    pub instrument_id: String,
    pub page: u32,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteConnectionOptimization {
    pub multiplier: f64,
    pub score: f64,
    pub connections: Vec<NoteConnection>,
    pub note_count: usize,
    pub instrument_count: usize,
    pub pages: usize,
    pub evaluations: usize,
}

/// Assign notes to instruments for one multiplier.
///
/// Each note may reach instruments on its page within
/// `note.diagonal × multiplier` (center to center). Candidate pairs are
/// taken shortest first; a pair is kept only while both ends are free.
pub fn connect_notes(tags: &[Tag], multiplier: f64) -> Vec<NoteConnection> {
    let mut instruments_by_page: HashMap<u32, Vec<&Tag>> = HashMap::new();
    for t in tags.iter().filter(|t| t.category == Category::Instrument) {
        instruments_by_page.entry(t.page).or_default().push(t);
    }

    let mut candidates: Vec<(&Tag, &Tag, f64)> = Vec::new();
    for note in tags.iter().filter(|t| t.category == Category::NotesAndHolds) {
        let Some(instruments) = instruments_by_page.get(&note.page) else {
            continue;
        };
        let radius = note.bbox.diagonal() * multiplier;
        for &inst in instruments {
            let d = note.bbox.center_distance(&inst.bbox);
            if d <= radius {
                candidates.push((note, inst, d));
            }
        }
    }
    candidates.sort_by(|a, b| {
        a.2.total_cmp(&b.2)
            .then_with(|| a.0.id.cmp(&b.0.id))
            .then_with(|| a.1.id.cmp(&b.1.id))
    });

    let mut used_notes = HashSet::new();
    let mut used_instruments = HashSet::new();
    let mut out = Vec::new();
    for (note, inst, distance) in candidates {
        if used_notes.contains(&note.id) || used_instruments.contains(&inst.id) {
            continue;
        }
        used_notes.insert(&note.id);
        used_instruments.insert(&inst.id);
        out.push(NoteConnection {
            note_id: note.id.clone(),
            instrument_id: inst.id.clone(),
            page: note.page,
            distance,
        });
    }
    out
}

/// Quality of a set of note connections.
///
/// Rewards volume (log-scaled), closeness (inverse mean distance), note
/// coverage and page spread, plus a flat bonus because [`connect_notes`]
/// always yields a 1:1 mapping.
pub fn note_connection_score(connections: &[NoteConnection], note_count: usize) -> f64 {
    if connections.is_empty() || note_count == 0 {
        return 0.0;
    }
    let n = connections.len() as f64;
    let mean_distance = connections.iter().map(|c| c.distance).sum::<f64>() / n;
    let coverage = n / note_count as f64;
    let pages = connections.iter().map(|c| c.page).collect::<BTreeSet<_>>().len() as f64;

    (n + 1.0).ln() * 10.0
        + 20.0 / (1.0 + mean_distance / 50.0)
        + 30.0 * coverage
        + (5.0 * pages).min(20.0)
        + ONE_TO_ONE_BONUS
}

/// Try every multiplier in [`FULL_MULTIPLIERS`] and keep the best.
pub fn optimize_note_connections(tags: &[Tag], progress: &dyn ProgressSink) -> NoteConnectionOptimization {
    search(tags, &FULL_MULTIPLIERS, progress)
}

/// Same search over the narrower [`QUICK_MULTIPLIERS`].
pub fn quick_optimize_note_connections(tags: &[Tag], progress: &dyn ProgressSink) -> NoteConnectionOptimization {
    search(tags, &QUICK_MULTIPLIERS, progress)
}

fn search(tags: &[Tag], multipliers: &[f64], progress: &dyn ProgressSink) -> NoteConnectionOptimization {
    let note_count = tags.iter().filter(|t| t.category == Category::NotesAndHolds).count();
    let instrument_count = tags.iter().filter(|t| t.category == Category::Instrument).count();

    let mut best = NoteConnectionOptimization {
        multiplier: multipliers.first().copied().unwrap_or(PRODUCTION_MULTIPLIER),
        score: 0.0,
        connections: Vec::new(),
        note_count,
        instrument_count,
        pages: 0,
        evaluations: 0,
    };
    if note_count == 0 || instrument_count == 0 {
        progress.progress(100.0, "no notes or instruments to connect");
        return best;
    }

    for (i, &multiplier) in multipliers.iter().enumerate() {
        let connections = connect_notes(tags, multiplier);
        let score = note_connection_score(&connections, note_count);
        best.evaluations += 1;
        debug!(multiplier, score, connections = connections.len(), "note multiplier evaluated");
        if score > best.score {
            best.multiplier = multiplier;
            best.score = score;
            best.pages = connections.iter().map(|c| c.page).collect::<BTreeSet<_>>().len();
            best.connections = connections;
        }
        progress.progress(
            (i + 1) as f64 / multipliers.len() as f64 * 100.0,
            &format!("multiplier {} scored {:.1}", multiplier, score),
        );
    }
    best
}

/// Create Note relationships: each instrument links to the nearest
/// NotesAndHolds tag on its page whose rectangle intersects the circle of
/// radius `instrument.diagonal × 3` around the instrument's center.
pub fn create_optimized_note_connections(tags: &[Tag], existing: &[Relationship]) -> Vec<Relationship> {
    let mut notes_by_page: HashMap<u32, Vec<&Tag>> = HashMap::new();
    for t in tags.iter().filter(|t| t.category == Category::NotesAndHolds) {
        notes_by_page.entry(t.page).or_default().push(t);
    }

    let mut index = RelationshipIndex::new(existing);
    let mut out = Vec::new();
    for inst in tags.iter().filter(|t| t.category == Category::Instrument) {
        let Some(notes) = notes_by_page.get(&inst.page) else {
            continue;
        };
        let (cx, cy) = inst.bbox.center();
        let radius = inst.bbox.diagonal() * PRODUCTION_MULTIPLIER;
        let closest = notes
            .iter()
            .filter(|n| n.bbox.intersects_circle(cx, cy, radius))
            .map(|n| (n, n.bbox.distance_to_point(cx, cy)))
            .min_by(|a, b| {
                a.1.total_cmp(&b.1)
                    .then_with(|| a.0.bbox.center_distance(&inst.bbox).total_cmp(&b.0.bbox.center_distance(&inst.bbox)))
            });
        if let Some((note, _)) = closest {
            out.extend(index.insert(&inst.id, &note.id, RelationshipType::Note));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;
    use crate::progress::Silent;

    fn tag(text: &str, category: Category, page: u32, x: f64, y: f64, w: f64, h: f64) -> Tag {
        Tag::new(text, page, BoundingBox::new(x, y, x + w, y + h), category)
    }

    #[test]
    fn assignment_is_one_to_one_nearest_first() {
        // Two notes compete for one instrument; the closer note wins and the
        // other stays unassigned.
        let inst = tag("PT-101", Category::Instrument, 1, 100.0, 100.0, 30.0, 20.0);
        let near = tag("NOTE 1", Category::NotesAndHolds, 1, 140.0, 100.0, 30.0, 10.0);
        let far = tag("NOTE 2", Category::NotesAndHolds, 1, 180.0, 100.0, 30.0, 10.0);
        let conns = connect_notes(&[inst.clone(), near.clone(), far], 8.0);
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].note_id, near.id);
        assert_eq!(conns[0].instrument_id, inst.id);
    }

    #[test]
    fn notes_do_not_cross_pages() {
        let inst = tag("PT-101", Category::Instrument, 1, 100.0, 100.0, 30.0, 20.0);
        let note = tag("NOTE 1", Category::NotesAndHolds, 2, 110.0, 100.0, 30.0, 10.0);
        assert!(connect_notes(&[inst, note], 8.0).is_empty());
    }

    #[test]
    fn larger_multiplier_reaches_further() {
        let inst = tag("PT-101", Category::Instrument, 1, 100.0, 100.0, 30.0, 20.0);
        // Note diagonal ≈ 31.6, center distance 120.
        let note = tag("NOTE 1", Category::NotesAndHolds, 1, 220.0, 105.0, 30.0, 10.0);
        let tags = [inst, note];
        assert!(connect_notes(&tags, 3.0).is_empty());
        assert_eq!(connect_notes(&tags, 4.0).len(), 1);

        let result = optimize_note_connections(&tags, &Silent);
        assert_eq!(result.evaluations, FULL_MULTIPLIERS.len());
        assert_eq!(result.multiplier, 4.0);
        assert_eq!(result.connections.len(), 1);
        assert!(result.score > 0.0);
    }

    #[test]
    fn empty_inputs_score_zero() {
        let inst = tag("PT-101", Category::Instrument, 1, 100.0, 100.0, 30.0, 20.0);
        let result = quick_optimize_note_connections(&[inst], &Silent);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.evaluations, 0);
        assert_eq!(note_connection_score(&[], 3), 0.0);
    }

    #[test]
    fn production_linker_uses_instrument_radius() {
        // Instrument diagonal 50 → radius 150. The closer note wins.
        let inst = tag("FT-200", Category::Instrument, 1, 100.0, 100.0, 40.0, 30.0);
        let near = tag("NOTE 1", Category::NotesAndHolds, 1, 200.0, 100.0, 40.0, 10.0);
        let nearer = tag("HOLD 1", Category::NotesAndHolds, 1, 150.0, 150.0, 40.0, 10.0);
        let out_of_reach = tag("NOTE 2", Category::NotesAndHolds, 1, 400.0, 100.0, 40.0, 10.0);
        let tags = [inst.clone(), near, nearer.clone(), out_of_reach];

        let rels = create_optimized_note_connections(&tags, &[]);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].from, inst.id);
        assert_eq!(rels[0].to, nearer.id);
        assert_eq!(rels[0].kind, RelationshipType::Note);
        assert!(create_optimized_note_connections(&tags, &rels).is_empty());
    }
}
