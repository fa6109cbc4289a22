//! Relationship graph construction.
//!
//! Every function here takes the existing relationships as a read-only slice
//! and returns only the relationships it would add. Duplicates are filtered
//! by the `from-to-type` key, both against the existing set and within the
//! returned delta, so calling any of them twice adds nothing the second
//! time.
//!
//! | Type         | From                | To                 |
//! |--------------|---------------------|--------------------|
//! | Connection   | tag                 | next selected tag  |
//! | Installation | instrument          | base tag           |
//! | Annotation   | tag                 | raw text item      |
//! | Note         | instrument          | NotesAndHolds tag  |
//! | Description  | NotesAndHolds tag   | description        |

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::models::{
    relationship_key, Category, Description, DescriptionScope, DescriptionType, EntityKind,
    EntityRef, RawTextItem, Relationship, RelationshipType, Tag,
};
use crate::optimize::notes::create_optimized_note_connections;

static INTEGER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Keys of relationships already present, plus anything added through it.
#[derive(Debug, Default)]
pub struct RelationshipIndex {
    keys: HashSet<String>,
}

impl RelationshipIndex {
    pub fn new(existing: &[Relationship]) -> Self {
        Self {
            keys: existing.iter().map(Relationship::key).collect(),
        }
    }

    pub fn contains(&self, from: &str, to: &str, kind: RelationshipType) -> bool {
        self.keys.contains(&relationship_key(from, to, kind))
    }

    /// Record the edge and return it, or `None` if it is already known.
    pub fn insert(&mut self, from: &str, to: &str, kind: RelationshipType) -> Option<Relationship> {
        if from == to {
            return None;
        }
        if self.keys.insert(relationship_key(from, to, kind)) {
            Some(Relationship::new(from, to, kind))
        } else {
            None
        }
    }
}

/// Result of a linking action that may have nothing to work on.
///
/// When an input the action depends on is missing (no notes, no
/// descriptions, no raw items) `message` explains why nothing was added.
#[derive(Debug, Clone, Default)]
pub struct LinkOutcome {
    pub relationships: Vec<Relationship>,
    pub message: Option<String>,
}

impl LinkOutcome {
    fn added(relationships: Vec<Relationship>) -> Self {
        Self {
            relationships,
            message: None,
        }
    }

    fn nothing(message: impl Into<String>) -> Self {
        Self {
            relationships: Vec::new(),
            message: Some(message.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }
}

/// Chain the selection in order: A→B, B→C, …
pub fn create_connections(ordered: &[&Tag], existing: &[Relationship]) -> Vec<Relationship> {
    let mut index = RelationshipIndex::new(existing);
    ordered
        .windows(2)
        .filter_map(|pair| index.insert(&pair[0].id, &pair[1].id, RelationshipType::Connection))
        .collect()
}

/// Attach instruments to the line or equipment they are installed on.
///
/// Equipment has no category of its own, so the base is a Line or an
/// Uncategorized tag; any other base creates nothing. Non-instrument tags
/// in `instruments` are ignored.
pub fn create_installation(instruments: &[&Tag], base: &Tag, existing: &[Relationship]) -> Vec<Relationship> {
    if !matches!(base.category, Category::Line | Category::Uncategorized) {
        debug!(base = %base.text, category = base.category.as_str(), "installation base must be a line or equipment");
        return Vec::new();
    }
    let mut index = RelationshipIndex::new(existing);
    instruments
        .iter()
        .filter(|t| t.category == Category::Instrument)
        .filter_map(|t| index.insert(&t.id, &base.id, RelationshipType::Installation))
        .collect()
}

/// Manual annotation: a tag gets one link per selected raw text item.
pub fn create_annotations(from: EntityRef<'_>, targets: &[EntityRef<'_>], existing: &[Relationship]) -> LinkOutcome {
    let Some(tag) = from.as_tag() else {
        return LinkOutcome::nothing("annotations must start from a tag");
    };
    let mut index = RelationshipIndex::new(existing);
    let added: Vec<Relationship> = targets
        .iter()
        .filter(|t| t.kind() == EntityKind::RawTextItem)
        .filter_map(|t| index.insert(&tag.id, t.id(), RelationshipType::Annotation))
        .collect();
    if added.is_empty() && !targets.iter().any(|t| t.kind() == EntityKind::RawTextItem) {
        return LinkOutcome::nothing("select at least one raw text item to annotate");
    }
    LinkOutcome::added(added)
}

/// Link each raw text item to its nearest instrument on the same page.
///
/// Distance is the corner-and-center minimum between the two boxes and must
/// not exceed `max_distance`. Items already annotated are left alone, so
/// each raw item ends up with at most one annotation.
pub fn auto_link_annotations(
    tags: &[Tag],
    raw_items: &[RawTextItem],
    existing: &[Relationship],
    max_distance: f64,
) -> LinkOutcome {
    let mut by_page: HashMap<u32, Vec<&Tag>> = HashMap::new();
    for tag in tags.iter().filter(|t| t.category == Category::Instrument) {
        by_page.entry(tag.page).or_default().push(tag);
    }
    if by_page.is_empty() {
        return LinkOutcome::nothing("no instrument tags to link annotations to");
    }
    if raw_items.is_empty() {
        return LinkOutcome::nothing("no raw text items to link");
    }

    let annotated: HashSet<&str> = existing
        .iter()
        .filter(|r| r.kind == RelationshipType::Annotation)
        .map(|r| r.to.as_str())
        .collect();
    let mut index = RelationshipIndex::new(existing);
    let mut added = Vec::new();

    for item in raw_items.iter().filter(|i| !annotated.contains(i.id.as_str())) {
        let Some(candidates) = by_page.get(&item.page) else {
            continue;
        };
        let nearest = candidates
            .iter()
            .map(|t| (t, t.bbox.corner_center_distance(&item.bbox)))
            .filter(|(_, d)| *d <= max_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((tag, _)) = nearest {
            added.extend(index.insert(&tag.id, &item.id, RelationshipType::Annotation));
        }
    }
    debug!(linked = added.len(), max_distance, "auto-linked annotations");
    LinkOutcome::added(added)
}

/// Connect each instrument to the closest NotesAndHolds tag its search
/// circle reaches.
pub fn link_notes_to_instruments(tags: &[Tag], existing: &[Relationship]) -> LinkOutcome {
    if !tags.iter().any(|t| t.category == Category::NotesAndHolds) {
        return LinkOutcome::nothing("no note or hold tags to connect");
    }
    LinkOutcome::added(create_optimized_note_connections(tags, existing))
}

/// Link NotesAndHolds tags to the specific descriptions they cite.
///
/// `NOTE 2, 3` on page 4 links to the Specific Note descriptions numbered 2
/// and 3 on page 4.
pub fn link_notes_to_descriptions(
    tags: &[Tag],
    descriptions: &[Description],
    existing: &[Relationship],
) -> LinkOutcome {
    if descriptions.is_empty() {
        return LinkOutcome::nothing("no descriptions found; detect or create descriptions first");
    }
    let mut index = RelationshipIndex::new(existing);
    let mut added = Vec::new();

    for tag in tags.iter().filter(|t| t.category == Category::NotesAndHolds) {
        let numbers: HashSet<u32> = INTEGER
            .find_iter(&tag.text)
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        let kind = DescriptionType::for_tag_text(&tag.text);
        for desc in descriptions.iter().filter(|d| {
            d.page == tag.page
                && d.metadata.kind == kind
                && d.metadata.scope == DescriptionScope::Specific
                && numbers.contains(&d.metadata.number)
        }) {
            added.extend(index.insert(&tag.id, &desc.id, RelationshipType::Description));
        }
    }
    LinkOutcome::added(added)
}

/// Relationships that survive deleting the given entities.
pub fn remove_relationships_for(relationships: &[Relationship], removed: &HashSet<&str>) -> Vec<Relationship> {
    relationships
        .iter()
        .filter(|r| !removed.contains(r.from.as_str()) && !removed.contains(r.to.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, DescriptionMetadata};

    fn tag(text: &str, category: Category, x: f64, y: f64) -> Tag {
        Tag::new(text, 1, BoundingBox::new(x, y, x + 40.0, y + 12.0), category)
    }

    fn description(number: u32, kind: DescriptionType, scope: DescriptionScope) -> Description {
        Description {
            id: crate::models::new_id(),
            text: format!("body {}", number),
            page: 1,
            bbox: BoundingBox::new(700.0, 100.0, 900.0, 120.0),
            source_items: Vec::new(),
            metadata: DescriptionMetadata { kind, scope, number },
        }
    }

    #[test]
    fn connections_chain_in_selection_order() {
        let a = tag("A", Category::Line, 0.0, 0.0);
        let b = tag("B", Category::Line, 100.0, 0.0);
        let c = tag("C", Category::Line, 200.0, 0.0);
        let rels = create_connections(&[&a, &b, &c], &[]);
        assert_eq!(rels.len(), 2);
        assert_eq!((rels[0].from.as_str(), rels[0].to.as_str()), (a.id.as_str(), b.id.as_str()));
        assert_eq!((rels[1].from.as_str(), rels[1].to.as_str()), (b.id.as_str(), c.id.as_str()));
    }

    #[test]
    fn creating_twice_adds_nothing() {
        let a = tag("A", Category::Line, 0.0, 0.0);
        let b = tag("B", Category::Line, 100.0, 0.0);
        let mut all = create_connections(&[&a, &b], &[]);
        let again = create_connections(&[&a, &b], &all);
        assert!(again.is_empty());

        let pt = tag("PT-101", Category::Instrument, 0.0, 30.0);
        all.extend(create_installation(&[&pt, &pt], &a, &all));
        assert_eq!(all.len(), 2);
        assert!(create_installation(&[&pt], &a, &all).is_empty());
    }

    #[test]
    fn installation_ignores_non_instruments() {
        let line = tag("2\"-P-1001", Category::Line, 0.0, 0.0);
        let other = tag("4\"-P-1002", Category::Line, 0.0, 50.0);
        assert!(create_installation(&[&other], &line, &[]).is_empty());
    }

    #[test]
    fn installation_needs_line_or_equipment_base() {
        let pt = tag("PT-101", Category::Instrument, 0.0, 30.0);
        let fic = tag("FIC-200", Category::Instrument, 0.0, 60.0);
        let note = tag("NOTE 1", Category::NotesAndHolds, 0.0, 90.0);
        assert!(create_installation(&[&pt], &fic, &[]).is_empty());
        assert!(create_installation(&[&pt], &note, &[]).is_empty());

        let pump = tag("P-100A", Category::Uncategorized, 0.0, 120.0);
        let rels = create_installation(&[&pt], &pump, &[]);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].to, pump.id);
    }

    #[test]
    fn manual_annotation_requires_tag_source() {
        let item = RawTextItem::new("LOCKED OPEN", 1, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let out = create_annotations(EntityRef::RawTextItem(&item), &[EntityRef::RawTextItem(&item)], &[]);
        assert!(out.is_empty());
        assert!(out.message.is_some());

        let pt = tag("PT-101", Category::Instrument, 0.0, 30.0);
        let out = create_annotations(EntityRef::Tag(&pt), &[EntityRef::RawTextItem(&item)], &[]);
        assert_eq!(out.relationships.len(), 1);
        assert_eq!(out.relationships[0].kind, RelationshipType::Annotation);
    }

    #[test]
    fn auto_link_picks_nearest_instrument_within_distance() {
        let near = tag("PT-101", Category::Instrument, 100.0, 100.0);
        let far = tag("PT-102", Category::Instrument, 300.0, 100.0);
        let item = RawTextItem::new("FAIL OPEN", 1, BoundingBox::new(150.0, 100.0, 190.0, 110.0));
        let distant = RawTextItem::new("ISOLATED", 1, BoundingBox::new(600.0, 600.0, 650.0, 610.0));

        let out = auto_link_annotations(&[near.clone(), far], &[item.clone(), distant], &[], 50.0);
        assert_eq!(out.relationships.len(), 1);
        assert_eq!(out.relationships[0].from, near.id);
        assert_eq!(out.relationships[0].to, item.id);

        let again = auto_link_annotations(&[near], &[item], &out.relationships, 50.0);
        assert!(again.is_empty());
    }

    #[test]
    fn auto_link_reports_missing_inputs() {
        let out = auto_link_annotations(&[], &[], &[], 50.0);
        assert!(out.message.unwrap().contains("instrument"));
    }

    #[test]
    fn note_tags_link_to_cited_specific_descriptions() {
        let note = tag("NOTE 2, 3", Category::NotesAndHolds, 100.0, 100.0);
        let hold = tag("HOLD 2", Category::NotesAndHolds, 100.0, 200.0);
        let d2 = description(2, DescriptionType::Note, DescriptionScope::Specific);
        let d3 = description(3, DescriptionType::Note, DescriptionScope::Specific);
        let d4 = description(4, DescriptionType::Note, DescriptionScope::Specific);
        let general = description(2, DescriptionType::Note, DescriptionScope::General);
        let h2 = description(2, DescriptionType::Hold, DescriptionScope::Specific);

        let out = link_notes_to_descriptions(
            &[note.clone(), hold.clone()],
            &[d2.clone(), d3.clone(), d4, general, h2.clone()],
            &[],
        );
        let pairs: HashSet<(String, String)> = out
            .relationships
            .iter()
            .map(|r| (r.from.clone(), r.to.clone()))
            .collect();
        assert_eq!(pairs.len(), 3);
        assert!(pairs.contains(&(note.id.clone(), d2.id)));
        assert!(pairs.contains(&(note.id, d3.id)));
        assert!(pairs.contains(&(hold.id, h2.id)));
    }

    #[test]
    fn linking_descriptions_without_any_is_a_no_op() {
        let note = tag("NOTE 1", Category::NotesAndHolds, 100.0, 100.0);
        let out = link_notes_to_descriptions(&[note], &[], &[]);
        assert!(out.is_empty());
        assert!(out.message.is_some());
    }

    #[test]
    fn removal_drops_incident_edges_only() {
        let rels = vec![
            Relationship::new("a", "b", RelationshipType::Connection),
            Relationship::new("b", "c", RelationshipType::Connection),
            Relationship::new("c", "d", RelationshipType::Connection),
        ];
        let removed: HashSet<&str> = ["b"].into_iter().collect();
        let kept = remove_relationships_for(&rels, &removed);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].from, "c");
    }
}
