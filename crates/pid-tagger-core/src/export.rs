//! Instrument list rows for spreadsheet export.
//!
//! One row per Instrument tag, ordered by page and then reading order. The
//! application decides the file format; this module only assembles values.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::loops::parse_instrument_tag;
use crate::models::{Category, RelationshipType, Tag};
use crate::project::Project;

/// Instrument and I/O type for a function-code prefix.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InstrumentTypeEntry {
    #[serde(default)]
    pub instrument_type: String,
    #[serde(default)]
    pub io_type: String,
}

/// Function-code prefix → type lookup, e.g. `PT` → pressure transmitter, AI.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentTypeTable {
    entries: BTreeMap<String, InstrumentTypeEntry>,
}

impl InstrumentTypeTable {
    pub fn new(entries: BTreeMap<String, InstrumentTypeEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.to_ascii_uppercase(), v))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for the longest prefix of `function` present in the table.
    pub fn lookup(&self, function: &str) -> Option<&InstrumentTypeEntry> {
        let function = function.to_ascii_uppercase();
        (1..=function.len())
            .rev()
            .filter_map(|n| function.get(..n))
            .find_map(|prefix| self.entries.get(prefix))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentRow {
    pub sequence: usize,
    pub page: u32,
    pub drawing_number: String,
    pub loop_number: String,
    pub tag: String,
    pub line: String,
    pub instrument_type: String,
    pub io_type: String,
    pub notes: String,
}

/// Build the instrument list for a project.
pub fn instrument_rows(project: &Project, types: &InstrumentTypeTable) -> Vec<InstrumentRow> {
    let mut drawing_numbers: HashMap<u32, &str> = HashMap::new();
    let mut lines: HashMap<u32, Vec<&Tag>> = HashMap::new();
    let mut by_id: HashMap<&str, &Tag> = HashMap::new();
    for t in &project.tags {
        by_id.insert(&t.id, t);
        match t.category {
            Category::DrawingNumber => {
                drawing_numbers.entry(t.page).or_insert(&t.text);
            }
            Category::Line => lines.entry(t.page).or_default().push(t),
            _ => {}
        }
    }
    let loop_of: HashMap<&str, &str> = project
        .loops
        .iter()
        .flat_map(|l| l.tag_ids.iter().map(move |id| (id.as_str(), l.id.as_str())))
        .collect();

    let mut instruments: Vec<&Tag> = project
        .tags
        .iter()
        .filter(|t| t.category == Category::Instrument)
        .collect();
    instruments.sort_by(|a, b| {
        a.page
            .cmp(&b.page)
            .then(a.bbox.y1.total_cmp(&b.bbox.y1))
            .then(a.bbox.x1.total_cmp(&b.bbox.x1))
    });

    instruments
        .into_iter()
        .enumerate()
        .map(|(i, tag)| {
            let parts = parse_instrument_tag(&tag.text);
            let loop_number = loop_of
                .get(tag.id.as_str())
                .map(|s| s.to_string())
                .or_else(|| {
                    parts.as_ref().and_then(|p| {
                        p.function.chars().next().map(|c| format!("{}-{}", c, p.number))
                    })
                })
                .unwrap_or_default();
            let line = lines
                .get(&tag.page)
                .and_then(|ls| {
                    ls.iter()
                        .min_by(|a, b| a.bbox.center_distance(&tag.bbox).total_cmp(&b.bbox.center_distance(&tag.bbox)))
                })
                .map(|l| l.text.clone())
                .unwrap_or_default();
            let entry = parts.as_ref().and_then(|p| types.lookup(&p.function));

            InstrumentRow {
                sequence: i + 1,
                page: tag.page,
                drawing_number: drawing_numbers.get(&tag.page).map(|s| s.to_string()).unwrap_or_default(),
                loop_number,
                tag: tag.text.clone(),
                line,
                instrument_type: entry.map(|e| e.instrument_type.clone()).unwrap_or_default(),
                io_type: entry.map(|e| e.io_type.clone()).unwrap_or_default(),
                notes: connected_notes(project, tag, &by_id),
            }
        })
        .collect()
}

/// Text of every note tag linked to the instrument, each followed by the
/// bodies of the descriptions that note cites.
fn connected_notes(project: &Project, instrument: &Tag, by_id: &HashMap<&str, &Tag>) -> String {
    let mut parts = Vec::new();
    for rel in project
        .relationships
        .iter()
        .filter(|r| r.kind == RelationshipType::Note && r.from == instrument.id)
    {
        let Some(note) = by_id.get(rel.to.as_str()) else {
            continue;
        };
        let bodies: Vec<&str> = project
            .relationships
            .iter()
            .filter(|r| r.kind == RelationshipType::Description && r.from == note.id)
            .filter_map(|r| project.descriptions.iter().find(|d| d.id == r.to))
            .map(|d| d.text.as_str())
            .collect();
        if bodies.is_empty() {
            parts.push(note.text.clone());
        } else {
            parts.push(format!("{}: {}", note.text, bodies.join(" ")));
        }
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BoundingBox, Description, DescriptionMetadata, DescriptionScope, DescriptionType, Relationship,
    };
    use crate::settings::ProjectSettings;

    fn tag(text: &str, category: Category, page: u32, x: f64, y: f64) -> Tag {
        Tag::new(text, page, BoundingBox::new(x, y, x + 30.0, y + 12.0), category)
    }

    fn table() -> InstrumentTypeTable {
        let mut entries = BTreeMap::new();
        entries.insert(
            "P".to_string(),
            InstrumentTypeEntry {
                instrument_type: "Pressure".into(),
                io_type: "AI".into(),
            },
        );
        entries.insert(
            "PSV".to_string(),
            InstrumentTypeEntry {
                instrument_type: "Safety valve".into(),
                io_type: String::new(),
            },
        );
        InstrumentTypeTable::new(entries)
    }

    #[test]
    fn longest_prefix_wins() {
        let t = table();
        assert_eq!(t.lookup("PSV").unwrap().instrument_type, "Safety valve");
        assert_eq!(t.lookup("PT").unwrap().instrument_type, "Pressure");
        assert!(t.lookup("FT").is_none());
    }

    #[test]
    fn rows_carry_context_in_reading_order() {
        let mut p = Project::new("x.pdf", ProjectSettings::default());
        let lower = tag("PT-102", Category::Instrument, 1, 100.0, 300.0);
        let upper = tag("PT-101", Category::Instrument, 1, 100.0, 100.0);
        let second_page = tag("PSV-200", Category::Instrument, 2, 50.0, 50.0);
        let near_line = tag("2\"-P-1001", Category::Line, 1, 150.0, 110.0);
        let far_line = tag("6\"-P-2000", Category::Line, 1, 700.0, 700.0);
        let drawing = tag("12345A-PID-001", Category::DrawingNumber, 1, 900.0, 780.0);
        let note = tag("NOTE 2", Category::NotesAndHolds, 1, 140.0, 90.0);
        let body = Description {
            id: "d2".into(),
            text: "Locked open".into(),
            page: 1,
            bbox: BoundingBox::new(700.0, 100.0, 900.0, 120.0),
            source_items: Vec::new(),
            metadata: DescriptionMetadata {
                kind: DescriptionType::Note,
                scope: DescriptionScope::Specific,
                number: 2,
            },
        };
        p.relationships = vec![
            Relationship::new(upper.id.clone(), note.id.clone(), RelationshipType::Note),
            Relationship::new(note.id.clone(), "d2", RelationshipType::Description),
        ];
        p.tags = vec![lower, upper, second_page, near_line, far_line, drawing, note];
        p.descriptions = vec![body];

        let rows = instrument_rows(&p, &table());
        let tags: Vec<&str> = rows.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, vec!["PT-101", "PT-102", "PSV-200"]);
        assert_eq!(rows[0].sequence, 1);
        assert_eq!(rows[0].drawing_number, "12345A-PID-001");
        assert_eq!(rows[0].loop_number, "P-101");
        assert_eq!(rows[0].line, "2\"-P-1001");
        assert_eq!(rows[0].io_type, "AI");
        assert_eq!(rows[0].notes, "NOTE 2: Locked open");
        assert_eq!(rows[1].notes, "");
        assert_eq!(rows[2].drawing_number, "");
        assert_eq!(rows[2].line, "");
        assert_eq!(rows[2].instrument_type, "Safety valve");
    }
}
