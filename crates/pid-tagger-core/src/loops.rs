//! Control-loop grouping for instrument tags.
//!
//! Instruments belong to the same loop when their function codes share a
//! first letter and their loop numbers match: `TT-205`, `TIC-205` and
//! `TV-205A` all land in loop `T-205`. The loop id uses the longest
//! function-code prefix the members share.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::error::LoopError;
use crate::models::{Category, Loop, Tag};

static INSTRUMENT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z]{1,4})[-\s]?(\d+)\s*([A-Z]*)$").unwrap());

/// An instrument tag split into its ISA parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentTagParts {
    pub function: String,
    pub number: String,
    pub suffix: String,
}

/// Parse `TIC-205A`, `TIC205A` or `TIC 205` into its parts.
pub fn parse_instrument_tag(text: &str) -> Option<InstrumentTagParts> {
    let upper = text.trim().to_ascii_uppercase();
    let caps = INSTRUMENT_TAG.captures(&upper)?;
    Some(InstrumentTagParts {
        function: caps[1].to_string(),
        number: caps[2].to_string(),
        suffix: caps[3].to_string(),
    })
}

/// Longest prefix shared by every function code, at least one letter.
fn common_function_prefix(functions: &[&str]) -> String {
    let Some(first) = functions.first() else {
        return String::new();
    };
    let mut len = first.len();
    for f in &functions[1..] {
        len = len.min(
            first
                .bytes()
                .zip(f.bytes())
                .take_while(|(a, b)| a == b)
                .count(),
        );
    }
    first[..len.max(1)].to_string()
}

fn loop_id(parts: &[InstrumentTagParts]) -> Option<String> {
    let number = &parts.first()?.number;
    let functions: Vec<&str> = parts.iter().map(|p| p.function.as_str()).collect();
    Some(format!("{}-{}", common_function_prefix(&functions), number))
}

/// Group instrument tags into new loops.
///
/// Only groups with two or more members become loops. Groups whose id is
/// already taken by an existing loop are skipped. Returned loops are sorted
/// by id.
pub fn auto_generate_loops(tags: &[Tag], existing: &[Loop]) -> Vec<Loop> {
    let mut groups: BTreeMap<(char, String), Vec<(&Tag, InstrumentTagParts)>> = BTreeMap::new();
    for tag in tags.iter().filter(|t| t.category == Category::Instrument) {
        let Some(parts) = parse_instrument_tag(&tag.text) else {
            continue;
        };
        let Some(letter) = parts.function.chars().next() else {
            continue;
        };
        groups
            .entry((letter, parts.number.clone()))
            .or_default()
            .push((tag, parts));
    }

    let mut taken: HashSet<String> = existing.iter().map(|l| l.id.clone()).collect();
    let mut loops = Vec::new();
    for members in groups.into_values().filter(|m| m.len() >= 2) {
        let parts: Vec<InstrumentTagParts> = members.iter().map(|(_, p)| p.clone()).collect();
        let Some(id) = loop_id(&parts) else {
            continue;
        };
        if !taken.insert(id.clone()) {
            debug!(loop_id = %id, "skipping loop that already exists");
            continue;
        }
        loops.push(Loop {
            id,
            tag_ids: members.iter().map(|(t, _)| t.id.clone()).collect(),
            created_at: Utc::now(),
            is_auto_generated: true,
            name: None,
        });
    }
    loops.sort_by(|a, b| a.id.cmp(&b.id));
    loops
}

/// Build a loop from a hand-picked set of instrument tags.
///
/// The id is derived the same way as for generated loops when every tag
/// parses and they agree on letter and number; otherwise the given name is
/// used, or the next free `LOOP-n`.
pub fn create_manual_loop(tags: &[&Tag], name: Option<String>, existing: &[Loop]) -> Result<Loop, LoopError> {
    let instruments: Vec<&Tag> = tags
        .iter()
        .copied()
        .filter(|t| t.category == Category::Instrument)
        .collect();
    if instruments.len() < 2 {
        return Err(LoopError::TooFewTags);
    }

    let parts: Option<Vec<InstrumentTagParts>> =
        instruments.iter().map(|t| parse_instrument_tag(&t.text)).collect();
    let derived = parts.filter(|p| {
        p.iter().all(|x| {
            x.number == p[0].number && x.function.chars().next() == p[0].function.chars().next()
        })
    });

    let taken: HashSet<&str> = existing.iter().map(|l| l.id.as_str()).collect();
    let id = match (derived.as_deref().and_then(loop_id), &name) {
        (Some(id), _) => id,
        (None, Some(name)) => name.clone(),
        (None, None) => (existing.len() + 1..)
            .map(|n| format!("LOOP-{}", n))
            .find(|candidate| !taken.contains(candidate.as_str()))
            .unwrap_or_default(),
    };
    if taken.contains(id.as_str()) {
        return Err(LoopError::DuplicateId(id));
    }

    Ok(Loop {
        id,
        tag_ids: instruments.iter().map(|t| t.id.clone()).collect(),
        created_at: Utc::now(),
        is_auto_generated: false,
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BoundingBox;

    fn instrument(text: &str) -> Tag {
        Tag::new(text, 1, BoundingBox::new(0.0, 0.0, 30.0, 20.0), Category::Instrument)
    }

    #[test]
    fn parses_with_and_without_dash() {
        let p = parse_instrument_tag("TIC-205A").unwrap();
        assert_eq!((p.function.as_str(), p.number.as_str(), p.suffix.as_str()), ("TIC", "205", "A"));
        assert_eq!(parse_instrument_tag("pt101").unwrap().function, "PT");
        assert!(parse_instrument_tag("2\"-P-1001").is_none());
    }

    #[test]
    fn shared_letter_and_number_form_a_loop() {
        let tags = vec![instrument("TT-205"), instrument("TIC-205")];
        let loops = auto_generate_loops(&tags, &[]);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].id, "T-205");
        assert_eq!(loops[0].tag_ids.len(), 2);
        assert!(loops[0].is_auto_generated);
    }

    #[test]
    fn longest_common_prefix_names_the_loop() {
        let tags = vec![instrument("FIC-300"), instrument("FIT-300"), instrument("FI-300")];
        assert_eq!(auto_generate_loops(&tags, &[])[0].id, "FI-300");
    }

    #[test]
    fn single_member_forms_no_loop() {
        let tags = vec![instrument("FT-101"), instrument("PT-101")];
        assert!(auto_generate_loops(&tags, &[]).is_empty());
    }

    #[test]
    fn existing_ids_are_not_regenerated() {
        let tags = vec![instrument("TT-205"), instrument("TIC-205")];
        let first = auto_generate_loops(&tags, &[]);
        assert!(auto_generate_loops(&tags, &first).is_empty());
    }

    #[test]
    fn manual_loops() {
        let a = instrument("LT-400");
        let b = instrument("LIC-400");
        let c = instrument("PT-900");

        let derived = create_manual_loop(&[&a, &b], None, &[]).unwrap();
        assert_eq!(derived.id, "L-400");
        assert!(!derived.is_auto_generated);

        let mixed = create_manual_loop(&[&a, &c], None, &[derived.clone()]).unwrap();
        assert_eq!(mixed.id, "LOOP-2");

        let named = create_manual_loop(&[&a, &c], Some("Level control".into()), &[]).unwrap();
        assert_eq!(named.id, "Level control");

        assert_eq!(
            create_manual_loop(&[&a, &b], None, &[derived]),
            Err(LoopError::DuplicateId("L-400".into()))
        );
        assert_eq!(create_manual_loop(&[&a], None, &[]), Err(LoopError::TooFewTags));
    }
}
