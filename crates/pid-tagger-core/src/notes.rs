//! Numbered note description detection.
//!
//! P&ID sheets carry a notes column (usually on the right) of numbered,
//! multi-line paragraphs. This module clusters leftover raw text items into
//! one description per numbered start.
//!
//! # Algorithm
//!
//! 1. Sort the page's items top-to-bottom, then left-to-right.
//! 2. A *note start* is a right-side item (`x1 ≥ minXPosition × width`)
//!    reading like `1. text`, `2:`, `(3) text` or a bare `4` awaiting text
//!    on the next line.
//! 3. A note's span runs from its start down to the next start (or the page
//!    bottom). Everything in between belongs to the earlier note.
//! 4. Within a span an item is appended unless it looks like a header, lies
//!    outside the first text line's X-extent, follows a gap larger than
//!    `maxYGap` (stop), or is the fourth large paragraph gap in a row
//!    (stop).

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::models::{
    BoundingBox, Description, DescriptionMetadata, DescriptionScope, DescriptionType, RawTextItem,
};
use crate::settings::NoteDescriptionPattern;

/// A gap this many times `maxLineGap` counts as a paragraph break.
const LARGE_GAP_FACTOR: f64 = 2.5;

/// Consecutive paragraph breaks tolerated before the description ends.
const MAX_PARAGRAPH_BREAKS: usize = 3;

static NOTE_START: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([(\[])?(\d+)([)\]])?\s*([-.:])?\s*(.*)$").unwrap());
static HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{4,}[:\s]").unwrap());
static FIGURE_OR_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:FIGURE|TABLE)\s+\d+").unwrap());

/// One detected note: its printed number, joined text, and the raw items
/// that make it up (start item first).
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedNote {
    pub page: u32,
    pub number: u32,
    pub text: String,
    pub bbox: BoundingBox,
    pub items: Vec<RawTextItem>,
}

#[derive(Debug, Clone, PartialEq)]
struct NoteStart {
    number: u32,
    rest: String,
}

fn parse_note_start(text: &str) -> Option<NoteStart> {
    let caps = NOTE_START.captures(text.trim())?;
    let bracketed = caps.get(1).is_some() || caps.get(3).is_some();
    let separator = caps.get(4).map(|m| m.as_str());
    let rest = caps.get(5).map_or("", |m| m.as_str()).trim();

    // "2.5 MPA" is a decimal value, not note two.
    if separator == Some(".") && rest.starts_with(|c: char| c.is_ascii_digit()) && !bracketed {
        return None;
    }
    if separator.is_none() && !rest.is_empty() && !bracketed {
        return None;
    }

    let number = caps.get(2)?.as_str().parse().ok()?;
    Some(NoteStart {
        number,
        rest: rest.to_string(),
    })
}

fn is_header(text: &str) -> bool {
    HEADER.is_match(text) || FIGURE_OR_TABLE.is_match(text)
}

/// Detect numbered note descriptions among one page's raw items.
///
/// Items from other pages are ignored. Returns one [`DetectedNote`] per
/// note start, in top-to-bottom order.
pub fn detect_note_descriptions(
    items: &[RawTextItem],
    page: u32,
    page_width: f64,
    page_height: f64,
    pattern: &NoteDescriptionPattern,
) -> Vec<DetectedNote> {
    let mut sorted: Vec<&RawTextItem> = items
        .iter()
        .filter(|i| i.page == page && i.bbox.is_finite())
        .collect();
    sorted.sort_by(|a, b| {
        a.bbox
            .y1
            .total_cmp(&b.bbox.y1)
            .then(a.bbox.x1.total_cmp(&b.bbox.x1))
    });

    let min_x = pattern.min_x_position * page_width;
    let starts: Vec<(usize, NoteStart)> = sorted
        .iter()
        .enumerate()
        .filter(|(_, item)| item.bbox.x1 >= min_x)
        .filter_map(|(i, item)| parse_note_start(&item.text).map(|s| (i, s)))
        .collect();
    let start_indices: HashSet<usize> = starts.iter().map(|(i, _)| *i).collect();

    let tol = pattern.alignment_tolerance;
    let mut notes = Vec::with_capacity(starts.len());

    for (k, (start_idx, start)) in starts.iter().enumerate() {
        let start_item = sorted[*start_idx];
        let end_y = starts
            .get(k + 1)
            .map(|(i, _)| sorted[*i].bbox.y1)
            .unwrap_or(page_height);

        let mut parts: Vec<&str> = Vec::new();
        if !start.rest.is_empty() {
            parts.push(&start.rest);
        }
        let mut members = vec![start_item.clone()];
        let mut bbox = start_item.bbox;
        let mut extent = (!start.rest.is_empty()).then_some((start_item.bbox.x1, start_item.bbox.x2));
        let mut last_bottom = start_item.bbox.y2;
        let mut large_gaps = 0;

        for (j, item) in sorted.iter().enumerate().skip(start_idx + 1) {
            if item.bbox.y1 >= end_y {
                break;
            }
            if start_indices.contains(&j) {
                continue;
            }
            let text = item.text.trim();
            if text.is_empty() || is_header(text) {
                continue;
            }
            let aligned = match extent {
                Some((x1, x2)) => item.bbox.x1 >= x1 - tol && item.bbox.x1 <= x2 + tol,
                None => item.bbox.x1 >= start_item.bbox.x1 - tol,
            };
            if !aligned {
                continue;
            }

            let gap = item.bbox.y1 - last_bottom;
            if gap > pattern.max_y_gap {
                break;
            }
            if gap > LARGE_GAP_FACTOR * pattern.max_line_gap {
                large_gaps += 1;
                if large_gaps > MAX_PARAGRAPH_BREAKS {
                    break;
                }
            } else {
                large_gaps = 0;
            }

            parts.push(text);
            members.push((*item).clone());
            bbox = bbox.union(&item.bbox);
            extent.get_or_insert((item.bbox.x1, item.bbox.x2));
            last_bottom = last_bottom.max(item.bbox.y2);
        }

        notes.push(DetectedNote {
            page,
            number: start.number,
            text: parts.join(" "),
            bbox,
            items: members,
        });
    }

    notes
}

/// Next free description number for a `(page, type)` pair: `max + 1`.
pub fn next_description_number(descriptions: &[Description], page: u32, kind: DescriptionType) -> u32 {
    descriptions
        .iter()
        .filter(|d| d.page == page && d.metadata.kind == kind)
        .map(|d| d.metadata.number)
        .max()
        .map_or(1, |n| n + 1)
}

/// Turn detected notes into descriptions.
///
/// A note keeps its printed number when that number is still free for its
/// `(page, type)`; otherwise it gets the next free one.
pub fn descriptions_from_detected(
    detected: &[DetectedNote],
    existing: &[Description],
    kind: DescriptionType,
    scope: DescriptionScope,
) -> Vec<Description> {
    let mut taken: HashMap<u32, HashSet<u32>> = HashMap::new();
    for d in existing.iter().filter(|d| d.metadata.kind == kind) {
        taken.entry(d.page).or_default().insert(d.metadata.number);
    }

    detected
        .iter()
        .map(|note| {
            let used = taken.entry(note.page).or_default();
            let number = if used.contains(&note.number) {
                used.iter().max().map_or(1, |n| n + 1)
            } else {
                note.number
            };
            used.insert(number);
            Description {
                id: crate::models::new_id(),
                text: note.text.clone(),
                page: note.page,
                bbox: note.bbox,
                source_items: note.items.clone(),
                metadata: DescriptionMetadata {
                    kind,
                    scope,
                    number,
                },
            }
        })
        .collect()
}
