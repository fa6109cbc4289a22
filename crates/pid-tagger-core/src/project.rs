//! Project state and the persisted snapshot format.
//!
//! [`Project`] is the single owner of everything a review session edits:
//! tags, leftover raw items, descriptions, relationships, loops and the
//! settings that produced them. Its methods are the user actions; each one
//! keeps the invariants that tie those collections together:
//!
//! - a raw item is either in the pool or inside exactly one tag or
//!   description's `source_items`, never both;
//! - no relationship points at a deleted entity;
//! - description numbers are unique per `(page, type)`.
//!
//! [`ProjectSnapshot`] is the JSON shape on disk. Loading validates the
//! whole document before anything is applied and strips script-like
//! content from every text field.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::error::ProjectError;
use crate::extract::{normalize_tag_text, PageExtraction};
use crate::loops::auto_generate_loops;
use crate::models::{
    BoundingBox, Category, Description, DescriptionMetadata, DescriptionScope, DescriptionType,
    EntityRef, Loop, RawTextItem, Relationship, Tag,
};
use crate::notes::{descriptions_from_detected, next_description_number, DetectedNote};
use crate::relationships::{
    auto_link_annotations, link_notes_to_descriptions, link_notes_to_instruments,
    remove_relationships_for, LinkOutcome,
};
use crate::settings::ProjectSettings;

static SCRIPT_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static JAVASCRIPT_URI: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)javascript\s*:").unwrap());
static INLINE_HANDLER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bon[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]*)"#).unwrap());

const RELATIONSHIP_TYPES: [&str; 5] = ["Connection", "Installation", "Annotation", "Note", "Description"];

/// Strip `<script>` blocks, `javascript:` URIs and inline `on*=` handlers.
pub fn sanitize_text(text: &str) -> String {
    let text = SCRIPT_BLOCK.replace_all(text, "");
    let text = JAVASCRIPT_URI.replace_all(&text, "");
    INLINE_HANDLER.replace_all(&text, "").into_owned()
}

/// On-disk project document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    pub pdf_file_name: String,
    pub export_date: String,
    pub tags: Vec<Tag>,
    pub relationships: Vec<Relationship>,
    pub raw_text_items: Vec<RawTextItem>,
    #[serde(default)]
    pub descriptions: Vec<Description>,
    #[serde(default)]
    pub loops: Vec<Loop>,
    #[serde(default)]
    pub settings: ProjectSettings,
}

impl ProjectSnapshot {
    /// Parse and validate a snapshot. Any problem rejects the whole file.
    pub fn from_json(input: &str) -> Result<Self, ProjectError> {
        let value: Value = serde_json::from_str(input)?;
        validate(&value)?;
        let mut snapshot: ProjectSnapshot =
            serde_json::from_value(value).map_err(|e| ProjectError::invalid(e.to_string()))?;
        snapshot.sanitize();
        Ok(snapshot)
    }

    /// Serialize with a fresh `exportDate`.
    pub fn to_json_pretty(&mut self) -> Result<String, ProjectError> {
        self.export_date = Utc::now().to_rfc3339();
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn sanitize(&mut self) {
        fn clean_item(item: &mut RawTextItem) {
            item.text = sanitize_text(&item.text);
            item.bbox = normalized(&item.bbox);
        }

        self.pdf_file_name = sanitize_text(&self.pdf_file_name);
        for tag in &mut self.tags {
            tag.text = sanitize_text(&tag.text);
            tag.bbox = normalized(&tag.bbox);
            tag.source_items.iter_mut().flatten().for_each(clean_item);
        }
        self.raw_text_items.iter_mut().for_each(clean_item);
        for desc in &mut self.descriptions {
            desc.text = sanitize_text(&desc.text);
            desc.bbox = normalized(&desc.bbox);
            desc.source_items.iter_mut().for_each(clean_item);
        }
        for l in &mut self.loops {
            l.name = l.name.as_deref().map(sanitize_text);
        }
    }
}

fn normalized(b: &BoundingBox) -> BoundingBox {
    BoundingBox::new(b.x1, b.y1, b.x2, b.y2)
}

fn validate(value: &Value) -> Result<(), ProjectError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ProjectError::invalid("top level must be an object"))?;

    for key in ["pdfFileName", "exportDate", "tags", "relationships", "rawTextItems"] {
        if !obj.contains_key(key) {
            return Err(ProjectError::invalid(format!("missing required field '{}'", key)));
        }
    }
    let array = |key: &str| {
        obj.get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| ProjectError::invalid(format!("'{}' must be an array", key)))
    };

    for (i, tag) in array("tags")?.iter().enumerate() {
        let at = format!("tags[{}]", i);
        require_fields(tag, &at, &["id", "text", "page", "bbox", "category"])?;
        require_bbox(&tag["bbox"], &at)?;
    }
    for (i, rel) in array("relationships")?.iter().enumerate() {
        let at = format!("relationships[{}]", i);
        require_fields(rel, &at, &["id", "from", "to", "type"])?;
        let kind = rel["type"].as_str().unwrap_or_default();
        if !RELATIONSHIP_TYPES.contains(&kind) {
            return Err(ProjectError::invalid(format!(
                "{} has unknown relationship type '{}'",
                at, rel["type"]
            )));
        }
    }
    for (i, item) in array("rawTextItems")?.iter().enumerate() {
        let at = format!("rawTextItems[{}]", i);
        require_fields(item, &at, &["id", "text", "page", "bbox"])?;
        require_bbox(&item["bbox"], &at)?;
    }
    if obj.contains_key("descriptions") {
        array("descriptions")?;
    }
    Ok(())
}

fn require_fields(value: &Value, at: &str, fields: &[&str]) -> Result<(), ProjectError> {
    let obj = value
        .as_object()
        .ok_or_else(|| ProjectError::invalid(format!("{} must be an object", at)))?;
    match fields.iter().find(|f| !obj.contains_key(**f)) {
        Some(missing) => Err(ProjectError::invalid(format!("{} is missing '{}'", at, missing))),
        None => Ok(()),
    }
}

fn require_bbox(value: &Value, at: &str) -> Result<(), ProjectError> {
    for corner in ["x1", "y1", "x2", "y2"] {
        if !value.get(corner).is_some_and(Value::is_number) {
            return Err(ProjectError::invalid(format!("{} has a malformed bbox ('{}')", at, corner)));
        }
    }
    Ok(())
}

/// Counts shown by `stats` and after each pipeline step.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStats {
    pub pages: usize,
    pub tags_by_category: BTreeMap<&'static str, usize>,
    pub raw_text_items: usize,
    pub descriptions: usize,
    pub relationships_by_type: BTreeMap<&'static str, usize>,
    pub loops: usize,
}

/// The explicit state of one review session.
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub pdf_file_name: String,
    pub tags: Vec<Tag>,
    pub raw_text_items: Vec<RawTextItem>,
    pub relationships: Vec<Relationship>,
    pub descriptions: Vec<Description>,
    pub loops: Vec<Loop>,
    pub settings: ProjectSettings,
}

impl From<ProjectSnapshot> for Project {
    fn from(s: ProjectSnapshot) -> Self {
        Self {
            pdf_file_name: s.pdf_file_name,
            tags: s.tags,
            raw_text_items: s.raw_text_items,
            relationships: s.relationships,
            descriptions: s.descriptions,
            loops: s.loops,
            settings: s.settings,
        }
    }
}

impl Project {
    pub fn new(pdf_file_name: impl Into<String>, settings: ProjectSettings) -> Self {
        Self {
            pdf_file_name: pdf_file_name.into(),
            settings,
            ..Default::default()
        }
    }

    pub fn from_json(input: &str) -> Result<Self, ProjectError> {
        ProjectSnapshot::from_json(input).map(Project::from)
    }

    pub fn to_snapshot(&self) -> ProjectSnapshot {
        ProjectSnapshot {
            pdf_file_name: self.pdf_file_name.clone(),
            export_date: Utc::now().to_rfc3339(),
            tags: self.tags.clone(),
            relationships: self.relationships.clone(),
            raw_text_items: self.raw_text_items.clone(),
            descriptions: self.descriptions.clone(),
            loops: self.loops.clone(),
            settings: self.settings.clone(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, ProjectError> {
        self.to_snapshot().to_json_pretty()
    }

    /// Look up a tag or raw item by id.
    pub fn entity(&self, id: &str) -> Option<EntityRef<'_>> {
        self.tags
            .iter()
            .find(|t| t.id == id)
            .map(EntityRef::Tag)
            .or_else(|| self.raw_text_items.iter().find(|r| r.id == id).map(EntityRef::RawTextItem))
    }

    /// Replace the tags and raw items of every extracted page.
    ///
    /// Relationships touching replaced entities are dropped, and loop
    /// members that no longer exist are removed.
    pub fn apply_extraction(&mut self, extractions: Vec<PageExtraction>) {
        let pages: HashSet<u32> = extractions.iter().map(|e| e.page).collect();
        let removed: Vec<String> = self
            .tags
            .iter()
            .filter(|t| pages.contains(&t.page))
            .map(|t| t.id.clone())
            .chain(
                self.raw_text_items
                    .iter()
                    .filter(|r| pages.contains(&r.page))
                    .map(|r| r.id.clone()),
            )
            .collect();

        self.tags.retain(|t| !pages.contains(&t.page));
        self.raw_text_items.retain(|r| !pages.contains(&r.page));
        for e in extractions {
            self.tags.extend(e.tags);
            self.raw_text_items.extend(e.raw_items);
        }
        self.forget(&removed);
    }

    /// Delete tags, returning their raw items to the pool.
    ///
    /// A tag without recorded source items comes back as one synthesized raw
    /// item carrying its text and box. An item shared with a tag or
    /// description that survives stays with it and is not restored.
    pub fn delete_tags(&mut self, ids: &[&str]) -> Vec<RawTextItem> {
        let wanted: HashSet<&str> = ids.iter().copied().collect();
        let (deleted, kept): (Vec<Tag>, Vec<Tag>) =
            std::mem::take(&mut self.tags).into_iter().partition(|t| wanted.contains(t.id.as_str()));
        self.tags = kept;

        let mut restored = Vec::new();
        for tag in &deleted {
            match &tag.source_items {
                Some(items) if !items.is_empty() => restored.extend(items.iter().cloned()),
                _ => restored.push(RawTextItem::new(tag.text.clone(), tag.page, tag.bbox)),
            }
        }
        let restored = self.restore_items(restored);

        let removed: Vec<String> = deleted.into_iter().map(|t| t.id).collect();
        self.forget(&removed);
        restored
    }

    /// Merge selected raw items into one tag.
    ///
    /// Text is joined with spaces in selection order, then normalized per
    /// the whitespace setting. Returns `None` when none of the ids are raw
    /// items in the pool.
    pub fn create_tag_from_items(&mut self, item_ids: &[&str], category: Category) -> Option<Tag> {
        let items = self.take_items(item_ids);
        let first = items.first()?;
        let page = first.page;
        let bbox = BoundingBox::union_all(items.iter().map(|i| &i.bbox))?;
        let joined = items.iter().map(|i| i.text.as_str()).collect::<Vec<_>>().join(" ");
        let text = normalize_tag_text(&joined, category, &self.settings.app_settings);

        let consumed: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let tag = Tag::new(text, page, bbox, category).with_source_items(items);
        self.tags.push(tag.clone());
        self.forget(&consumed);
        Some(tag)
    }

    /// Merge selected raw items into a numbered description.
    pub fn create_description_from_items(
        &mut self,
        item_ids: &[&str],
        kind: DescriptionType,
        scope: DescriptionScope,
    ) -> Option<Description> {
        let mut items = self.take_items(item_ids);
        items.sort_by(|a, b| a.bbox.y1.total_cmp(&b.bbox.y1).then(a.bbox.x1.total_cmp(&b.bbox.x1)));
        let first = items.first()?;
        let page = first.page;
        let bbox = BoundingBox::union_all(items.iter().map(|i| &i.bbox))?;
        let text = items.iter().map(|i| i.text.trim()).collect::<Vec<_>>().join(" ");
        let number = self.next_description_number(page, kind);

        let consumed: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let description = Description {
            id: crate::models::new_id(),
            text,
            page,
            bbox,
            source_items: items,
            metadata: DescriptionMetadata { kind, scope, number },
        };
        self.descriptions.push(description.clone());
        self.forget(&consumed);
        Some(description)
    }

    /// Add detected notes as descriptions and pull their items from the pool.
    pub fn apply_detected_notes(
        &mut self,
        detected: &[DetectedNote],
        kind: DescriptionType,
        scope: DescriptionScope,
    ) -> usize {
        let created = descriptions_from_detected(detected, &self.descriptions, kind, scope);
        let consumed: Vec<String> = created
            .iter()
            .flat_map(|d| d.source_items.iter().map(|i| i.id.clone()))
            .collect();
        let gone: HashSet<&str> = consumed.iter().map(String::as_str).collect();
        self.raw_text_items.retain(|r| !gone.contains(r.id.as_str()));
        let count = created.len();
        self.descriptions.extend(created);
        self.forget(&consumed);
        count
    }

    /// Switch a description between Note and Hold, renumbering it within
    /// the new type. Returns `false` if the id is unknown.
    pub fn change_description_type(&mut self, id: &str, kind: DescriptionType) -> bool {
        let Some(pos) = self.descriptions.iter().position(|d| d.id == id) else {
            return false;
        };
        if self.descriptions[pos].metadata.kind == kind {
            return true;
        }
        let page = self.descriptions[pos].page;
        let number = self.next_description_number(page, kind);
        let meta = &mut self.descriptions[pos].metadata;
        meta.kind = kind;
        meta.number = number;
        true
    }

    /// Delete descriptions, returning their items to the pool.
    pub fn delete_descriptions(&mut self, ids: &[&str]) -> Vec<RawTextItem> {
        let wanted: HashSet<&str> = ids.iter().copied().collect();
        let (deleted, kept): (Vec<Description>, Vec<Description>) = std::mem::take(&mut self.descriptions)
            .into_iter()
            .partition(|d| wanted.contains(d.id.as_str()));
        self.descriptions = kept;

        let restored: Vec<RawTextItem> = deleted.iter().flat_map(|d| d.source_items.iter().cloned()).collect();
        let restored = self.restore_items(restored);
        let removed: Vec<String> = deleted.into_iter().map(|d| d.id).collect();
        self.forget(&removed);
        restored
    }

    pub fn next_description_number(&self, page: u32, kind: DescriptionType) -> u32 {
        next_description_number(&self.descriptions, page, kind)
    }

    /// Auto-link raw items to nearby instruments using the project's
    /// auto-link distance.
    pub fn link_annotations(&mut self) -> LinkOutcome {
        let distance = self.settings.tolerances.instrument.auto_link_distance;
        let outcome = auto_link_annotations(&self.tags, &self.raw_text_items, &self.relationships, distance);
        self.relationships.extend(outcome.relationships.iter().cloned());
        outcome
    }

    pub fn link_notes(&mut self) -> LinkOutcome {
        let outcome = link_notes_to_instruments(&self.tags, &self.relationships);
        self.relationships.extend(outcome.relationships.iter().cloned());
        outcome
    }

    pub fn link_descriptions(&mut self) -> LinkOutcome {
        let outcome = link_notes_to_descriptions(&self.tags, &self.descriptions, &self.relationships);
        self.relationships.extend(outcome.relationships.iter().cloned());
        outcome
    }

    /// Generate loops for instrument groups not yet covered.
    pub fn generate_loops(&mut self) -> Vec<Loop> {
        let created = auto_generate_loops(&self.tags, &self.loops);
        self.loops.extend(created.iter().cloned());
        created
    }

    pub fn stats(&self) -> ProjectStats {
        let mut stats = ProjectStats {
            raw_text_items: self.raw_text_items.len(),
            descriptions: self.descriptions.len(),
            loops: self.loops.len(),
            ..Default::default()
        };
        let mut pages = HashSet::new();
        for t in &self.tags {
            pages.insert(t.page);
            *stats.tags_by_category.entry(t.category.as_str()).or_default() += 1;
        }
        pages.extend(self.raw_text_items.iter().map(|r| r.page));
        stats.pages = pages.len();
        for r in &self.relationships {
            *stats.relationships_by_type.entry(r.kind.as_str()).or_default() += 1;
        }
        stats
    }

    /// Remove the given raw items from the pool, in the order requested.
    fn take_items(&mut self, ids: &[&str]) -> Vec<RawTextItem> {
        let mut taken = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(pos) = self.raw_text_items.iter().position(|r| r.id == *id) {
                taken.push(self.raw_text_items.remove(pos));
            }
        }
        taken
    }

    /// Put items back in the pool unless they are already there or still
    /// held by a live tag or description. Returns what was put back.
    fn restore_items(&mut self, items: Vec<RawTextItem>) -> Vec<RawTextItem> {
        let mut held: HashSet<String> = self.raw_text_items.iter().map(|r| r.id.clone()).collect();
        held.extend(
            self.tags
                .iter()
                .flat_map(|t| t.source_items.iter().flatten())
                .chain(self.descriptions.iter().flat_map(|d| d.source_items.iter()))
                .map(|i| i.id.clone()),
        );
        let restored: Vec<RawTextItem> = items.into_iter().filter(|i| held.insert(i.id.clone())).collect();
        self.raw_text_items.extend(restored.iter().cloned());
        restored
    }

    /// Drop every reference to entities that no longer exist.
    fn forget(&mut self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let removed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let before = self.relationships.len();
        self.relationships = remove_relationships_for(&self.relationships, &removed);
        for l in &mut self.loops {
            l.tag_ids.retain(|id| !removed.contains(id.as_str()));
        }
        // A loop needs two members.
        self.loops.retain(|l| l.tag_ids.len() >= 2);
        debug!(
            entities = ids.len(),
            relationships = before - self.relationships.len(),
            "removed references"
        );
    }
}
