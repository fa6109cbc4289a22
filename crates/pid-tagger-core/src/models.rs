//! Core data models used throughout P&ID Tagger.
//!
//! These types represent the tags, leftover text items, descriptions,
//! relationships, and loops that flow from extraction through review into
//! the project graph. Field names serialize in camelCase so a project
//! snapshot round-trips through the JSON format external tools expect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a fresh opaque identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Axis-aligned rectangle in page-local, top-left-origin coordinates.
///
/// Units are PDF points at scale 1.0. Constructed boxes always satisfy
/// `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    /// Build a box from two corners in any order.
    pub fn new(xa: f64, ya: f64, xb: f64, yb: f64) -> Self {
        Self {
            x1: xa.min(xb),
            y1: ya.min(yb),
            x2: xa.max(xb),
            y2: ya.max(yb),
        }
    }

    /// Smallest box enclosing every point.
    pub fn from_points(points: &[(f64, f64)]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bbox = Self::new(first.0, first.1, first.0, first.1);
        for &(x, y) in rest {
            bbox.x1 = bbox.x1.min(x);
            bbox.y1 = bbox.y1.min(y);
            bbox.x2 = bbox.x2.max(x);
            bbox.y2 = bbox.y2.max(y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Length of the box diagonal.
    pub fn diagonal(&self) -> f64 {
        self.width().hypot(self.height())
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    /// Union of all boxes, or `None` for an empty iterator.
    pub fn union_all<'a>(boxes: impl IntoIterator<Item = &'a BoundingBox>) -> Option<BoundingBox> {
        boxes.into_iter().fold(None, |acc, b| match acc {
            None => Some(*b),
            Some(u) => Some(u.union(b)),
        })
    }

    /// The four corners followed by the center.
    pub fn corners_and_center(&self) -> [(f64, f64); 5] {
        [
            (self.x1, self.y1),
            (self.x2, self.y1),
            (self.x1, self.y2),
            (self.x2, self.y2),
            self.center(),
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    /// Distance from a point to the closest point of the rectangle
    /// (zero when the point lies inside).
    pub fn distance_to_point(&self, x: f64, y: f64) -> f64 {
        let cx = x.clamp(self.x1, self.x2);
        let cy = y.clamp(self.y1, self.y2);
        (x - cx).hypot(y - cy)
    }

    /// Whether a circle intersects this rectangle.
    pub fn intersects_circle(&self, cx: f64, cy: f64, radius: f64) -> bool {
        self.distance_to_point(cx, cy) <= radius
    }

    /// Vertical overlap as a fraction of the shorter box's height.
    pub fn vertical_overlap_ratio(&self, other: &BoundingBox) -> f64 {
        let overlap = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let shorter = self.height().min(other.height());
        if shorter <= f64::EPSILON {
            return 0.0;
        }
        overlap / shorter
    }

    /// Euclidean distance between the two box centers.
    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }

    /// Minimum distance over every pairing of corners and centers.
    pub fn corner_center_distance(&self, other: &BoundingBox) -> f64 {
        let mut best = f64::INFINITY;
        for (ax, ay) in self.corners_and_center() {
            for (bx, by) in other.corners_and_center() {
                best = best.min((ax - bx).hypot(ay - by));
            }
        }
        best
    }
}

/// Tag category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Line,
    Instrument,
    DrawingNumber,
    NotesAndHolds,
    Uncategorized,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Line => "Line",
            Category::Instrument => "Instrument",
            Category::DrawingNumber => "DrawingNumber",
            Category::NotesAndHolds => "NotesAndHolds",
            Category::Uncategorized => "Uncategorized",
        }
    }
}

/// An un-categorized text run left over after extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTextItem {
    pub id: String,
    pub text: String,
    pub page: u32,
    pub bbox: BoundingBox,
}

impl RawTextItem {
    pub fn new(text: impl Into<String>, page: u32, bbox: BoundingBox) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            page,
            bbox,
        }
    }
}

/// A categorized engineering annotation.
///
/// `source_items` keeps the raw items consumed to build the tag so that
/// deleting it can restore them losslessly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub text: String,
    pub page: u32,
    pub bbox: BoundingBox,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_items: Option<Vec<RawTextItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reviewed: Option<bool>,
}

impl Tag {
    pub fn new(text: impl Into<String>, page: u32, bbox: BoundingBox, category: Category) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            page,
            bbox,
            category,
            source_items: None,
            is_reviewed: None,
        }
    }

    pub fn with_source_items(mut self, items: Vec<RawTextItem>) -> Self {
        self.source_items = Some(items);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DescriptionType {
    Note,
    Hold,
}

impl DescriptionType {
    /// Classify a NotesAndHolds tag by its wording.
    pub fn for_tag_text(text: &str) -> Self {
        if text.to_ascii_uppercase().contains("HOLD") {
            DescriptionType::Hold
        } else {
            DescriptionType::Note
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DescriptionScope {
    Specific,
    General,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptionMetadata {
    #[serde(rename = "type")]
    pub kind: DescriptionType,
    pub scope: DescriptionScope,
    pub number: u32,
}

/// A numbered multi-item note or hold body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Description {
    pub id: String,
    pub text: String,
    pub page: u32,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub source_items: Vec<RawTextItem>,
    pub metadata: DescriptionMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    Connection,
    Installation,
    Annotation,
    Note,
    Description,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Connection => "Connection",
            RelationshipType::Installation => "Installation",
            RelationshipType::Annotation => "Annotation",
            RelationshipType::Note => "Note",
            RelationshipType::Description => "Description",
        }
    }
}

/// Directed edge between two entity ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: RelationshipType,
}

impl Relationship {
    pub fn new(from: impl Into<String>, to: impl Into<String>, kind: RelationshipType) -> Self {
        Self {
            id: new_id(),
            from: from.into(),
            to: to.into(),
            kind,
        }
    }

    /// The `from-to-type` de-duplication key.
    pub fn key(&self) -> String {
        relationship_key(&self.from, &self.to, self.kind)
    }
}

pub fn relationship_key(from: &str, to: &str, kind: RelationshipType) -> String {
    format!("{}-{}-{}", from, to, kind.as_str())
}

/// A group of instrument tags sharing a control-loop identity.
///
/// `id` is the derived loop identifier itself (e.g. `T-205`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loop {
    pub id: String,
    pub tag_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub is_auto_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Which kind of entity a selection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Tag,
    RawTextItem,
}

/// A selected entity: either a tag or a raw text item.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Tag(&'a Tag),
    RawTextItem(&'a RawTextItem),
}

impl<'a> EntityRef<'a> {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Tag(_) => EntityKind::Tag,
            EntityRef::RawTextItem(_) => EntityKind::RawTextItem,
        }
    }

    pub fn id(&self) -> &'a str {
        match self {
            EntityRef::Tag(t) => &t.id,
            EntityRef::RawTextItem(r) => &r.id,
        }
    }

    pub fn as_tag(&self) -> Option<&'a Tag> {
        match self {
            EntityRef::Tag(t) => Some(t),
            EntityRef::RawTextItem(_) => None,
        }
    }
}
