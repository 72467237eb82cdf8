use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, DeckError};

/// A loaded slide deck: ordered slides, each holding a shape tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub slides: Vec<Slide>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slide {
    pub shapes: Vec<Shape>,
}

/// Drawable element on a slide. Closed set: anything without
/// translatable text is `Other`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    Group { shapes: Vec<Shape> },
    Table { rows: Vec<TableRow> },
    TextContainer { paragraphs: Vec<Paragraph> },
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableRow {
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableCell {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paragraph {
    pub runs: Vec<Run>,
}

/// A contiguous span of text with uniform formatting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub text: String,
}

/// Address of a single mutable text slot inside a document.
///
/// `shape_path` walks from the slide's top-level shapes through nested
/// groups to the shape holding the slot; `slot` picks the cell or run
/// within it. The document keeps ownership of the slot, callers resolve
/// the path on demand.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotRef {
    pub slide: usize,
    pub shape_path: Vec<usize>,
    pub slot: SlotKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Cell { row: usize, col: usize },
    Run { paragraph: usize, run: usize },
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.slides.len()
    }

    /// Read the text at a slot.
    pub fn slot_text(&self, slot: &SlotRef) -> Result<&str> {
        let shape = self.resolve_shape(slot)?;
        match (&slot.slot, shape) {
            (SlotKind::Cell { row, col }, Shape::Table { rows }) => rows
                .get(*row)
                .and_then(|r| r.cells.get(*col))
                .map(|c| c.text.as_str())
                .ok_or_else(|| dangling(slot)),
            (SlotKind::Run { paragraph, run }, Shape::TextContainer { paragraphs }) => paragraphs
                .get(*paragraph)
                .and_then(|p| p.runs.get(*run))
                .map(|r| r.text.as_str())
                .ok_or_else(|| dangling(slot)),
            _ => Err(dangling(slot)),
        }
    }

    /// Overwrite the text at a slot in place. Layout and every other
    /// slot are untouched.
    pub fn set_slot_text(&mut self, slot: &SlotRef, text: String) -> Result<()> {
        let shape = self.resolve_shape_mut(slot)?;
        match (&slot.slot, shape) {
            (SlotKind::Cell { row, col }, Shape::Table { rows }) => {
                let cell = rows
                    .get_mut(*row)
                    .and_then(|r| r.cells.get_mut(*col))
                    .ok_or_else(|| dangling(slot))?;
                cell.text = text;
                Ok(())
            }
            (SlotKind::Run { paragraph, run }, Shape::TextContainer { paragraphs }) => {
                let target = paragraphs
                    .get_mut(*paragraph)
                    .and_then(|p| p.runs.get_mut(*run))
                    .ok_or_else(|| dangling(slot))?;
                target.text = text;
                Ok(())
            }
            _ => Err(dangling(slot)),
        }
    }

    fn resolve_shape(&self, slot: &SlotRef) -> Result<&Shape> {
        let slide = self.slides.get(slot.slide).ok_or_else(|| dangling(slot))?;
        let mut shapes = &slide.shapes;

        for (depth, &idx) in slot.shape_path.iter().enumerate() {
            let shape = shapes.get(idx).ok_or_else(|| dangling(slot))?;
            if depth == slot.shape_path.len() - 1 {
                return Ok(shape);
            }
            shapes = match shape {
                Shape::Group { shapes } => shapes,
                // Path descends into a non-group shape
                _ => return Err(dangling(slot)),
            };
        }

        Err(dangling(slot))
    }

    fn resolve_shape_mut(&mut self, slot: &SlotRef) -> Result<&mut Shape> {
        let slide = self
            .slides
            .get_mut(slot.slide)
            .ok_or_else(|| dangling(slot))?;
        let mut shapes = &mut slide.shapes;

        for (depth, &idx) in slot.shape_path.iter().enumerate() {
            if idx >= shapes.len() {
                return Err(dangling(slot));
            }
            let last = depth == slot.shape_path.len() - 1;
            if last {
                return Ok(&mut shapes[idx]);
            }
            shapes = match &mut shapes[idx] {
                Shape::Group { shapes } => shapes,
                // Path descends into a non-group shape
                _ => return Err(dangling(slot)),
            };
        }

        Err(dangling(slot))
    }
}

fn dangling(slot: &SlotRef) -> DeckError {
    DeckError::Document(format!(
        "dangling slot reference: slide {} path {:?}",
        slot.slide, slot.shape_path
    ))
}

/// Persistence boundary for documents. Loading and saving the on-disk
/// representation is a collaborator concern; the core only needs a
/// shape tree in and a shape tree out.
pub trait DocumentStore: Send + Sync {
    fn load(&self, path: &Path) -> Result<Document>;
    fn save(&self, document: &Document, path: &Path) -> Result<()>;
}

/// Store for documents serialized as JSON shape trees.
pub struct JsonDocumentStore;

impl DocumentStore for JsonDocumentStore {
    fn load(&self, path: &Path) -> Result<Document> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DeckError::Extraction(format!("Failed to read document: {}", e)))?;

        let document: Document = serde_json::from_str(&content)
            .map_err(|e| DeckError::Extraction(format!("Failed to parse document: {}", e)))?;

        debug!("Loaded document with {} slides from {}", document.page_count(), path.display());
        Ok(document)
    }

    fn save(&self, document: &Document, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(document)?;
        std::fs::write(path, content)?;
        debug!("Saved document to {}", path.display());
        Ok(())
    }
}
