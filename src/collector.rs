use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{Document, Shape, SlotKind, SlotRef};

/// One translatable unit: the slot's source text plus the address of
/// the slot it came from. Slots holding only whitespace are skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedText {
    pub text: String,
    pub slot: SlotRef,
}

/// Result of the lightweight analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentAnalysis {
    pub pages: usize,
    pub text_count: usize,
}

/// Walk the whole document and collect every non-empty text slot in
/// document order. Read-only; the traversal is identical to the one
/// `analyze_document` uses, so the counts always agree.
pub fn collect_units(document: &Document) -> Vec<CollectedText> {
    let mut units = Vec::new();

    for (slide_idx, slide) in document.slides.iter().enumerate() {
        for (shape_idx, shape) in slide.shapes.iter().enumerate() {
            collect_from_shape(shape, slide_idx, vec![shape_idx], &mut units);
        }
    }

    debug!("Collected {} translatable units from {} slides",
        units.len(), document.page_count());
    units
}

/// Count pages and translatable units without copying slot contents out.
pub fn analyze_document(document: &Document) -> DocumentAnalysis {
    DocumentAnalysis {
        pages: document.page_count(),
        text_count: collect_units(document).len(),
    }
}

fn collect_from_shape(
    shape: &Shape,
    slide: usize,
    path: Vec<usize>,
    units: &mut Vec<CollectedText>,
) {
    match shape {
        Shape::Group { shapes } => {
            for (child_idx, child) in shapes.iter().enumerate() {
                let mut child_path = path.clone();
                child_path.push(child_idx);
                collect_from_shape(child, slide, child_path, units);
            }
        }
        Shape::Table { rows } => {
            for (row_idx, row) in rows.iter().enumerate() {
                for (col_idx, cell) in row.cells.iter().enumerate() {
                    if !cell.text.trim().is_empty() {
                        units.push(CollectedText {
                            text: cell.text.clone(),
                            slot: SlotRef {
                                slide,
                                shape_path: path.clone(),
                                slot: SlotKind::Cell { row: row_idx, col: col_idx },
                            },
                        });
                    }
                }
            }
        }
        Shape::TextContainer { paragraphs } => {
            for (para_idx, paragraph) in paragraphs.iter().enumerate() {
                for (run_idx, run) in paragraph.runs.iter().enumerate() {
                    if !run.text.trim().is_empty() {
                        units.push(CollectedText {
                            text: run.text.clone(),
                            slot: SlotRef {
                                slide,
                                shape_path: path.clone(),
                                slot: SlotKind::Run { paragraph: para_idx, run: run_idx },
                            },
                        });
                    }
                }
            }
        }
        Shape::Other => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Paragraph, Run, Slide, TableCell, TableRow};

    fn text_container(texts: &[&str]) -> Shape {
        Shape::TextContainer {
            paragraphs: vec![Paragraph {
                runs: texts.iter().map(|t| Run { text: t.to_string() }).collect(),
            }],
        }
    }

    fn sample_document() -> Document {
        Document {
            slides: vec![
                Slide {
                    shapes: vec![
                        text_container(&["Title", "  ", "Subtitle"]),
                        Shape::Other,
                    ],
                },
                Slide {
                    shapes: vec![Shape::Group {
                        shapes: vec![
                            Shape::Table {
                                rows: vec![TableRow {
                                    cells: vec![
                                        TableCell { text: "Head".to_string() },
                                        TableCell { text: "".to_string() },
                                        TableCell { text: "Body".to_string() },
                                    ],
                                }],
                            },
                            text_container(&["Nested"]),
                        ],
                    }],
                },
            ],
        }
    }

    #[test]
    fn collects_in_document_order_skipping_blank_slots() {
        let doc = sample_document();
        let units = collect_units(&doc);

        let texts: Vec<&str> = units.iter().map(|u| u.text.as_str()).collect();
        assert_eq!(texts, vec!["Title", "Subtitle", "Head", "Body", "Nested"]);
    }

    #[test]
    fn slot_references_resolve_back_to_their_text() {
        let doc = sample_document();
        for unit in collect_units(&doc) {
            assert_eq!(doc.slot_text(&unit.slot).unwrap(), unit.text);
        }
    }

    #[test]
    fn analysis_and_collection_agree() {
        let doc = sample_document();
        let analysis = analyze_document(&doc);

        assert_eq!(analysis.pages, 2);
        assert_eq!(analysis.text_count, collect_units(&doc).len());
    }

    #[test]
    fn collection_is_idempotent() {
        let doc = sample_document();
        assert_eq!(collect_units(&doc), collect_units(&doc));
    }

    #[test]
    fn empty_document_yields_no_units() {
        let doc = Document {
            slides: vec![Slide { shapes: vec![Shape::Other, text_container(&["", "  "])] }],
        };
        assert!(collect_units(&doc).is_empty());
        assert_eq!(analyze_document(&doc).text_count, 0);
    }
}
