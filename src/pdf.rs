use std::collections::HashMap;
use std::path::Path;

use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};

use crate::sources::SourceError;

/// One event from a document's content stream, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum PdfToken {
    /// Start of a new page.
    Page(u32),
    /// A text run at a vertical position, measured top-down so that
    /// ascending position is reading order.
    Text { text: String, y: f64 },
}

/// Rebuilds line text from unordered positioned-text tokens.
///
/// Fragments are grouped by their vertical-position key exactly as emitted
/// (no rounding) and kept in encounter order within a group. Page markers
/// are observed but do not flush: fragments on different pages that share a
/// key end up on one line, which matches the upstream behavior this layer
/// reproduces.
#[derive(Debug, Default)]
pub struct RowAssembler {
    rows: HashMap<String, Vec<String>>,
}

impl RowAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: PdfToken) {
        match token {
            PdfToken::Page(_) => {}
            PdfToken::Text { text, y } => {
                self.rows.entry(y.to_string()).or_default().push(text);
            }
        }
    }

    /// Produce the full text: rows sorted by the numeric value of their key
    /// (not lexical order), fragments joined with no separator, rows joined
    /// with newlines. Zero tokens yield an empty string.
    pub fn finish(self) -> String {
        let mut keyed: Vec<(f64, Vec<String>)> = self
            .rows
            .into_iter()
            .map(|(key, frags)| (key.parse::<f64>().unwrap_or(f64::MAX), frags))
            .collect();
        keyed.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        keyed
            .into_iter()
            .map(|(_, frags)| frags.concat())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Extract the text of a PDF file in top-to-bottom reading order.
pub fn extract_text(path: &Path) -> Result<String, SourceError> {
    let mut rows = RowAssembler::new();
    for_each_token(path, |token| rows.push(token))?;
    Ok(rows.finish())
}

/// Walk a PDF's pages and emit positioned-text tokens into `sink`.
///
/// The text cursor is tracked through the text-positioning operators
/// (`BT`, `Tm`, `Td`, `TD`, `TL`, `T*`); the show-text operators
/// (`Tj`, `TJ`, `'`, `"`) emit a token at the current position. Any
/// error from the underlying document is surfaced as `DocumentParse`.
pub fn for_each_token<F>(path: &Path, mut sink: F) -> Result<(), SourceError>
where
    F: FnMut(PdfToken),
{
    let doc = Document::load(path).map_err(|e| SourceError::DocumentParse(e.to_string()))?;

    for (page_no, page_id) in doc.get_pages() {
        sink(PdfToken::Page(page_no));
        let height = page_height(&doc, page_id);
        let data = doc
            .get_page_content(page_id)
            .map_err(|e| SourceError::DocumentParse(e.to_string()))?;
        let content =
            Content::decode(&data).map_err(|e| SourceError::DocumentParse(e.to_string()))?;

        // Vertical components of the text matrix and line matrix.
        let mut text_y = 0.0f64;
        let mut line_y = 0.0f64;
        let mut leading = 0.0f64;

        for op in &content.operations {
            match op.operator.as_str() {
                "BT" => {
                    text_y = 0.0;
                    line_y = 0.0;
                }
                "Tm" => {
                    if let Some(ty) = op.operands.get(5).and_then(number) {
                        text_y = ty;
                        line_y = ty;
                    }
                }
                "Td" => {
                    if let Some(ty) = op.operands.get(1).and_then(number) {
                        line_y += ty;
                        text_y = line_y;
                    }
                }
                "TD" => {
                    if let Some(ty) = op.operands.get(1).and_then(number) {
                        leading = -ty;
                        line_y += ty;
                        text_y = line_y;
                    }
                }
                "TL" => {
                    if let Some(l) = op.operands.first().and_then(number) {
                        leading = l;
                    }
                }
                "T*" => {
                    line_y -= leading;
                    text_y = line_y;
                }
                "Tj" => {
                    if let Some(text) = op.operands.first().and_then(text_operand) {
                        emit(&mut sink, text, height, text_y);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(parts)) = op.operands.first() {
                        let text: String =
                            parts.iter().filter_map(text_operand).collect();
                        emit(&mut sink, text, height, text_y);
                    }
                }
                "'" => {
                    line_y -= leading;
                    text_y = line_y;
                    if let Some(text) = op.operands.first().and_then(text_operand) {
                        emit(&mut sink, text, height, text_y);
                    }
                }
                "\"" => {
                    line_y -= leading;
                    text_y = line_y;
                    if let Some(text) = op.operands.get(2).and_then(text_operand) {
                        emit(&mut sink, text, height, text_y);
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn emit<F: FnMut(PdfToken)>(sink: &mut F, text: String, height: f64, text_y: f64) {
    if !text.is_empty() {
        sink(PdfToken::Text {
            text,
            y: height - text_y,
        });
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn text_operand(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(decode_string(bytes)),
        _ => None,
    }
}

/// Decode a PDF string operand. BOM-prefixed strings are UTF-16BE; anything
/// else is mapped byte-for-byte, which covers the common unencoded
/// Type1/TrueType case. Per-font CMap lookup is out of scope for this reader.
fn decode_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}

/// Height of the page's MediaBox, following Parent links when the box is
/// inherited. Falls back to US Letter.
fn page_height(doc: &Document, page_id: ObjectId) -> f64 {
    let mut current = page_id;
    for _ in 0..16 {
        let Ok(dict) = doc.get_object(current).and_then(Object::as_dict) else {
            break;
        };
        if let Ok(obj) = dict.get(b"MediaBox") {
            let obj = resolve(doc, obj);
            if let Ok(media_box) = obj.as_array() {
                if media_box.len() == 4 {
                    let y0 = number(&media_box[1]).unwrap_or(0.0);
                    let y1 = number(&media_box[3]).unwrap_or(792.0);
                    return y1 - y0;
                }
            }
        }
        match dict.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => current = parent,
            Err(_) => break,
        }
    }
    792.0
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj.as_reference() {
        Ok(id) => doc.get_object(id).unwrap_or(obj),
        Err(_) => obj,
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::write_sample_pdf;
    use super::*;

    fn text_token(text: &str, y: f64) -> PdfToken {
        PdfToken::Text {
            text: text.to_string(),
            y,
        }
    }

    #[test]
    fn rows_sort_numerically_not_lexically() {
        let mut rows = RowAssembler::new();
        rows.push(text_token("ten", 10.0));
        rows.push(text_token("two", 2.0));
        rows.push(text_token("one", 1.0));
        // a lexical key sort would produce "one\nten\ntwo"
        assert_eq!(rows.finish(), "one\ntwo\nten");
    }

    #[test]
    fn empty_stream_yields_empty_string() {
        assert_eq!(RowAssembler::new().finish(), "");
    }

    #[test]
    fn fragments_concatenate_in_encounter_order() {
        let mut rows = RowAssembler::new();
        rows.push(text_token("Hel", 5.0));
        rows.push(text_token("lo ", 5.0));
        rows.push(text_token("world", 5.0));
        assert_eq!(rows.finish(), "Hello world");
    }

    #[test]
    fn page_markers_do_not_flush_shared_keys() {
        let mut rows = RowAssembler::new();
        rows.push(PdfToken::Page(1));
        rows.push(text_token("end of page one ", 700.0));
        rows.push(PdfToken::Page(2));
        rows.push(text_token("start of page two", 700.0));
        assert_eq!(rows.finish(), "end of page one start of page two");
    }

    #[test]
    fn extracts_lines_in_reading_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.pdf");
        // emitted bottom line first: reading order must still win
        write_sample_pdf(&path, &[("second line", 700), ("first line", 720)]);
        let text = extract_text(&path).unwrap();
        assert_eq!(text, "first line\nsecond line");
    }

    #[test]
    fn missing_file_is_a_parse_error() {
        let err = extract_text(Path::new("/nonexistent/nope.pdf")).unwrap_err();
        assert!(matches!(err, SourceError::DocumentParse(_)));
    }
}
