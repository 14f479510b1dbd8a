//! Text extraction from documents
//!
//! Pure Rust extraction, no system libraries:
//! - PDF via pdf-extract
//! - Excel (.xlsx, .xls) via calamine
//! - Word (.docx) via docx-rs
//! - Plain text formats read directly
//!
//! These functions block; callers run them on a blocking thread.

use calamine::{open_workbook, Reader, Xls, Xlsx};
use std::path::Path;

use crate::error::ReadError;
use crate::scan::model::SkipReason;

/// Upper bound on extracted text kept in memory, in characters
const MAX_EXTRACTED_CHARS: usize = 500_000;

/// What kind of reader a file needs, decided by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Pdf,
    Docx,
    Xlsx,
    Xls,
    Image,
    Unsupported,
}

impl DocumentKind {
    pub fn detect(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => DocumentKind::Pdf,
            "docx" => DocumentKind::Docx,
            "xlsx" | "xlsm" => DocumentKind::Xlsx,
            "xls" => DocumentKind::Xls,
            e if is_plain_text_ext(e) => DocumentKind::PlainText,
            _ => {
                let mime = mime_guess::from_path(path).first_raw().unwrap_or("");
                if mime.starts_with("image/") {
                    DocumentKind::Image
                } else {
                    DocumentKind::Unsupported
                }
            }
        }
    }

    pub fn skip_reason(&self) -> SkipReason {
        match self {
            DocumentKind::PlainText => SkipReason::Text,
            DocumentKind::Pdf => SkipReason::Pdf,
            DocumentKind::Docx => SkipReason::Docx,
            DocumentKind::Xlsx | DocumentKind::Xls => SkipReason::Xlsx,
            DocumentKind::Image => SkipReason::Image,
            DocumentKind::Unsupported => SkipReason::Unsupported,
        }
    }
}

fn is_plain_text_ext(ext: &str) -> bool {
    matches!(
        ext,
        "txt" | "md" | "markdown" | "csv" | "tsv" | "json" | "xml" | "yaml" | "yml" | "log"
            | "ini" | "cfg" | "conf" | "toml" | "html" | "htm" | "rtf" | "tex" | "sh" | "rs"
            | "ts" | "js" | "py" | "sql"
    )
}

/// Read a UTF-8 text file.
pub fn read_plain_text(path: &Path) -> Result<String, ReadError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ReadError::new(SkipReason::Text, format!("Failed to read text file: {}", e)))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| ReadError::new(SkipReason::Text, "File is not valid UTF-8 text"))?;

    non_empty(truncate_text(&text), SkipReason::Text)
}

/// Extract text from a PDF.
///
/// pdf-extract can panic on malformed fonts, so the call is wrapped in
/// `catch_unwind`.
pub fn extract_pdf(path: &Path) -> Result<String, ReadError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ReadError::new(SkipReason::Pdf, format!("Failed to read PDF file: {}", e)))?;

    let text = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem(&bytes)
    })) {
        Ok(Ok(t)) => t,
        Ok(Err(e)) => {
            tracing::warn!(path = %path.display(), "PDF extraction failed: {}", e);
            return Err(ReadError::new(SkipReason::Pdf, format!("PDF extraction failed: {}", e)));
        }
        Err(_) => {
            tracing::error!(path = %path.display(), "PDF extraction panicked");
            return Err(ReadError::new(
                SkipReason::Pdf,
                "PDF extraction panicked, likely malformed fonts",
            ));
        }
    };

    let text = clean_text(&text);
    if text.is_empty() {
        // Scanned PDFs have no text layer
        return Err(ReadError::new(
            SkipReason::Pdf,
            "PDF has no extractable text (likely scanned)",
        ));
    }

    tracing::debug!(path = %path.display(), chars = text.len(), "PDF text extracted");
    Ok(truncate_text(&text))
}

/// Extract cell text from every sheet of an .xlsx or .xls workbook.
pub fn extract_spreadsheet(path: &Path, kind: DocumentKind) -> Result<String, ReadError> {
    let open_err = |e: String| ReadError::new(SkipReason::Xlsx, format!("Failed to open workbook: {}", e));

    let text = if kind == DocumentKind::Xls {
        let mut workbook: Xls<_> =
            open_workbook(path).map_err(|e: calamine::XlsError| open_err(e.to_string()))?;
        sheets_to_text(&mut workbook)
    } else {
        let mut workbook: Xlsx<_> =
            open_workbook(path).map_err(|e: calamine::XlsxError| open_err(e.to_string()))?;
        sheets_to_text(&mut workbook)
    };

    non_empty(truncate_text(&clean_text(&text)), SkipReason::Xlsx)
}

fn sheets_to_text<RS, R>(workbook: &mut R) -> String
where
    RS: std::io::Read + std::io::Seek,
    R: Reader<RS>,
{
    let mut all_text = String::new();
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

    for sheet_name in &sheet_names {
        if let Ok(range) = workbook.worksheet_range(sheet_name) {
            all_text.push_str(&format!("\n=== Sheet: {} ===\n", sheet_name));

            for row in range.rows() {
                let cells: Vec<String> = row
                    .iter()
                    .map(|cell| cell.to_string())
                    .filter(|s| !s.is_empty())
                    .collect();

                if !cells.is_empty() {
                    all_text.push_str(&cells.join(" | "));
                    all_text.push('\n');
                }
            }
        }
    }

    all_text
}

/// Extract paragraph and table text from a .docx file.
pub fn extract_docx(path: &Path) -> Result<String, ReadError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ReadError::new(SkipReason::Docx, format!("Failed to read DOCX file: {}", e)))?;
    let doc = docx_rs::read_docx(&bytes)
        .map_err(|e| ReadError::new(SkipReason::Docx, format!("Failed to parse DOCX: {}", e)))?;

    let mut all_text = String::new();
    for child in &doc.document.children {
        docx_child_text(child, &mut all_text);
    }

    non_empty(truncate_text(&clean_text(&all_text)), SkipReason::Docx)
}

fn docx_child_text(element: &docx_rs::DocumentChild, output: &mut String) {
    match element {
        docx_rs::DocumentChild::Paragraph(para) => {
            paragraph_text(para, output);
            output.push('\n');
        }
        docx_rs::DocumentChild::Table(table) => {
            for row in &table.rows {
                let docx_rs::TableChild::TableRow(tr) = row;
                for cell in &tr.cells {
                    let docx_rs::TableRowChild::TableCell(tc) = cell;
                    for child in &tc.children {
                        if let docx_rs::TableCellContent::Paragraph(para) = child {
                            paragraph_text(para, output);
                            output.push_str(" | ");
                        }
                    }
                }
                output.push('\n');
            }
        }
        _ => {}
    }
}

fn paragraph_text(para: &docx_rs::Paragraph, output: &mut String) {
    for child in &para.children {
        match child {
            docx_rs::ParagraphChild::Run(run) => run_text(run, output),
            docx_rs::ParagraphChild::Hyperlink(link) => {
                for inner in &link.children {
                    if let docx_rs::ParagraphChild::Run(run) = inner {
                        run_text(run, output);
                    }
                }
            }
            _ => {}
        }
    }
}

fn run_text(run: &docx_rs::Run, output: &mut String) {
    for run_child in &run.children {
        if let docx_rs::RunChild::Text(text) = run_child {
            output.push_str(&text.text);
        }
    }
}

/// Trim lines and drop blank ones
fn clean_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_text(text: &str) -> String {
    match text.char_indices().nth(MAX_EXTRACTED_CHARS) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

fn non_empty(text: String, reason: SkipReason) -> Result<String, ReadError> {
    if text.trim().is_empty() {
        Err(ReadError::new(reason, "No text content found"))
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_detect_kinds() {
        assert_eq!(DocumentKind::detect(Path::new("a/b.PDF")), DocumentKind::Pdf);
        assert_eq!(DocumentKind::detect(Path::new("notes.md")), DocumentKind::PlainText);
        assert_eq!(DocumentKind::detect(Path::new("book.xls")), DocumentKind::Xls);
        assert_eq!(DocumentKind::detect(Path::new("photo.jpeg")), DocumentKind::Image);
        assert_eq!(DocumentKind::detect(Path::new("archive.zip")), DocumentKind::Unsupported);
        assert_eq!(DocumentKind::detect(Path::new("Makefile")), DocumentKind::Unsupported);
    }

    #[test]
    fn test_read_plain_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "Invoice from ACME\n").unwrap();
        assert_eq!(read_plain_text(&path).unwrap(), "Invoice from ACME\n");
    }

    #[test]
    fn test_invalid_utf8_is_text_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bin.txt");
        std::fs::write(&path, [0xFF, 0xFE, 0x00, 0xC3]).unwrap();
        let err = read_plain_text(&path).unwrap_err();
        assert_eq!(err.reason, SkipReason::Text);
    }

    #[test]
    fn test_empty_text_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "   \n").unwrap();
        assert!(read_plain_text(&path).is_err());
    }

    #[test]
    fn test_garbage_pdf_is_pdf_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not really a pdf").unwrap();
        let err = extract_pdf(&path).unwrap_err();
        assert_eq!(err.reason, SkipReason::Pdf);
    }

    #[test]
    fn test_garbage_docx_and_xlsx() {
        let dir = TempDir::new().unwrap();
        let docx = dir.path().join("broken.docx");
        let xlsx = dir.path().join("broken.xlsx");
        std::fs::write(&docx, b"zip? no").unwrap();
        std::fs::write(&xlsx, b"zip? no").unwrap();

        assert_eq!(extract_docx(&docx).unwrap_err().reason, SkipReason::Docx);
        assert_eq!(
            extract_spreadsheet(&xlsx, DocumentKind::Xlsx).unwrap_err().reason,
            SkipReason::Xlsx
        );
    }

    #[test]
    fn test_missing_file() {
        let err = read_plain_text(&PathBuf::from("/definitely/not/here.txt")).unwrap_err();
        assert_eq!(err.reason, SkipReason::Text);
    }

    #[test]
    fn test_clean_and_truncate() {
        assert_eq!(clean_text("  a \n\n\t b  \n"), "a\nb");
        let long = "é".repeat(MAX_EXTRACTED_CHARS + 10);
        assert_eq!(truncate_text(&long).chars().count(), MAX_EXTRACTED_CHARS);
    }
}
