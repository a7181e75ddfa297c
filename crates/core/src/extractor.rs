use crate::config::OcrConfig;
use crate::error::ExtractError;
use crate::models::{BatchExtraction, Document, ExtractionMethod, ExtractionOutcome};
use regex::Regex;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Direct text extraction from the PDF's structure.
pub trait PdfReader {
    /// One entry per page, in page order. A page without a text layer is an
    /// empty string rather than an error.
    fn page_texts(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError>;
}

#[derive(Debug, Clone)]
pub struct RasterPage {
    pub number: u32,
    pub path: PathBuf,
}

/// Rendered page images. The backing directory, if any, is removed when this
/// value is dropped.
#[derive(Debug)]
pub struct RasterizedDocument {
    pages: Vec<RasterPage>,
    _workdir: Option<TempDir>,
}

impl RasterizedDocument {
    pub fn new(pages: Vec<RasterPage>, workdir: Option<TempDir>) -> Self {
        Self {
            pages,
            _workdir: workdir,
        }
    }

    pub fn pages(&self) -> &[RasterPage] {
        &self.pages
    }
}

pub trait Rasterizer {
    fn render_pages(&self, pdf: &Path) -> Result<RasterizedDocument, ExtractError>;
}

pub trait OcrEngine {
    fn recognize(&self, image: &Path) -> Result<String, ExtractError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfReader;

impl PdfReader for LopdfReader {
    fn page_texts(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
        let document = lopdf::Document::load_mem(bytes).map_err(|error| ExtractError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    tracing::debug!(page = page_no, %error, "page yielded no text");
                    String::new()
                }
            };
            pages.push(text);
        }

        Ok(pages)
    }
}

/// Renders pages to PNG with poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    pub program: PathBuf,
    pub dpi: u32,
}

impl Rasterizer for PdftoppmRasterizer {
    fn render_pages(&self, pdf: &Path) -> Result<RasterizedDocument, ExtractError> {
        let workdir = tempfile::Builder::new().prefix("manual-chat-pages-").tempdir()?;
        let prefix = workdir.path().join("page");

        let output = Command::new(&self.program)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(pdf)
            .arg(&prefix)
            .output()
            .map_err(|error| {
                ExtractError::Rasterize(format!("failed to run {}: {error}", self.program.display()))
            })?;

        if !output.status.success() {
            return Err(ExtractError::Rasterize(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut pages = std::fs::read_dir(workdir.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter_map(|path| raster_page_number(&path).map(|number| RasterPage { number, path }))
            .collect::<Vec<_>>();
        pages.sort_by_key(|page| page.number);

        if pages.is_empty() {
            return Err(ExtractError::Rasterize(format!(
                "{} produced no page images",
                self.program.display()
            )));
        }

        Ok(RasterizedDocument::new(pages, Some(workdir)))
    }
}

/// `pdftoppm` names pages `<prefix>-N.png`, zero-padding N to the page count's width.
fn raster_page_number(path: &Path) -> Option<u32> {
    let is_png = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
    if !is_png {
        return None;
    }
    path.file_stem()?.to_str()?.rsplit('-').next()?.parse().ok()
}

#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub program: PathBuf,
    pub language: String,
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &Path) -> Result<String, ExtractError> {
        let output = Command::new(&self.program)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|error| {
                ExtractError::OcrFailed(format!("failed to run {}: {error}", self.program.display()))
            })?;

        if !output.status.success() {
            return Err(ExtractError::OcrFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Turns uploaded PDFs into text: structural pass first, OCR only for
/// documents whose structural text is empty.
pub struct Extractor<R = LopdfReader, S = PdftoppmRasterizer, O = TesseractOcr> {
    reader: R,
    rasterizer: S,
    ocr: O,
}

impl Extractor {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(
            LopdfReader,
            PdftoppmRasterizer {
                program: config.pdftoppm_path.clone(),
                dpi: config.dpi,
            },
            TesseractOcr {
                program: config.tesseract_path.clone(),
                language: config.language.clone(),
            },
        )
    }
}

impl<R, S, O> Extractor<R, S, O>
where
    R: PdfReader,
    S: Rasterizer,
    O: OcrEngine,
{
    pub fn new(reader: R, rasterizer: S, ocr: O) -> Self {
        Self {
            reader,
            rasterizer,
            ocr,
        }
    }

    /// Never fails: faults are logged and reported through the outcome's
    /// method, with whatever text could be recovered.
    pub fn extract(&self, document: &Document) -> ExtractionOutcome {
        let checksum = document.checksum();
        if document.is_empty() {
            tracing::info!(document = %document.name, %checksum, "empty upload, skipping extraction");
            return ExtractionOutcome {
                document: document.name.clone(),
                checksum,
                page_count: 0,
                text: String::new(),
                method: ExtractionMethod::Empty,
            };
        }

        let pages = match self.reader.page_texts(&document.bytes) {
            Ok(pages) => pages,
            Err(error) => {
                tracing::warn!(document = %document.name, %error, "structural extraction failed");
                Vec::new()
            }
        };

        let mut text = String::new();
        for page in pages.iter().filter(|page| !page.trim().is_empty()) {
            text.push_str(page);
            if !page.ends_with('\n') {
                text.push('\n');
            }
        }

        if !text.trim().is_empty() {
            tracing::info!(
                document = %document.name,
                %checksum,
                pages = pages.len(),
                chars = text.chars().count(),
                "extracted text layer"
            );
            return ExtractionOutcome {
                document: document.name.clone(),
                checksum,
                page_count: pages.len(),
                text,
                method: ExtractionMethod::Structural,
            };
        }

        tracing::info!(document = %document.name, %checksum, "no text layer, falling back to ocr");
        match self.ocr_document(document) {
            Ok((page_count, text)) => {
                tracing::info!(
                    document = %document.name,
                    %checksum,
                    pages = page_count,
                    chars = text.chars().count(),
                    "ocr finished"
                );
                ExtractionOutcome {
                    document: document.name.clone(),
                    checksum,
                    page_count,
                    text,
                    method: ExtractionMethod::Ocr,
                }
            }
            Err(error) => {
                tracing::warn!(document = %document.name, %checksum, %error, "ocr fallback failed");
                ExtractionOutcome {
                    document: document.name.clone(),
                    checksum,
                    page_count: pages.len().max(document.page_count()),
                    text: String::new(),
                    method: ExtractionMethod::Failed(error.to_string()),
                }
            }
        }
    }

    /// Extracts each document in order. The OCR decision is made per
    /// document, and one document's failure does not affect the others.
    pub fn extract_batch(&self, documents: &[Document]) -> BatchExtraction {
        BatchExtraction {
            outcomes: documents.iter().map(|document| self.extract(document)).collect(),
        }
    }

    fn ocr_document(&self, document: &Document) -> Result<(usize, String), ExtractError> {
        let mut transient = tempfile::Builder::new()
            .prefix("manual-chat-")
            .suffix(".pdf")
            .tempfile()?;
        transient.write_all(&document.bytes)?;
        transient.flush()?;

        let rendered = self.rasterizer.render_pages(transient.path())?;

        let mut text = String::new();
        for page in rendered.pages() {
            let recognized = self.ocr.recognize(&page.path)?;
            tracing::debug!(page = page.number, chars = recognized.len(), "ocr page");
            text.push_str(recognized.trim_end());
            text.push('\n');
        }

        let blank_runs = Regex::new(r"\n{3,}")?;
        let text = blank_runs.replace_all(&text, "\n\n");
        let text = if text.trim().is_empty() {
            String::new()
        } else {
            text.into_owned()
        };

        Ok((rendered.pages().len(), text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeReader {
        pages: HashMap<String, Result<Vec<String>, String>>,
        calls: Mutex<usize>,
    }

    impl FakeReader {
        fn new(entries: &[(&str, Result<Vec<&str>, &str>)]) -> Self {
            let pages = entries
                .iter()
                .map(|(key, pages)| {
                    let key = key.to_string();
                    let value = pages
                        .clone()
                        .map(|pages| pages.into_iter().map(str::to_string).collect())
                        .map_err(str::to_string);
                    (key, value)
                })
                .collect();
            Self {
                pages,
                calls: Mutex::new(0),
            }
        }
    }

    impl PdfReader for FakeReader {
        fn page_texts(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
            *self.calls.lock().expect("lock") += 1;
            let key = String::from_utf8_lossy(bytes).to_string();
            match self.pages.get(&key) {
                Some(Ok(pages)) => Ok(pages.clone()),
                Some(Err(reason)) => Err(ExtractError::PdfParse(reason.clone())),
                None => Err(ExtractError::PdfParse("unknown document".to_string())),
            }
        }
    }

    /// Reads the page count from the transient file's content.
    struct FakeRasterizer {
        pages_per_pdf: HashMap<String, u32>,
        calls: Mutex<usize>,
        fail: bool,
    }

    impl Rasterizer for FakeRasterizer {
        fn render_pages(&self, pdf: &Path) -> Result<RasterizedDocument, ExtractError> {
            *self.calls.lock().expect("lock") += 1;
            assert!(pdf.exists(), "transient pdf should exist while rendering");
            if self.fail {
                return Err(ExtractError::Rasterize("poppler missing".to_string()));
            }
            let content = std::fs::read_to_string(pdf)?;
            let count = self.pages_per_pdf.get(&content).copied().unwrap_or(1);
            let pages = (1..=count)
                .map(|number| RasterPage {
                    number,
                    path: PathBuf::from(format!("{content}-{number}.png")),
                })
                .collect();
            Ok(RasterizedDocument::new(pages, None))
        }
    }

    struct FakeOcr {
        texts: HashMap<PathBuf, String>,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl OcrEngine for FakeOcr {
        fn recognize(&self, image: &Path) -> Result<String, ExtractError> {
            self.seen.lock().expect("lock").push(image.to_path_buf());
            self.texts
                .get(image)
                .cloned()
                .ok_or_else(|| ExtractError::OcrFailed(format!("unreadable {}", image.display())))
        }
    }

    fn fake_ocr(entries: &[(&str, &str)]) -> FakeOcr {
        FakeOcr {
            texts: entries
                .iter()
                .map(|(path, text)| (PathBuf::from(path), text.to_string()))
                .collect(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn rasterizer(entries: &[(&str, u32)]) -> FakeRasterizer {
        FakeRasterizer {
            pages_per_pdf: entries.iter().map(|(key, count)| (key.to_string(), *count)).collect(),
            calls: Mutex::new(0),
            fail: false,
        }
    }

    #[test]
    fn zero_byte_document_skips_everything() {
        let extractor = Extractor::new(FakeReader::new(&[]), rasterizer(&[]), fake_ocr(&[]));

        let outcome = extractor.extract(&Document::new("empty.pdf", Vec::new()));

        assert_eq!(outcome.method, ExtractionMethod::Empty);
        assert!(outcome.text.is_empty());
        assert_eq!(*extractor.reader.calls.lock().expect("lock"), 0);
        assert_eq!(*extractor.rasterizer.calls.lock().expect("lock"), 0);
        assert!(extractor.ocr.seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn outcome_carries_checksum_of_the_upload() {
        let reader = FakeReader::new(&[("text-pdf", Ok(vec!["Roland TR-8S manual"])), ("scan", Ok(vec![""]))]);
        let extractor = Extractor::new(reader, rasterizer(&[]), fake_ocr(&[]));
        let text_pdf = Document::new("tr8s.pdf", b"text-pdf".to_vec());

        let empty = extractor.extract(&Document::new("empty.pdf", Vec::new()));
        let structural = extractor.extract(&text_pdf);
        let failed = extractor.extract(&Document::new("scan.pdf", b"scan".to_vec()));

        assert_eq!(
            empty.checksum,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(structural.checksum, text_pdf.checksum());
        assert_eq!(structural.checksum.len(), 64);
        assert!(matches!(failed.method, ExtractionMethod::Failed(_)));
        assert_ne!(failed.checksum, structural.checksum);
    }

    #[test]
    fn text_layer_is_used_without_ocr() {
        let reader = FakeReader::new(&[("text-pdf", Ok(vec!["Roland TR-8S manual", "", "Page three\n"]))]);
        let extractor = Extractor::new(reader, rasterizer(&[]), fake_ocr(&[]));

        let outcome = extractor.extract(&Document::new("tr8s.pdf", b"text-pdf".to_vec()));

        assert_eq!(outcome.method, ExtractionMethod::Structural);
        assert_eq!(outcome.text, "Roland TR-8S manual\nPage three\n");
        assert_eq!(outcome.page_count, 3);
        assert_eq!(*extractor.rasterizer.calls.lock().expect("lock"), 0);
        assert!(extractor.ocr.seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn empty_text_layer_runs_ocr_once_per_page_in_order() {
        let reader = FakeReader::new(&[("scan", Ok(vec!["", "  "]))]);
        let ocr = fake_ocr(&[("scan-1.png", "Warranty\n\n\n\n"), ("scan-2.png", "Void\x0c")]);
        let extractor = Extractor::new(reader, rasterizer(&[("scan", 2)]), ocr);

        let outcome = extractor.extract(&Document::new("scan.pdf", b"scan".to_vec()));

        assert_eq!(outcome.method, ExtractionMethod::Ocr);
        assert_eq!(outcome.text, "Warranty\nVoid\n");
        assert_eq!(outcome.page_count, 2);
        let seen = extractor.ocr.seen.lock().expect("lock").clone();
        assert_eq!(seen, vec![PathBuf::from("scan-1.png"), PathBuf::from("scan-2.png")]);
    }

    #[test]
    fn unparseable_pdf_still_attempts_ocr() {
        let reader = FakeReader::new(&[("garbled", Err("xref broken"))]);
        let ocr = fake_ocr(&[("garbled-1.png", "Recovered text")]);
        let extractor = Extractor::new(reader, rasterizer(&[("garbled", 1)]), ocr);

        let outcome = extractor.extract(&Document::new("garbled.pdf", b"garbled".to_vec()));

        assert_eq!(outcome.method, ExtractionMethod::Ocr);
        assert_eq!(outcome.text, "Recovered text\n");
    }

    #[test]
    fn ocr_failure_degrades_to_empty_text() {
        let reader = FakeReader::new(&[("scan", Ok(vec![""]))]);
        let extractor = Extractor::new(reader, rasterizer(&[("scan", 2)]), fake_ocr(&[("scan-1.png", "only one")]));

        let outcome = extractor.extract(&Document::new("scan.pdf", b"scan".to_vec()));

        assert!(matches!(outcome.method, ExtractionMethod::Failed(_)));
        assert!(outcome.text.is_empty());
        assert!(outcome.used_ocr());
    }

    #[test]
    fn rasterizer_failure_degrades_to_empty_text() {
        let reader = FakeReader::new(&[("scan", Ok(vec![""]))]);
        let mut failing = rasterizer(&[]);
        failing.fail = true;
        let extractor = Extractor::new(reader, failing, fake_ocr(&[]));

        let outcome = extractor.extract(&Document::new("scan.pdf", b"scan".to_vec()));

        assert!(matches!(outcome.method, ExtractionMethod::Failed(reason) if reason.contains("poppler")));
        assert!(extractor.ocr.seen.lock().expect("lock").is_empty());
    }

    #[test]
    fn ocr_decision_is_made_per_document() {
        let reader = FakeReader::new(&[
            ("text-pdf", Ok(vec!["Roland TR-8S manual"])),
            ("scan", Ok(vec![""])),
        ]);
        let ocr = fake_ocr(&[("scan-1.png", "Warranty Void")]);
        let extractor = Extractor::new(reader, rasterizer(&[("scan", 1)]), ocr);

        let batch = extractor.extract_batch(&[
            Document::new("tr8s.pdf", b"text-pdf".to_vec()),
            Document::new("warranty.pdf", b"scan".to_vec()),
        ]);

        assert_eq!(batch.outcomes[0].method, ExtractionMethod::Structural);
        assert_eq!(batch.outcomes[1].method, ExtractionMethod::Ocr);
        assert_eq!(*extractor.rasterizer.calls.lock().expect("lock"), 1);
        let text = batch.text();
        assert!(text.contains("Roland TR-8S manual"));
        assert!(text.contains("Warranty Void"));
        assert_eq!(batch.failures().count(), 0);
    }

    #[test]
    fn raster_page_numbers_parse_padded_names() {
        assert_eq!(raster_page_number(Path::new("/tmp/x/page-01.png")), Some(1));
        assert_eq!(raster_page_number(Path::new("/tmp/x/page-12.png")), Some(12));
        assert_eq!(raster_page_number(Path::new("/tmp/x/page-1.ppm")), None);
    }

    #[test]
    fn lopdf_reader_rejects_garbage() {
        assert!(LopdfReader.page_texts(b"%PDF-1.4\n%broken").is_err());
    }
}
