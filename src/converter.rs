//! Conversion functions and the registry that maps kinds to them.
//!
//! A [`Converter`] is a pure function from staged inputs and options to
//! output bytes. Converters run on the blocking thread pool and talk back to
//! the engine only through their [`JobContext`].

use crate::error::JobError;
use crate::job::JobId;
use crate::store::JobStore;
use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Kind name of the built-in SVG to PDF conversion.
pub const SVG_TO_PDF: &str = "svg-to-pdf";

/// One staged input file.
#[derive(Debug, Clone)]
pub struct InputFile {
    /// Client-supplied name. Untrusted; only ever used after sanitization.
    pub name: String,
    pub data: Vec<u8>,
}

/// Conversion parameters plus already-staged inputs.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub kind: String,
    pub options: serde_json::Value,
    pub inputs: Vec<InputFile>,
}

impl ConversionRequest {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            options: serde_json::Value::Null,
            inputs: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.inputs.push(InputFile {
            name: name.into(),
            data: data.into(),
        });
        self
    }
}

/// Extension and media type of a conversion's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub extension: String,
    pub content_type: String,
}

impl OutputFormat {
    pub fn new(extension: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
            content_type: content_type.into(),
        }
    }

    pub fn pdf() -> Self {
        Self::new("pdf", "application/pdf")
    }
}

/// Handle a running conversion uses to report progress and observe
/// cancellation.
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    store: Option<Arc<JobStore>>,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(job_id: JobId, store: Arc<JobStore>, cancel: CancellationToken) -> Self {
        Self {
            job_id,
            store: Some(store),
            cancel,
        }
    }

    /// Context not attached to any store; progress reports are dropped.
    pub fn detached() -> Self {
        Self {
            job_id: uuid::Uuid::nil(),
            store: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Records a progress estimate in percent. Values that would move
    /// progress backwards, or arrive after the job finished, are ignored.
    pub fn report_progress(&self, percent: u8) {
        if let Some(store) = &self.store {
            if store.update(&self.job_id, |r| r.set_progress(percent)) == Some(true) {
                debug!(job_id = %self.job_id, progress = percent, "Job progress");
            }
        }
    }

    /// Long conversions should poll this and return early when set.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A conversion tool.
#[cfg_attr(test, mockall::automock)]
pub trait Converter: Send + Sync {
    /// Synchronous validation run at submission, before a record exists.
    fn validate(&self, _request: &ConversionRequest) -> Result<(), JobError> {
        Ok(())
    }

    /// Produces the output bytes. Runs on a blocking thread.
    fn convert(&self, request: &ConversionRequest, ctx: &JobContext) -> Result<Vec<u8>, JobError>;
}

struct FnConverter<F>(F);

impl<F> Converter for FnConverter<F>
where
    F: Fn(&ConversionRequest, &JobContext) -> Result<Vec<u8>, JobError> + Send + Sync,
{
    fn convert(&self, request: &ConversionRequest, ctx: &JobContext) -> Result<Vec<u8>, JobError> {
        (self.0)(request, ctx)
    }
}

/// Wraps a closure as a converter.
pub fn from_fn<F>(f: F) -> Arc<dyn Converter>
where
    F: Fn(&ConversionRequest, &JobContext) -> Result<Vec<u8>, JobError> + Send + Sync + 'static,
{
    Arc::new(FnConverter(f))
}

#[derive(Clone)]
pub struct RegisteredConverter {
    pub converter: Arc<dyn Converter>,
    pub format: OutputFormat,
}

/// Maps conversion kind names to converters.
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    entries: HashMap<String, RegisteredConverter>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the converters shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(SVG_TO_PDF, OutputFormat::pdf(), Arc::new(SvgToPdfConverter::new()));
        registry
    }

    /// Registers `converter` under `kind`, replacing any previous entry.
    pub fn register(&mut self, kind: impl Into<String>, format: OutputFormat, converter: Arc<dyn Converter>) {
        self.entries
            .insert(kind.into(), RegisteredConverter { converter, format });
    }

    pub fn get(&self, kind: &str) -> Option<&RegisteredConverter> {
        self.entries.get(kind)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// SVG to PDF converter using svg2pdf for true vector fidelity.
///
/// This converter uses the svg2pdf crate which converts SVG to PDF
/// maintaining complete vector graphics (no rasterization).
pub struct SvgToPdfConverter;

impl SvgToPdfConverter {
    /// Creates a new converter with default options.
    pub fn new() -> Self {
        Self
    }

    /// Renders SVG markup to PDF bytes.
    ///
    /// # Errors
    ///
    /// - SVG parsing errors (malformed XML, unsupported features)
    /// - Invalid (zero or negative) document dimensions
    pub fn render(&self, svg_content: &str) -> anyhow::Result<Vec<u8>> {
        // Parse SVG to usvg tree
        let tree = usvg::Tree::from_str(svg_content, &usvg::Options::default())
            .context("Failed to parse SVG content")?;

        let size = tree.size();
        if size.width() <= 0.0 || size.height() <= 0.0 {
            anyhow::bail!(
                "Invalid SVG dimensions: {}x{}",
                size.width(),
                size.height()
            );
        }

        debug!(
            "SVG parsed successfully: {}x{} units",
            size.width(),
            size.height()
        );

        Ok(svg2pdf::to_pdf(
            &tree,
            svg2pdf::ConversionOptions::default(),
            svg2pdf::PageOptions::default(),
        ))
    }
}

impl Default for SvgToPdfConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter for SvgToPdfConverter {
    fn validate(&self, request: &ConversionRequest) -> Result<(), JobError> {
        match request.inputs.as_slice() {
            [input] if !input.data.is_empty() => Ok(()),
            [_] => Err(JobError::validation("input file is empty")),
            inputs => Err(JobError::validation(format!(
                "{} expects exactly one input file, got {}",
                SVG_TO_PDF,
                inputs.len()
            ))),
        }
    }

    fn convert(&self, request: &ConversionRequest, ctx: &JobContext) -> Result<Vec<u8>, JobError> {
        let input = request
            .inputs
            .first()
            .ok_or_else(|| JobError::bad_input("missing input file"))?;
        let svg = std::str::from_utf8(&input.data)
            .map_err(|_| JobError::bad_input("SVG input is not valid UTF-8"))?;
        ctx.report_progress(10);

        // Parse and layout failures are the input's fault, not ours.
        let pdf = self
            .render(svg)
            .map_err(|e| JobError::bad_input(format!("{:#}", e)))?;
        ctx.report_progress(90);

        info!(job_id = %ctx.job_id(), bytes = pdf.len(), "PDF export complete (VECTOR)");
        Ok(pdf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    const SQUARE: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100">
            <rect x="10" y="10" width="80" height="80" fill="blue"/>
        </svg>"#;

    #[test]
    fn test_convert_simple_svg() {
        let converter = SvgToPdfConverter::new();
        let request = ConversionRequest::new(SVG_TO_PDF).with_input("square.svg", SQUARE);

        converter.validate(&request).unwrap();
        let pdf = converter.convert(&request, &JobContext::detached()).unwrap();
        assert!(pdf.starts_with(b"%PDF"));
    }

    #[test]
    fn test_invalid_svg() {
        let converter = SvgToPdfConverter::new();
        let request = ConversionRequest::new(SVG_TO_PDF).with_input("bad.svg", "not an svg");

        let err = converter.convert(&request, &JobContext::detached()).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadInput);
    }

    #[test]
    fn test_zero_dimensions() {
        let converter = SvgToPdfConverter::new();
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="0" height="0"></svg>"#;
        assert!(converter.render(svg).is_err());
    }

    #[test]
    fn test_validate_requires_single_input() {
        let converter = SvgToPdfConverter::new();
        let none = ConversionRequest::new(SVG_TO_PDF);
        assert_eq!(converter.validate(&none).unwrap_err().code, ErrorCode::Validation);

        let two = ConversionRequest::new(SVG_TO_PDF)
            .with_input("a.svg", SQUARE)
            .with_input("b.svg", SQUARE);
        assert_eq!(converter.validate(&two).unwrap_err().code, ErrorCode::Validation);

        let empty = ConversionRequest::new(SVG_TO_PDF).with_input("a.svg", "");
        assert!(converter.validate(&empty).is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = ConverterRegistry::with_builtin();
        registry.register(
            "echo",
            OutputFormat::new("txt", "text/plain"),
            from_fn(|req: &ConversionRequest, _ctx: &JobContext| Ok(req.inputs[0].data.clone())),
        );

        assert_eq!(registry.kinds(), vec!["echo", SVG_TO_PDF]);
        assert_eq!(registry.get(SVG_TO_PDF).unwrap().format, OutputFormat::pdf());
        assert!(registry.get("merge").is_none());

        let echo = registry.get("echo").unwrap();
        let request = ConversionRequest::new("echo").with_input("a.txt", "hi");
        let out = echo.converter.convert(&request, &JobContext::detached()).unwrap();
        assert_eq!(out, b"hi");
    }

    #[test]
    fn test_progress_reports_reach_store() {
        let store = Arc::new(JobStore::new());
        let mut record = crate::job::JobRecord::new("echo", "a.txt");
        record.start().unwrap();
        let id = record.id;
        store.put(record);

        let ctx = JobContext::new(id, store.clone(), CancellationToken::new());
        ctx.report_progress(55);
        ctx.report_progress(20);
        assert_eq!(store.get(&id).unwrap().progress, 55);
        assert!(!ctx.is_cancelled());
    }
}
