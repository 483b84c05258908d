//! Batch compression pool.
//!
//! Fans one job per page out across a fixed-size worker pool and drains
//! completions on the coordinating thread. Workers own their jobs outright;
//! the result map is only ever touched by the coordinator, fed through a
//! channel. Completion order is arbitrary — final page order is restored by
//! the assembler via explicit indexing.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, Sender};
use log::{debug, error, info, warn};

use super::codec::{PageCodec, PageResult};
use crate::assembler;
use crate::settings::Settings;

/// How often the coordinator re-checks the cancel flag while no
/// completions are arriving.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Progress and terminal events emitted by a compression run.
///
/// Exactly one of `Finished`, `Cancelled` or `Failed` terminates the
/// stream.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    Status(String),
    /// Percentage of pages completed (success or failure), 0..=100.
    Progress(u8),
    /// Number of pages that have finished processing so far.
    PagesDone(usize),
    Finished(PathBuf),
    Cancelled,
    Failed(String),
}

/// Fatal, run-level failures. Per-page failures never surface here; they
/// become missing entries in the result map.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to open input document: {0}")]
    DocumentOpen(#[from] super::codec::CodecError),

    #[error("no pages were successfully processed")]
    NoPagesProcessed,

    #[error("failed to save output PDF: {0}")]
    Save(#[from] lopdf::Error),
}

/// Terminal state of a run that did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Finished(PathBuf),
    Cancelled,
}

/// One page's worth of work; owned exclusively by the worker executing it.
struct PageJob {
    page_index: usize,
}

/// Execute a full compression run on the calling thread, streaming
/// progress through `events`.
///
/// Cancellation is cooperative, checked at job-completion granularity:
/// once `cancel` is set, no further results are accepted, unstarted jobs
/// are skipped, already-running pages finish but their output is
/// discarded, and no assembly happens.
pub fn run_compression(
    codec: Arc<dyn PageCodec>,
    input: &Path,
    output: &Path,
    settings: &Settings,
    events: &Sender<ProgressEvent>,
    cancel: &Arc<AtomicBool>,
) -> Result<RunOutcome, RunError> {
    let total_pages = codec.page_count(input)?;
    if total_pages == 0 {
        return Err(RunError::NoPagesProcessed);
    }

    let workers = thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(total_pages);
    status(
        events,
        format!("processing {total_pages} pages using up to {workers} workers"),
    );
    info!("compressing {input:?} -> {output:?}: {total_pages} pages, {workers} workers");

    let (job_tx, job_rx) = flume::unbounded::<PageJob>();
    let (result_tx, result_rx) = flume::unbounded::<PageResult>();
    for page_index in 0..total_pages {
        let _ = job_tx.send(PageJob { page_index });
    }
    drop(job_tx);

    let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);
    for _ in 0..workers {
        let jobs = job_rx.clone();
        let results = result_tx.clone();
        let codec = Arc::clone(&codec);
        let cancel = Arc::clone(cancel);
        let input = input.to_path_buf();
        // Settings snapshot travels with the worker; later edits to app
        // state cannot reach an in-flight run.
        let settings = settings.clone();

        handles.push(thread::spawn(move || {
            for job in jobs {
                if cancel.load(Ordering::Relaxed) {
                    debug!("skipping page {} after cancellation", job.page_index);
                    continue;
                }
                let result = codec.compress_page(&input, job.page_index, &settings);
                if results.send(result).is_err() {
                    break;
                }
            }
        }));
    }
    drop(result_tx);

    let mut results: BTreeMap<usize, PageResult> = BTreeMap::new();
    let mut processed = 0usize;
    let mut cancelled = false;

    while processed < total_pages {
        match result_rx.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(result) => {
                processed += 1;
                if result.is_success() {
                    results.insert(result.page_index, result);
                } else {
                    warn!("page {} failed processing", result.page_index);
                    status(
                        events,
                        format!("warning: page {} failed processing", result.page_index),
                    );
                }

                let percent = (processed * 100 / total_pages) as u8;
                let _ = events.send(ProgressEvent::Progress(percent));
                let _ = events.send(ProgressEvent::PagesDone(processed));

                if cancel.load(Ordering::Relaxed) {
                    cancelled = true;
                    break;
                }
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                if cancel.load(Ordering::Relaxed) {
                    cancelled = true;
                    break;
                }
            }
            Err(flume::RecvTimeoutError::Disconnected) => break,
        }
    }

    if cancelled || cancel.load(Ordering::Relaxed) {
        info!("compression cancelled after {processed} of {total_pages} pages");
        for handle in handles {
            let _ = handle.join();
        }
        return Ok(RunOutcome::Cancelled);
    }
    for handle in handles {
        let _ = handle.join();
    }

    if results.is_empty() {
        return Err(RunError::NoPagesProcessed);
    }

    status(events, "assembling compressed PDF...");
    info!(
        "assembling final PDF with {} of {total_pages} pages",
        results.len()
    );
    let mut doc = assembler::assemble(&results, total_pages);

    status(events, format!("saving compressed PDF to {}", output.display()));
    doc.save(output)?;
    info!("compression finished: {}", output.display());
    Ok(RunOutcome::Finished(output.to_path_buf()))
}

fn status(events: &Sender<ProgressEvent>, message: impl Into<String>) {
    let _ = events.send(ProgressEvent::Status(message.into()));
}

/// Handle to a compression run executing on a background thread.
pub struct CompressionJob {
    events: Receiver<ProgressEvent>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CompressionJob {
    /// Spawn a run. The event stream ends with exactly one terminal event.
    #[must_use]
    pub fn spawn(
        codec: Arc<dyn PageCodec>,
        input: PathBuf,
        output: PathBuf,
        settings: Settings,
    ) -> Self {
        let (event_tx, event_rx) = flume::unbounded();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = Arc::clone(&cancel);

        let handle = thread::spawn(move || {
            match run_compression(codec, &input, &output, &settings, &event_tx, &cancel_flag) {
                Ok(RunOutcome::Finished(path)) => {
                    let _ = event_tx.send(ProgressEvent::Finished(path));
                }
                Ok(RunOutcome::Cancelled) => {
                    let _ = event_tx.send(ProgressEvent::Cancelled);
                }
                Err(e) => {
                    error!("compression run failed: {e}");
                    let _ = event_tx.send(ProgressEvent::Failed(e.to_string()));
                }
            }
        });

        Self {
            events: event_rx,
            cancel,
            handle: Some(handle),
        }
    }

    /// Request cooperative cancellation. Pages already rendering run to
    /// completion; their results are discarded.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    /// Wait for the run to finish.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::codec::{CodecError, EncodedImage, PageSizePts};
    use crate::pipeline::request::{PreviewImage, PreviewSlot};
    use crate::transform::TransformedImage;
    use std::sync::atomic::AtomicUsize;

    /// Codec double producing tiny JPEG pages without a real document.
    struct StubCodec {
        pages: usize,
        fail_pages: Vec<usize>,
        completed: AtomicUsize,
        cancel_after: Option<(usize, Arc<AtomicBool>)>,
    }

    impl StubCodec {
        fn new(pages: usize) -> Self {
            Self {
                pages,
                fail_pages: Vec::new(),
                completed: AtomicUsize::new(0),
                cancel_after: None,
            }
        }
    }

    fn tiny_jpeg() -> EncodedImage {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 180, 160]));
        crate::pipeline::codec::encode(&TransformedImage::Rgb(img), 80).unwrap()
    }

    impl PageCodec for StubCodec {
        fn page_count(&self, _path: &Path) -> Result<usize, CodecError> {
            Ok(self.pages)
        }

        fn compress_page(&self, _path: &Path, page: usize, _settings: &Settings) -> PageResult {
            let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((after, flag)) = &self.cancel_after {
                if done >= *after {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            if self.fail_pages.contains(&page) {
                return PageResult::failed(page);
            }
            PageResult {
                page_index: page,
                size: Some(PageSizePts {
                    width: 612.0,
                    height: 792.0,
                }),
                image: Some(tiny_jpeg()),
            }
        }

        fn render_preview(
            &self,
            _path: &Path,
            _page: usize,
            _slot: PreviewSlot,
            _settings: &Settings,
        ) -> Result<PreviewImage, CodecError> {
            Err(CodecError::Pixmap("stub codec has no preview".into()))
        }
    }

    fn run(
        codec: StubCodec,
        output: &Path,
        cancel: &Arc<AtomicBool>,
    ) -> (Result<RunOutcome, RunError>, Vec<ProgressEvent>) {
        let (tx, rx) = flume::unbounded();
        let outcome = run_compression(
            Arc::new(codec),
            Path::new("stub-input.pdf"),
            output,
            &Settings::default(),
            &tx,
            cancel,
        );
        drop(tx);
        (outcome, rx.drain().collect())
    }

    fn progress_values(events: &[ProgressEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::Progress(percent) => Some(*percent),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn all_pages_succeeding_emits_full_progress() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.pdf");
        let cancel = Arc::new(AtomicBool::new(false));

        let (outcome, events) = run(StubCodec::new(4), &output, &cancel);
        assert_eq!(outcome.unwrap(), RunOutcome::Finished(output.clone()));

        let progress = progress_values(&events);
        assert_eq!(progress.len(), 4);
        assert_eq!(*progress.last().unwrap(), 100);

        let doc = lopdf::Document::load(&output).unwrap();
        assert_eq!(doc.get_pages().len(), 4);
    }

    #[test]
    fn all_pages_failing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.pdf");
        let cancel = Arc::new(AtomicBool::new(false));

        let mut codec = StubCodec::new(3);
        codec.fail_pages = vec![0, 1, 2];
        let (outcome, _) = run(codec, &output, &cancel);

        assert!(matches!(outcome, Err(RunError::NoPagesProcessed)));
        assert!(!output.exists());
    }

    #[test]
    fn failed_interior_page_still_produces_full_document() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.pdf");
        let cancel = Arc::new(AtomicBool::new(false));

        let mut codec = StubCodec::new(3);
        codec.fail_pages = vec![1];
        let (outcome, events) = run(codec, &output, &cancel);

        assert!(matches!(outcome, Ok(RunOutcome::Finished(_))));
        assert!(events.iter().any(|event| matches!(
            event,
            ProgressEvent::Status(message) if message.contains("page 1 failed")
        )));

        let doc = lopdf::Document::load(&output).unwrap();
        assert_eq!(doc.get_pages().len(), 3);
    }

    #[test]
    fn cancellation_skips_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.pdf");
        let cancel = Arc::new(AtomicBool::new(false));

        let mut codec = StubCodec::new(64);
        codec.cancel_after = Some((2, Arc::clone(&cancel)));
        let (outcome, events) = run(codec, &output, &cancel);

        assert_eq!(outcome.unwrap(), RunOutcome::Cancelled);
        assert!(!output.exists());
        // No assembly phase ever started
        assert!(!events.iter().any(|event| matches!(
            event,
            ProgressEvent::Status(message) if message.contains("assembling")
        )));
    }

    #[test]
    fn empty_document_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.pdf");
        let cancel = Arc::new(AtomicBool::new(false));

        let (outcome, _) = run(StubCodec::new(0), &output, &cancel);
        assert!(matches!(outcome, Err(RunError::NoPagesProcessed)));
    }
}
