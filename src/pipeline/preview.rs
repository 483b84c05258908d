//! Preview service: a single render worker plus stale-result rejection.
//!
//! Renders cannot be interrupted mid-page, so correctness comes from
//! making superseded results inert: each issued request carries a fresh
//! fingerprint, and a completion is applied only while its fingerprint is
//! still the active one for its (page, slot).

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use flume::{Receiver, Sender};
use log::{debug, info, warn};

use super::codec::{CodecError, MupdfCodec, PageCodec};
use super::request::{PreviewImage, PreviewRequest, PreviewResponse, PreviewSlot, RequestId};
use super::state::{Command, Effect, PreviewState};
use crate::settings::Settings;

/// Worker loop for preview rendering. Runs on exactly one thread: preview
/// renders are serialized so they never saturate the CPU while the user is
/// dragging sliders.
pub fn preview_worker<C: PageCodec>(
    codec: C,
    doc_path: PathBuf,
    requests: Receiver<PreviewRequest>,
    responses: Sender<PreviewResponse>,
) {
    for request in requests {
        match request {
            PreviewRequest::Render {
                id,
                page,
                slot,
                settings,
            } => match codec.render_preview(&doc_path, page, slot, &settings) {
                Ok(image) => {
                    let _ = responses.send(PreviewResponse::Rendered {
                        id,
                        page,
                        slot,
                        image: Arc::new(image),
                    });
                }
                Err(error) => {
                    let _ = responses.send(PreviewResponse::Error {
                        id,
                        page,
                        slot,
                        error,
                    });
                }
            },

            PreviewRequest::Shutdown => break,
        }
    }
}

/// Events surfaced to the embedding view.
#[derive(Debug)]
pub enum PreviewEvent {
    /// A slot image was (re)rendered and is current.
    Updated { slot: PreviewSlot },
    /// A render failed. Other in-flight and future requests are unaffected.
    Failed { slot: PreviewSlot, message: String },
}

/// Manages preview rendering for one document.
pub struct PreviewService {
    state: PreviewState,
    request_tx: Sender<PreviewRequest>,
    response_rx: Receiver<PreviewResponse>,
    next_request_id: u64,
    active_original: Option<RequestId>,
    active_processed: Option<RequestId>,
    original_image: Option<Arc<PreviewImage>>,
    processed_image: Option<Arc<PreviewImage>>,
}

impl PreviewService {
    /// Open a document and spawn the render worker for it.
    pub fn open(doc_path: PathBuf, settings: Settings) -> Result<Self, CodecError> {
        let codec = MupdfCodec;
        let page_count = codec.page_count(&doc_path)?;

        let (request_tx, request_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();
        thread::spawn(move || preview_worker(codec, doc_path, request_rx, response_tx));

        let mut service = Self::with_channels(request_tx, response_rx, settings);
        service.apply_command(Command::DocumentLoaded { page_count }, Instant::now());
        Ok(service)
    }

    /// Wire a service to externally owned channels. The caller drives a
    /// worker on the other end; used for embedding a custom renderer and
    /// in tests.
    #[must_use]
    pub fn with_channels(
        request_tx: Sender<PreviewRequest>,
        response_rx: Receiver<PreviewResponse>,
        settings: Settings,
    ) -> Self {
        Self {
            state: PreviewState::new(settings),
            request_tx,
            response_rx,
            next_request_id: 1,
            active_original: None,
            active_processed: None,
            original_image: None,
            processed_image: None,
        }
    }

    /// Apply a command to the preview state and execute its effects.
    pub fn apply_command(&mut self, cmd: Command, now: Instant) {
        let effects = self.state.apply(cmd, now);
        self.execute_effects(effects);
    }

    /// Fire due debounced work and drain completed renders.
    pub fn pump(&mut self, now: Instant) -> Vec<PreviewEvent> {
        self.apply_command(Command::Tick, now);

        let mut events = Vec::new();
        while let Ok(response) = self.response_rx.try_recv() {
            match response {
                PreviewResponse::Rendered {
                    id,
                    page,
                    slot,
                    image,
                } => {
                    if self.is_active(slot, id) {
                        match slot {
                            PreviewSlot::Original => self.original_image = Some(image),
                            PreviewSlot::Processed => self.processed_image = Some(image),
                        }
                        debug!("applied {slot:?} render for page {page}, request {}", id.0);
                        events.push(PreviewEvent::Updated { slot });
                    } else {
                        info!(
                            "discarding stale {slot:?} render for page {page}, request {}",
                            id.0
                        );
                    }
                }

                PreviewResponse::Error {
                    id,
                    page,
                    slot,
                    error,
                } => {
                    if self.is_active(slot, id) {
                        warn!("{slot:?} render failed for page {page}: {error}");
                        events.push(PreviewEvent::Failed {
                            slot,
                            message: error.to_string(),
                        });
                    } else {
                        debug!("ignoring error from stale request {}", id.0);
                    }
                }
            }
        }
        events
    }

    #[must_use]
    pub fn state(&self) -> &PreviewState {
        &self.state
    }

    /// Image for the slot the view is currently showing, if rendered.
    #[must_use]
    pub fn displayed_image(&self) -> Option<&Arc<PreviewImage>> {
        if self.state.showing_original {
            self.original_image.as_ref()
        } else {
            self.processed_image.as_ref()
        }
    }

    #[must_use]
    pub fn slot_image(&self, slot: PreviewSlot) -> Option<&Arc<PreviewImage>> {
        match slot {
            PreviewSlot::Original => self.original_image.as_ref(),
            PreviewSlot::Processed => self.processed_image.as_ref(),
        }
    }

    /// Shutdown the render worker.
    pub fn shutdown(&self) {
        let _ = self.request_tx.send(PreviewRequest::Shutdown);
    }

    fn execute_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ClearSlots => {
                    self.original_image = None;
                    self.processed_image = None;
                }

                Effect::RenderSlot(slot) => self.issue_render(slot),

                Effect::RenderSlotIfMissing(slot) => {
                    if self.slot_image(slot).is_none() {
                        self.issue_render(slot);
                    }
                }
            }
        }
    }

    /// Issue a fingerprinted render request for `slot` on the current
    /// page. The new id becomes the active fingerprint for the slot,
    /// implicitly invalidating any in-flight request for it.
    fn issue_render(&mut self, slot: PreviewSlot) {
        let id = self.next_id();
        match slot {
            PreviewSlot::Original => self.active_original = Some(id),
            PreviewSlot::Processed => self.active_processed = Some(id),
        }
        debug!(
            "issuing {slot:?} render for page {}, request {}",
            self.state.current_page, id.0
        );
        let _ = self.request_tx.send(PreviewRequest::Render {
            id,
            page: self.state.current_page,
            slot,
            settings: self.state.settings.clone(),
        });
    }

    fn is_active(&self, slot: PreviewSlot, id: RequestId) -> bool {
        match slot {
            PreviewSlot::Original => self.active_original == Some(id),
            PreviewSlot::Processed => self.active_processed == Some(id),
        }
    }

    fn next_id(&mut self) -> RequestId {
        let id = RequestId::new(self.next_request_id);
        self.next_request_id += 1;
        id
    }
}

impl Drop for PreviewService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
