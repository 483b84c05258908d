//! Preview state management.
//!
//! Pure command/effect machine: the service interprets effects by issuing
//! fingerprinted render requests, so every transition is testable without
//! threads or a renderer.

use std::time::{Duration, Instant};

use super::request::PreviewSlot;
use crate::settings::Settings;

/// Quiet window applied after a settings change before the processed slot
/// re-renders. Rapid successive changes keep pushing the deadline forward
/// and collapse into a single render.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(250);

/// Current preview state for a document.
#[derive(Clone, Debug)]
pub struct PreviewState {
    /// Total page count.
    pub page_count: usize,

    /// Current page (0-indexed).
    pub current_page: usize,

    /// Which slot the embedding view is showing.
    pub showing_original: bool,

    /// Settings snapshot cloned into every issued render request.
    pub settings: Settings,

    debounce_deadline: Option<Instant>,
}

impl PreviewState {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            page_count: 0,
            current_page: 0,
            showing_original: true,
            settings,
            debounce_deadline: None,
        }
    }

    /// Apply a command and return resulting effects.
    #[must_use]
    pub fn apply(&mut self, cmd: Command, now: Instant) -> Vec<Effect> {
        match cmd {
            Command::DocumentLoaded { page_count } => {
                self.page_count = page_count;
                self.current_page = 0;
                self.showing_original = true;
                self.debounce_deadline = None;
                if page_count == 0 {
                    vec![Effect::ClearSlots]
                } else {
                    vec![
                        Effect::ClearSlots,
                        Effect::RenderSlot(PreviewSlot::Original),
                        Effect::RenderSlot(PreviewSlot::Processed),
                    ]
                }
            }

            Command::SettingsChanged(settings) => {
                self.settings = settings;
                self.debounce_deadline = Some(now + DEBOUNCE_WINDOW);
                vec![]
            }

            Command::NextPage => self.go_to(self.current_page.saturating_add(1)),

            Command::PrevPage => {
                if self.current_page == 0 {
                    vec![]
                } else {
                    self.go_to(self.current_page - 1)
                }
            }

            Command::GoToPage(page) => self.go_to(page),

            Command::ToggleView => {
                self.showing_original = !self.showing_original;
                let slot = if self.showing_original {
                    PreviewSlot::Original
                } else {
                    PreviewSlot::Processed
                };
                vec![Effect::RenderSlotIfMissing(slot)]
            }

            Command::Tick => {
                if self.debounce_deadline.is_some_and(|deadline| now >= deadline) {
                    self.debounce_deadline = None;
                    vec![Effect::RenderSlot(PreviewSlot::Processed)]
                } else {
                    vec![]
                }
            }
        }
    }

    /// True while a debounced processed render is still pending.
    #[must_use]
    pub fn debounce_pending(&self) -> bool {
        self.debounce_deadline.is_some()
    }

    fn go_to(&mut self, page: usize) -> Vec<Effect> {
        if self.page_count == 0 {
            return vec![];
        }
        let clamped = page.min(self.page_count - 1);
        if clamped == self.current_page {
            return vec![];
        }
        self.current_page = clamped;
        vec![
            Effect::ClearSlots,
            Effect::RenderSlot(PreviewSlot::Original),
            Effect::RenderSlot(PreviewSlot::Processed),
        ]
    }
}

/// Commands that modify preview state.
#[derive(Clone, Debug)]
pub enum Command {
    /// A document was (re)loaded.
    DocumentLoaded { page_count: usize },
    /// An enhancement control changed; re-render debounced.
    SettingsChanged(Settings),
    NextPage,
    PrevPage,
    GoToPage(usize),
    /// Switch between original and processed view.
    ToggleView,
    /// Periodic pump; fires due debounced work.
    Tick,
}

/// Effects produced by state changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Drop both cached slot images.
    ClearSlots,
    /// Issue a new fingerprinted render for a slot.
    RenderSlot(PreviewSlot),
    /// Issue a render only when the slot has no cached image.
    RenderSlotIfMissing(PreviewSlot),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded_state(pages: usize) -> (PreviewState, Instant) {
        let mut state = PreviewState::new(Settings::default());
        let now = Instant::now();
        let _ = state.apply(Command::DocumentLoaded { page_count: pages }, now);
        (state, now)
    }

    #[test]
    fn document_load_renders_both_slots() {
        let mut state = PreviewState::new(Settings::default());
        let effects = state.apply(Command::DocumentLoaded { page_count: 3 }, Instant::now());
        assert_eq!(
            effects,
            vec![
                Effect::ClearSlots,
                Effect::RenderSlot(PreviewSlot::Original),
                Effect::RenderSlot(PreviewSlot::Processed),
            ]
        );
    }

    #[test]
    fn navigation_clears_and_renders_both_slots() {
        let (mut state, now) = loaded_state(10);

        let effects = state.apply(Command::GoToPage(4), now);
        assert_eq!(state.current_page, 4);
        assert_eq!(
            effects,
            vec![
                Effect::ClearSlots,
                Effect::RenderSlot(PreviewSlot::Original),
                Effect::RenderSlot(PreviewSlot::Processed),
            ]
        );
    }

    #[test]
    fn navigation_clamps_and_suppresses_no_ops() {
        let (mut state, now) = loaded_state(3);

        let effects = state.apply(Command::GoToPage(999), now);
        assert_eq!(state.current_page, 2);
        assert_eq!(effects.len(), 3);

        // Already at the last page
        assert!(state.apply(Command::NextPage, now).is_empty());
        assert_eq!(state.current_page, 2);
    }

    #[test]
    fn prev_page_at_start_is_a_no_op() {
        let (mut state, now) = loaded_state(3);
        assert!(state.apply(Command::PrevPage, now).is_empty());
        assert_eq!(state.current_page, 0);
    }

    #[test]
    fn settings_changes_collapse_into_one_debounced_render() {
        let (mut state, now) = loaded_state(3);

        assert!(
            state
                .apply(Command::SettingsChanged(Settings::default()), now)
                .is_empty()
        );
        let later = now + Duration::from_millis(100);
        assert!(
            state
                .apply(Command::SettingsChanged(Settings::default()), later)
                .is_empty()
        );

        // First deadline would have fired here, but the second change
        // pushed it forward.
        let effects = state.apply(Command::Tick, now + DEBOUNCE_WINDOW);
        assert!(effects.is_empty());

        let effects = state.apply(Command::Tick, later + DEBOUNCE_WINDOW);
        assert_eq!(effects, vec![Effect::RenderSlot(PreviewSlot::Processed)]);
        assert!(!state.debounce_pending());

        // Debounce is one-shot
        assert!(
            state
                .apply(Command::Tick, later + DEBOUNCE_WINDOW * 2)
                .is_empty()
        );
    }

    #[test]
    fn toggle_requests_render_only_when_slot_missing() {
        let (mut state, now) = loaded_state(3);

        let effects = state.apply(Command::ToggleView, now);
        assert!(!state.showing_original);
        assert_eq!(
            effects,
            vec![Effect::RenderSlotIfMissing(PreviewSlot::Processed)]
        );

        let effects = state.apply(Command::ToggleView, now);
        assert!(state.showing_original);
        assert_eq!(
            effects,
            vec![Effect::RenderSlotIfMissing(PreviewSlot::Original)]
        );
    }
}
