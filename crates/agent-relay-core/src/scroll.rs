//! Auto-scroll decision for a viewer tailing a log.

use crate::RelayConfig;

/// Distance from the bottom, in viewport units, still treated as "at the tail".
pub const DEFAULT_SCROLL_THRESHOLD: u32 = 50;

/// Last-observed geometry of a scrollable log view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewport {
    /// Offset of the first visible unit.
    pub scroll_top: u32,
    /// Height of the visible area.
    pub client_height: u32,
    /// Height of the whole content.
    pub scroll_height: u32,
}

impl Viewport {
    #[must_use]
    pub const fn new(scroll_top: u32, client_height: u32, scroll_height: u32) -> Self {
        Self {
            scroll_top,
            client_height,
            scroll_height,
        }
    }
}

/// What a viewer should do after its log changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    /// Jump to the newest entry.
    ScrollToBottom,
    /// Leave the view where the operator put it.
    Hold,
}

/// Stateless policy: decides from geometry alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportScrollPolicy {
    threshold: u32,
}

impl Default for ViewportScrollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SCROLL_THRESHOLD)
    }
}

impl ViewportScrollPolicy {
    #[must_use]
    pub const fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// `scroll_top + client_height < scroll_height - threshold`.
    #[must_use]
    pub const fn is_scrolled_away(&self, viewport: Viewport) -> bool {
        viewport.scroll_top.saturating_add(viewport.client_height)
            < viewport.scroll_height.saturating_sub(self.threshold)
    }

    /// Action to take after a log update, given the viewer's intent.
    #[must_use]
    pub const fn after_update(&self, intent: ScrollIntent) -> ScrollAction {
        if intent.user_has_scrolled_away() {
            ScrollAction::Hold
        } else {
            ScrollAction::ScrollToBottom
        }
    }
}

impl From<&RelayConfig> for ViewportScrollPolicy {
    fn from(config: &RelayConfig) -> Self {
        Self::new(config.scroll_threshold)
    }
}

/// Per-viewer scroll intent.
///
/// Lives as long as the viewer does; a viewer opened for another session
/// starts over from the default (following the tail).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollIntent {
    scrolled_away: bool,
}

impl ScrollIntent {
    /// Recompute from a scroll event.
    pub fn observe(&mut self, policy: &ViewportScrollPolicy, viewport: Viewport) {
        self.scrolled_away = policy.is_scrolled_away(viewport);
    }

    #[must_use]
    pub const fn user_has_scrolled_away(&self) -> bool {
        self.scrolled_away
    }
}
