//! Scroll position management.
//!
//! The engine never renders anything itself. It talks to a [`Viewport`] that
//! knows how tall the laid-out timeline is and where each message sits, and
//! uses [`ScrollCoordinator`] to decide where the viewport should point after
//! the timeline changes:
//!
//! - growth at the tail follows the newest message, unless a message was
//!   explicitly focused and its highlight is still running
//! - history prepended at the head keeps the previously visible content in
//!   place
//! - the first history page of a session starts at the bottom

use tokio::time::{Duration, Instant};

use crate::message::Message;

/// Distance from the top edge that still counts as "at the top"
pub const TOP_THRESHOLD: f64 = 1.0;

/// Default duration of the focus highlight
pub const DEFAULT_HIGHLIGHT: Duration = Duration::from_secs(2);

/// Geometry of the scrollable area
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_height: f64,
    pub scroll_top: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    /// Largest valid `scroll_top`
    pub fn max_scroll_top(&self) -> f64 {
        (self.scroll_height - self.client_height).max(0.0)
    }
}

/// A laid-out view of the timeline
pub trait Viewport: Send {
    fn metrics(&self) -> ScrollMetrics;

    fn set_scroll_top(&mut self, scroll_top: f64);

    /// Lay out `messages` synchronously; metrics reflect the new content
    /// when this returns.
    fn layout(&mut self, messages: &[Message]);

    /// Top offset and height of a laid-out message
    fn offset_of(&self, message_id: &str) -> Option<(f64, f64)>;
}

/// Scroll state captured before a prepend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    pub scroll_height: f64,
    pub scroll_top: f64,
}

#[derive(Debug, Clone)]
struct Focus {
    message_id: String,
    until: Instant,
}

/// Decides when to follow the tail and when to hold position
#[derive(Debug)]
pub struct ScrollCoordinator {
    highlight: Duration,
    focus: Option<Focus>,
}

impl Default for ScrollCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_HIGHLIGHT)
    }
}

impl ScrollCoordinator {
    pub fn new(highlight: Duration) -> Self {
        Self {
            highlight,
            focus: None,
        }
    }

    pub fn capture(&self, viewport: &dyn Viewport) -> ScrollAnchor {
        let metrics = viewport.metrics();
        ScrollAnchor {
            scroll_height: metrics.scroll_height,
            scroll_top: metrics.scroll_top,
        }
    }

    /// Shift the viewport by however much content was inserted above it.
    /// Call after the prepended content has been laid out.
    pub fn restore(&self, anchor: ScrollAnchor, viewport: &mut dyn Viewport) -> f64 {
        let new_height = viewport.metrics().scroll_height;
        let top = new_height - anchor.scroll_height + anchor.scroll_top;
        viewport.set_scroll_top(top);
        viewport.metrics().scroll_top
    }

    /// Scroll to the newest message unless a focus highlight is running.
    /// Returns whether the viewport moved to the bottom.
    pub fn follow_tail(&mut self, viewport: &mut dyn Viewport, now: Instant) -> bool {
        if self.highlighted(now).is_some() {
            return false;
        }
        self.focus = None;
        self.scroll_to_bottom(viewport);
        true
    }

    pub fn scroll_to_bottom(&self, viewport: &mut dyn Viewport) -> f64 {
        let bottom = viewport.metrics().max_scroll_top();
        viewport.set_scroll_top(bottom);
        bottom
    }

    /// Bring a message into view and start its highlight
    pub fn focus(&mut self, message_id: &str, viewport: &mut dyn Viewport, now: Instant) -> bool {
        let Some((top, _)) = viewport.offset_of(message_id) else {
            return false;
        };
        viewport.set_scroll_top(top);
        self.focus = Some(Focus {
            message_id: message_id.to_string(),
            until: now + self.highlight,
        });
        true
    }

    /// Id of the message whose highlight is still running
    pub fn highlighted(&self, now: Instant) -> Option<&str> {
        self.focus
            .as_ref()
            .filter(|f| now < f.until)
            .map(|f| f.message_id.as_str())
    }

    pub fn at_top(&self, viewport: &dyn Viewport) -> bool {
        viewport.metrics().scroll_top <= TOP_THRESHOLD
    }

    pub fn reset(&mut self) {
        self.focus = None;
    }
}

#[derive(Debug, Clone)]
struct Row {
    message_id: String,
    top: f64,
    height: f64,
}

/// Headless viewport that lays messages out as rows of fixed-width text.
///
/// Each message takes one header row plus its content wrapped at `columns`,
/// followed by `gap` rows of spacing.
#[derive(Debug, Clone)]
pub struct RowViewport {
    columns: usize,
    client_height: f64,
    gap: f64,
    scroll_top: f64,
    scroll_height: f64,
    rows: Vec<Row>,
}

impl Default for RowViewport {
    fn default() -> Self {
        Self::new(80, 24.0)
    }
}

impl RowViewport {
    pub fn new(columns: usize, client_height: f64) -> Self {
        Self {
            columns: columns.max(1),
            client_height,
            gap: 1.0,
            scroll_top: 0.0,
            scroll_height: 0.0,
            rows: Vec::new(),
        }
    }

    pub fn resize(&mut self, columns: usize, client_height: f64) {
        self.columns = columns.max(1);
        self.client_height = client_height;
    }

    /// Id of the message at the top edge of the view
    pub fn first_visible(&self) -> Option<&str> {
        self.rows
            .iter()
            .find(|row| row.top + row.height > self.scroll_top)
            .map(|row| row.message_id.as_str())
    }

    fn message_height(&self, message: &Message) -> f64 {
        let wrapped: usize = message
            .content
            .split('\n')
            .map(|line| line.chars().count().div_ceil(self.columns).max(1))
            .sum();
        (1 + wrapped) as f64 + self.gap
    }

    fn clamp(&mut self) {
        let max = self.metrics().max_scroll_top();
        self.scroll_top = self.scroll_top.clamp(0.0, max);
    }
}

impl Viewport for RowViewport {
    fn metrics(&self) -> ScrollMetrics {
        ScrollMetrics {
            scroll_height: self.scroll_height,
            scroll_top: self.scroll_top,
            client_height: self.client_height,
        }
    }

    fn set_scroll_top(&mut self, scroll_top: f64) {
        self.scroll_top = scroll_top;
        self.clamp();
    }

    fn layout(&mut self, messages: &[Message]) {
        let mut top = 0.0;
        let mut rows = Vec::with_capacity(messages.len());
        for message in messages {
            let height = self.message_height(message);
            rows.push(Row {
                message_id: message.id.clone(),
                top,
                height,
            });
            top += height;
        }
        self.rows = rows;
        self.scroll_height = top;
        self.clamp();
    }

    fn offset_of(&self, message_id: &str) -> Option<(f64, f64)> {
        self.rows
            .iter()
            .find(|row| row.message_id == message_id)
            .map(|row| (row.top, row.height))
    }
}
