//! Backward history pagination for the active session

use serde::{Deserialize, Serialize};

/// Loading state of the pager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagerState {
    Idle,
    Loading,
    /// A short page was seen; no further pages are requested for this session
    Exhausted,
}

/// Position in a session's history. `offset` counts back from the newest
/// stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCursor {
    pub session_id: String,
    pub offset: usize,
    pub page_size: usize,
    pub exhausted: bool,
}

/// One page fetch handed out by [`HistoryPager::begin`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub session_id: String,
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    /// The newest page, loaded right after selecting a session
    pub fn is_initial(&self) -> bool {
        self.offset == 0
    }
}

/// `Idle → Loading → Idle` on a full page, `Idle → Loading → Exhausted` on a
/// short one. A failed fetch returns to `Idle` so the next top-scroll retries.
#[derive(Debug)]
pub struct HistoryPager {
    page_size: usize,
    cursor: Option<HistoryCursor>,
    state: PagerState,
    /// Records stored while a page was loading, added to the offset when it
    /// settles
    persisted_while_loading: usize,
}

impl HistoryPager {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            cursor: None,
            state: PagerState::Idle,
            persisted_while_loading: 0,
        }
    }

    pub fn state(&self) -> PagerState {
        self.state
    }

    pub fn cursor(&self) -> Option<&HistoryCursor> {
        self.cursor.as_ref()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == PagerState::Exhausted
    }

    /// Whether a top-scroll should trigger a fetch right now
    pub fn can_load(&self) -> bool {
        self.cursor.is_some() && self.state == PagerState::Idle
    }

    /// Point the pager at a session (or none), starting from the newest page
    pub fn reset(&mut self, session_id: Option<&str>) {
        self.cursor = session_id.map(|id| HistoryCursor {
            session_id: id.to_string(),
            offset: 0,
            page_size: self.page_size,
            exhausted: false,
        });
        self.state = PagerState::Idle;
        self.persisted_while_loading = 0;
    }

    /// Stop paging a session whose full history is already on screen
    pub fn mark_exhausted(&mut self) {
        if let Some(cursor) = &mut self.cursor {
            cursor.exhausted = true;
            self.state = PagerState::Exhausted;
        }
    }

    /// Account for `count` records the server stored at the newest end of the
    /// session (a finished exchange), so older pages do not overlap what is
    /// already shown.
    pub fn note_persisted(&mut self, count: usize) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        if self.state == PagerState::Loading {
            self.persisted_while_loading += count;
        } else {
            cursor.offset += count;
        }
    }

    /// Claim the next page; `None` while loading, exhausted or without a session
    pub fn begin(&mut self) -> Option<PageRequest> {
        if !self.can_load() {
            return None;
        }
        let cursor = self.cursor.as_ref()?;
        let request = PageRequest {
            session_id: cursor.session_id.clone(),
            offset: cursor.offset,
            limit: cursor.page_size,
        };
        self.state = PagerState::Loading;
        Some(request)
    }

    /// Record a successful fetch of `received` raw records. Returns `false`
    /// if the request no longer matches the cursor.
    pub fn complete(&mut self, request: &PageRequest, received: usize) -> bool {
        if !self.owns(request) {
            return false;
        }
        let Some(cursor) = self.cursor.as_mut() else {
            return false;
        };
        cursor.offset += cursor.page_size + std::mem::take(&mut self.persisted_while_loading);
        if received < cursor.page_size {
            cursor.exhausted = true;
            self.state = PagerState::Exhausted;
        } else {
            self.state = PagerState::Idle;
        }
        true
    }

    /// Record a failed fetch; the same page is requested again next time
    pub fn fail(&mut self, request: &PageRequest) {
        if self.owns(request) {
            self.state = PagerState::Idle;
            if let Some(cursor) = self.cursor.as_mut() {
                cursor.offset += std::mem::take(&mut self.persisted_while_loading);
            }
        }
    }

    fn owns(&self, request: &PageRequest) -> bool {
        self.state == PagerState::Loading
            && self
                .cursor
                .as_ref()
                .is_some_and(|c| c.session_id == request.session_id && c.offset == request.offset)
    }
}
