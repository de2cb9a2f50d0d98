//! The engine that ties the session directory, history paging, reply
//! ingestion and scrolling together.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use parley_api::{
    ByteStream, CompletionApi, CompletionReply, CompletionRequest, SearchHit, Session, SessionApi,
};
use tokio::sync::broadcast;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::directory::SessionDirectory;
use crate::error::{Error, ExchangeFailure, Result};
use crate::events::EngineEvent;
use crate::ingest::{StreamState, Termination, complete_body};
use crate::message::{Message, MessagePatch};
use crate::pager::{HistoryPager, PagerState};
use crate::scroll::{DEFAULT_HIGHLIGHT, RowViewport, ScrollCoordinator, ScrollMetrics, Viewport};
use crate::timeline::MessageTimeline;

/// How many history pages `open_hit` loads while looking for a message
pub const MAX_SEARCH_PAGES: usize = 10;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// History records per page
    pub page_size: usize,
    /// Request streamed replies
    pub stream: bool,
    /// Abort a reply that delivers no bytes for this long
    pub stream_idle_timeout: Duration,
    /// How long a focused message suppresses tail-following
    pub highlight_duration: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            stream: true,
            stream_idle_timeout: Duration::from_secs(60),
            highlight_duration: DEFAULT_HIGHLIGHT,
        }
    }
}

/// Result of a finished `send`
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    /// The reply arrived in full
    Completed(Message),
    /// The reply became an error bubble
    Failed {
        message: Message,
        failure: ExchangeFailure,
    },
    /// The user switched away before the reply finished; nothing was applied
    Abandoned,
}

impl ExchangeOutcome {
    pub fn message(&self) -> Option<&Message> {
        match self {
            ExchangeOutcome::Completed(message) | ExchangeOutcome::Failed { message, .. } => {
                Some(message)
            }
            ExchangeOutcome::Abandoned => None,
        }
    }
}

/// Result of a history page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryLoad {
    Loaded { count: usize, exhausted: bool },
    /// Every page has been loaded already
    Exhausted,
    /// Another page is still on its way
    InProgress,
    /// Nothing to page: no session is active
    NoSession,
    /// The fetch failed; the next top-scroll tries again
    Failed,
    /// The page arrived after the session changed and was dropped
    Discarded,
}

struct EngineState {
    directory: SessionDirectory,
    timeline: MessageTimeline,
    pager: HistoryPager,
    scroll: ScrollCoordinator,
    viewport: Box<dyn Viewport>,
    /// Bumped whenever the timeline is swapped for another session
    selection: u64,
    in_flight: Option<CancellationToken>,
    /// A pending conversation finished its first exchange and its session id
    /// is still being looked up
    adopting: bool,
}

/// Tags an exchange with the selection and message it writes to
struct Ticket {
    selection: u64,
    message_id: String,
    session_id: Option<String>,
    cancel: CancellationToken,
}

impl Ticket {
    fn is_current(&self, state: &EngineState) -> bool {
        state.selection == self.selection
            && state.timeline.in_flight_id() == Some(self.message_id.as_str())
    }
}

/// Conversation engine for one user.
///
/// All methods take `&self`; share it behind an `Arc` to run a reply and a
/// history load at the same time.
pub struct Engine {
    sessions: Arc<dyn SessionApi>,
    completions: Arc<dyn CompletionApi>,
    config: EngineConfig,
    state: Mutex<EngineState>,
    event_tx: broadcast::Sender<EngineEvent>,
}

impl Engine {
    /// Create an engine with a headless [`RowViewport`]
    pub fn new(
        sessions: Arc<dyn SessionApi>,
        completions: Arc<dyn CompletionApi>,
        config: EngineConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let state = EngineState {
            directory: SessionDirectory::new(),
            timeline: MessageTimeline::new(),
            pager: HistoryPager::new(config.page_size),
            scroll: ScrollCoordinator::new(config.highlight_duration),
            viewport: Box::new(RowViewport::default()),
            selection: 0,
            in_flight: None,
            adopting: false,
        };
        Self {
            sessions,
            completions,
            config,
            state: Mutex::new(state),
            event_tx,
        }
    }

    /// Use a different viewport
    pub fn with_viewport(self, viewport: Box<dyn Viewport>) -> Self {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.viewport = viewport;
            state.viewport.layout(state.timeline.messages());
        }
        self
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Snapshot of the timeline
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().timeline.messages().to_vec()
    }

    pub fn message(&self, message_id: &str) -> Option<Message> {
        self.state.lock().timeline.get(message_id).cloned()
    }

    /// Cached sessions, newest first
    pub fn sessions(&self) -> Vec<Session> {
        self.state.lock().directory.sessions().to_vec()
    }

    /// Active session id; `None` while a new conversation is pending
    pub fn active_session_id(&self) -> Option<String> {
        self.state.lock().directory.active_id().map(String::from)
    }

    pub fn active_session(&self) -> Option<Session> {
        self.state.lock().directory.active().cloned()
    }

    pub fn pager_state(&self) -> PagerState {
        self.state.lock().pager.state()
    }

    /// Whether a reply is in flight or a new session id is still being resolved
    pub fn is_busy(&self) -> bool {
        let state = self.state.lock();
        state.timeline.is_in_flight() || state.adopting
    }

    pub fn scroll_metrics(&self) -> ScrollMetrics {
        self.state.lock().viewport.metrics()
    }

    /// Id of the message whose focus highlight is still running
    pub fn highlighted(&self) -> Option<String> {
        self.state
            .lock()
            .scroll
            .highlighted(Instant::now())
            .map(String::from)
    }

    /// Read the viewport
    pub fn inspect_viewport<R>(&self, f: impl FnOnce(&dyn Viewport) -> R) -> R {
        f(self.state.lock().viewport.as_ref())
    }

    /// Change the viewport (e.g. after a resize); the timeline is laid out
    /// again afterwards
    pub fn update_viewport(&self, f: impl FnOnce(&mut dyn Viewport)) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        f(state.viewport.as_mut());
        state.viewport.layout(state.timeline.messages());
    }

    // ---- Sessions ----

    /// Reload the session directory.
    ///
    /// Selects the newest session when nothing is active and the timeline is
    /// empty, and moves off an active session that no longer exists.
    pub async fn refresh_sessions(&self) -> Result<Vec<Session>> {
        let sessions = self.sessions.list_sessions().await?;

        let (listed, selected) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.directory.replace(sessions);
            let listed = state.directory.sessions().to_vec();
            self.emit(EngineEvent::SessionsUpdated {
                sessions: listed.clone(),
            });

            let target = match state.directory.active_id() {
                Some(id) if !state.directory.contains(id) => {
                    tracing::debug!("Active session {} disappeared", id);
                    Some(state.directory.most_recent().map(|s| s.id.clone()))
                }
                None if state.timeline.is_empty() => {
                    state.directory.most_recent().map(|s| Some(s.id.clone()))
                }
                _ => None,
            };
            let selected = target.as_ref().is_some_and(|t| t.is_some());
            if let Some(target) = target {
                self.activate(state, target);
            }
            (listed, selected)
        };

        if selected {
            self.load_older().await;
        }
        Ok(listed)
    }

    /// Make `session_id` active and load its newest page
    pub async fn select_session(&self, session_id: &str) -> Result<HistoryLoad> {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !state.directory.contains(session_id) {
                return Err(Error::SessionNotFound(session_id.to_string()));
            }
            self.activate(state, Some(session_id.to_string()));
        }
        Ok(self.load_older().await)
    }

    /// Start a new conversation; the server assigns its id on the first reply
    pub fn new_session(&self) {
        let mut guard = self.state.lock();
        self.activate(&mut guard, None);
    }

    pub async fn rename_session(&self, session_id: &str, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("session name is empty".into()));
        }
        if !self.state.lock().directory.contains(session_id) {
            return Err(Error::SessionNotFound(session_id.to_string()));
        }

        self.sessions.rename_session(session_id, name).await?;

        let mut state = self.state.lock();
        state.directory.rename(session_id, name);
        self.emit(EngineEvent::SessionsUpdated {
            sessions: state.directory.sessions().to_vec(),
        });
        Ok(())
    }

    /// Delete a session. Deleting the active one moves to the most recent
    /// remaining session, or to a pending new session if none is left.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.delete_session(session_id).await?;

        let reload = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.directory.remove(session_id);
            self.emit(EngineEvent::SessionsUpdated {
                sessions: state.directory.sessions().to_vec(),
            });

            if state.directory.is_active(session_id) {
                let next = state.directory.most_recent().map(|s| s.id.clone());
                let reload = next.is_some();
                self.activate(state, next);
                reload
            } else {
                false
            }
        };

        if reload {
            self.load_older().await;
        }
        Ok(())
    }

    /// Search the user's messages. A blank query finds nothing.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.sessions.search_messages(query).await?)
    }

    /// Switch to the hit's session and bring the hit into view, loading older
    /// pages as needed. Returns whether the message was found.
    pub async fn open_hit(&self, hit: &SearchHit) -> Result<bool> {
        let (known, active) = {
            let state = self.state.lock();
            (
                state.directory.contains(&hit.session_id),
                state.directory.is_active(&hit.session_id),
            )
        };
        if !known {
            self.refresh_sessions().await?;
        }
        if !active {
            self.select_session(&hit.session_id).await?;
        }

        let Some(message_id) = hit.message_id.as_deref() else {
            return Ok(false);
        };
        for _ in 0..MAX_SEARCH_PAGES {
            if self.focus_message(message_id) {
                return Ok(true);
            }
            match self.load_older().await {
                HistoryLoad::Loaded { .. } => {}
                _ => break,
            }
        }
        Ok(self.focus_message(message_id))
    }

    /// Scroll a loaded message into view and highlight it
    pub fn focus_message(&self, message_id: &str) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state
            .scroll
            .focus(message_id, state.viewport.as_mut(), Instant::now())
        {
            return false;
        }
        self.emit(EngineEvent::MessageFocused {
            message_id: message_id.to_string(),
        });
        self.emit_scrolled(state);
        true
    }

    // ---- History ----

    /// Load the next older page of the active session and prepend it
    pub async fn load_older(&self) -> HistoryLoad {
        let (request, selection) = {
            let mut state = self.state.lock();
            if state.directory.active_id().is_none() {
                return HistoryLoad::NoSession;
            }
            match state.pager.state() {
                PagerState::Loading => return HistoryLoad::InProgress,
                PagerState::Exhausted => return HistoryLoad::Exhausted,
                PagerState::Idle => {}
            }
            let Some(request) = state.pager.begin() else {
                return HistoryLoad::NoSession;
            };
            (request, state.selection)
        };

        let result = self
            .sessions
            .fetch_history(&request.session_id, request.limit, request.offset)
            .await;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.selection != selection {
            tracing::debug!(
                "Discarding history page for {} (offset {})",
                request.session_id,
                request.offset
            );
            return HistoryLoad::Discarded;
        }

        let records = match result {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Failed to load history for {}: {}", request.session_id, e);
                state.pager.fail(&request);
                return HistoryLoad::Failed;
            }
        };

        let received = records.len();
        let page: Vec<Message> = records.into_iter().filter_map(Message::from_history).collect();

        let anchor = state.scroll.capture(state.viewport.as_ref());
        let count = state.timeline.prepend(page);
        state.viewport.layout(state.timeline.messages());
        if request.is_initial() {
            state.scroll.scroll_to_bottom(state.viewport.as_mut());
        } else {
            state.scroll.restore(anchor, state.viewport.as_mut());
        }
        state.pager.complete(&request, received);
        let exhausted = state.pager.is_exhausted();

        self.emit(EngineEvent::HistoryPrepended {
            session_id: request.session_id.clone(),
            count,
            exhausted,
        });
        self.emit_scrolled(state);
        HistoryLoad::Loaded { count, exhausted }
    }

    /// Report a user scroll. Reaching the top edge loads the next older page;
    /// returns `None` when the viewport is elsewhere.
    pub async fn on_scroll(&self, scroll_top: f64) -> Option<HistoryLoad> {
        let at_top = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.viewport.set_scroll_top(scroll_top);
            state.scroll.at_top(state.viewport.as_ref())
        };
        if !at_top {
            return None;
        }
        Some(self.load_older().await)
    }

    // ---- Exchanges ----

    /// Send a query in the active (or pending) session and wait for the reply
    pub async fn send(&self, query: &str) -> Result<ExchangeOutcome> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query is empty".into()));
        }

        let ticket = self.begin_exchange(query)?;
        let request = CompletionRequest {
            session_id: ticket.session_id.clone(),
            query: query.to_string(),
            stream: self.config.stream,
        };
        tracing::debug!(
            "Exchange {} started (session {:?})",
            ticket.message_id,
            ticket.session_id
        );

        let started_at = Instant::now();
        let Some(termination) = self.run_exchange(&ticket, &request, started_at).await else {
            tracing::debug!("Exchange {} abandoned", ticket.message_id);
            return Ok(ExchangeOutcome::Abandoned);
        };

        let (outcome, needs_adoption) = self.finish_exchange(&ticket, termination);
        if needs_adoption {
            if let Err(e) = self.adopt_new_session(ticket.selection).await {
                tracing::warn!("Could not resolve the new session id: {}", e);
            }
        }
        Ok(outcome)
    }

    /// Re-submit the query that produced `message_id` as a new exchange. The
    /// original message stays in the timeline.
    pub async fn retry(&self, message_id: &str) -> Result<ExchangeOutcome> {
        let query = self.state.lock().timeline.retry_query(message_id)?;
        self.send(&query).await
    }

    fn begin_exchange(&self, query: &str) -> Result<Ticket> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.timeline.is_in_flight() || state.adopting {
            return Err(Error::Busy);
        }

        let user = state.timeline.append_user(query).clone();
        let placeholder = state.timeline.begin_assistant()?.clone();
        state.viewport.layout(state.timeline.messages());
        state
            .scroll
            .follow_tail(state.viewport.as_mut(), Instant::now());

        let cancel = CancellationToken::new();
        state.in_flight = Some(cancel.clone());

        let ticket = Ticket {
            selection: state.selection,
            message_id: placeholder.id.clone(),
            session_id: state.directory.active_id().map(String::from),
            cancel,
        };
        self.emit(EngineEvent::MessageAppended { message: user });
        self.emit(EngineEvent::MessageAppended {
            message: placeholder,
        });
        Ok(ticket)
    }

    /// Drive the request to its end. `None` means the exchange was cancelled.
    async fn run_exchange(
        &self,
        ticket: &Ticket,
        request: &CompletionRequest,
        started_at: Instant,
    ) -> Option<Termination> {
        let idle = self.config.stream_idle_timeout;
        let reply = tokio::select! {
            _ = ticket.cancel.cancelled() => return None,
            reply = tokio::time::timeout(idle, self.completions.complete(request)) => reply,
        };

        match reply {
            Err(_) => {
                tracing::warn!("No response within {:?}", idle);
                Some(StreamState::new(started_at).abort(ExchangeFailure::Timeout, Instant::now()))
            }
            Ok(Err(e)) => {
                tracing::warn!("Completion request failed: {}", e);
                let failure = ExchangeFailure::from_api(&e);
                Some(StreamState::new(started_at).abort(failure, Instant::now()))
            }
            Ok(Ok(CompletionReply::Complete(body))) => {
                Some(complete_body(body, started_at, Instant::now()))
            }
            Ok(Ok(CompletionReply::Stream(stream))) => {
                self.consume_stream(ticket, stream, started_at).await
            }
        }
    }

    async fn consume_stream(
        &self,
        ticket: &Ticket,
        mut stream: ByteStream,
        started_at: Instant,
    ) -> Option<Termination> {
        let idle = self.config.stream_idle_timeout;
        let mut ingest = StreamState::new(started_at);

        loop {
            let next = tokio::select! {
                _ = ticket.cancel.cancelled() => return None,
                next = tokio::time::timeout(idle, stream.next()) => next,
            };

            match next {
                Err(_) => {
                    tracing::warn!("Stream idle for {:?}, aborting", idle);
                    return Some(ingest.abort(ExchangeFailure::Timeout, Instant::now()));
                }
                Ok(None) => return Some(ingest.finish(Instant::now())),
                Ok(Some(Err(e))) => {
                    tracing::warn!("Stream read failed: {}", e);
                    let failure = ExchangeFailure::from_api(&e);
                    return Some(ingest.abort(failure, Instant::now()));
                }
                Ok(Some(Ok(chunk))) => {
                    let patches = ingest.ingest(&chunk, Instant::now());
                    if !self.apply_patches(ticket, &patches) {
                        return None;
                    }
                    if ingest.is_done() {
                        return Some(ingest.finish(Instant::now()));
                    }
                }
            }
        }
    }

    /// Apply streamed patches if the exchange still owns the tail
    fn apply_patches(&self, ticket: &Ticket, patches: &[MessagePatch]) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !ticket.is_current(state) {
            return false;
        }
        if patches.is_empty() {
            return true;
        }

        for patch in patches {
            state.timeline.patch_assistant(patch);
            self.emit(EngineEvent::MessageUpdated {
                message_id: ticket.message_id.clone(),
                delta: patch.append.clone(),
            });
        }
        state.viewport.layout(state.timeline.messages());
        if state
            .scroll
            .follow_tail(state.viewport.as_mut(), Instant::now())
        {
            self.emit_scrolled(state);
        }
        true
    }

    /// Apply the final patches and close the in-flight slot. Also reports
    /// whether a pending session still needs its id looked up.
    fn finish_exchange(&self, ticket: &Ticket, termination: Termination) -> (ExchangeOutcome, bool) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !ticket.is_current(state) {
            return (ExchangeOutcome::Abandoned, false);
        }

        for patch in &termination.patches {
            state.timeline.patch_assistant(patch);
        }
        let Some(message) = state.timeline.finalize().cloned() else {
            return (ExchangeOutcome::Abandoned, false);
        };
        state.in_flight = None;
        state.viewport.layout(state.timeline.messages());
        if state
            .scroll
            .follow_tail(state.viewport.as_mut(), Instant::now())
        {
            self.emit_scrolled(state);
        }
        self.emit(EngineEvent::MessageFinalized {
            message: message.clone(),
            failure: termination.failure.clone(),
        });

        let Some(failure) = termination.failure else {
            tracing::debug!("Exchange {} completed", message.id);
            let mut needs_adoption = false;
            if ticket.session_id.is_some() {
                // The query and the reply are now the newest stored records
                state.pager.note_persisted(2);
            } else if state.directory.active_id().is_none() {
                let assigned = message.metadata.as_ref().and_then(|m| m.session_id.clone());
                match assigned {
                    Some(session_id) => self.adopt(state, session_id),
                    None => {
                        state.adopting = true;
                        needs_adoption = true;
                    }
                }
            }
            return (ExchangeOutcome::Completed(message), needs_adoption);
        };

        tracing::debug!("Exchange {} failed: {}", message.id, failure);
        (ExchangeOutcome::Failed { message, failure }, false)
    }

    /// Find the session the server created for the pending conversation
    async fn adopt_new_session(&self, selection: u64) -> Result<()> {
        let known = self.state.lock().directory.ids();
        let listed = self.sessions.list_sessions().await;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.selection == selection {
            state.adopting = false;
        }
        state.directory.replace(listed?);
        self.emit(EngineEvent::SessionsUpdated {
            sessions: state.directory.sessions().to_vec(),
        });

        if state.selection != selection || state.directory.active_id().is_some() {
            return Ok(());
        }
        match state.directory.newest_unknown(&known).map(|s| s.id.clone()) {
            Some(session_id) => self.adopt(state, session_id),
            None => tracing::warn!("No new session appeared after the first exchange"),
        }
        Ok(())
    }

    /// Give the pending conversation its id. The timeline already holds the
    /// whole session, so there is nothing left to page.
    fn adopt(&self, state: &mut EngineState, session_id: String) {
        tracing::debug!("Pending conversation is session {}", session_id);
        state.directory.set_active(Some(session_id.clone()));
        state.pager.reset(Some(&session_id));
        state.pager.mark_exhausted();
        self.emit(EngineEvent::SessionAssigned { session_id });
    }

    /// Swap the timeline for another session (or the pending one)
    fn activate(&self, state: &mut EngineState, session_id: Option<String>) {
        state.selection = state.selection.wrapping_add(1);
        state.adopting = false;
        if let Some(cancel) = state.in_flight.take() {
            cancel.cancel();
        }
        state.timeline.clear();
        state.pager.reset(session_id.as_deref());
        state.scroll.reset();
        state.directory.set_active(session_id.clone());
        state.viewport.layout(state.timeline.messages());
        self.emit(EngineEvent::SessionSelected { session_id });
    }

    fn emit_scrolled(&self, state: &EngineState) {
        self.emit(EngineEvent::Scrolled {
            scroll_top: state.viewport.metrics().scroll_top,
        });
    }

    fn emit(&self, event: EngineEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }
}
