//! parley-engine: conversation session engine
//!
//! Keeps the timeline of the active chat session in sync with the backend:
//! the session directory, backward history paging with scroll anchoring,
//! streamed reply ingestion and retry. Consumers drive it through [`Engine`]
//! and observe it through [`EngineEvent`]s.

pub mod directory;
pub mod engine;
pub mod error;
pub mod events;
pub mod ingest;
pub mod message;
pub mod pager;
pub mod scroll;
pub mod timeline;

pub use directory::SessionDirectory;
pub use engine::{Engine, EngineConfig, ExchangeOutcome, HistoryLoad, MAX_SEARCH_PAGES};
pub use error::{Error, ExchangeFailure, Result};
pub use events::EngineEvent;
pub use ingest::{StreamState, Termination};
pub use message::{Message, MessagePatch};
pub use pager::{HistoryCursor, HistoryPager, PageRequest, PagerState};
pub use scroll::{RowViewport, ScrollAnchor, ScrollCoordinator, ScrollMetrics, Viewport};
pub use timeline::MessageTimeline;
