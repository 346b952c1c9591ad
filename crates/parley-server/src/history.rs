//! Chat-history pagination.
//!
//! Pure read logic over a room's already-loaded message log: the
//! anchored windows used for scroll-back and the tail window served
//! on first open. No mutation, no I/O.

use serde::{Deserialize, Serialize};

use parley_shared::{MessageId, UserId};
use parley_store::StoredMessage;

use crate::error::ApiError;

/// Window size for anchored paging unless the caller overrides it.
pub const DEFAULT_PAGE_SIZE: usize = 30;

/// On first open with read history, this many messages before the
/// caller's most recent self-read message are included.
const TAIL_CONTEXT: usize = 70;

/// On first open with no read history, the last this-many messages.
const TAIL_FALLBACK: usize = 50;

/// Paging direction relative to the anchor message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            _ => None,
        }
    }
}

/// One page of history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    /// Boundary marker ("last message" / "first message") when the
    /// anchor already sits at an end of the log.
    pub marker: Option<&'static str>,
    pub messages: Vec<StoredMessage>,
    /// Current message count of the whole room log.
    pub total_count: usize,
}

impl HistoryPage {
    fn boundary(marker: &'static str, total_count: usize) -> Self {
        Self {
            marker: Some(marker),
            messages: Vec::new(),
            total_count,
        }
    }
}

/// Compute one history page over `messages` for `caller`.
///
/// Without an anchor, returns the tail window around the caller's
/// most recent self-read message ([`TAIL_CONTEXT`] before it through
/// the end of the log), or the last [`TAIL_FALLBACK`] messages when
/// the caller has read nothing yet. With an anchor, pages strictly
/// before (`up`) or after (`down`) it.
pub fn page(
    messages: &[StoredMessage],
    caller: &UserId,
    anchor: Option<MessageId>,
    direction: Option<Direction>,
    page_size: usize,
) -> Result<HistoryPage, ApiError> {
    let total_count = messages.len();

    let Some(anchor) = anchor else {
        return Ok(tail_window(messages, caller, total_count));
    };

    // Boundary checks first: an anchor at either end of the log is
    // answered with an empty page and a marker, so the client stops
    // re-fetching. "last" wins for a single-message log.
    if messages.last().map(|m| m.id) == Some(anchor) {
        return Ok(HistoryPage::boundary("last message", total_count));
    }
    if messages.first().map(|m| m.id) == Some(anchor) {
        return Ok(HistoryPage::boundary("first message", total_count));
    }

    let anchor_index = messages
        .iter()
        .position(|m| m.id == anchor)
        .ok_or_else(|| ApiError::NotFound("anchor message not found".into()))?;

    let (start, end) = match direction {
        Some(Direction::Up) => (anchor_index.saturating_sub(page_size), anchor_index),
        Some(Direction::Down) => (
            anchor_index + 1,
            total_count.min(anchor_index + 1 + page_size),
        ),
        None => {
            return Err(ApiError::InvalidArgument(
                "invalid direction specified".into(),
            ))
        }
    };

    Ok(HistoryPage {
        marker: None,
        messages: messages[start..end].to_vec(),
        total_count,
    })
}

/// The no-anchor window served when a conversation is opened.
fn tail_window(messages: &[StoredMessage], caller: &UserId, total_count: usize) -> HistoryPage {
    let window = match messages.iter().rposition(|m| m.is_read_by(caller)) {
        Some(last_read_index) => &messages[last_read_index.saturating_sub(TAIL_CONTEXT)..],
        None => &messages[total_count.saturating_sub(TAIL_FALLBACK)..],
    };

    HistoryPage {
        marker: None,
        messages: window.to_vec(),
        total_count,
    }
}
