//! # Batch Scheduling
//!
//! Packs the items of one cycle into as few exchanges as the PDU budget
//! allows and dispatches them through the [`ConnectionManager`].
//!
//! ## Packing
//!
//! Items are taken in the order given. From the first unprocessed item,
//! items are accumulated while
//!
//! ```text
//! sum(size + item_overhead) < pdu_size - message_overhead
//! count < max_items
//! ```
//!
//! and packing stops at the first item that breaks either bound. An item that
//! does not fit even on its own is sent as a single area exchange, which the
//! transport fragments.
//!
//! ## Example
//!
//! ```rust
//! use voltage_s7::{plan_batches, Batch, ExchangeLimits};
//!
//! let limits = ExchangeLimits::read();
//! let batches = plan_batches(&[2, 2, 400, 4], &limits);
//! assert_eq!(batches, vec![Batch::Multi(0..2), Batch::Area(2), Batch::Multi(3..4)]);
//! ```

use std::ops::Range;

use tracing::{debug, trace};

use crate::connection::ConnectionManager;
use crate::item::{ItemStatus, WireItem};
use crate::limits::{BatchLimits, ExchangeLimits};
use crate::session::DeviceSession;
use crate::transport::S7Transport;

/// Exchange direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// One planned exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    /// Multi-var exchange over a run of items
    Multi(Range<usize>),
    /// Single oversized item, fragmented by the transport
    Area(usize),
}

impl Batch {
    /// Item indices covered by this batch
    pub fn range(&self) -> Range<usize> {
        match self {
            Self::Multi(range) => range.clone(),
            Self::Area(index) => *index..*index + 1,
        }
    }

    pub fn len(&self) -> usize {
        self.range().len()
    }

    pub fn is_empty(&self) -> bool {
        self.range().is_empty()
    }
}

/// Greedy packing of item sizes into batches, preserving order
pub fn plan_batches(sizes: &[usize], limits: &ExchangeLimits) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut start = 0;

    while start < sizes.len() {
        let mut used = 0;
        let mut end = start;
        while end < sizes.len() && limits.fits(used, end - start, sizes[end]) {
            used += sizes[end] + limits.item_overhead;
            end += 1;
        }

        if end == start {
            batches.push(Batch::Area(start));
            start += 1;
        } else {
            batches.push(Batch::Multi(start..end));
            start = end;
        }
    }

    batches
}

/// Outcome of one `execute` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Exchanges sent to the device
    pub exchanges: usize,
    /// Items whose exchange failed
    pub failed: usize,
    /// Items never dispatched
    pub skipped: usize,
}

/// Dispatches planned batches over a connection
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchScheduler {
    limits: BatchLimits,
}

impl BatchScheduler {
    pub fn new(limits: BatchLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &BatchLimits {
        &self.limits
    }

    /// Run every batch of `items`, recording each item's status.
    ///
    /// A failed exchange marks all of its items `Failed` with the exchange
    /// status code. Once the connection's failure threshold is reached, or
    /// the session stops, the remaining items are marked `Skipped`.
    pub async fn execute<T: S7Transport>(
        &self,
        conn: &mut ConnectionManager<T>,
        session: &DeviceSession,
        items: &mut [WireItem],
        direction: Direction,
    ) -> BatchSummary {
        let limits = match direction {
            Direction::Read => self.limits.read,
            Direction::Write => self.limits.write,
        }
        .capped_to(conn.negotiated_pdu());

        let sizes: Vec<usize> = items.iter().map(WireItem::size).collect();
        let mut summary = BatchSummary::default();

        for batch in plan_batches(&sizes, &limits) {
            let range = batch.range();
            if conn.failures_exhausted() || !session.is_running() {
                for item in &mut items[range.clone()] {
                    item.status = ItemStatus::Skipped;
                }
                summary.skipped += range.len();
                continue;
            }

            trace!(
                "{}: {} batch {:?} of {} items",
                session.device(),
                direction.as_str(),
                batch,
                items.len()
            );
            let result = match (&batch, direction) {
                (Batch::Multi(r), Direction::Read) => conn.read_multi(&mut items[r.clone()]).await,
                (Batch::Multi(r), Direction::Write) => {
                    conn.write_multi(&mut items[r.clone()]).await
                }
                (Batch::Area(i), Direction::Read) => conn.read_area(&mut items[*i]).await,
                (Batch::Area(i), Direction::Write) => conn.write_area(&mut items[*i]).await,
            };
            summary.exchanges += 1;

            if let Err(e) = result {
                let code = e.status_code();
                for item in &mut items[range.clone()] {
                    item.status = ItemStatus::Failed(code);
                }
                summary.failed += range.len();
            }
        }

        if summary.exchanges > 0 {
            debug!(
                "{}: {} {} items in {} exchanges ({} failed, {} skipped)",
                session.device(),
                direction.as_str(),
                items.len(),
                summary.exchanges,
                summary.failed,
                summary.skipped
            );
        }
        summary
    }
}
