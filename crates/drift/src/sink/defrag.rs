//! Defragmenter: restores per-table order after parallel encoding.
//!
//! Encoding workers finish in arbitrary order. Each fragment carries the
//! monotone per-table index assigned at ingest; this task buffers early
//! arrivals in a per-table min-heap and releases consecutive runs, so the
//! writer observes every table's fragments in ingest order with no gaps.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use drift_core::emit;
use drift_core::metrics::events::FragmentsPending;

use crate::error::{ChannelClosedSnafu, SinkError};
use crate::model::{EventFragment, VersionedTable};

use snafu::prelude::*;

/// Heap entry ordered by per-table sequence.
struct Pending(EventFragment);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.0.table_seq == other.0.table_seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.table_seq.cmp(&other.0.table_seq)
    }
}

/// Reorder buffer for one versioned table.
struct TableBuffer {
    /// The smallest per-table sequence not yet emitted.
    next_seq: u64,
    pending: BinaryHeap<Reverse<Pending>>,
}

impl TableBuffer {
    fn new() -> Self {
        Self {
            next_seq: 1,
            pending: BinaryHeap::new(),
        }
    }
}

/// Restores per-table fragment order between the encoder pool and the writer.
pub(crate) struct Defragmenter {
    changefeed: String,
    input: mpsc::Receiver<EventFragment>,
    output: mpsc::Sender<EventFragment>,
    tables: HashMap<VersionedTable, TableBuffer>,
    pending_count: usize,
}

impl Defragmenter {
    pub(crate) fn new(
        changefeed: String,
        input: mpsc::Receiver<EventFragment>,
        output: mpsc::Sender<EventFragment>,
    ) -> Self {
        Self {
            changefeed,
            input,
            output,
            tables: HashMap::new(),
            pending_count: 0,
        }
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Result<(), SinkError> {
        loop {
            let fragment = tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(()),

                fragment = self.input.recv() => match fragment {
                    Some(fragment) => fragment,
                    // Input closed and drained: encoding workers are done.
                    None => break,
                },
            };

            for ready in self.submit(fragment) {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => return Ok(()),

                    sent = self.output.send(ready) => {
                        if sent.is_err() {
                            return ChannelClosedSnafu.fail();
                        }
                    }
                }
            }

            emit!(FragmentsPending {
                count: self.pending_count,
                changefeed: self.changefeed.clone(),
            });
        }

        if self.pending_count > 0 {
            // Pending fragments are dropped; their transactions will be
            // re-emitted by upstream after restart (at-least-once).
            warn!(
                changefeed = %self.changefeed,
                pending = self.pending_count,
                "Dropping out-of-order fragments at shutdown"
            );
        }
        debug!(changefeed = %self.changefeed, "Defragmenter input drained");
        Ok(())
    }

    /// Accept one encoded fragment; return every fragment that is now
    /// releasable in order.
    fn submit(&mut self, fragment: EventFragment) -> Vec<EventFragment> {
        let buffer = self
            .tables
            .entry(fragment.table.clone())
            .or_insert_with(TableBuffer::new);

        let mut ready = Vec::new();
        if fragment.table_seq == buffer.next_seq {
            buffer.next_seq += 1;
            ready.push(fragment);

            while let Some(Reverse(head)) = buffer.pending.peek() {
                if head.0.table_seq != buffer.next_seq {
                    break;
                }
                let Some(Reverse(Pending(next))) = buffer.pending.pop() else {
                    break;
                };
                self.pending_count -= 1;
                buffer.next_seq += 1;
                ready.push(next);
            }
        } else {
            buffer.pending.push(Reverse(Pending(fragment)));
            self.pending_count += 1;
        }
        ready
    }
}
