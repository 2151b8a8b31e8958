//! Encoding workers: CPU-bound transaction serialization.
//!
//! A fixed pool of workers shares one bounded MPMC ingest channel; whichever
//! worker is free pulls the next fragment, so load balances without any
//! per-table stickiness. Each worker owns its codec instance (codecs are
//! stateful and not thread-safe).

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use drift_core::emit;
use drift_core::metrics::events::RowsEncoded;

use crate::codec::Encoder;
use crate::error::{ChannelClosedSnafu, EncodeSnafu, SinkError};
use crate::model::EventFragment;

use snafu::prelude::*;

pub(crate) struct EncodingWorker {
    id: usize,
    changefeed: String,
    encoder: Box<dyn Encoder>,
    input: flume::Receiver<EventFragment>,
    output: mpsc::Sender<EventFragment>,
}

impl EncodingWorker {
    pub(crate) fn new(
        id: usize,
        changefeed: String,
        encoder: Box<dyn Encoder>,
        input: flume::Receiver<EventFragment>,
        output: mpsc::Sender<EventFragment>,
    ) -> Self {
        Self {
            id,
            changefeed,
            encoder,
            input,
            output,
        }
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Result<(), SinkError> {
        loop {
            let fragment = tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(()),

                received = self.input.recv_async() => match received {
                    Ok(fragment) => fragment,
                    // Ingest closed and drained.
                    Err(_) => break,
                },
            };

            let fragment = self.encode(fragment)?;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Ok(()),

                sent = self.output.send(fragment) => {
                    if sent.is_err() {
                        return ChannelClosedSnafu.fail();
                    }
                }
            }
        }

        debug!(
            changefeed = %self.changefeed,
            worker = self.id,
            "Encoding worker input drained"
        );
        Ok(())
    }

    fn encode(&mut self, mut fragment: EventFragment) -> Result<EventFragment, SinkError> {
        for row in &fragment.txn.rows {
            self.encoder
                .append_row(&fragment.txn, row)
                .context(EncodeSnafu)?;
        }
        let messages = self.encoder.build_messages().context(EncodeSnafu)?;

        emit!(RowsEncoded {
            count: fragment.txn.rows.len() as u64,
            changefeed: self.changefeed.clone(),
        });

        fragment.encoded = Some(messages);
        Ok(fragment)
    }
}
