//! DML writer: demultiplexes the ordered fragment stream into per-table
//! writers and owns their lifecycle.
//!
//! Writers are keyed by versioned table. When a newer schema version of a
//! table shows up, the older writer's inbox is closed; it drains its
//! in-flight fragments, flushes, and retires while the new writer takes
//! over. Cross-table progress is independent.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use drift_core::storage::StorageProviderRef;

use crate::error::{ChannelClosedSnafu, SinkError, WorkerPanicSnafu};
use crate::model::{EventFragment, VersionedTable};
use crate::path::FilePathBuilder;

use super::table::{TableWriter, TableWriterConfig};

use snafu::prelude::*;

/// Capacity of each table writer's inbox.
const TABLE_CHANNEL_SIZE: usize = 64;

pub(crate) struct DmlWriter {
    changefeed: String,
    storage: StorageProviderRef,
    paths: FilePathBuilder,
    config: TableWriterConfig,
    input: mpsc::Receiver<EventFragment>,
}

impl DmlWriter {
    pub(crate) fn new(
        changefeed: String,
        storage: StorageProviderRef,
        paths: FilePathBuilder,
        config: TableWriterConfig,
        input: mpsc::Receiver<EventFragment>,
    ) -> Self {
        Self {
            changefeed,
            storage,
            paths,
            config,
            input,
        }
    }

    pub(crate) async fn run(mut self, cancel: CancellationToken) -> Result<(), SinkError> {
        let mut inboxes: HashMap<VersionedTable, mpsc::Sender<EventFragment>> = HashMap::new();
        let mut writers: JoinSet<Result<(), SinkError>> = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    // Writers observe the same token; just collect them.
                    drop(inboxes);
                    Self::join_all(&mut writers).await?;
                    return Ok(());
                }

                // Surface table writer failures promptly so the supervisor
                // can tear the pipeline down.
                Some(result) = writers.join_next(), if !writers.is_empty() => {
                    Self::check(result)?;
                }

                fragment = self.input.recv() => match fragment {
                    Some(fragment) => {
                        self.dispatch(fragment, &mut inboxes, &mut writers, &cancel).await?;
                    }
                    // Ordered stream is done: graceful close. Closing every
                    // inbox lets writers flush and retire.
                    None => break,
                },
            }
        }

        drop(inboxes);
        Self::join_all(&mut writers).await?;
        debug!(changefeed = %self.changefeed, "DML writer drained");
        Ok(())
    }

    async fn dispatch(
        &self,
        fragment: EventFragment,
        inboxes: &mut HashMap<VersionedTable, mpsc::Sender<EventFragment>>,
        writers: &mut JoinSet<Result<(), SinkError>>,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        if !inboxes.contains_key(&fragment.table) {
            self.retire_older_versions(&fragment.table, inboxes);

            let (tx, rx) = mpsc::channel(TABLE_CHANNEL_SIZE);
            let writer = TableWriter::new(
                self.changefeed.clone(),
                fragment.table.clone(),
                rx,
                self.storage.clone(),
                self.paths.clone(),
                self.config.clone(),
            );
            writers.spawn(writer.run(cancel.clone()));
            inboxes.insert(fragment.table.clone(), tx);

            info!(
                changefeed = %self.changefeed,
                table = %fragment.table,
                "Started table writer"
            );
        }

        let inbox = inboxes
            .get(&fragment.table)
            .expect("inbox inserted above")
            .clone();
        if inbox.send(fragment).await.is_err() {
            // The writer died; prefer its error over the generic one.
            while let Some(result) = writers.try_join_next() {
                Self::check(result)?;
            }
            return ChannelClosedSnafu.fail();
        }
        Ok(())
    }

    /// Close the inboxes of writers for older versions of the same table;
    /// they drain in-flight fragments, flush, and exit.
    fn retire_older_versions(
        &self,
        table: &VersionedTable,
        inboxes: &mut HashMap<VersionedTable, mpsc::Sender<EventFragment>>,
    ) {
        let retired: Vec<VersionedTable> = inboxes
            .keys()
            .filter(|key| key.name == table.name && key.version < table.version)
            .cloned()
            .collect();
        for key in retired {
            inboxes.remove(&key);
            info!(
                changefeed = %self.changefeed,
                table = %key,
                successor = table.version,
                "Retiring table writer for older schema version"
            );
        }
    }

    async fn join_all(writers: &mut JoinSet<Result<(), SinkError>>) -> Result<(), SinkError> {
        let mut first_error = None;
        while let Some(result) = writers.join_next().await {
            if let Err(error) = Self::check(result) {
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check(
        result: Result<Result<(), SinkError>, tokio::task::JoinError>,
    ) -> Result<(), SinkError> {
        match result {
            Ok(inner) => inner,
            Err(join_error) => WorkerPanicSnafu {
                message: join_error.to_string(),
            }
            .fail(),
        }
    }
}
