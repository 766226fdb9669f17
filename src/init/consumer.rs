// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info};

use crate::bounded_channel::{self, BoundedReceiver};
use crate::init::args::ConsumerRun;
use crate::input::{EmitFunc, FileAttributes};

/// One record as written to stdout
#[derive(Debug, Serialize)]
pub struct OutputRecord {
    pub body: String,
    pub attributes: HashMap<&'static str, String>,
}

impl OutputRecord {
    pub fn new(attributes: &FileAttributes, body: Vec<u8>) -> Self {
        Self {
            body: String::from_utf8_lossy(&body).into_owned(),
            attributes: attributes.to_map(),
        }
    }
}

/// Wires a file consumer to a JSON-lines writer on stdout.
pub struct Consumer {
    args: Box<ConsumerRun>,
}

impl Consumer {
    pub fn new(args: Box<ConsumerRun>) -> Self {
        Self { args }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), BoxError> {
        let config = self.args.file_consumer_config()?;
        info!(
            include = ?config.include,
            exclude = ?config.exclude,
            start_at = %config.start_at,
            "Starting file consumer"
        );

        let (records_tx, records_rx) =
            bounded_channel::bounded::<OutputRecord>(self.args.sending_queue_size.max(1));
        let emit: EmitFunc = Arc::new(move |attributes: &FileAttributes, body: Vec<u8>| {
            if records_tx
                .send_blocking(OutputRecord::new(attributes, body))
                .is_err()
            {
                debug!("Output channel closed, dropping record");
            }
        });

        let manager = config.build(self.args.capabilities(), Some(emit))?;

        let mut task_set = JoinSet::new();
        manager.start(&mut task_set, &cancel).await?;
        // Ends once the manager, and with it every sender, is gone
        task_set.spawn(write_records(records_rx, io::stdout()));

        while let Some(res) = task_set.join_next().await {
            res??;
        }
        Ok(())
    }
}

async fn write_records<W: Write + Send + 'static>(
    mut records_rx: BoundedReceiver<OutputRecord>,
    mut out: W,
) -> Result<(), BoxError> {
    while let Some(record) = records_rx.next().await {
        serde_json::to_writer(&mut out, &record)?;
        out.write_all(b"\n")?;
        out.flush()?;
    }
    Ok(())
}
