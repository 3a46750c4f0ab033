// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;

use crate::errors::DispositionError;

/// Terminal outcome handle for a record pulled from a queue.
///
/// Both operations consume the handle, so a record can be settled at most once.
#[async_trait]
pub trait Disposition: Send {
    /// Marks the record as consumed.
    async fn acknowledge(self: Box<Self>) -> Result<(), DispositionError>;

    /// Returns the record to its source. `redeliver` asks the source to hand
    /// it out again rather than dropping or dead-lettering it.
    async fn requeue(self: Box<Self>, redeliver: bool) -> Result<(), DispositionError>;
}

/// One inbound message: an opaque payload plus its disposition handle.
pub struct Record {
    body: Vec<u8>,
    disposition: Box<dyn Disposition>,
}

impl Record {
    pub fn new(body: impl Into<Vec<u8>>, disposition: Box<dyn Disposition>) -> Self {
        Record {
            body: body.into(),
            disposition,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub async fn acknowledge(self) -> Result<(), DispositionError> {
        self.disposition.acknowledge().await
    }

    pub async fn requeue(self, redeliver: bool) -> Result<(), DispositionError> {
        self.disposition.requeue(redeliver).await
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// Records collected between two flushes, in arrival order.
pub type Batch = Vec<Record>;
