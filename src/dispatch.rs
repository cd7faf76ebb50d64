//! Dispatch and reconcile: send CREATE/UPDATE batches and grow the identity
//! ledger from what the CRM created.
//!
//! Failure policy per chunk:
//!
//! - whole create batch rejected: nothing is recorded for that chunk
//! - whole create batch rejected as a duplicate: the chunk is retried one
//!   input at a time so the colliding rows can be found
//! - per-item failures: only the created items are recorded; unless an
//!   item failed as a duplicate, the rest count as failed items
//! - duplicate on create: the existing record is looked up by its key,
//!   recorded, and the row is sent as an UPDATE instead
//! - identity conflict: logged with full context, that row is skipped
//!
//! Nothing here retries transient failures; the CRM client does that.

use std::collections::BTreeMap;

use crm_sink::{
    BatchResponse, CreateInput, CrmApi, Filter, SearchRequest, UpdateInput, MAX_BATCH_SIZE,
};
use staging::{IdentityOutcome, Store, StoreError};
use sync_core::{EntityKind, LocalKey, RemoteId};

use crate::payload::{filter_value, without_key, CreateRow, UpdateRow};

/// Counters for one entity kind's dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Rows submitted for creation
    pub creates_sent: usize,
    /// New ledger rows written
    pub identities_recorded: usize,
    /// Inputs submitted for update, recovered duplicates included
    pub updates_sent: usize,
    /// Records the CRM reported as updated
    pub updated: usize,
    pub duplicates_recovered: usize,
    pub conflicts: usize,
    pub rejected_batches: usize,
    pub failed_items: usize,
}

impl std::ops::AddAssign for DispatchOutcome {
    fn add_assign(&mut self, other: Self) {
        self.creates_sent += other.creates_sent;
        self.identities_recorded += other.identities_recorded;
        self.updates_sent += other.updates_sent;
        self.updated += other.updated;
        self.duplicates_recovered += other.duplicates_recovered;
        self.conflicts += other.conflicts;
        self.rejected_batches += other.rejected_batches;
        self.failed_items += other.failed_items;
    }
}

/// Sends one entity kind's batches to its CRM object type.
pub struct Dispatcher<'a, A: CrmApi + ?Sized> {
    api: &'a A,
    store: &'a Store,
    kind: EntityKind,
    object_type: &'a str,
    batch_size: usize,
    dry_run: bool,
}

impl<'a, A: CrmApi + ?Sized> Dispatcher<'a, A> {
    pub fn new(api: &'a A, store: &'a Store, kind: EntityKind, object_type: &'a str) -> Self {
        Self {
            api,
            store,
            kind,
            object_type,
            batch_size: MAX_BATCH_SIZE,
            dry_run: false,
        }
    }

    /// Chunk size, clamped to `1..=MAX_BATCH_SIZE`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub async fn dispatch_creates(&self, rows: Vec<CreateRow>) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if rows.is_empty() {
            return outcome;
        }
        if self.dry_run {
            tracing::info!(kind = %self.kind, count = rows.len(), "Dry run: would create records");
            return outcome;
        }

        for chunk in rows.chunks(self.batch_size) {
            self.create_chunk(chunk, &mut outcome).await;
        }
        tracing::info!(
            kind = %self.kind,
            sent = outcome.creates_sent,
            recorded = outcome.identities_recorded,
            recovered = outcome.duplicates_recovered,
            "Finished creating records"
        );
        outcome
    }

    pub async fn dispatch_updates(&self, rows: Vec<UpdateRow>) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if rows.is_empty() {
            return outcome;
        }
        if self.dry_run {
            tracing::info!(kind = %self.kind, count = rows.len(), "Dry run: would update records");
            return outcome;
        }

        for chunk in rows.chunks(self.batch_size) {
            let inputs = chunk
                .iter()
                .map(|row| UpdateInput {
                    id: row.remote_id.clone(),
                    properties: row.properties.clone(),
                })
                .collect();
            self.send_updates(inputs, &mut outcome).await;
        }
        tracing::info!(
            kind = %self.kind,
            sent = outcome.updates_sent,
            updated = outcome.updated,
            "Finished updating records"
        );
        outcome
    }

    async fn create_chunk(&self, chunk: &[CreateRow], outcome: &mut DispatchOutcome) {
        outcome.creates_sent += chunk.len();
        let inputs = chunk
            .iter()
            .map(|row| CreateInput {
                properties: row.properties.clone(),
            })
            .collect();

        match self.api.create_batch(self.object_type, inputs).await {
            Ok(response) => {
                let unmatched = self.record_created(chunk, &response, outcome);
                for error in &response.errors {
                    tracing::warn!(
                        kind = %self.kind,
                        category = error.category.as_deref().unwrap_or("UNKNOWN"),
                        message = %error.message,
                        "CRM rejected a create input"
                    );
                }
                if unmatched.is_empty() {
                    return;
                }
                if response.errors.iter().any(|e| e.is_duplicate()) {
                    // Item errors carry no key, so the colliding rows are
                    // found by sending the unmatched ones alone.
                    for row in unmatched {
                        self.create_one(row, outcome).await;
                    }
                } else {
                    outcome.failed_items += unmatched.len();
                }
            }
            Err(e) if e.is_duplicate() => {
                tracing::warn!(
                    kind = %self.kind,
                    size = chunk.len(),
                    error = %e,
                    "Create batch collided with existing records, retrying one at a time"
                );
                for row in chunk {
                    self.create_one(row, outcome).await;
                }
            }
            Err(e) => {
                tracing::error!(
                    kind = %self.kind,
                    size = chunk.len(),
                    error = %e,
                    "Create batch rejected, no identities recorded for it"
                );
                outcome.rejected_batches += 1;
            }
        }
    }

    /// Record the identities the CRM created for `chunk`. Returns the rows
    /// that got no record.
    ///
    /// Results are matched by the key properties the CRM echoes back. When
    /// the echo is missing, results are matched by position, but only if
    /// every input succeeded.
    fn record_created<'r>(
        &self,
        chunk: &'r [CreateRow],
        response: &BatchResponse,
        outcome: &mut DispatchOutcome,
    ) -> Vec<&'r CreateRow> {
        let mut pending: BTreeMap<LocalKey, &'r CreateRow> =
            chunk.iter().map(|row| (row.local_key, row)).collect();
        let positional = response.errors.is_empty() && response.results.len() == chunk.len();

        for (index, result) in response.results.iter().enumerate() {
            let key = LocalKey::from_properties(self.kind, &result.properties).or_else(|| {
                positional
                    .then(|| chunk.get(index).map(|row| row.local_key))
                    .flatten()
            });
            match key.filter(|k| pending.contains_key(k)) {
                Some(key) => {
                    pending.remove(&key);
                    self.record(&key, &result.id, outcome);
                }
                None => {
                    tracing::error!(
                        kind = %self.kind,
                        remote_id = %result.id,
                        "Created record could not be matched to a staged row"
                    );
                    outcome.failed_items += 1;
                }
            }
        }

        pending.into_values().collect()
    }

    async fn create_one(&self, row: &CreateRow, outcome: &mut DispatchOutcome) {
        let input = CreateInput {
            properties: row.properties.clone(),
        };
        match self.api.create_batch(self.object_type, vec![input]).await {
            Ok(response) => match response.results.first() {
                Some(result) => {
                    self.record(&row.local_key, &result.id, outcome);
                }
                None if response.errors.iter().any(|e| e.is_duplicate()) => {
                    self.recover(row, outcome).await
                }
                None => {
                    let message = response
                        .errors
                        .first()
                        .map(|e| e.message.as_str())
                        .unwrap_or("no result returned");
                    tracing::warn!(kind = %self.kind, local_key = %row.local_key, error = message, "Create rejected");
                    outcome.failed_items += 1;
                }
            },
            Err(e) if e.is_duplicate() => self.recover(row, outcome).await,
            Err(e) => {
                tracing::warn!(kind = %self.kind, local_key = %row.local_key, error = %e, "Create rejected");
                outcome.failed_items += 1;
            }
        }
    }

    /// Look up the remote record a failed create collided with. When found,
    /// record it and send the row as an UPDATE.
    async fn recover(&self, row: &CreateRow, outcome: &mut DispatchOutcome) {
        let key_properties = self.kind.key_properties();
        let filters: Vec<Filter> = key_properties
            .iter()
            .filter_map(|name| {
                row.properties
                    .get(*name)
                    .and_then(filter_value)
                    .map(|value| Filter::eq(*name, value))
            })
            .collect();
        if filters.len() != key_properties.len() {
            tracing::warn!(kind = %self.kind, local_key = %row.local_key, "Cannot look up a row without its key properties");
            outcome.failed_items += 1;
            return;
        }

        let request =
            SearchRequest::all_of(filters).with_properties(key_properties.iter().copied());
        let existing = match self.api.search(self.object_type, &request).await {
            Ok(page) => page.results.into_iter().next(),
            Err(e) => {
                tracing::warn!(kind = %self.kind, local_key = %row.local_key, error = %e, "Duplicate lookup failed");
                outcome.failed_items += 1;
                return;
            }
        };
        let Some(existing) = existing else {
            tracing::warn!(kind = %self.kind, local_key = %row.local_key, "Create failed and no existing record was found");
            outcome.failed_items += 1;
            return;
        };

        if !self.record(&row.local_key, &existing.id, outcome) {
            return;
        }
        outcome.duplicates_recovered += 1;
        tracing::info!(
            kind = %self.kind,
            local_key = %row.local_key,
            remote_id = %existing.id,
            "Recovered existing record, sending as update"
        );
        let update = UpdateInput {
            id: existing.id,
            properties: without_key(self.kind, row.properties.clone()),
        };
        self.send_updates(vec![update], outcome).await;
    }

    async fn send_updates(&self, inputs: Vec<UpdateInput>, outcome: &mut DispatchOutcome) {
        let size = inputs.len();
        outcome.updates_sent += size;
        match self.api.update_batch(self.object_type, inputs).await {
            Ok(response) => {
                outcome.updated += response.results.len();
                outcome.failed_items += response.errors.len();
                for error in &response.errors {
                    tracing::warn!(
                        kind = %self.kind,
                        category = error.category.as_deref().unwrap_or("UNKNOWN"),
                        message = %error.message,
                        "CRM rejected an update input"
                    );
                }
            }
            Err(e) => {
                tracing::error!(kind = %self.kind, size, error = %e, "Update batch rejected");
                outcome.rejected_batches += 1;
            }
        }
    }

    /// Write one identity. Returns whether the ledger now holds the pair.
    fn record(&self, local_key: &LocalKey, remote_id: &RemoteId, outcome: &mut DispatchOutcome) -> bool {
        match self.store.record_identity(local_key, remote_id) {
            Ok(IdentityOutcome::Inserted) => {
                outcome.identities_recorded += 1;
                true
            }
            Ok(IdentityOutcome::AlreadyPresent) => true,
            Err(StoreError::IdentityConflict {
                kind,
                local_key,
                offered,
                conflict,
            }) => {
                tracing::error!(
                    kind = %kind,
                    local_key = %local_key,
                    offered_remote_id = %offered,
                    conflict = %conflict,
                    "Identity conflict, record skipped"
                );
                outcome.conflicts += 1;
                false
            }
            Err(e) => {
                tracing::error!(local_key = %local_key, remote_id = %remote_id, error = %e, "Failed to record identity");
                outcome.failed_items += 1;
                false
            }
        }
    }
}
