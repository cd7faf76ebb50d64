//! Association building: link reconciled records once both ends have remote
//! ids. A pair missing either side is skipped; it is picked up by a later run
//! after the missing side gets reconciled.

use crm_sink::{AssociationInput, CrmApi, MAX_BATCH_SIZE};
use staging::{Store, StoreError};
use sync_core::RemoteId;

/// Columns an association query must select.
pub const FROM_COLUMN: &str = "from_id";
pub const TO_COLUMN: &str = "to_id";

/// One association kind: the query that pairs remote ids and where to send
/// the pairs.
#[derive(Debug, Clone, Copy)]
pub struct AssociationLink<'a> {
    pub query: &'a str,
    pub from_object_type: &'a str,
    pub to_object_type: &'a str,
    pub association_type: &'a str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssociationOutcome {
    pub built: usize,
    pub skipped: usize,
    pub created: usize,
    pub failed: usize,
}

/// Run the association query and turn each complete row into an input.
pub fn build_associations(
    store: &Store,
    link: &AssociationLink<'_>,
) -> Result<(Vec<AssociationInput>, usize), StoreError> {
    let mut skipped = 0;
    let inputs = store
        .run_query(link.query)?
        .into_iter()
        .filter_map(|row| {
            let from = row.get(FROM_COLUMN).and_then(RemoteId::from_value);
            let to = row.get(TO_COLUMN).and_then(RemoteId::from_value);
            match (from, to) {
                (Some(from), Some(to)) => {
                    Some(AssociationInput::new(from, to, link.association_type))
                }
                _ => {
                    skipped += 1;
                    None
                }
            }
        })
        .collect();
    Ok((inputs, skipped))
}

/// Build and send one association kind in chunks of `batch_size`.
pub async fn associate<A: CrmApi + ?Sized>(
    api: &A,
    store: &Store,
    link: &AssociationLink<'_>,
    batch_size: usize,
    dry_run: bool,
) -> Result<AssociationOutcome, StoreError> {
    let (inputs, skipped) = build_associations(store, link)?;
    let mut outcome = AssociationOutcome {
        built: inputs.len(),
        skipped,
        ..AssociationOutcome::default()
    };
    if skipped > 0 {
        tracing::warn!(
            association_type = link.association_type,
            skipped,
            "Skipping association rows with a missing remote id"
        );
    }
    if inputs.is_empty() {
        return Ok(outcome);
    }
    if dry_run {
        tracing::info!(
            association_type = link.association_type,
            count = inputs.len(),
            "Dry run: would create associations"
        );
        return Ok(outcome);
    }

    for chunk in inputs.chunks(batch_size.clamp(1, MAX_BATCH_SIZE)) {
        match api
            .create_associations(link.from_object_type, link.to_object_type, chunk.to_vec())
            .await
        {
            Ok(response) => {
                outcome.created += response.results.len();
                outcome.failed += response.errors.len();
                for error in &response.errors {
                    tracing::warn!(
                        association_type = link.association_type,
                        message = %error.message,
                        "CRM rejected an association"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    association_type = link.association_type,
                    size = chunk.len(),
                    error = %e,
                    "Association batch rejected"
                );
                outcome.failed += chunk.len();
            }
        }
    }

    tracing::info!(
        association_type = link.association_type,
        created = outcome.created,
        failed = outcome.failed,
        "Finished associations"
    );
    Ok(outcome)
}
