//! Derived state outputs and edge digest reconciliation.
//!
//! Every state push re-derives the producer's output table from the
//! Terraform state JSON and brings outgoing edges up to date: an edge
//! whose consumer digest matches the new producer digest is clean, a
//! trailing consumer is dirty, a vanished output key is missing-output.
//! Mock edges are pinned to their mock value and left alone. State blobs
//! are opaque bytes first; an unparseable blob just skips derivation.

use chrono::Utc;
use tracing::debug;

use grid_core::GridError;
use grid_data::{
    Repositories, SchemaSource, StateOutput, StateRecord, ValidationStatus,
};
use grid_graph::EdgeStatus;

pub(crate) async fn refresh_outputs(
    repos: &Repositories,
    state: &StateRecord,
    content: &[u8],
) -> Result<(), GridError> {
    let Ok(doc) = serde_json::from_slice::<serde_json::Value>(content) else {
        debug!(guid = %state.guid, "state blob is not JSON; skipping output derivation");
        return Ok(());
    };
    let serial = doc.get("serial").and_then(|v| v.as_i64()).unwrap_or(0);
    let outputs = doc
        .get("outputs")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    let now = Utc::now();
    let mut digests = std::collections::HashMap::new();

    for (key, entry) in &outputs {
        let value = entry.get("value").unwrap_or(&serde_json::Value::Null);
        let sensitive = entry
            .get("sensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        digests.insert(key.clone(), grid_fingerprint::compute(value));

        // Schema metadata survives pushes; only the per-push fields move.
        let existing = repos.state_outputs.get(state.guid, key).await?;
        let (schema, schema_source, validation_status, last_validated_at) = match existing {
            Some(prev) => (
                prev.schema,
                prev.schema_source,
                prev.validation_status,
                prev.last_validated_at,
            ),
            None => (None, SchemaSource::Inferred, ValidationStatus::Valid, None),
        };
        repos
            .state_outputs
            .upsert(&StateOutput {
                state_guid: state.guid,
                output_key: key.clone(),
                sensitive,
                state_serial: serial,
                schema,
                schema_source,
                validation_status,
                last_validated_at,
            })
            .await?;
    }

    // Outputs that disappeared from the state file.
    for stale in repos.state_outputs.list_for_state(state.guid).await? {
        if !outputs.contains_key(&stale.output_key) {
            repos
                .state_outputs
                .delete(state.guid, &stale.output_key)
                .await?;
        }
    }

    // Reconcile outgoing edges against the fresh digests.
    for mut edge in repos.edges.list_outgoing(state.guid).await? {
        if edge.status == EdgeStatus::Mock {
            continue;
        }
        match digests.get(&edge.from_output) {
            None => {
                edge.status = EdgeStatus::MissingOutput;
                edge.out_digest = None;
            }
            Some(digest) => {
                edge.out_digest = Some(digest.clone());
                edge.last_out_at = Some(now);
                edge.status = match &edge.in_digest {
                    Some(in_digest) if grid_fingerprint::matches(in_digest, digest) => {
                        EdgeStatus::Clean
                    }
                    Some(_) => EdgeStatus::Dirty,
                    None => EdgeStatus::Pending,
                };
            }
        }
        edge.updated_at = now;
        repos.edges.update(&edge).await?;
    }

    Ok(())
}
