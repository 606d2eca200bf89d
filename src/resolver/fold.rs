/// Left fold of confirmed operations into a document state
use crate::{
    document::DocumentState,
    error::{RegistrarError, RegistrarResult},
    operation::{Operation, SignedOperation},
    store::StoredOperation,
};
use chrono::{DateTime, Utc};

/// Apply one signed operation to the state folded so far
///
/// `None` is the empty state before the create operation. Signatures are
/// checked against the master keys live in the state the operation applies
/// to.
pub fn apply(
    state: Option<DocumentState>,
    signed: &SignedOperation,
    op_hash: &str,
    anchored_at: Option<DateTime<Utc>>,
) -> RegistrarResult<DocumentState> {
    let mut next = match (state, &signed.operation) {
        (None, Operation::Create { public_keys, services }) => {
            let mut seeded = DocumentState::from_create(public_keys, services)?;
            signed.verify(&seeded)?;
            seeded.created = anchored_at;
            seeded
        }
        (None, _) => {
            return Err(RegistrarError::Validation(format!(
                "Operation {} has no create operation to chain onto",
                op_hash
            )))
        }
        (Some(_), Operation::Create { .. }) => {
            return Err(RegistrarError::Validation(format!(
                "Create operation {} cannot follow another operation",
                op_hash
            )))
        }
        (Some(state), Operation::Update { actions, .. }) => {
            let mut next = authorize(state, signed)?;
            next.apply_actions(actions)?;
            next.updated = anchored_at;
            next
        }
        (Some(state), Operation::Deactivate { .. }) => {
            let mut next = authorize(state, signed)?;
            next.deactivate();
            next.updated = anchored_at;
            next
        }
    };

    next.last_operation_hash = Some(op_hash.to_string());
    Ok(next)
}

/// Check that a non-create operation may apply on top of `state`
fn authorize(state: DocumentState, signed: &SignedOperation) -> RegistrarResult<DocumentState> {
    if state.deactivated {
        return Err(RegistrarError::Deactivated(signed.did()?));
    }

    let head = state.last_operation_hash.clone().unwrap_or_default();
    let previous = signed.previous_operation_hash().unwrap_or_default();
    if head != previous {
        return Err(RegistrarError::ChainMismatch {
            expected: head,
            actual: previous.to_string(),
        });
    }

    signed.verify(&state)?;
    Ok(state)
}

/// Fold a confirmed chain from the empty state
pub fn fold<'a, I>(chain: I) -> RegistrarResult<Option<DocumentState>>
where
    I: IntoIterator<Item = &'a StoredOperation>,
{
    chain.into_iter().try_fold(None, |state, entry| {
        apply(state, &entry.signed, &entry.hash, entry.anchored_at).map(Some)
    })
}
