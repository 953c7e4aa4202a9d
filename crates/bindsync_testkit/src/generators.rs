//! Property-based test generators using proptest.
//!
//! Ids are drawn from small ranges on purpose so generated sequences
//! collide often and exercise the uniqueness constraints.

use bindsync_engine::{
    BackendId, Binding, BindingStore, ExternalId, LocalId, Model, Payload, SyncError, SyncResult,
};
use bindsync_store::NewBinding;
use proptest::prelude::*;
use serde_json::json;

/// Strategy for one of three model names.
pub fn model_strategy() -> impl Strategy<Value = Model> {
    prop_oneof![
        Just(Model::new("product.category")),
        Just(Model::new("product.product")),
        Just(Model::new("uom.uom")),
    ]
}

/// Strategy for a backend id, 1 or 2.
pub fn backend_strategy() -> impl Strategy<Value = BackendId> {
    (1u32..3).prop_map(BackendId)
}

/// Strategy for a local id in a narrow range.
pub fn local_id_strategy() -> impl Strategy<Value = LocalId> {
    (1u64..16).prop_map(LocalId)
}

/// Strategy for a non-zero external id in a narrow range.
pub fn external_id_strategy() -> impl Strategy<Value = ExternalId> {
    (1u64..16).prop_filter_map("external ids are non-zero", ExternalId::new)
}

/// Strategy for a record payload with a name and a sale flag.
pub fn payload_strategy() -> impl Strategy<Value = Payload> {
    (
        prop::string::string_regex("[A-Z][a-z]{1,12}").expect("Invalid regex"),
        any::<bool>(),
    )
        .prop_map(|(name, sale_ok)| {
            let mut payload = Payload::new();
            payload.insert("name".into(), json!(name));
            payload.insert("sale_ok".into(), json!(sale_ok));
            payload
        })
}

/// An operation a worker may perform on the binding store.
#[derive(Debug, Clone)]
pub enum BindingOp {
    /// Ensure a binding exists for a local record.
    Ensure {
        /// Backend.
        backend: BackendId,
        /// Model.
        model: Model,
        /// Local record.
        local_id: LocalId,
    },
    /// Bind the n-th known binding to a remote id.
    Bind {
        /// Index into the bindings seen so far, modulo their count.
        index: usize,
        /// Remote id.
        external_id: ExternalId,
    },
    /// Soft-delete the n-th known binding.
    Deactivate {
        /// Index into the bindings seen so far, modulo their count.
        index: usize,
    },
}

/// Strategy for binding operations.
pub fn binding_op_strategy() -> impl Strategy<Value = BindingOp> {
    prop_oneof![
        3 => (backend_strategy(), model_strategy(), local_id_strategy())
            .prop_map(|(backend, model, local_id)| BindingOp::Ensure { backend, model, local_id }),
        2 => (any::<usize>(), external_id_strategy())
            .prop_map(|(index, external_id)| BindingOp::Bind { index, external_id }),
        1 => any::<usize>().prop_map(|index| BindingOp::Deactivate { index }),
    ]
}

/// Strategy for a sequence of binding operations.
pub fn binding_op_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<BindingOp>> {
    prop::collection::vec(binding_op_strategy(), min_ops..max_ops)
}

/// Applies one operation to a store.
///
/// `seen` collects bindings created so far and is what `index` refers to.
/// Unique violations are expected outcomes and returned as errors like any
/// other store failure.
pub fn apply_binding_op(
    store: &dyn BindingStore,
    op: &BindingOp,
    seen: &mut Vec<Binding>,
) -> SyncResult<()> {
    match op {
        BindingOp::Ensure {
            backend,
            model,
            local_id,
        } => {
            if store.find_by_local(*backend, model, *local_id, true)?.is_none() {
                let binding =
                    store.insert(NewBinding::placeholder(*backend, model.clone(), *local_id))?;
                seen.push(binding);
            }
        }
        BindingOp::Bind { index, external_id } => {
            let Some(binding) = pick(seen, *index) else {
                return Ok(());
            };
            let mut row = store
                .get(binding.id)?
                .ok_or(SyncError::BindingNotFound(binding.id))?;
            row.external_id = Some(*external_id);
            store.update(&row)?;
        }
        BindingOp::Deactivate { index } => {
            let Some(binding) = pick(seen, *index) else {
                return Ok(());
            };
            let mut row = store
                .get(binding.id)?
                .ok_or(SyncError::BindingNotFound(binding.id))?;
            row.active = false;
            store.update(&row)?;
        }
    }
    Ok(())
}

fn pick(seen: &[Binding], index: usize) -> Option<&Binding> {
    if seen.is_empty() {
        None
    } else {
        seen.get(index % seen.len())
    }
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 128,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// A configuration for quick runs.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to a proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        let mut config = ProptestConfig::with_cases(self.cases);
        config.max_shrink_iters = self.max_shrink_iters;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindsync_store::MemoryBindingStore;

    proptest! {
        #[test]
        fn external_ids_are_non_zero(id in external_id_strategy()) {
            prop_assert!(id.get() > 0);
        }

        #[test]
        fn payloads_have_a_name(payload in payload_strategy()) {
            prop_assert!(payload.get("name").is_some());
        }

        #[test]
        fn applied_sequences_keep_the_table_consistent(ops in binding_op_sequence_strategy(1, 40)) {
            let store = MemoryBindingStore::new();
            let mut seen = Vec::new();
            for op in &ops {
                let _ = apply_binding_op(&store, op, &mut seen);
            }
            prop_assert!(store.table().verify().is_empty());
        }
    }
}
