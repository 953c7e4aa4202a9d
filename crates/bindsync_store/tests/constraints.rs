//! Property tests for the binding table constraints.

use bindsync_store::{
    BackendId, BindingFilter, BindingStore, ExternalId, LocalId, MemoryBindingStore, Model,
    NewBinding,
};
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Op {
    Insert {
        backend: u32,
        model: u8,
        local: u64,
        external: Option<u64>,
    },
    SetExternal {
        index: usize,
        external: Option<u64>,
    },
    Deactivate {
        index: usize,
    },
}

fn model_name(n: u8) -> Model {
    match n % 3 {
        0 => Model::new("product.category"),
        1 => Model::new("product.product"),
        _ => Model::new("uom.uom"),
    }
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u32..3, any::<u8>(), 1u64..20, proptest::option::of(1u64..20)).prop_map(
            |(backend, model, local, external)| Op::Insert {
                backend,
                model,
                local,
                external,
            }
        ),
        (0usize..64, proptest::option::of(1u64..20))
            .prop_map(|(index, external)| Op::SetExternal { index, external }),
        (0usize..64).prop_map(|index| Op::Deactivate { index }),
    ]
}

proptest! {
    #[test]
    fn keys_stay_unique_under_any_sequence(ops in proptest::collection::vec(op_strategy(), 1..80)) {
        let store = MemoryBindingStore::new();

        for op in ops {
            match op {
                Op::Insert { backend, model, local, external } => {
                    let mut new = NewBinding::placeholder(BackendId(backend), model_name(model), LocalId(local));
                    if let Some(ext) = external.and_then(ExternalId::new) {
                        new = new.with_external_id(ext);
                    }
                    match store.insert(new) {
                        Ok(_) => {}
                        Err(e) => prop_assert!(e.is_unique_violation()),
                    }
                }
                Op::SetExternal { index, external } => {
                    let rows = store.list(&BindingFilter::new().include_inactive()).unwrap();
                    if rows.is_empty() {
                        continue;
                    }
                    let mut row = rows[index % rows.len()].clone();
                    row.external_id = external.and_then(ExternalId::new);
                    if let Err(e) = store.update(&row) {
                        prop_assert!(e.is_unique_violation());
                    }
                }
                Op::Deactivate { index } => {
                    let rows = store.list(&BindingFilter::new()).unwrap();
                    if rows.is_empty() {
                        continue;
                    }
                    let mut row = rows[index % rows.len()].clone();
                    row.active = false;
                    store.update(&row).unwrap();
                }
            }
        }

        let rows = store.list(&BindingFilter::new().include_inactive()).unwrap();
        let mut locals = HashSet::new();
        let mut externals = HashSet::new();
        for row in &rows {
            prop_assert!(locals.insert((row.backend_id, row.model.clone(), row.local_id)));
            if let Some(ext) = row.external_id {
                prop_assert!(externals.insert((row.backend_id, row.model.clone(), ext)));
            }
        }
        prop_assert!(store.table().verify().is_empty());
    }

    #[test]
    fn lookups_agree_with_listing(locals in proptest::collection::hash_set(1u64..500, 1..40)) {
        let store = MemoryBindingStore::new();
        let model = Model::new("res.partner");
        for local in &locals {
            let ext = ExternalId::new(local + 1000).unwrap();
            store
                .insert(NewBinding::placeholder(BackendId(1), model.clone(), LocalId(*local)).with_external_id(ext))
                .unwrap();
        }

        for local in &locals {
            let by_local = store.find_by_local(BackendId(1), &model, LocalId(*local), false).unwrap().unwrap();
            let by_ext = store
                .find_by_external(BackendId(1), &model, ExternalId::new(local + 1000).unwrap())
                .unwrap()
                .unwrap();
            prop_assert_eq!(by_local.id, by_ext.id);
        }
        prop_assert_eq!(store.list(&BindingFilter::new().model(model)).unwrap().len(), locals.len());
    }
}
