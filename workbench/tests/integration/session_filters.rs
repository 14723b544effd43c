//! Reconciliation of realization filters with the loaded ensembles.

use std::sync::Arc;

use workbench::session::{
    DeltaEnsemble, Ensemble, EnsembleIdent, EnsembleSet, IncludeExcludeFilter, Parameter,
    ParameterValueSelection, RealizationFilterSet, RealizationFilterType, RealizationNumberSelection,
    RegularEnsembleIdent, WorkbenchSession, ENSEMBLE_SET_CHANGED, REALIZATION_FILTER_SET_CHANGED,
};

use crate::recorder;

fn drogon(name: &str, realizations: std::ops::Range<u32>) -> Ensemble {
    Ensemble::new(RegularEnsembleIdent::new("c0ffee", name), "drogon", realizations).with_parameter(
        Parameter::continuous("PERMX", (0..20).map(|r| (r, f64::from(r) * 10.0))),
    )
}

#[test]
fn surviving_filters_keep_their_selection() {
    let session = WorkbenchSession::new();
    let iter0 = drogon("iter-0", 0..10);
    let iter1 = drogon("iter-1", 0..20);
    let iter0_ident = EnsembleIdent::from(iter0.ident().clone());
    let iter1_ident = EnsembleIdent::from(iter1.ident().clone());
    session.set_ensemble_set(EnsembleSet::new(vec![iter0.clone(), iter1], Vec::new()));

    session.update_realization_filter(&iter0_ident, |filter| {
        filter.set_include_exclude(IncludeExcludeFilter::Exclude);
        filter.set_realization_number_selections(Some(vec![RealizationNumberSelection::Single(3)]));
    });
    assert_eq!(session.effective_realizations(&iter0_ident).unwrap().len(), 9);

    // iter-1 is unloaded, iter-0 gains realizations.
    session.set_ensemble_set(EnsembleSet::new(vec![drogon("iter-0", 0..15)], Vec::new()));

    let filters = session.realization_filter_set();
    assert_eq!(filters.len(), 1);
    assert!(filters.filter(&iter1_ident).is_none());
    let effective = session.effective_realizations(&iter0_ident).unwrap();
    assert_eq!(effective.len(), 14);
    assert!(!effective.contains(&3));
}

#[test]
fn parameter_filters_select_matching_realizations() {
    let session = WorkbenchSession::new();
    let ensemble = drogon("iter-0", 0..10);
    let ident = EnsembleIdent::from(ensemble.ident().clone());
    session.set_ensemble_set(EnsembleSet::new(vec![ensemble], Vec::new()));

    let changed = session.update_realization_filter(&ident, |filter| {
        filter.set_filter_type(RealizationFilterType::ByParameterValues);
        filter.set_parameter_value_selection(
            "PERMX",
            Some(ParameterValueSelection::Range { min: 20.0, max: 45.0 }),
        );
    });

    assert!(changed);
    assert_eq!(session.effective_realizations(&ident), Some(vec![2, 3, 4]));
}

#[test]
fn delta_ensembles_get_their_own_filter() {
    let session = WorkbenchSession::new();
    let compare = drogon("iter-1", 0..8);
    let reference = drogon("iter-0", 4..12);
    let delta = DeltaEnsemble::new(&compare, &reference);
    let delta_ident = EnsembleIdent::from(delta.ident().clone());

    session.set_ensemble_set(EnsembleSet::new(vec![compare, reference], vec![delta]));

    assert_eq!(session.effective_realizations(&delta_ident), Some(vec![4, 5, 6, 7]));
}

#[test]
fn ensemble_set_is_notified_before_filters() {
    let session = WorkbenchSession::new();
    let (sets, on_set) = recorder::<Arc<EnsembleSet>>();
    let (filters, on_filters) = recorder::<Arc<RealizationFilterSet>>();
    let _set_sub = session.subscribe(&ENSEMBLE_SET_CHANGED, on_set);
    let _filters_sub = session.subscribe(&REALIZATION_FILTER_SET_CHANGED, on_filters);

    let filters_seen_by_set_subscriber = Arc::new(std::sync::Mutex::new(Vec::new()));
    let _check = session.subscribe(&ENSEMBLE_SET_CHANGED, {
        let session = session.clone();
        let seen = filters_seen_by_set_subscriber.clone();
        move |_: &Arc<EnsembleSet>| seen.lock().unwrap().push(session.realization_filter_set().len())
    });

    session.set_ensemble_set(EnsembleSet::new(vec![drogon("iter-0", 0..5)], Vec::new()));

    assert_eq!(sets.lock().unwrap().len(), 2);
    assert_eq!(filters.lock().unwrap().len(), 2);
    // Both snapshots are already consistent when the first topic fires.
    assert_eq!(*filters_seen_by_set_subscriber.lock().unwrap(), vec![0, 1]);
}
