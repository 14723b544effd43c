//! Session state shared by all module instances.
//!
//! A [`WorkbenchSession`] holds the loaded [`EnsembleSet`] and one
//! [`RealizationFilter`] per ensemble. Replacing the ensemble set reconciles
//! the filters with it: filters of ensembles that are gone are dropped,
//! ensembles without a filter get one selecting every realization, and the
//! selections of surviving filters are kept.
//!
//! Both the ensemble set and the filter set are published as immutable
//! snapshots (`Arc<EnsembleSet>`, `Arc<RealizationFilterSet>`) so that a
//! subscriber always observes a consistent state.
//!
//! #### Example
//!
//! ```
//! use workbench::session::{
//!     Ensemble, EnsembleIdent, EnsembleSet, RealizationNumberSelection, RegularEnsembleIdent,
//!     WorkbenchSession,
//! };
//!
//! let ident = RegularEnsembleIdent::new("9c1f", "iter-0");
//! let session = WorkbenchSession::new();
//! session.set_ensemble_set(EnsembleSet::new(
//!     vec![Ensemble::new(ident.clone(), "drogon", 0..100)],
//!     Vec::new(),
//! ));
//!
//! let ident = EnsembleIdent::from(ident);
//! session.update_realization_filter(&ident, |filter| {
//!     filter.set_realization_number_selections(Some(vec![RealizationNumberSelection::Range {
//!         start: 0,
//!         end: 9,
//!     }]));
//! });
//! assert_eq!(session.effective_realizations(&ident).unwrap().len(), 10);
//! ```

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};
use crate::util::lock;

mod ensemble;
mod realization_filter;

pub use ensemble::{
    DeltaEnsemble, DeltaEnsembleIdent, Ensemble, EnsembleIdent, EnsembleSet, Parameter,
    ParameterValues, RegularEnsembleIdent, UserEnsembleSetting,
};
pub use realization_filter::{
    IncludeExcludeFilter, ParameterValueSelection, RealizationFilter, RealizationFilterSet,
    RealizationFilterType, RealizationNumberSelection,
};

/// The loaded ensemble set.
pub const ENSEMBLE_SET_CHANGED: Topic<Arc<EnsembleSet>> = Topic::new("session.ensemble_set");
/// The realization filters.
pub const REALIZATION_FILTER_SET_CHANGED: Topic<Arc<RealizationFilterSet>> =
    Topic::new("session.realization_filter_set");
/// Whether an ensemble set is being loaded.
pub const IS_ENSEMBLE_SET_LOADING: Topic<bool> = Topic::new("session.ensemble_set_loading");

struct SessionState {
    ensemble_set: Arc<EnsembleSet>,
    filters: Arc<RealizationFilterSet>,
    loading: bool,
}

struct Inner {
    state: Mutex<SessionState>,
    delegate: PublishSubscribeDelegate,
}

/// Ensembles and realization filters of a session.
///
/// Cloning a session yields a handle to the same session.
#[derive(Clone)]
pub struct WorkbenchSession {
    inner: Arc<Inner>,
}

impl WorkbenchSession {
    /// Creates a session without ensembles.
    pub fn new() -> Self {
        let ensemble_set = Arc::new(EnsembleSet::default());
        let filters = Arc::new(RealizationFilterSet::default());

        let delegate = PublishSubscribeDelegate::new("session");
        delegate.notify_subscribers(&ENSEMBLE_SET_CHANGED, ensemble_set.clone());
        delegate.notify_subscribers(&REALIZATION_FILTER_SET_CHANGED, filters.clone());
        delegate.notify_subscribers(&IS_ENSEMBLE_SET_LOADING, false);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SessionState {
                    ensemble_set,
                    filters,
                    loading: false,
                }),
                delegate,
            }),
        }
    }

    /// Replaces the ensemble set and reconciles the realization filters.
    ///
    /// Subscribers of [`ENSEMBLE_SET_CHANGED`] are notified before those of
    /// [`REALIZATION_FILTER_SET_CHANGED`], once both are updated.
    pub fn set_ensemble_set(&self, ensemble_set: EnsembleSet) {
        let ensemble_set = Arc::new(ensemble_set);

        let filters = {
            let mut state = lock(&self.inner.state);
            let mut filters = RealizationFilterSet::clone(&state.filters);
            filters.synchronize_with_ensemble_set(&ensemble_set);
            let filters = Arc::new(filters);
            state.ensemble_set = ensemble_set.clone();
            state.filters = filters.clone();

            filters
        };
        debug!(
            ensembles = ensemble_set.regular_ensembles().len() + ensemble_set.delta_ensembles().len(),
            "ensemble set replaced"
        );

        self.inner
            .delegate
            .notify_subscribers(&ENSEMBLE_SET_CHANGED, ensemble_set);
        self.inner
            .delegate
            .notify_subscribers(&REALIZATION_FILTER_SET_CHANGED, filters);
    }

    /// Returns the loaded ensemble set.
    pub fn ensemble_set(&self) -> Arc<EnsembleSet> {
        lock(&self.inner.state).ensemble_set.clone()
    }

    /// Returns the realization filters.
    pub fn realization_filter_set(&self) -> Arc<RealizationFilterSet> {
        lock(&self.inner.state).filters.clone()
    }

    /// Modifies the filter of an ensemble and publishes the new filter set.
    ///
    /// Returns `false`, without notification, if the ensemble has no filter.
    pub fn update_realization_filter<F>(&self, ident: &EnsembleIdent, f: F) -> bool
    where
        F: FnOnce(&mut RealizationFilter),
    {
        let filters = {
            let mut state = lock(&self.inner.state);
            if state.filters.filter(ident).is_none() {
                drop(state);
                warn!(ensemble = %ident, "no realization filter for ensemble");
                return false;
            }
            let filters = Arc::make_mut(&mut state.filters);
            if let Some(filter) = filters.filter_mut(ident) {
                f(filter);
            }

            state.filters.clone()
        };

        self.inner
            .delegate
            .notify_subscribers(&REALIZATION_FILTER_SET_CHANGED, filters);

        true
    }

    /// Returns the realizations of an ensemble passing its filter.
    pub fn effective_realizations(&self, ident: &EnsembleIdent) -> Option<Vec<u32>> {
        lock(&self.inner.state)
            .filters
            .effective_realizations(ident)
            .map(<[u32]>::to_vec)
    }

    /// Sets whether an ensemble set is being loaded.
    ///
    /// Subscribers are only notified on change.
    pub fn set_ensemble_set_loading(&self, loading: bool) {
        {
            let mut state = lock(&self.inner.state);
            if state.loading == loading {
                return;
            }
            state.loading = loading;
        }
        self.inner
            .delegate
            .notify_subscribers(&IS_ENSEMBLE_SET_LOADING, loading);
    }

    /// Returns `true` while an ensemble set is being loaded.
    pub fn is_ensemble_set_loading(&self) -> bool {
        lock(&self.inner.state).loading
    }

    /// Returns the user choices about the loaded ensembles, suitable for
    /// persistence.
    pub fn user_ensemble_settings(&self) -> Vec<UserEnsembleSetting> {
        let ensemble_set = self.ensemble_set();
        let regular = ensemble_set.regular_ensembles().iter().map(|e| UserEnsembleSetting {
            ident: EnsembleIdent::Regular(e.ident().clone()),
            color: e.color().to_string(),
            custom_name: e.custom_name().map(str::to_string),
        });
        let delta = ensemble_set.delta_ensembles().iter().map(|e| UserEnsembleSetting {
            ident: EnsembleIdent::Delta(e.ident().clone()),
            color: e.color().to_string(),
            custom_name: e.custom_name().map(str::to_string),
        });

        regular.chain(delta).collect()
    }

    /// Subscribes to one of the session topics.
    pub fn subscribe<T, F>(&self, topic: &Topic<T>, callback: F) -> Subscription
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.delegate.subscribe(topic, callback)
    }

    /// Returns `true` if both handles refer to the same session.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for WorkbenchSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WorkbenchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkbenchSession").finish_non_exhaustive()
    }
}
