use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ensemble::{EnsembleIdent, EnsembleSet, Parameter, ParameterValues};

/// Criterion used to select realizations.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealizationFilterType {
    /// Select by realization number.
    #[default]
    ByRealizationNumber,
    /// Select by parameter values.
    ByParameterValues,
}

/// Whether the selected realizations are kept or removed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncludeExcludeFilter {
    /// Keep the selected realizations.
    #[default]
    Include,
    /// Remove the selected realizations.
    Exclude,
}

/// A selection of realization numbers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RealizationNumberSelection {
    /// A single realization.
    Single(u32),
    /// An inclusive range of realizations.
    Range {
        /// First realization.
        start: u32,
        /// Last realization.
        end: u32,
    },
}

impl RealizationNumberSelection {
    fn contains(&self, realization: u32) -> bool {
        match *self {
            Self::Single(r) => r == realization,
            Self::Range { start, end } => (start..=end).contains(&realization),
        }
    }
}

/// A selection of values of a parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterValueSelection {
    /// An inclusive range of values of a continuous parameter.
    Range {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// A set of values of a discrete parameter.
    Values(BTreeSet<String>),
}

impl ParameterValueSelection {
    fn matches(&self, values: &ParameterValues, realization: u32) -> bool {
        match (self, values) {
            (Self::Range { min, max }, ParameterValues::Continuous(values)) => values
                .get(&realization)
                .is_some_and(|v| (*min..=*max).contains(v)),
            (Self::Values(selected), ParameterValues::Discrete(values)) => values
                .get(&realization)
                .is_some_and(|v| selected.contains(v)),
            _ => false,
        }
    }
}

/// Realization filter of one ensemble.
///
/// The effective realizations are recomputed by every setter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealizationFilter {
    ensemble_ident: EnsembleIdent,
    available_realizations: Vec<u32>,
    parameters: Vec<Parameter>,
    filter_type: RealizationFilterType,
    include_exclude: IncludeExcludeFilter,
    number_selections: Option<Vec<RealizationNumberSelection>>,
    parameter_selections: BTreeMap<String, ParameterValueSelection>,
    effective_realizations: Vec<u32>,
}

impl RealizationFilter {
    /// Creates a filter selecting all available realizations.
    pub fn new(
        ensemble_ident: EnsembleIdent,
        available_realizations: &[u32],
        parameters: &[Parameter],
    ) -> Self {
        Self {
            ensemble_ident,
            available_realizations: available_realizations.to_vec(),
            parameters: parameters.to_vec(),
            filter_type: RealizationFilterType::default(),
            include_exclude: IncludeExcludeFilter::default(),
            number_selections: None,
            parameter_selections: BTreeMap::new(),
            effective_realizations: available_realizations.to_vec(),
        }
    }

    /// Returns the filtered ensemble.
    pub fn ensemble_ident(&self) -> &EnsembleIdent {
        &self.ensemble_ident
    }

    /// Returns the realizations of the ensemble.
    pub fn available_realizations(&self) -> &[u32] {
        &self.available_realizations
    }

    /// Returns the realizations passing the filter, in ascending order.
    pub fn effective_realizations(&self) -> &[u32] {
        &self.effective_realizations
    }

    /// Returns the active criterion.
    pub fn filter_type(&self) -> RealizationFilterType {
        self.filter_type
    }

    /// Returns the include/exclude mode.
    pub fn include_exclude(&self) -> IncludeExcludeFilter {
        self.include_exclude
    }

    /// Returns the realization number selections, `None` meaning all.
    pub fn realization_number_selections(&self) -> Option<&[RealizationNumberSelection]> {
        self.number_selections.as_deref()
    }

    /// Returns the parameter value selections.
    pub fn parameter_value_selections(&self) -> &BTreeMap<String, ParameterValueSelection> {
        &self.parameter_selections
    }

    /// Returns `true` if the filter lets every available realization
    /// through.
    pub fn is_trivial(&self) -> bool {
        self.effective_realizations == self.available_realizations
    }

    /// Sets the active criterion.
    pub fn set_filter_type(&mut self, filter_type: RealizationFilterType) {
        self.filter_type = filter_type;
        self.recompute();
    }

    /// Sets the include/exclude mode.
    pub fn set_include_exclude(&mut self, include_exclude: IncludeExcludeFilter) {
        self.include_exclude = include_exclude;
        self.recompute();
    }

    /// Sets the realization number selections; `None` selects all.
    pub fn set_realization_number_selections(
        &mut self,
        selections: Option<Vec<RealizationNumberSelection>>,
    ) {
        self.number_selections = selections;
        self.recompute();
    }

    /// Sets or removes the value selection of a parameter.
    pub fn set_parameter_value_selection(
        &mut self,
        parameter: impl Into<String>,
        selection: Option<ParameterValueSelection>,
    ) {
        let parameter = parameter.into();
        match selection {
            Some(selection) => {
                self.parameter_selections.insert(parameter, selection);
            }
            None => {
                self.parameter_selections.remove(&parameter);
            }
        }
        self.recompute();
    }

    /// Updates the realizations and parameters of the ensemble, keeping the
    /// selections.
    pub(crate) fn set_available(&mut self, realizations: &[u32], parameters: &[Parameter]) {
        self.available_realizations = realizations.to_vec();
        self.parameters = parameters.to_vec();
        self.recompute();
    }

    fn recompute(&mut self) {
        let selected: Option<BTreeSet<u32>> = match self.filter_type {
            RealizationFilterType::ByRealizationNumber => {
                self.number_selections.as_ref().map(|selections| {
                    self.available_realizations
                        .iter()
                        .copied()
                        .filter(|r| selections.iter().any(|s| s.contains(*r)))
                        .collect()
                })
            }
            RealizationFilterType::ByParameterValues if self.parameter_selections.is_empty() => None,
            RealizationFilterType::ByParameterValues => Some(
                self.available_realizations
                    .iter()
                    .copied()
                    .filter(|r| self.matches_parameter_selections(*r))
                    .collect(),
            ),
        };

        self.effective_realizations = match (selected, self.include_exclude) {
            (None, _) => self.available_realizations.clone(),
            (Some(selected), IncludeExcludeFilter::Include) => selected.into_iter().collect(),
            (Some(selected), IncludeExcludeFilter::Exclude) => self
                .available_realizations
                .iter()
                .copied()
                .filter(|r| !selected.contains(r))
                .collect(),
        };
    }

    fn matches_parameter_selections(&self, realization: u32) -> bool {
        self.parameter_selections.iter().all(|(name, selection)| {
            self.parameters
                .iter()
                .find(|p| &p.name == name)
                .is_some_and(|p| selection.matches(&p.values, realization))
        })
    }
}

/// The realization filters of all ensembles of a session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RealizationFilterSet {
    filters: BTreeMap<EnsembleIdent, RealizationFilter>,
}

impl RealizationFilterSet {
    /// Returns the filter of an ensemble.
    pub fn filter(&self, ident: &EnsembleIdent) -> Option<&RealizationFilter> {
        self.filters.get(ident)
    }

    /// Returns the filter of an ensemble for modification.
    pub fn filter_mut(&mut self, ident: &EnsembleIdent) -> Option<&mut RealizationFilter> {
        self.filters.get_mut(ident)
    }

    /// Returns an iterator over all filters, ordered by ensemble.
    pub fn filters(&self) -> impl Iterator<Item = &RealizationFilter> {
        self.filters.values()
    }

    /// Returns the number of filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns `true` if the set holds no filter.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Returns the realizations of an ensemble passing its filter.
    pub fn effective_realizations(&self, ident: &EnsembleIdent) -> Option<&[u32]> {
        self.filters.get(ident).map(RealizationFilter::effective_realizations)
    }

    /// Reconciles the filters with an ensemble set.
    ///
    /// Filters of ensembles no longer in the set are dropped, ensembles
    /// without a filter get a default one, and surviving filters keep their
    /// selections.
    pub fn synchronize_with_ensemble_set(&mut self, ensemble_set: &EnsembleSet) {
        let idents = ensemble_set.idents();

        let before = self.filters.len();
        self.filters.retain(|ident, _| idents.contains(ident));
        let dropped = before - self.filters.len();

        let mut added = 0;
        for ident in idents {
            let realizations = ensemble_set.realizations(&ident).unwrap_or_default();
            let parameters = ensemble_set.parameters(&ident);
            match self.filters.get_mut(&ident) {
                Some(filter) => filter.set_available(realizations, parameters),
                None => {
                    let filter = RealizationFilter::new(ident.clone(), realizations, parameters);
                    self.filters.insert(ident, filter);
                    added += 1;
                }
            }
        }

        if dropped > 0 || added > 0 {
            debug!(dropped, added, "realization filters reconciled with the ensemble set");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ensemble::{Ensemble, RegularEnsembleIdent};

    fn ensemble(name: &str) -> Ensemble {
        Ensemble::new(RegularEnsembleIdent::new("case", name), "case", 0..10)
            .with_parameter(Parameter::continuous(
                "PORO",
                (0..10).map(|r| (r, r as f64 * 0.1)),
            ))
            .with_parameter(Parameter::discrete(
                "FAULT",
                (0..10).map(|r| (r, if r % 2 == 0 { "open" } else { "closed" })),
            ))
    }

    fn ident(name: &str) -> EnsembleIdent {
        EnsembleIdent::Regular(RegularEnsembleIdent::new("case", name))
    }

    fn filter() -> RealizationFilter {
        let ensemble = ensemble("iter-0");
        RealizationFilter::new(ident("iter-0"), ensemble.realizations(), ensemble.parameters())
    }

    #[test]
    fn default_filter_selects_everything() {
        let filter = filter();

        assert!(filter.is_trivial());
        assert_eq!(filter.effective_realizations().len(), 10);
    }

    #[test]
    fn filter_by_realization_number() {
        let mut filter = filter();
        filter.set_realization_number_selections(Some(vec![
            RealizationNumberSelection::Single(0),
            RealizationNumberSelection::Range { start: 5, end: 7 },
            RealizationNumberSelection::Single(42),
        ]));
        assert_eq!(filter.effective_realizations(), &[0, 5, 6, 7]);

        filter.set_include_exclude(IncludeExcludeFilter::Exclude);
        assert_eq!(filter.effective_realizations(), &[1, 2, 3, 4, 8, 9]);
    }

    #[test]
    fn filter_by_parameter_values() {
        let mut filter = filter();
        filter.set_filter_type(RealizationFilterType::ByParameterValues);
        filter.set_parameter_value_selection(
            "PORO",
            Some(ParameterValueSelection::Range { min: 0.25, max: 0.75 }),
        );
        assert_eq!(filter.effective_realizations(), &[3, 4, 5, 6, 7]);

        filter.set_parameter_value_selection(
            "FAULT",
            Some(ParameterValueSelection::Values(BTreeSet::from(["open".to_string()]))),
        );
        assert_eq!(filter.effective_realizations(), &[4, 6]);

        // Selections on unknown parameters match nothing.
        filter.set_parameter_value_selection(
            "UNKNOWN",
            Some(ParameterValueSelection::Range { min: 0.0, max: 1.0 }),
        );
        assert!(filter.effective_realizations().is_empty());
    }

    #[test]
    fn reloaded_filter_keeps_filtering_by_parameter_values() {
        let mut filter = filter();
        filter.set_filter_type(RealizationFilterType::ByParameterValues);
        filter.set_parameter_value_selection(
            "PORO",
            Some(ParameterValueSelection::Range { min: 0.25, max: 0.75 }),
        );

        let json = serde_json::to_string(&filter).unwrap();
        let mut reloaded: RealizationFilter = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded, filter);

        reloaded.set_include_exclude(IncludeExcludeFilter::Exclude);
        assert_eq!(reloaded.effective_realizations(), &[0, 1, 2, 8, 9]);
    }

    #[test]
    fn synchronize_drops_stale_and_adds_defaults() {
        let mut set = RealizationFilterSet::default();
        set.synchronize_with_ensemble_set(&EnsembleSet::new(
            vec![ensemble("iter-0"), ensemble("iter-1")],
            Vec::new(),
        ));
        set.filter_mut(&ident("iter-1"))
            .unwrap()
            .set_realization_number_selections(Some(vec![RealizationNumberSelection::Single(3)]));

        set.synchronize_with_ensemble_set(&EnsembleSet::new(
            vec![ensemble("iter-1"), ensemble("iter-2")],
            Vec::new(),
        ));

        assert!(set.filter(&ident("iter-0")).is_none());
        assert_eq!(set.effective_realizations(&ident("iter-1")), Some(&[3][..]));
        assert_eq!(set.effective_realizations(&ident("iter-2")).unwrap().len(), 10);
        assert_eq!(set.len(), 2);
    }
}
