use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an ensemble stored in a case.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegularEnsembleIdent {
    /// UUID of the case.
    pub case_uuid: String,
    /// Name of the ensemble within the case.
    pub ensemble_name: String,
}

impl RegularEnsembleIdent {
    /// Creates an ensemble identifier.
    pub fn new(case_uuid: impl Into<String>, ensemble_name: impl Into<String>) -> Self {
        Self {
            case_uuid: case_uuid.into(),
            ensemble_name: ensemble_name.into(),
        }
    }
}

impl fmt::Display for RegularEnsembleIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.case_uuid, self.ensemble_name)
    }
}

/// Identifier of an ensemble computed as the difference of two ensembles.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeltaEnsembleIdent {
    /// The ensemble from which the reference is subtracted.
    pub compare: RegularEnsembleIdent,
    /// The subtracted ensemble.
    pub reference: RegularEnsembleIdent,
}

impl fmt::Display for DeltaEnsembleIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) - ({})", self.compare, self.reference)
    }
}

/// Identifier of a regular or delta ensemble.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnsembleIdent {
    /// A regular ensemble.
    Regular(RegularEnsembleIdent),
    /// A delta ensemble.
    Delta(DeltaEnsembleIdent),
}

impl From<RegularEnsembleIdent> for EnsembleIdent {
    fn from(ident: RegularEnsembleIdent) -> Self {
        Self::Regular(ident)
    }
}

impl From<DeltaEnsembleIdent> for EnsembleIdent {
    fn from(ident: DeltaEnsembleIdent) -> Self {
        Self::Delta(ident)
    }
}

impl fmt::Display for EnsembleIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regular(ident) => ident.fmt(f),
            Self::Delta(ident) => ident.fmt(f),
        }
    }
}

/// Per-realization values of a parameter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ParameterValues {
    /// Numeric values.
    Continuous(BTreeMap<u32, f64>),
    /// Categorical values.
    Discrete(BTreeMap<u32, String>),
}

/// A sampled input parameter of an ensemble.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name.
    pub name: String,
    /// Value of each realization.
    pub values: ParameterValues,
}

impl Parameter {
    /// Creates a continuous parameter.
    pub fn continuous(name: impl Into<String>, values: impl IntoIterator<Item = (u32, f64)>) -> Self {
        Self {
            name: name.into(),
            values: ParameterValues::Continuous(values.into_iter().collect()),
        }
    }

    /// Creates a discrete parameter.
    pub fn discrete<V: Into<String>>(
        name: impl Into<String>,
        values: impl IntoIterator<Item = (u32, V)>,
    ) -> Self {
        Self {
            name: name.into(),
            values: ParameterValues::Discrete(
                values.into_iter().map(|(r, v)| (r, v.into())).collect(),
            ),
        }
    }
}

/// A regular ensemble.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    ident: RegularEnsembleIdent,
    case_name: String,
    realizations: Vec<u32>,
    parameters: Vec<Parameter>,
    color: String,
    custom_name: Option<String>,
}

impl Ensemble {
    /// Creates an ensemble with the specified realizations.
    pub fn new(
        ident: RegularEnsembleIdent,
        case_name: impl Into<String>,
        realizations: impl IntoIterator<Item = u32>,
    ) -> Self {
        let mut realizations: Vec<u32> = realizations.into_iter().collect();
        realizations.sort_unstable();
        realizations.dedup();

        Self {
            ident,
            case_name: case_name.into(),
            realizations,
            parameters: Vec::new(),
            color: String::from("#000000"),
            custom_name: None,
        }
    }

    /// Adds a parameter.
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);

        self
    }

    /// Sets the display color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();

        self
    }

    /// Sets a user-provided name.
    pub fn with_custom_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());

        self
    }

    /// Returns the ensemble identifier.
    pub fn ident(&self) -> &RegularEnsembleIdent {
        &self.ident
    }

    /// Returns the name of the case.
    pub fn case_name(&self) -> &str {
        &self.case_name
    }

    /// Returns the sorted realization numbers.
    pub fn realizations(&self) -> &[u32] {
        &self.realizations
    }

    /// Returns the parameters.
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Returns the display color.
    pub fn color(&self) -> &str {
        &self.color
    }

    /// Returns the user-provided name, if any.
    pub fn custom_name(&self) -> Option<&str> {
        self.custom_name.as_deref()
    }

    /// Returns the name shown to the user.
    pub fn display_name(&self) -> String {
        match &self.custom_name {
            Some(name) => name.clone(),
            None => format!("{} ({})", self.ident.ensemble_name, self.case_name),
        }
    }
}

/// The difference of two regular ensembles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeltaEnsemble {
    ident: DeltaEnsembleIdent,
    realizations: Vec<u32>,
    color: String,
    custom_name: Option<String>,
}

impl DeltaEnsemble {
    /// Creates the delta of two ensembles.
    ///
    /// Only realizations present in both ensembles are kept.
    pub fn new(compare: &Ensemble, reference: &Ensemble) -> Self {
        let realizations = compare
            .realizations()
            .iter()
            .copied()
            .filter(|r| reference.realizations().binary_search(r).is_ok())
            .collect();

        Self {
            ident: DeltaEnsembleIdent {
                compare: compare.ident().clone(),
                reference: reference.ident().clone(),
            },
            realizations,
            color: String::from("#000000"),
            custom_name: None,
        }
    }

    /// Sets the display color.
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();

        self
    }

    /// Sets a user-provided name.
    pub fn with_custom_name(mut self, name: impl Into<String>) -> Self {
        self.custom_name = Some(name.into());

        self
    }

    /// Returns the delta ensemble identifier.
    pub fn ident(&self) -> &DeltaEnsembleIdent {
        &self.ident
    }

    /// Returns the realizations common to both source ensembles.
    pub fn realizations(&self) -> &[u32] {
        &self.realizations
    }

    /// Returns the display color.
    pub fn color(&self) -> &str {
        &self.color
    }

    /// Returns the user-provided name, if any.
    pub fn custom_name(&self) -> Option<&str> {
        self.custom_name.as_deref()
    }
}

/// The ensembles loaded in a session.
///
/// An ensemble set is immutable: loading other ensembles yields a new set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSet {
    regular: Vec<Ensemble>,
    delta: Vec<DeltaEnsemble>,
}

impl EnsembleSet {
    /// Creates a set from regular and delta ensembles.
    pub fn new(regular: Vec<Ensemble>, delta: Vec<DeltaEnsemble>) -> Self {
        Self { regular, delta }
    }

    /// Returns `true` if the set holds no ensemble.
    pub fn is_empty(&self) -> bool {
        self.regular.is_empty() && self.delta.is_empty()
    }

    /// Returns the regular ensembles.
    pub fn regular_ensembles(&self) -> &[Ensemble] {
        &self.regular
    }

    /// Returns the delta ensembles.
    pub fn delta_ensembles(&self) -> &[DeltaEnsemble] {
        &self.delta
    }

    /// Looks up a regular ensemble.
    pub fn find_regular(&self, ident: &RegularEnsembleIdent) -> Option<&Ensemble> {
        self.regular.iter().find(|e| e.ident() == ident)
    }

    /// Looks up a delta ensemble.
    pub fn find_delta(&self, ident: &DeltaEnsembleIdent) -> Option<&DeltaEnsemble> {
        self.delta.iter().find(|e| e.ident() == ident)
    }

    /// Returns `true` if the set holds the ensemble.
    pub fn contains(&self, ident: &EnsembleIdent) -> bool {
        self.realizations(ident).is_some()
    }

    /// Returns the identifiers of all ensembles, regular ensembles first.
    pub fn idents(&self) -> Vec<EnsembleIdent> {
        self.regular
            .iter()
            .map(|e| EnsembleIdent::Regular(e.ident().clone()))
            .chain(self.delta.iter().map(|e| EnsembleIdent::Delta(e.ident().clone())))
            .collect()
    }

    /// Returns the realizations of an ensemble.
    pub fn realizations(&self, ident: &EnsembleIdent) -> Option<&[u32]> {
        match ident {
            EnsembleIdent::Regular(ident) => self.find_regular(ident).map(Ensemble::realizations),
            EnsembleIdent::Delta(ident) => self.find_delta(ident).map(DeltaEnsemble::realizations),
        }
    }

    /// Returns the parameters of an ensemble.
    ///
    /// Delta ensembles have no parameters.
    pub fn parameters(&self, ident: &EnsembleIdent) -> &[Parameter] {
        match ident {
            EnsembleIdent::Regular(ident) => match self.find_regular(ident) {
                Some(ensemble) => ensemble.parameters(),
                None => &[],
            },
            EnsembleIdent::Delta(_) => &[],
        }
    }
}

/// Persisted user choices about a loaded ensemble.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserEnsembleSetting {
    /// The ensemble.
    pub ident: EnsembleIdent,
    /// Display color.
    pub color: String,
    /// User-provided name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}
