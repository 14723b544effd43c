//! Module definitions and module instances.
//!
//! # Modules and instances
//!
//! A [`Module`] is a registered, pluggable analysis unit made of a settings
//! component and a view component. It declares up front:
//!
//! * its name and default title,
//! * the [`SyncSettingKey`]s its instances may synchronize with other
//!   instances,
//! * the data channels its instances publish
//!   ([`ChannelDefinition`](crate::channel::ChannelDefinition)) and the
//!   receivers they expose
//!   ([`ReceiverDefinition`](crate::channel::ReceiverDefinition)),
//! * the default value of the per-instance state held by the
//!   [`ModuleContext`].
//!
//! Modules are registered in a [`ModuleRegistry`] which is handed to the
//! [`Workbench`](crate::workbench::Workbench). The workbench then creates
//! [`ModuleInstance`]s from registered modules on request.
//!
//! # Import lifecycle
//!
//! The components of a module are resolved lazily by an external loader. The
//! loader drives each instance through the [`ImportState`] machine:
//!
//! ```text
//! NotImported ──▶ Importing ──┬──▶ Imported
//!                             └──▶ Failed
//! ```
//!
//! `Imported` and `Failed` are terminal: retrying an import requires a new
//! instance.
//!
//! #### Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use workbench::module::{ImportState, Module, ModuleComponents, ModuleRegistry, SyncSettingKey};
//! use workbench::workbench::Workbench;
//!
//! #[derive(Clone, Default)]
//! struct HistogramState {
//!     bins: usize,
//! }
//!
//! let mut registry = ModuleRegistry::new();
//! registry
//!     .register(
//!         Module::new("Histogram", HistogramState { bins: 10 })
//!             .with_sync_setting_keys([SyncSettingKey::Ensemble]),
//!     )
//!     .unwrap();
//!
//! let workbench = Workbench::new(registry);
//! let instance = workbench.make_and_add_module_instance("Histogram").unwrap();
//! let histogram = workbench
//!     .typed_module_instance::<HistogramState>(instance.id())
//!     .unwrap();
//!
//! histogram.set_importing().unwrap();
//! histogram
//!     .set_imported(ModuleComponents::new(|_ctx| {}, |_ctx| {}))
//!     .unwrap();
//! assert_eq!(histogram.import_state(), ImportState::Imported);
//!
//! let context = histogram.get_or_create_context();
//! context.state_store().update(|state| state.bins = 20);
//! assert_eq!(context.state_store().get().bins, 20);
//! ```

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::channel::{ChannelDefinition, ReceiverDefinition};

mod context;
mod instance;
mod registry;

pub use context::{ModuleContext, StateStore};
pub use instance::{AnyModuleInstance, ComponentKind, FatalError, ModuleInstance};
pub use registry::ModuleRegistry;

pub(crate) use instance::InstanceEnvironment;

/// Stable, unique identifier of a module instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleInstanceId(String);

impl ModuleInstanceId {
    /// Creates an identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of the identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleInstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// A setting whose value may be mirrored across module instances.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncSettingKey {
    /// Selected ensemble(s).
    Ensemble,
    /// Selected time series vector.
    TimeSeries,
    /// Selected surface.
    Surface,
    /// Selected date.
    Date,
    /// Selected parameter.
    Parameter,
    /// Filter on inplace volumetrics tables.
    InplaceVolumetricsFilter,
    /// Selected inplace volumetrics result.
    InplaceVolumetricsResultName,
    /// Camera position of intersection views.
    CameraPositionIntersection,
    /// Camera position of map views.
    CameraPositionMap,
    /// Selected intersection.
    Intersection,
    /// Vertical scale of 3D views.
    VerticalScale,
    /// Selected wellbore.
    Wellbore,
}

impl SyncSettingKey {
    /// All keys, in declaration order.
    pub const ALL: [SyncSettingKey; 12] = [
        Self::Ensemble,
        Self::TimeSeries,
        Self::Surface,
        Self::Date,
        Self::Parameter,
        Self::InplaceVolumetricsFilter,
        Self::InplaceVolumetricsResultName,
        Self::CameraPositionIntersection,
        Self::CameraPositionMap,
        Self::Intersection,
        Self::VerticalScale,
        Self::Wellbore,
    ];

    /// Returns the human-readable name of the setting.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Ensemble => "Ensemble",
            Self::TimeSeries => "Time series",
            Self::Surface => "Surface",
            Self::Date => "Date",
            Self::Parameter => "Parameter",
            Self::InplaceVolumetricsFilter => "Inplace volumetrics filter",
            Self::InplaceVolumetricsResultName => "Inplace volumetrics result name",
            Self::CameraPositionIntersection => "Camera position intersection",
            Self::CameraPositionMap => "Camera position map",
            Self::Intersection => "Intersection",
            Self::VerticalScale => "Vertical scale",
            Self::Wellbore => "Wellbore",
        }
    }
}

impl fmt::Display for SyncSettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Import state of the components of a module instance.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportState {
    /// The import was not requested yet.
    #[default]
    NotImported,
    /// The components are being resolved.
    Importing,
    /// The components are available.
    Imported,
    /// The components could not be resolved.
    Failed,
}

impl ImportState {
    /// Returns `true` if the state machine allows moving from `self` to
    /// `next`.
    pub fn can_transition_to(self, next: ImportState) -> bool {
        matches!(
            (self, next),
            (Self::NotImported, Self::Importing)
                | (Self::Importing, Self::Imported)
                | (Self::Importing, Self::Failed)
        )
    }

    /// Returns `true` for `Imported` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Imported | Self::Failed)
    }
}

/// Error returned when an import state transition is not allowed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid import state transition from {from:?} to {to:?}")]
pub struct ImportStateError {
    /// The current state.
    pub from: ImportState,
    /// The rejected state.
    pub to: ImportState,
}

/// A render function of a module component.
pub type ModuleComponent<S> = Arc<dyn Fn(&ModuleContext<S>) + Send + Sync>;

/// The resolved view and settings components of a module.
pub struct ModuleComponents<S> {
    view: ModuleComponent<S>,
    settings: ModuleComponent<S>,
}

impl<S> ModuleComponents<S> {
    /// Bundles a view and a settings component.
    pub fn new<V, T>(view: V, settings: T) -> Self
    where
        V: Fn(&ModuleContext<S>) + Send + Sync + 'static,
        T: Fn(&ModuleContext<S>) + Send + Sync + 'static,
    {
        Self {
            view: Arc::new(view),
            settings: Arc::new(settings),
        }
    }

    /// Returns the view component.
    pub fn view(&self) -> ModuleComponent<S> {
        self.view.clone()
    }

    /// Returns the settings component.
    pub fn settings(&self) -> ModuleComponent<S> {
        self.settings.clone()
    }
}

impl<S> Clone for ModuleComponents<S> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<S> fmt::Debug for ModuleComponents<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleComponents").finish_non_exhaustive()
    }
}

/// Definition of a module, parametrized by the type of its instance state.
pub struct Module<S> {
    name: String,
    default_title: String,
    sync_setting_keys: Vec<SyncSettingKey>,
    channel_definitions: Vec<ChannelDefinition>,
    receiver_definitions: Vec<ReceiverDefinition>,
    default_state: S,
}

impl<S> Module<S> {
    /// Creates a module definition.
    ///
    /// The default title is the module name.
    pub fn new(name: impl Into<String>, default_state: S) -> Self {
        let name = name.into();

        Self {
            default_title: name.clone(),
            name,
            sync_setting_keys: Vec::new(),
            channel_definitions: Vec::new(),
            receiver_definitions: Vec::new(),
            default_state,
        }
    }

    /// Sets the title given to new instances.
    pub fn with_default_title(mut self, title: impl Into<String>) -> Self {
        self.default_title = title.into();

        self
    }

    /// Declares the settings instances may synchronize.
    pub fn with_sync_setting_keys(mut self, keys: impl IntoIterator<Item = SyncSettingKey>) -> Self {
        for key in keys {
            if !self.sync_setting_keys.contains(&key) {
                self.sync_setting_keys.push(key);
            }
        }

        self
    }

    /// Declares a channel published by every instance.
    pub fn with_channel(mut self, definition: ChannelDefinition) -> Self {
        self.channel_definitions.push(definition);

        self
    }

    /// Declares a receiver exposed by every instance.
    pub fn with_receiver(mut self, definition: ReceiverDefinition) -> Self {
        self.receiver_definitions.push(definition);

        self
    }

    /// Returns the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the title given to new instances.
    pub fn default_title(&self) -> &str {
        &self.default_title
    }

    /// Returns the settings instances may synchronize.
    pub fn sync_setting_keys(&self) -> &[SyncSettingKey] {
        &self.sync_setting_keys
    }

    /// Returns the channels published by every instance.
    pub fn channel_definitions(&self) -> &[ChannelDefinition] {
        &self.channel_definitions
    }

    /// Returns the receivers exposed by every instance.
    pub fn receiver_definitions(&self) -> &[ReceiverDefinition] {
        &self.receiver_definitions
    }

    /// Returns the initial instance state.
    pub fn default_state(&self) -> &S {
        &self.default_state
    }
}

impl<S> fmt::Debug for Module<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("sync_setting_keys", &self.sync_setting_keys)
            .finish_non_exhaustive()
    }
}
