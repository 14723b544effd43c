//! UI-global state and events.
//!
//! The [`GuiMessageBroker`] is a [`PublishSubscribeDelegate`] specialization
//! holding state shared by the whole shell, such as drawer contents and panel
//! widths, together with transient events that several widgets react to, such
//! as the start of a module header drag.
//!
//! States are declared as typed [`GuiState`] constants and always have a value:
//! their default until first written. Events are declared as typed
//! [`GuiEvent`] constants and are never replayed to late subscribers.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::channel::ChannelId;
use crate::module::ModuleInstanceId;
use crate::pubsub::{PublishSubscribeDelegate, Subscription, Topic};

/// A piece of UI-global state of type `T`.
pub struct GuiState<T> {
    topic: Topic<T>,
    default: T,
}

impl<T> GuiState<T> {
    /// Declares a state with its default value.
    pub const fn new(name: &'static str, default: T) -> Self {
        Self {
            topic: Topic::new(name),
            default,
        }
    }

    /// Returns the underlying topic.
    pub fn topic(&self) -> &Topic<T> {
        &self.topic
    }
}

impl<T> fmt::Debug for GuiState<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GuiState").field(&self.topic.name()).finish()
    }
}

/// A UI-global event carrying a payload of type `T`.
pub type GuiEvent<T> = Topic<T>;

/// Content of the left drawer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeftDrawerContent {
    /// Settings of the active module instance.
    #[default]
    ModuleSettings,
    /// List of modules that can be added.
    ModulesList,
    /// List of layout templates.
    TemplatesList,
    /// Synchronized settings of the active module instance.
    SyncSettings,
    /// Color palettes.
    ColorPaletteSettings,
}

/// Content of the right drawer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RightDrawerContent {
    /// Realization filters of the loaded ensembles.
    RealizationFilterSettings,
    /// Log of the active module instance.
    ModuleInstanceLog,
}

/// State constants.
pub mod state {
    use super::{GuiState, LeftDrawerContent, RightDrawerContent};
    use crate::module::ModuleInstanceId;

    /// Content of the left drawer.
    pub const LEFT_DRAWER_CONTENT: GuiState<LeftDrawerContent> =
        GuiState::new("gui.left_drawer_content", LeftDrawerContent::ModuleSettings);
    /// Content of the right drawer, `None` if collapsed.
    pub const RIGHT_DRAWER_CONTENT: GuiState<Option<RightDrawerContent>> =
        GuiState::new("gui.right_drawer_content", None);
    /// Width of the left settings panel, in percent of the window width.
    pub const LEFT_SETTINGS_PANEL_WIDTH_PERCENT: GuiState<f32> =
        GuiState::new("gui.left_settings_panel_width_percent", 20.0);
    /// Width of the right settings panel, in percent of the window width.
    pub const RIGHT_SETTINGS_PANEL_WIDTH_PERCENT: GuiState<f32> =
        GuiState::new("gui.right_settings_panel_width_percent", 0.0);
    /// Whether the data channel connection overlay is shown.
    pub const DATA_CHANNEL_CONNECTION_LAYER_VISIBLE: GuiState<bool> =
        GuiState::new("gui.data_channel_connection_layer_visible", false);
    /// Whether data channel connections are being edited.
    pub const EDIT_DATA_CHANNEL_CONNECTIONS: GuiState<bool> =
        GuiState::new("gui.edit_data_channel_connections", false);
    /// Whether the developer tools are shown.
    pub const DEV_TOOLS_VISIBLE: GuiState<bool> = GuiState::new("gui.dev_tools_visible", false);
    /// Whether the ensemble selection dialog is open.
    pub const SELECT_ENSEMBLES_DIALOG_OPEN: GuiState<bool> =
        GuiState::new("gui.select_ensembles_dialog_open", false);
    /// Instance whose header is being dragged, if any.
    pub const DRAGGED_MODULE_INSTANCE: GuiState<Option<ModuleInstanceId>> =
        GuiState::new("gui.dragged_module_instance", None);
}

/// Position of a pointer, in window pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PointerPosition {
    /// Horizontal coordinate.
    pub x: f32,
    /// Vertical coordinate.
    pub y: f32,
}

/// Payload of [`event::MODULE_HEADER_POINTER_DOWN`].
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleHeaderPointerDown {
    /// The instance whose header was pressed.
    pub module_instance_id: ModuleInstanceId,
    /// Where the pointer was pressed.
    pub pointer: PointerPosition,
}

/// Payload of [`event::NEW_MODULE_POINTER_DOWN`].
#[derive(Clone, Debug, PartialEq)]
pub struct NewModulePointerDown {
    /// The module dragged from the module list.
    pub module_name: String,
    /// Where the pointer was pressed.
    pub pointer: PointerPosition,
}

/// Payload of [`event::HIGHLIGHT_DATA_CHANNEL_CONNECTION_REQUEST`].
#[derive(Clone, Debug, PartialEq)]
pub struct HighlightDataChannelConnection {
    /// The receiving instance.
    pub module_instance_id: ModuleInstanceId,
    /// The receiver of that instance.
    pub receiver_ident: String,
    /// The channel bound to the receiver.
    pub channel_id: ChannelId,
}

/// Event constants.
pub mod event {
    use super::{GuiEvent, HighlightDataChannelConnection, ModuleHeaderPointerDown, NewModulePointerDown};
    use crate::module::ModuleInstanceId;

    /// The header of a module instance was pressed.
    pub const MODULE_HEADER_POINTER_DOWN: GuiEvent<ModuleHeaderPointerDown> =
        GuiEvent::transient("gui.event.module_header_pointer_down");
    /// A module of the module list was pressed.
    pub const NEW_MODULE_POINTER_DOWN: GuiEvent<NewModulePointerDown> =
        GuiEvent::transient("gui.event.new_module_pointer_down");
    /// The user asked to remove a module instance.
    pub const REMOVE_MODULE_INSTANCE_REQUEST: GuiEvent<ModuleInstanceId> =
        GuiEvent::transient("gui.event.remove_module_instance_request");
    /// Data channel connections were edited.
    pub const DATA_CHANNEL_CONNECTIONS_CHANGE: GuiEvent<()> =
        GuiEvent::transient("gui.event.data_channel_connections_change");
    /// A data channel connection should be highlighted.
    pub const HIGHLIGHT_DATA_CHANNEL_CONNECTION_REQUEST: GuiEvent<HighlightDataChannelConnection> =
        GuiEvent::transient("gui.event.highlight_data_channel_connection_request");
    /// Highlighted data channel connections should be reset.
    pub const UNHIGHLIGHT_DATA_CHANNEL_CONNECTION_REQUEST: GuiEvent<()> =
        GuiEvent::transient("gui.event.unhighlight_data_channel_connection_request");
}

/// Broker of UI-global state and events.
///
/// Cloning a broker yields a handle to the same state.
#[derive(Clone)]
pub struct GuiMessageBroker {
    delegate: PublishSubscribeDelegate,
}

impl GuiMessageBroker {
    /// Creates a broker with every built-in state set to its default.
    pub fn new() -> Self {
        let broker = Self {
            delegate: PublishSubscribeDelegate::new("gui"),
        };
        broker.seed(&state::LEFT_DRAWER_CONTENT);
        broker.seed(&state::RIGHT_DRAWER_CONTENT);
        broker.seed(&state::LEFT_SETTINGS_PANEL_WIDTH_PERCENT);
        broker.seed(&state::RIGHT_SETTINGS_PANEL_WIDTH_PERCENT);
        broker.seed(&state::DATA_CHANNEL_CONNECTION_LAYER_VISIBLE);
        broker.seed(&state::EDIT_DATA_CHANNEL_CONNECTIONS);
        broker.seed(&state::DEV_TOOLS_VISIBLE);
        broker.seed(&state::SELECT_ENSEMBLES_DIALOG_OPEN);
        broker.seed(&state::DRAGGED_MODULE_INSTANCE);

        broker
    }

    fn seed<T>(&self, state: &GuiState<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.delegate
            .notify_subscribers(&state.topic, state.default.clone());
    }

    /// Sets a state, notifying subscribers if the value changed.
    pub fn set_state<T>(&self, state: &GuiState<T>, value: T)
    where
        T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        if self.state(state) == value {
            return;
        }
        trace!(state = state.topic.name(), ?value, "gui state changed");
        self.delegate.notify_subscribers(&state.topic, value);
    }

    /// Returns the current value of a state.
    pub fn state<T>(&self, state: &GuiState<T>) -> T
    where
        T: Clone + Send + Sync + 'static,
    {
        self.delegate
            .latest_value(&state.topic)
            .map_or_else(|| state.default.clone(), |value| (*value).clone())
    }

    /// Subscribes to a state; the callback immediately receives the current
    /// value.
    pub fn subscribe_to_state<T, F>(&self, state: &GuiState<T>, callback: F) -> Subscription
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        if !self.delegate.has_value(&state.topic) {
            self.seed(state);
        }
        self.delegate.subscribe(&state.topic, callback)
    }

    /// Publishes an event to the current subscribers.
    pub fn publish_event<T>(&self, event: &GuiEvent<T>, payload: T)
    where
        T: Send + Sync + 'static,
    {
        self.delegate.notify_subscribers(event, payload);
    }

    /// Subscribes to an event.
    pub fn subscribe_to_event<T, F>(&self, event: &GuiEvent<T>, callback: F) -> Subscription
    where
        T: Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.delegate.subscribe(event, callback)
    }
}

impl Default for GuiMessageBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for GuiMessageBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuiMessageBroker").finish_non_exhaustive()
    }
}
