use serde::{Deserialize, Serialize};

use crate::module::ModuleInstanceId;

/// Placement of a module instance in the workbench grid.
///
/// Coordinates and sizes are fractions of the grid extent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayoutElement {
    /// The placed instance.
    pub module_instance_id: ModuleInstanceId,
    /// Name of the module of the instance.
    pub module_name: String,
    /// Left edge.
    pub relative_x: f32,
    /// Top edge.
    pub relative_y: f32,
    /// Width.
    pub relative_width: f32,
    /// Height.
    pub relative_height: f32,
    /// Whether the instance is collapsed.
    #[serde(default)]
    pub minimized: bool,
    /// Whether the instance fills the grid.
    #[serde(default)]
    pub maximized: bool,
}

impl LayoutElement {
    /// Places an instance over the whole grid.
    pub fn new(module_instance_id: ModuleInstanceId, module_name: impl Into<String>) -> Self {
        Self {
            module_instance_id,
            module_name: module_name.into(),
            relative_x: 0.0,
            relative_y: 0.0,
            relative_width: 1.0,
            relative_height: 1.0,
            minimized: false,
            maximized: false,
        }
    }

    /// Sets the position and size, each clamped to `[0, 1]`.
    pub fn with_geometry(mut self, x: f32, y: f32, width: f32, height: f32) -> Self {
        self.relative_x = x.clamp(0.0, 1.0);
        self.relative_y = y.clamp(0.0, 1.0);
        self.relative_width = width.clamp(0.0, 1.0);
        self.relative_height = height.clamp(0.0, 1.0);

        self
    }
}

/// Parses a layout serialized as JSON.
pub fn layout_from_json(json: &str) -> serde_json::Result<Vec<LayoutElement>> {
    serde_json::from_str(json)
}

/// Serializes a layout as JSON.
pub fn layout_to_json(layout: &[LayoutElement]) -> serde_json::Result<String> {
    serde_json::to_string(layout)
}
