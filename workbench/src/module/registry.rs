use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::channel::ChannelError;
use crate::workbench::WorkbenchError;

use super::{AnyModuleInstance, InstanceEnvironment, Module, ModuleInstance, ModuleInstanceId, SyncSettingKey};

/// Type-erased module definition able to create instances.
pub(crate) trait ModuleFactory: Send + Sync {
    fn sync_setting_keys(&self) -> &[SyncSettingKey];

    fn instantiate(
        &self,
        id: ModuleInstanceId,
        env: InstanceEnvironment,
    ) -> Result<Arc<dyn AnyModuleInstance>, ChannelError>;
}

impl<S> ModuleFactory for Arc<Module<S>>
where
    S: Clone + Send + Sync + 'static,
{
    fn sync_setting_keys(&self) -> &[SyncSettingKey] {
        Module::sync_setting_keys(self)
    }

    fn instantiate(
        &self,
        id: ModuleInstanceId,
        env: InstanceEnvironment,
    ) -> Result<Arc<dyn AnyModuleInstance>, ChannelError> {
        let instance = ModuleInstance::new(id, self.clone(), env)?;

        Ok(Arc::new(instance))
    }
}

/// The set of modules instances can be created from.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Arc<dyn ModuleFactory>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module under its name.
    pub fn register<S>(&mut self, module: Module<S>) -> Result<(), WorkbenchError>
    where
        S: Clone + Send + Sync + 'static,
    {
        if self.modules.contains_key(module.name()) {
            return Err(WorkbenchError::DuplicateModule(module.name().to_string()));
        }
        debug!(module = module.name(), "module registered");
        self.modules
            .insert(module.name().to_string(), Arc::new(Arc::new(module)));

        Ok(())
    }

    /// Returns `true` if a module with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Returns the names of the registered modules, in lexicographic order.
    pub fn module_names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// Returns the settings instances of a module may synchronize.
    pub fn sync_setting_keys(&self, name: &str) -> Option<&[SyncSettingKey]> {
        self.modules.get(name).map(|module| module.sync_setting_keys())
    }

    pub(crate) fn factory(&self, name: &str) -> Option<&Arc<dyn ModuleFactory>> {
        self.modules.get(name)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .finish()
    }
}
