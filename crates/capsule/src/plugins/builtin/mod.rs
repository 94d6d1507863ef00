//! Built-in capabilities, registered in-process before compiled units load

pub mod create_plugin;
pub mod memory;

pub use create_plugin::{CreatePluginCapability, CREATE_PLUGIN_ID};
pub use memory::{MemoryCapability, MEMORY_ID};

/// Ids a compiled unit may not take
pub const BUILTIN_IDS: &[&str] = &[MEMORY_ID, CREATE_PLUGIN_ID];

use super::{CapabilityContext, LoadError, Registry};

/// Initialize and register every built-in capability
pub async fn register_builtins(
    registry: &mut Registry,
    ctx: &CapabilityContext,
) -> Result<(), LoadError> {
    registry
        .init_and_register(Box::new(MemoryCapability::new()), ctx)
        .await?;
    registry
        .init_and_register(Box::new(CreatePluginCapability::new()), ctx)
        .await?;
    Ok(())
}
