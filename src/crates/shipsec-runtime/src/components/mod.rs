//! Built-in component catalog.
//!
//! The components every deployment ships with: the workflow entry point,
//! text transforms, logging, fan-out collection, human gates
//! (approval/form), timers, and a plain HTTP step. Heavier security
//! tooling (scanners, enrichment, AI steps) is registered by the
//! deployment on top of these.

pub mod approval;
pub mod collect;
pub mod entry;
pub mod form;
pub mod http;
pub mod log;
pub mod transform;
pub mod wait;

use std::sync::Arc;

use shipsec_core::component::ComponentRegistry;
use shipsec_core::error::RegistryError;

use crate::inline::InlineRegistry;

/// Register every built-in definition and its inline implementation.
pub fn install(
    components: &mut ComponentRegistry,
    inline: &mut InlineRegistry,
) -> Result<(), RegistryError> {
    components.register(entry::definition())?;
    inline.register(entry::COMPONENT_ID, Arc::new(entry::Entry))?;

    components.register(transform::definition())?;
    inline.register(transform::COMPONENT_ID, Arc::new(transform::TextTransform))?;

    components.register(log::definition())?;
    inline.register(log::COMPONENT_ID, Arc::new(log::LogMessage))?;

    components.register(collect::definition())?;
    inline.register(collect::COMPONENT_ID, Arc::new(collect::Collect))?;

    components.register(approval::definition())?;
    inline.register(approval::COMPONENT_ID, Arc::new(approval::ManualApproval))?;

    components.register(form::definition())?;
    inline.register(form::COMPONENT_ID, Arc::new(form::FormInput))?;

    components.register(wait::definition())?;
    inline.register(wait::COMPONENT_ID, Arc::new(wait::Wait))?;

    components.register(http::definition())?;
    inline.register(http::COMPONENT_ID, Arc::new(http::HttpRequest::new()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_registers_catalog() {
        let mut components = ComponentRegistry::new();
        let mut inline = InlineRegistry::new();
        install(&mut components, &mut inline).unwrap();

        for id in [
            "core.entry",
            "core.transform.text",
            "core.log",
            "core.collect",
            "human.approval",
            "human.form",
            "time.wait",
            "http.request",
        ] {
            assert!(components.get(id).is_some(), "missing definition {}", id);
            assert!(inline.get(id).is_some(), "missing implementation {}", id);
        }
    }

    #[test]
    fn test_install_twice_rejected() {
        let mut components = ComponentRegistry::new();
        let mut inline = InlineRegistry::new();
        install(&mut components, &mut inline).unwrap();
        assert!(install(&mut components, &mut inline).is_err());
    }
}
