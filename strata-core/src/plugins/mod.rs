//! Plugins that ship with Strata.
//!
//! They register handlers like any other plugin; a site enables one by
//! declaring it under `[[plugins]]` with the matching name and hooks.

pub mod page_creator;
pub mod redirects;

use crate::hooks::HandlerRegistry;

/// Names of the built-in plugins.
pub const BUILTIN_PLUGINS: &[&str] = &[page_creator::NAME, redirects::NAME];

/// Register handlers for every built-in plugin.
pub fn register_builtins(handlers: &mut HandlerRegistry) {
    page_creator::register(handlers);
    redirects::register(handlers);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Hook;

    #[test]
    fn test_register_builtins() {
        let mut handlers = HandlerRegistry::new();
        register_builtins(&mut handlers);

        assert_eq!(handlers.len(), BUILTIN_PLUGINS.len());
        assert!(handlers
            .get(page_creator::NAME, Hook::CreatePagesStatefully)
            .is_some());
        assert!(handlers.get(redirects::NAME, Hook::CreatePages).is_some());
    }
}
