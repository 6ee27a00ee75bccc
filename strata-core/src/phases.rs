//! The fixed ordered list of build phases.

use crate::hooks::Hook;

/// One step of a build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildPhase {
    pub name: &'static str,
    /// Hook plugins implement to take part, if any.
    pub extension_point: Option<Hook>,
    /// Failure is logged and the run continues.
    pub optional: bool,
    /// Actions issued during the phase are drained to a fixed point.
    pub cascading: bool,
}

const fn phase(
    name: &'static str,
    extension_point: Option<Hook>,
    optional: bool,
    cascading: bool,
) -> BuildPhase {
    BuildPhase {
        name,
        extension_point,
        optional,
        cascading,
    }
}

pub const OPEN_CONFIG: BuildPhase = phase("open-config", None, false, false);
pub const LOAD_PLUGINS: BuildPhase = phase("load-plugins", None, false, false);
pub const PRE_INIT: BuildPhase = phase("pre-init", Some(Hook::OnPreInit), true, false);
pub const DELETE_STALE_ARTIFACTS: BuildPhase = phase("delete-stale-artifacts", None, true, false);
pub const INITIALIZE_CACHE: BuildPhase = phase("initialize-cache", None, true, false);
pub const COPY_RUNTIME_FILES: BuildPhase = phase("copy-runtime-files", None, false, false);
pub const PRE_BOOTSTRAP: BuildPhase =
    phase("pre-bootstrap", Some(Hook::OnPreBootstrap), false, false);
pub const SCHEMA_CUSTOMIZATION: BuildPhase = phase(
    "schema-customization",
    Some(Hook::CreateSchemaCustomization),
    false,
    false,
);
pub const SOURCE_NODES: BuildPhase = phase("source-nodes", Some(Hook::SourceNodes), false, false);
pub const BUILD_SCHEMA: BuildPhase = phase("build-schema", None, false, false);
pub const RESOLVE_EXTENSIONS: BuildPhase = phase(
    "resolve-extensions",
    Some(Hook::ResolvableExtensions),
    true,
    false,
);
pub const CREATE_PAGES: BuildPhase = phase("create-pages", Some(Hook::CreatePages), false, true);
pub const CREATE_PAGES_STATEFULLY: BuildPhase = phase(
    "create-pages-statefully",
    Some(Hook::CreatePagesStatefully),
    false,
    true,
);
pub const PRE_EXTRACT_QUERIES: BuildPhase = phase(
    "pre-extract-queries",
    Some(Hook::OnPreExtractQueries),
    true,
    false,
);
pub const REBUILD_SCHEMA: BuildPhase = phase("rebuild-schema", None, false, false);
pub const EXTRACT_QUERIES: BuildPhase = phase("extract-queries", None, false, false);
pub const WRITE_REQUIRES: BuildPhase = phase("write-requires", None, false, false);
pub const WRITE_REDIRECTS: BuildPhase = phase("write-redirects", None, false, false);
pub const POST_BOOTSTRAP: BuildPhase =
    phase("post-bootstrap", Some(Hook::OnPostBootstrap), true, false);

/// Every phase, in execution order.
pub const PHASES: &[BuildPhase] = &[
    OPEN_CONFIG,
    LOAD_PLUGINS,
    PRE_INIT,
    DELETE_STALE_ARTIFACTS,
    INITIALIZE_CACHE,
    COPY_RUNTIME_FILES,
    PRE_BOOTSTRAP,
    SCHEMA_CUSTOMIZATION,
    SOURCE_NODES,
    BUILD_SCHEMA,
    RESOLVE_EXTENSIONS,
    CREATE_PAGES,
    CREATE_PAGES_STATEFULLY,
    PRE_EXTRACT_QUERIES,
    REBUILD_SCHEMA,
    EXTRACT_QUERIES,
    WRITE_REQUIRES,
    WRITE_REDIRECTS,
    POST_BOOTSTRAP,
];

/// Phase names in execution order.
pub fn phase_names() -> Vec<&'static str> {
    PHASES.iter().map(|p| p.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_phase_order() {
        assert_eq!(PHASES.len(), 19);
        assert_eq!(PHASES[0].name, "open-config");
        assert_eq!(PHASES[11].name, "create-pages");
        assert_eq!(PHASES[12].name, "create-pages-statefully");
        assert_eq!(PHASES[18].name, "post-bootstrap");
    }

    #[test]
    fn test_phase_names_are_unique() {
        let names: HashSet<_> = phase_names().into_iter().collect();
        assert_eq!(names.len(), PHASES.len());
    }

    #[test]
    fn test_only_page_creation_cascades() {
        let cascading: Vec<_> = PHASES.iter().filter(|p| p.cascading).map(|p| p.name).collect();
        assert_eq!(cascading, vec!["create-pages", "create-pages-statefully"]);
    }

    #[test]
    fn test_each_hook_has_at_most_one_phase() {
        let hooks: Vec<_> = PHASES.iter().filter_map(|p| p.extension_point).collect();
        let unique: HashSet<_> = hooks.iter().collect();
        assert_eq!(hooks.len(), unique.len());
        // onCreatePage runs inside cascades, never as a phase of its own
        assert!(!hooks.contains(&Hook::OnCreatePage));
    }
}
