//! Module loader backed by the render cycle's resource handles.
//!
//! Imports inside the sandbox never touch the filesystem or the
//! network: a specifier resolves to a `preview://` locator and the
//! source comes out of the live handle table. Only handles of the
//! loader's own generation are honored, so a superseded isolate cannot
//! import through a newer cycle's table entries.

use deno_core::{
    anyhow::{anyhow, Error},
    ModuleLoadResponse, ModuleLoader, ModuleSource, ModuleSourceCode, ModuleSpecifier,
    ModuleType, RequestedModuleType, ResolutionKind,
};

use crate::handles::{SharedHandleTable, LOCATOR_SCHEME};

pub struct HandleLoader {
    table: SharedHandleTable,
    generation: u64,
}

impl HandleLoader {
    pub fn new(table: SharedHandleTable, generation: u64) -> Self {
        Self { table, generation }
    }

    /// Store-relative path carried by a locator ("/" stripped).
    fn locator_path(specifier: &ModuleSpecifier) -> String {
        specifier.path().trim_start_matches('/').to_string()
    }
}

impl ModuleLoader for HandleLoader {
    fn resolve(
        &self,
        specifier: &str,
        referrer: &str,
        _kind: ResolutionKind,
    ) -> Result<ModuleSpecifier, Error> {
        // Block all remote imports
        if specifier.starts_with("http://")
            || specifier.starts_with("https://")
            || specifier.starts_with("data:")
            || specifier.starts_with("blob:")
        {
            return Err(anyhow!("Remote imports are forbidden: {}", specifier));
        }

        let resolved = if specifier.starts_with("./") || specifier.starts_with("../") {
            // Relative import - resolve against the referring locator
            let referrer_url = ModuleSpecifier::parse(referrer)
                .map_err(|e| anyhow!("Invalid referrer '{}': {}", referrer, e))?;
            referrer_url
                .join(specifier)
                .map_err(|e| anyhow!("Failed to resolve '{}': {}", specifier, e))?
        } else if specifier.contains("://") {
            ModuleSpecifier::parse(specifier)
                .map_err(|e| anyhow!("Invalid module URL '{}': {}", specifier, e))?
        } else {
            // Bare specifier - a project path; find its handle for this cycle
            let path = specifier.trim_start_matches('/');
            let table = self.table.borrow();
            let handle = table
                .resolve_path(path, self.generation)
                .ok_or_else(|| anyhow!("Unknown module '{}'", specifier))?;
            ModuleSpecifier::parse(&handle.locator)
                .map_err(|e| anyhow!("Invalid locator for '{}': {}", specifier, e))?
        };

        if resolved.scheme() != LOCATOR_SCHEME {
            return Err(anyhow!(
                "Only {}:// imports allowed, got: {}",
                LOCATOR_SCHEME,
                resolved.scheme()
            ));
        }

        Ok(resolved)
    }

    fn load(
        &self,
        module_specifier: &ModuleSpecifier,
        _maybe_referrer: Option<&ModuleSpecifier>,
        _is_dyn_import: bool,
        _requested_module_type: RequestedModuleType,
    ) -> ModuleLoadResponse {
        let specifier = module_specifier.clone();
        let path = Self::locator_path(&specifier);

        // Re-resolve by path so only this cycle's handles are served,
        // whatever token the referrer carried.
        let table = self.table.borrow();
        let handle = match table.resolve_path(&path, self.generation) {
            Some(h) => h,
            None => {
                return ModuleLoadResponse::Sync(Err(anyhow!(
                    "Module not found: {}",
                    specifier
                )));
            }
        };

        if !handle.is_text {
            return ModuleLoadResponse::Sync(Err(anyhow!(
                "Cannot import binary file: {}",
                path
            )));
        }

        let code = String::from_utf8_lossy(&handle.bytes).into_owned();
        ModuleLoadResponse::Sync(Ok(ModuleSource::new(
            ModuleType::JavaScript,
            ModuleSourceCode::String(code.into()),
            &specifier,
            None,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handles::{CycleToken, HandleTable};
    use crate::store::VirtualFileStore;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn loader_with(files: &[(&str, &str)], generation: u64) -> (HandleLoader, CycleToken) {
        let mut store = VirtualFileStore::new();
        for (path, content) in files {
            store.put(*path, *content);
        }
        let token = CycleToken::mint(generation);
        let mut table = HandleTable::new();
        for record in store.list() {
            table.insert(token.handle_for(record));
        }
        let shared = Rc::new(RefCell::new(table));
        (HandleLoader::new(shared, generation), token)
    }

    #[test]
    fn test_blocks_remote_imports() {
        let (loader, token) = loader_with(&[("entry.js", "1")], 1);
        let referrer = token.locator_for("entry.js");
        let result = loader.resolve("https://evil.com/payload.js", &referrer, ResolutionKind::Import);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Remote imports are forbidden"));
    }

    #[test]
    fn test_resolves_relative_against_locator() {
        let (loader, token) = loader_with(&[("js/entry.js", "1"), ("js/util.js", "2")], 1);
        let referrer = token.locator_for("js/entry.js");
        let resolved = loader
            .resolve("./util.js", &referrer, ResolutionKind::Import)
            .unwrap();
        assert_eq!(resolved.as_str(), token.locator_for("js/util.js"));
    }

    #[test]
    fn test_resolves_bare_specifier_as_project_path() {
        let (loader, token) = loader_with(&[("lib.js", "x")], 3);
        let referrer = token.locator_for("entry.js");
        let resolved = loader
            .resolve("lib.js", &referrer, ResolutionKind::Import)
            .unwrap();
        assert_eq!(resolved.as_str(), token.locator_for("lib.js"));
    }

    #[test]
    fn test_unknown_module_is_an_error() {
        let (loader, token) = loader_with(&[("entry.js", "1")], 1);
        let referrer = token.locator_for("entry.js");
        let result = loader.resolve("missing.js", &referrer, ResolutionKind::Import);
        assert!(result.is_err());
    }

    #[test]
    fn test_load_serves_only_own_generation() {
        let (loader, token) = loader_with(&[("m.js", "export default 1;")], 1);
        let specifier = ModuleSpecifier::parse(&token.locator_for("m.js")).unwrap();

        let response = loader.load(&specifier, None, false, RequestedModuleType::None);
        assert!(matches!(response, ModuleLoadResponse::Sync(Ok(_))));

        // A loader for a different generation refuses the same locator
        let stale = HandleLoader::new(loader.table.clone(), 2);
        let response = stale.load(&specifier, None, false, RequestedModuleType::None);
        assert!(matches!(response, ModuleLoadResponse::Sync(Err(_))));
    }
}
