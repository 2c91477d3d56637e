//! Tool loader: module-context snapshotting and rehydration.
//!
//! This is the hardest part of persistence. Loading a tool module from disk cannot mean
//! evaluating arbitrary source into a fresh namespace — Rust has no safe in-process `eval`. The
//! substitution made here (and recorded in DESIGN.md) is a process-wide registry of named
//! **factory closures**: a tool author calls [`register_module`] once (typically at the top of
//! `main`) to make a `logical_name`'s functions reachable by name; `source_code` still travels in
//! the `.bot` file verbatim and still drives the `code_hash` digest, it is just not literally
//! re-interpreted by the Rust loader.

use crate::cloudllm::error::{CoreError, CoreResult};
use lazy_static::lazy_static;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// A tool's executable body: takes JSON arguments, returns a string result or an error string
/// (tool failures never raise out of the registry).
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<String, String>> + Send>>;
pub type ToolFn = Arc<dyn Fn(serde_json::Value) -> ToolFuture + Send + Sync>;

/// Produces the name-to-callable map for one logical module, invoked fresh on every rehydrate —
/// the Rust stand-in for "evaluate the source in a fresh namespace".
pub type ModuleFactory = Arc<dyn Fn() -> HashMap<String, ToolFn> + Send + Sync>;

lazy_static! {
    static ref MODULE_FACTORIES: Mutex<HashMap<String, ModuleFactory>> = Mutex::new(HashMap::new());
}

/// Register a module's factory under `logical_name`. Call once per process, before any bot that
/// uses tools from this module is constructed or rehydrated from a `.bot` file.
pub fn register_module(logical_name: impl Into<String>, factory: ModuleFactory) {
    MODULE_FACTORIES
        .lock()
        .expect("module factory registry poisoned")
        .insert(logical_name.into(), factory);
}

fn factory_for(logical_name: &str) -> Option<ModuleFactory> {
    MODULE_FACTORIES
        .lock()
        .expect("module factory registry poisoned")
        .get(logical_name)
        .cloned()
}

/// Where a module's source originates: a real path on disk, or an in-process synthetic id.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModuleOrigin {
    Path(String),
    Virtual(String),
}

impl ModuleOrigin {
    pub fn as_str(&self) -> &str {
        match self {
            ModuleOrigin::Path(p) => p,
            ModuleOrigin::Virtual(v) => v,
        }
    }
}

fn code_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A synthetic id for tools registered directly in-process rather than backed by a file.
pub fn dynamic_module_id(source: &str) -> String {
    format!("dynamic_module_{}", &code_hash(source)[..16])
}

/// Snapshot of one module's source, as it travels in the `.bot` file.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModuleContext {
    pub logical_name: String,
    pub source_code: String,
    pub origin: ModuleOrigin,
    pub code_hash: String,
}

impl ModuleContext {
    /// Snapshot a module backed by a real file on disk.
    pub fn from_file(logical_name: impl Into<String>, path: &Path) -> CoreResult<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| CoreError::ModuleLoadFailure(format!("reading {:?}: {}", path, e)))?;
        Ok(Self {
            logical_name: logical_name.into(),
            code_hash: code_hash(&source),
            origin: ModuleOrigin::Path(path.to_string_lossy().into_owned()),
            source_code: source,
        })
    }

    /// Snapshot a module defined in-process (no backing file): a synthetic virtual id is minted
    /// from the source's hash.
    pub fn from_source(logical_name: impl Into<String>, source_code: impl Into<String>) -> Self {
        let source_code = source_code.into();
        let hash = code_hash(&source_code);
        Self {
            logical_name: logical_name.into(),
            origin: ModuleOrigin::Virtual(dynamic_module_id(&source_code)),
            code_hash: hash,
            source_code,
        }
    }

    /// Resolve this context against the current environment and return the live name→callable
    /// map, remapping the stored path if it no longer resolves. Returns `(namespace, remapped)`.
    pub fn rehydrate(&self) -> CoreResult<(HashMap<String, ToolFn>, Option<String>)> {
        let mut remapped = None;

        if let ModuleOrigin::Path(stored_path) = &self.origin {
            let path = Path::new(stored_path);
            if let Ok(on_disk) = std::fs::read_to_string(path) {
                if code_hash(&on_disk) != self.code_hash {
                    log::warn!(
                        "module '{}' on-disk contents at {} no longer match the snapshotted \
                         code_hash; using the snapshotted source of record",
                        self.logical_name,
                        stored_path
                    );
                }
            } else {
                // Stored path no longer resolves. Try the current working directory's file
                // basename next (the common "project moved" case).
                if let Some(file_name) = path.file_name() {
                    let candidate = Path::new(file_name);
                    if candidate.exists() && candidate != path {
                        remapped = Some(candidate.to_string_lossy().into_owned());
                    }
                }
            }
        }

        let namespace = factory_for(&self.logical_name)
            .map(|f| f())
            .unwrap_or_default();

        Ok((namespace, remapped))
    }
}
