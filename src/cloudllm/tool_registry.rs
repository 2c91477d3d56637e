//! Per-bot tool registry: descriptors, the live function map, owning module contexts, and
//! per-turn request/result scratch.
//!
//! Distinct from [`crate::cloudllm::tool_protocol::ToolRegistry`], which routes calls across
//! pluggable `ToolProtocol` backends (MCP servers, custom local functions, ...). This registry is
//! the tree-native one: it is what the step machine consults every turn, and what gets snapshotted
//! into / rehydrated from a `.bot` file.

use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::tool_loader::{ModuleContext, ToolFn};
use crate::cloudllm::tool_protocol::{ToolMetadata, ToolParameter};
use crate::cloudllm::tree::{ToolCallRecord, ToolResultRecord};
use std::collections::HashMap;
use std::path::Path;

/// Everything needed to reconstruct one tool registration across a save/load cycle.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolRegistrySnapshot {
    pub tools: Vec<ToolMetadata>,
    pub function_paths: HashMap<String, String>,
    pub modules: HashMap<String, ModuleContext>,
    /// Non-empty only if a save happens to capture an in-flight turn.
    pub requests: Vec<ToolCallRecord>,
    pub results: Vec<ToolResultRecord>,
}

#[derive(Default, Clone)]
pub struct BotToolRegistry {
    tools: Vec<ToolMetadata>,
    function_map: HashMap<String, ToolFn>,
    function_paths: HashMap<String, String>,
    modules: HashMap<String, ModuleContext>,
    requests: Vec<ToolCallRecord>,
    results: Vec<ToolResultRecord>,
}

impl BotToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(
        &mut self,
        module: ModuleContext,
        tool_name: &str,
        description: &str,
        parameters: Vec<ToolParameter>,
        function: ToolFn,
    ) {
        let module_id = module.origin.as_str().to_string();
        self.function_map.insert(tool_name.to_string(), function);
        self.function_paths.insert(tool_name.to_string(), module_id.clone());
        let mut metadata = ToolMetadata::new(tool_name, description);
        for p in parameters {
            metadata = metadata.with_parameter(p);
        }
        self.tools.retain(|t| t.name != tool_name);
        self.tools.push(metadata);
        self.modules.insert(module_id, module);
    }

    /// Register a tool whose source is a real file on disk.
    pub fn add_tool_from_file(
        &mut self,
        logical_name: &str,
        path: &Path,
        tool_name: &str,
        description: &str,
        parameters: Vec<ToolParameter>,
        function: ToolFn,
    ) -> CoreResult<()> {
        let module = ModuleContext::from_file(logical_name, path)?;
        self.register(module, tool_name, description, parameters, function);
        Ok(())
    }

    /// Register a tool defined in-process, with its source given verbatim for persistence.
    pub fn add_tool_from_source(
        &mut self,
        logical_name: &str,
        source_code: &str,
        tool_name: &str,
        description: &str,
        parameters: Vec<ToolParameter>,
        function: ToolFn,
    ) {
        let module = ModuleContext::from_source(logical_name, source_code);
        self.register(module, tool_name, description, parameters, function);
    }

    pub fn tools(&self) -> &[ToolMetadata] {
        &self.tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.function_map.contains_key(name)
    }

    /// Queue requests for execution, skipping any call id already present in `results`
    /// (idempotency guard against provider-side duplicate delivery).
    pub fn queue_requests(&mut self, requests: Vec<ToolCallRecord>) {
        let already_done: std::collections::HashSet<_> =
            self.results.iter().map(|r| r.call_id.clone()).collect();
        self.requests = requests
            .into_iter()
            .filter(|r| !already_done.contains(&r.id))
            .collect();
    }

    /// Execute all queued requests, returning their results in request order. A missing tool or
    /// a tool that returns `Err` becomes a result string describing the failure — tool errors
    /// never propagate out of the registry.
    pub async fn exec_requests(&mut self) -> Vec<ToolResultRecord> {
        let mut results = Vec::with_capacity(self.requests.len());
        for request in self.requests.drain(..) {
            let content = match self.function_map.get(&request.name) {
                Some(f) => match f(request.arguments.clone()).await {
                    Ok(s) => s,
                    Err(e) => format!("error: {}", e),
                },
                None => format!("error: tool not found: {}", request.name),
            };
            results.push(ToolResultRecord {
                call_id: request.id,
                content,
            });
        }
        self.results.extend(results.iter().cloned());
        results
    }

    /// Reset per-turn scratch. Idempotent.
    pub fn clear(&mut self) {
        self.requests.clear();
        self.results.clear();
    }

    pub fn snapshot(&self) -> ToolRegistrySnapshot {
        ToolRegistrySnapshot {
            tools: self.tools.clone(),
            function_paths: self.function_paths.clone(),
            modules: self.modules.clone(),
            requests: self.requests.clone(),
            results: self.results.clone(),
        }
    }

    /// Rebuild the live registry from a snapshot, rehydrating every referenced module and
    /// rebinding each tool's function by trying both its stored module id and any remapped one
    /// (checking only the stored path fails to rebind a tool whose project directory moved). A
    /// tool whose function cannot be found in either namespace gets a placeholder that reports
    /// [`CoreError::ToolNotFound`] when invoked instead of failing the whole load.
    pub fn from_snapshot(snapshot: ToolRegistrySnapshot) -> CoreResult<Self> {
        let mut registry = Self {
            tools: snapshot.tools,
            function_map: HashMap::new(),
            function_paths: snapshot.function_paths,
            modules: HashMap::new(),
            requests: snapshot.requests,
            results: snapshot.results,
        };

        let mut rehydrated: HashMap<String, HashMap<String, ToolFn>> = HashMap::new();
        let mut path_remap: HashMap<String, String> = HashMap::new();

        for (module_id, module) in snapshot.modules {
            let (namespace, remap) = module.rehydrate()?;
            if let Some(new_path) = remap {
                path_remap.insert(module_id.clone(), new_path);
            }
            rehydrated.insert(module_id.clone(), namespace);
            registry.modules.insert(module_id, module);
        }

        for tool in registry.tools.clone() {
            let stored_module_id = registry.function_paths.get(&tool.name).cloned();
            let candidates = stored_module_id
                .iter()
                .cloned()
                .chain(stored_module_id.as_ref().and_then(|m| path_remap.get(m)).cloned())
                .collect::<Vec<_>>();

            let found = candidates
                .iter()
                .find_map(|module_id| rehydrated.get(module_id).and_then(|ns| ns.get(&tool.name)))
                .cloned();

            match found {
                Some(f) => {
                    registry.function_map.insert(tool.name.clone(), f);
                }
                None => {
                    let name = tool.name.clone();
                    registry.function_map.insert(
                        tool.name.clone(),
                        std::sync::Arc::new(move |_args| {
                            let name = name.clone();
                            Box::pin(async move {
                                Err(CoreError::ToolNotFound(name).to_string())
                            })
                        }),
                    );
                }
            }
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudllm::tool_loader::{self, ModuleFactory, ToolFuture};
    use std::sync::Arc;

    fn adder_factory() -> ModuleFactory {
        Arc::new(|| {
            let mut m: HashMap<String, crate::cloudllm::tool_loader::ToolFn> = HashMap::new();
            m.insert(
                "add".to_string(),
                Arc::new(|args: serde_json::Value| -> ToolFuture {
                    Box::pin(async move {
                        let x = args["x"].as_i64().unwrap_or(0);
                        let y = args["y"].as_i64().unwrap_or(0);
                        Ok((x + y).to_string())
                    })
                }),
            );
            m
        })
    }

    #[tokio::test]
    async fn exec_requests_runs_registered_tool() {
        tool_loader::register_module("registry_test_adder", adder_factory());
        let mut registry = BotToolRegistry::new();
        registry.add_tool_from_source(
            "registry_test_adder",
            "fn add(x, y) { x + y }",
            "add",
            "adds two numbers",
            vec![],
            adder_factory()().remove("add").unwrap(),
        );
        registry.queue_requests(vec![ToolCallRecord {
            id: "call_1".into(),
            name: "add".into(),
            arguments: serde_json::json!({"x": 2, "y": 3}),
        }]);
        let results = registry.exec_requests().await;
        assert_eq!(results[0].content, "5");
    }

    #[tokio::test]
    async fn unknown_tool_becomes_an_error_result_not_a_panic() {
        let mut registry = BotToolRegistry::new();
        registry.queue_requests(vec![ToolCallRecord {
            id: "call_1".into(),
            name: "does_not_exist".into(),
            arguments: serde_json::json!({}),
        }]);
        let results = registry.exec_requests().await;
        assert!(results[0].content.contains("tool not found"));
    }

    #[tokio::test]
    async fn duplicate_request_id_already_in_results_is_not_reexecuted() {
        let mut registry = BotToolRegistry::new();
        registry.results.push(ToolResultRecord {
            call_id: "call_1".into(),
            content: "already-done".into(),
        });
        registry.queue_requests(vec![ToolCallRecord {
            id: "call_1".into(),
            name: "add".into(),
            arguments: serde_json::json!({}),
        }]);
        assert!(registry.requests.is_empty());
    }

    #[tokio::test]
    async fn snapshot_round_trip_rehydrates_tool_function() {
        tool_loader::register_module("registry_test_adder_roundtrip", adder_factory());
        let mut registry = BotToolRegistry::new();
        registry.add_tool_from_source(
            "registry_test_adder_roundtrip",
            "fn add(x, y) { x + y }",
            "add",
            "adds two numbers",
            vec![],
            adder_factory()().remove("add").unwrap(),
        );
        let snapshot = registry.snapshot();
        let mut reloaded = BotToolRegistry::from_snapshot(snapshot).unwrap();
        reloaded.queue_requests(vec![ToolCallRecord {
            id: "call_1".into(),
            name: "add".into(),
            arguments: serde_json::json!({"x": 4, "y": 5}),
        }]);
        let results = reloaded.exec_requests().await;
        assert_eq!(results[0].content, "9");
    }

    #[tokio::test]
    async fn missing_factory_on_load_becomes_placeholder_not_a_hard_failure() {
        let mut registry = BotToolRegistry::new();
        registry.add_tool_from_source(
            "registry_test_never_registered_for_load",
            "fn gone() {}",
            "gone",
            "will not resolve after reload",
            vec![],
            Arc::new(|_| Box::pin(async { Ok("noop".to_string()) })),
        );
        let snapshot = registry.snapshot();
        let mut reloaded = BotToolRegistry::from_snapshot(snapshot).unwrap();
        reloaded.queue_requests(vec![ToolCallRecord {
            id: "call_1".into(),
            name: "gone".into(),
            arguments: serde_json::json!({}),
        }]);
        let results = reloaded.exec_requests().await;
        assert!(results[0].content.contains("tool not found"));
    }
}
