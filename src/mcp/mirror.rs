//! Capability Mirror
//!
//! Enumerates the remote server's tools, resources and prompts through the
//! gateway and registers one local binding per descriptor. Each category is
//! fetched independently, and each descriptor is bound and registered
//! independently, so a single bad entry never hides the rest.

use futures::future::BoxFuture;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use super::error::GatewayResult;
use super::gateway::ProxyGateway;
use super::meta_tools;
use super::registry::CapabilityRegistrar;
use super::schema::{prompt_parameters, tool_parameters, ArgumentValidator, ParameterSchema};
use super::types::{CapabilityKind, Prompt, RemoteCapability, Resource, Tool};

/// Boxed invocation closure stored in a binding
pub type Invoker = Arc<dyn Fn(Value) -> BoxFuture<'static, GatewayResult<Value>> + Send + Sync>;

/// Where a binding came from
#[derive(Debug, Clone, PartialEq)]
pub enum BindingSource {
    /// Mirrored remote descriptor
    Remote(RemoteCapability),
    /// Generic proxy tool provided by the gateway itself
    Meta,
}

/// A locally invocable proxy for one capability
pub struct LocalCapabilityBinding {
    source: BindingSource,
    invocation_key: String,
    title: String,
    description: String,
    parameters: ParameterSchema,
    validator: ArgumentValidator,
    invoker: Invoker,
}

impl LocalCapabilityBinding {
    pub fn new<F, Fut>(
        source: BindingSource,
        invocation_key: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
        invoker: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GatewayResult<Value>> + Send + 'static,
    {
        let invocation_key = invocation_key.into();
        let (parameters, validator) = match ArgumentValidator::compile(&parameters) {
            Ok(validator) => (parameters, validator),
            Err(e) => {
                warn!("Schema for {} is unusable, accepting any arguments: {}", invocation_key, e);
                (ParameterSchema::Unconstrained, ArgumentValidator::permissive())
            }
        };
        let invoker: Invoker =
            Arc::new(move |args: Value| -> BoxFuture<'static, GatewayResult<Value>> {
                Box::pin(invoker(args))
            });

        Self {
            source,
            invocation_key,
            title: title.into(),
            description: description.into(),
            parameters,
            validator,
            invoker,
        }
    }

    pub fn source(&self) -> &BindingSource {
        &self.source
    }

    pub fn invocation_key(&self) -> &str {
        &self.invocation_key
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &ParameterSchema {
        &self.parameters
    }

    pub fn kind(&self) -> Option<CapabilityKind> {
        match &self.source {
            BindingSource::Remote(capability) => Some(capability.kind()),
            BindingSource::Meta => None,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match &self.source {
            BindingSource::Remote(RemoteCapability::Resource(resource)) => {
                resource.mime_type.as_deref()
            }
            _ => None,
        }
    }

    /// Validate `arguments` against the inferred schema, then forward.
    /// Invalid arguments never reach the remote.
    pub async fn invoke(&self, arguments: Value) -> GatewayResult<Value> {
        let arguments = match (&self.parameters, arguments) {
            (ParameterSchema::Object(_), Value::Null) => json!({}),
            (_, arguments) => arguments,
        };
        self.validator.check(&arguments)?;
        (self.invoker)(arguments).await
    }

    /// JSON description for hosts and debug output
    pub fn summary(&self) -> Value {
        json!({
            "key": self.invocation_key,
            "kind": self.kind().map(|k| k.to_string()).unwrap_or_else(|| "meta".to_string()),
            "title": self.title,
            "description": self.description,
            "mimeType": self.mime_type(),
            "inputSchema": self.parameters.to_json_schema(),
        })
    }
}

impl std::fmt::Debug for LocalCapabilityBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCapabilityBinding")
            .field("invocation_key", &self.invocation_key)
            .field("source", &self.source)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Replace every character outside `[A-Za-z0-9]` with `_`
pub fn normalize_key(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Hands out unique invocation keys within one mirror pass
#[derive(Default)]
struct KeyAllocator {
    taken: HashSet<String>,
}

impl KeyAllocator {
    fn allocate(&mut self, base: String) -> String {
        if self.taken.insert(base.clone()) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.taken.insert(candidate.clone()) {
                warn!("Invocation key {} is already taken, using {}", base, candidate);
                return candidate;
            }
            n += 1;
        }
    }
}

/// Outcome for one capability category
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryReport {
    pub discovered: usize,
    pub registered: usize,
    /// Keys the registrar refused
    pub skipped: Vec<String>,
    /// Set when the category could not be listed at all
    pub error: Option<String>,
}

/// Outcome of one mirror pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct MirrorReport {
    pub meta: CategoryReport,
    pub tools: CategoryReport,
    pub resources: CategoryReport,
    pub prompts: CategoryReport,
}

impl MirrorReport {
    pub fn registered(&self) -> usize {
        self.meta.registered
            + self.tools.registered
            + self.resources.registered
            + self.prompts.registered
    }

    /// Whether any remote category failed to list
    pub fn is_partial(&self) -> bool {
        self.tools.error.is_some() || self.resources.error.is_some() || self.prompts.error.is_some()
    }
}

#[derive(Debug, Default)]
struct MirrorSnapshot {
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    prompts: Vec<Prompt>,
}

/// Republishes remote capabilities as local bindings
pub struct CapabilityMirror {
    gateway: Arc<ProxyGateway>,
    registrar: Arc<dyn CapabilityRegistrar>,
    snapshot: RwLock<MirrorSnapshot>,
    bindings: RwLock<Vec<Arc<LocalCapabilityBinding>>>,
}

impl CapabilityMirror {
    pub fn new(gateway: Arc<ProxyGateway>, registrar: Arc<dyn CapabilityRegistrar>) -> Self {
        Self {
            gateway,
            registrar,
            snapshot: RwLock::new(MirrorSnapshot::default()),
            bindings: RwLock::new(Vec::new()),
        }
    }

    pub fn gateway(&self) -> &Arc<ProxyGateway> {
        &self.gateway
    }

    /// Run one mirror pass. Never fails as a whole; per-category and
    /// per-descriptor problems are logged and reported.
    ///
    /// The snapshot is replaced, but bindings registered by earlier passes
    /// are not withdrawn from the registrar.
    pub async fn mirror(&self) -> MirrorReport {
        let mut report = MirrorReport::default();
        let mut keys = KeyAllocator::default();
        let mut bindings = Vec::new();

        for binding in meta_tools::meta_tool_bindings(&self.gateway) {
            keys.allocate(binding.invocation_key().to_string());
            self.register(binding, &mut bindings, &mut report.meta);
        }

        let tools =
            fetched(CapabilityKind::Tool, self.gateway.list_tools().await, &mut report.tools);
        for tool in &tools {
            let binding = self.bind(RemoteCapability::Tool(tool.clone()), &mut keys);
            self.register(binding, &mut bindings, &mut report.tools);
        }

        let resources = fetched(
            CapabilityKind::Resource,
            self.gateway.list_resources().await,
            &mut report.resources,
        );
        for resource in &resources {
            let binding = self.bind(RemoteCapability::Resource(resource.clone()), &mut keys);
            self.register(binding, &mut bindings, &mut report.resources);
        }

        let prompts =
            fetched(CapabilityKind::Prompt, self.gateway.list_prompts().await, &mut report.prompts);
        for prompt in &prompts {
            let binding = self.bind(RemoteCapability::Prompt(prompt.clone()), &mut keys);
            self.register(binding, &mut bindings, &mut report.prompts);
        }

        *self.snapshot.write() = MirrorSnapshot {
            tools,
            resources,
            prompts,
        };
        *self.bindings.write() = bindings;

        info!(
            "Mirrored {} tools, {} resources, {} prompts from remote",
            report.tools.registered, report.resources.registered, report.prompts.registered
        );
        report
    }

    /// Names of the tools in the last snapshot
    pub fn loaded_tools(&self) -> Vec<String> {
        self.snapshot.read().tools.iter().map(|t| t.name.clone()).collect()
    }

    /// URIs of the resources in the last snapshot
    pub fn loaded_resources(&self) -> Vec<String> {
        self.snapshot.read().resources.iter().map(|r| r.uri.clone()).collect()
    }

    /// Names of the prompts in the last snapshot
    pub fn loaded_prompts(&self) -> Vec<String> {
        self.snapshot.read().prompts.iter().map(|p| p.name.clone()).collect()
    }

    /// Bindings registered by the last pass, in registration order
    pub fn bindings(&self) -> Vec<Arc<LocalCapabilityBinding>> {
        self.bindings.read().clone()
    }

    pub fn binding(&self, key: &str) -> Option<Arc<LocalCapabilityBinding>> {
        self.bindings
            .read()
            .iter()
            .find(|b| b.invocation_key() == key)
            .cloned()
    }

    fn bind(
        &self,
        capability: RemoteCapability,
        keys: &mut KeyAllocator,
    ) -> LocalCapabilityBinding {
        let gateway = self.gateway.clone();
        match &capability {
            RemoteCapability::Tool(tool) => {
                let key = keys.allocate(format!("tool_{}", normalize_key(&tool.name)));
                let parameters = tool_parameters(&tool.name, &tool.input_schema);
                let description =
                    described(&tool.description, || format!("External tool: {}", tool.name));
                let name = tool.name.clone();
                LocalCapabilityBinding::new(
                    BindingSource::Remote(capability.clone()),
                    key,
                    tool.name.clone(),
                    description,
                    parameters,
                    move |args| {
                        let gateway = gateway.clone();
                        let name = name.clone();
                        async move { gateway.call_tool(&name, args).await }
                    },
                )
            }
            RemoteCapability::Resource(resource) => {
                let key = keys.allocate(format!("resource_{}", normalize_key(&resource.uri)));
                let title = resource.name.clone().unwrap_or_else(|| resource.uri.clone());
                let description = described(&resource.description, || {
                    format!("External resource: {}", resource.uri)
                });
                let uri = resource.uri.clone();
                LocalCapabilityBinding::new(
                    BindingSource::Remote(capability.clone()),
                    key,
                    title,
                    description,
                    ParameterSchema::empty(),
                    move |_args| {
                        let gateway = gateway.clone();
                        let uri = uri.clone();
                        async move { gateway.read_resource(&uri).await }
                    },
                )
            }
            RemoteCapability::Prompt(prompt) => {
                let key = keys.allocate(format!("prompt_{}", normalize_key(&prompt.name)));
                let parameters = prompt_parameters(&prompt.name, &prompt.arguments);
                let description =
                    described(&prompt.description, || format!("External prompt: {}", prompt.name));
                let name = prompt.name.clone();
                LocalCapabilityBinding::new(
                    BindingSource::Remote(capability.clone()),
                    key,
                    prompt.name.clone(),
                    description,
                    parameters,
                    move |args| {
                        let gateway = gateway.clone();
                        let name = name.clone();
                        async move { gateway.get_prompt(&name, args).await }
                    },
                )
            }
        }
    }

    fn register(
        &self,
        binding: LocalCapabilityBinding,
        bindings: &mut Vec<Arc<LocalCapabilityBinding>>,
        report: &mut CategoryReport,
    ) {
        let binding = Arc::new(binding);
        match self.registrar.register(binding.clone()) {
            Ok(()) => {
                debug!("Registered {}", binding.invocation_key());
                report.registered += 1;
                bindings.push(binding);
            }
            Err(e) => {
                warn!("Failed to register {}, skipping: {}", binding.invocation_key(), e);
                report.skipped.push(binding.invocation_key().to_string());
            }
        }
    }
}

impl std::fmt::Debug for CapabilityMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityMirror")
            .field("bindings", &self.bindings.read().len())
            .finish()
    }
}

fn fetched<T>(
    kind: CapabilityKind,
    result: GatewayResult<Vec<T>>,
    report: &mut CategoryReport,
) -> Vec<T> {
    match result {
        Ok(items) => {
            report.discovered = items.len();
            items
        }
        Err(e) => {
            warn!("Failed to load {}s from remote, skipping category: {}", kind, e);
            report.error = Some(e.to_string());
            Vec::new()
        }
    }
}

fn described(description: &Option<String>, fallback: impl FnOnce() -> String) -> String {
    description
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(fallback)
}
