//! Pack registry.
//!
//! Packs contribute namespaced actions; the registry is assembled once at
//! startup and is read-only afterwards, so request handling needs no
//! synchronization here. Name collisions and badly namespaced actions are
//! configuration errors that abort startup, never runtime conditions.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use crate::error::KernelError;
use crate::models::Tenant;
use crate::scope;

/// Per-request context handed to action handlers.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub request_id: Uuid,
    pub tenant: Tenant,
    pub credential_id: Uuid,
    /// Scopes declared on the calling credential.
    pub scopes: Vec<String>,
    pub source_ip: String,
}

impl ActionContext {
    /// Effective permission check for the calling credential, using the
    /// tenant state resolved for this request.
    pub fn permits(&self, required: &str) -> bool {
        scope::permits(&self.scopes, self.tenant.verified, required)
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn call(&self, ctx: ActionContext, params: Value) -> Result<Value, KernelError>;
}

type BoxedHandlerFn = Box<
    dyn Fn(ActionContext, Value) -> Pin<Box<dyn Future<Output = Result<Value, KernelError>> + Send>>
        + Send
        + Sync,
>;

struct FnHandler {
    f: BoxedHandlerFn,
}

#[async_trait]
impl ActionHandler for FnHandler {
    async fn call(&self, ctx: ActionContext, params: Value) -> Result<Value, KernelError> {
        (self.f)(ctx, params).await
    }
}

/// Wrap a typed async function as an [`ActionHandler`].
///
/// Input validation happens here, before the handler body: the payload is
/// deserialized into `I` and checked with its `validator` rules; failures
/// surface as `InvalidInput` and the handler never runs.
pub fn typed_handler<I, O, F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    I: serde::de::DeserializeOwned + Validate + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(ActionContext, I) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<O, KernelError>> + Send + 'static,
{
    let boxed: BoxedHandlerFn = Box::new(move |ctx, params| {
        let f = f.clone();
        Box::pin(async move {
            // An absent payload reads as an empty object.
            let params = if params.is_null() {
                Value::Object(serde_json::Map::new())
            } else {
                params
            };
            let input: I = serde_json::from_value(params)
                .map_err(|e| KernelError::InvalidInput(e.to_string()))?;
            input
                .validate()
                .map_err(|e| KernelError::InvalidInput(e.to_string()))?;
            let output = f(ctx, input).await?;
            serde_json::to_value(output)
                .map_err(|e| KernelError::Internal(anyhow::anyhow!("serialize output: {}", e)))
        })
    });
    Arc::new(FnHandler { f: boxed })
}

/// A registered action: immutable for the process lifetime.
#[derive(Clone)]
pub struct ActionDef {
    /// Fully qualified, namespace-prefixed name, e.g. `iam.keys.create`.
    pub name: String,
    pub required_scope: String,
    pub description: String,
    pub side_effecting: bool,
    pub input_schema: Value,
    pub output_schema: Value,
    pub handler: Arc<dyn ActionHandler>,
}

impl ActionDef {
    pub fn descriptor(&self) -> ActionDescriptor {
        ActionDescriptor {
            name: self.name.clone(),
            required_scope: self.required_scope.clone(),
            description: self.description.clone(),
            side_effecting: self.side_effecting,
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
        }
    }
}

/// Discovery projection of an action, served by `meta.actions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    pub required_scope: String,
    pub description: String,
    pub side_effecting: bool,
    pub input_schema: Value,
    pub output_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackDescriptor {
    pub namespace: String,
    pub actions: Vec<ActionDescriptor>,
}

/// A pluggable namespace of actions, composed into the registry at startup.
pub trait Pack: Send + Sync {
    fn namespace(&self) -> &str;
    fn actions(&self) -> Vec<ActionDef>;

    fn describe(&self) -> PackDescriptor {
        PackDescriptor {
            namespace: self.namespace().to_string(),
            actions: self.actions().iter().map(ActionDef::descriptor).collect(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Duplicate action name registered: {0}")]
    DuplicateAction(String),

    #[error("Action {name} is not under its pack namespace {namespace}")]
    MisplacedAction { name: String, namespace: String },
}

pub struct Registry {
    actions: HashMap<String, ActionDef>,
    descriptors: Arc<Vec<ActionDescriptor>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("descriptors", &self.descriptors)
            .finish()
    }
}

impl Registry {
    /// Assemble the registry from the ordered list of enabled packs, adding
    /// the built-in `meta.actions` discovery action. Fatal on duplicate or
    /// misplaced names.
    pub fn build(packs: Vec<Box<dyn Pack>>) -> Result<Self, RegistryError> {
        let mut actions: HashMap<String, ActionDef> = HashMap::new();
        for pack in &packs {
            let namespace = pack.namespace().to_string();
            for def in pack.actions() {
                if !def.name.starts_with(&format!("{}.", namespace)) {
                    return Err(RegistryError::MisplacedAction {
                        name: def.name,
                        namespace,
                    });
                }
                if actions.contains_key(&def.name) {
                    return Err(RegistryError::DuplicateAction(def.name));
                }
                actions.insert(def.name.clone(), def);
            }
        }

        let mut descriptors: Vec<ActionDescriptor> =
            actions.values().map(ActionDef::descriptor).collect();
        descriptors.push(crate::packs::meta::meta_actions_descriptor());
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        let descriptors = Arc::new(descriptors);

        let meta = crate::packs::meta::build_meta_action(descriptors.clone());
        if actions.contains_key(&meta.name) {
            return Err(RegistryError::DuplicateAction(meta.name));
        }
        actions.insert(meta.name.clone(), meta);

        tracing::info!(actions = actions.len(), "Action registry built");
        Ok(Self {
            actions,
            descriptors,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ActionDef> {
        self.actions.get(name)
    }

    pub fn descriptors(&self) -> &[ActionDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, Validate)]
    struct NoInput {}

    fn noop_action(name: &str) -> ActionDef {
        ActionDef {
            name: name.to_string(),
            required_scope: "test.noop:read".to_string(),
            description: "noop".to_string(),
            side_effecting: false,
            input_schema: json!({"type": "object"}),
            output_schema: json!({"type": "object"}),
            handler: typed_handler(|_ctx, _input: NoInput| async move {
                Ok(json!({}))
            }),
        }
    }

    struct TestPack {
        actions: Vec<ActionDef>,
    }

    impl Pack for TestPack {
        fn namespace(&self) -> &str {
            "test"
        }
        fn actions(&self) -> Vec<ActionDef> {
            self.actions.clone()
        }
    }

    #[test]
    fn duplicate_action_names_fail_startup() {
        let pack = TestPack {
            actions: vec![noop_action("test.noop"), noop_action("test.noop")],
        };
        let err = Registry::build(vec![Box::new(pack)]).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAction(name) if name == "test.noop"));
    }

    #[test]
    fn actions_outside_their_namespace_fail_startup() {
        let pack = TestPack {
            actions: vec![noop_action("other.noop")],
        };
        let err = Registry::build(vec![Box::new(pack)]).unwrap_err();
        assert!(matches!(err, RegistryError::MisplacedAction { .. }));
    }

    #[test]
    fn registry_always_contains_discovery() {
        let registry = Registry::build(vec![]).unwrap();
        assert!(registry.get("meta.actions").is_some());
        assert_eq!(registry.descriptors().len(), 1);
    }
}
