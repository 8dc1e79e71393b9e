//! Process-wide capability registry.
//!
//! Owners attach when they load and detach when they unload. Each capability
//! name belongs to exactly one owner. Registrations are never persisted;
//! owners re-register at startup.

use convoke_core::capability::{CapabilityOwner, CapabilitySchema, InvocationContext};
use convoke_core::error::{CapabilityError, RegistryError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::schema::validate_schema;

#[derive(Default)]
struct Inner {
    owners: HashMap<String, Arc<dyn CapabilityOwner>>,
    /// owner -> capability name -> schema
    registry: BTreeMap<String, BTreeMap<String, CapabilitySchema>>,
}

impl Inner {
    fn owner_of(&self, capability: &str) -> Option<&str> {
        self.registry
            .iter()
            .find(|(_, caps)| caps.contains_key(capability))
            .map(|(owner, _)| owner.as_str())
    }
}

#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<Inner>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an owner available for registrations and invocations.
    pub async fn attach_owner(&self, owner: Arc<dyn CapabilityOwner>) {
        let name = owner.name().to_string();
        info!(owner = %name, "Capability owner attached");
        self.inner.write().await.owners.insert(name, owner);
    }

    /// Forget an owner and everything it registered. Returns how many
    /// registrations were dropped.
    pub async fn detach_owner(&self, owner: &str) -> usize {
        let mut inner = self.inner.write().await;
        inner.owners.remove(owner);
        let dropped = inner.registry.remove(owner).map(|c| c.len()).unwrap_or(0);
        info!(owner, dropped, "Capability owner detached");
        dropped
    }

    /// Register one capability for `owner`.
    pub async fn register(&self, owner: &str, schema: &Value) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;

        let handle = inner
            .owners
            .get(owner)
            .filter(|o| o.is_loaded())
            .cloned()
            .ok_or_else(|| RegistryError::OwnerUnknown(owner.to_string()))?;

        let schema = validate_schema(schema)?;

        if let Some(existing) = inner.owner_of(&schema.name)
            && existing != owner
        {
            return Err(RegistryError::NameConflict {
                name: schema.name,
                existing_owner: existing.to_string(),
            });
        }

        if !handle.implements(&schema.name) {
            return Err(RegistryError::CapabilityMissing {
                owner: owner.to_string(),
                name: schema.name,
            });
        }

        info!(owner, capability = %schema.name, "Capability registered");
        inner
            .registry
            .entry(owner.to_string())
            .or_default()
            .insert(schema.name.clone(), schema);
        Ok(())
    }

    /// Register several capabilities; each result is reported independently.
    pub async fn register_many(
        &self,
        owner: &str,
        schemas: &[Value],
    ) -> Vec<Result<(), RegistryError>> {
        let mut results = Vec::with_capacity(schemas.len());
        for schema in schemas {
            results.push(self.register(owner, schema).await);
        }
        results
    }

    pub async fn unregister(&self, owner: &str, capability: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(caps) = inner.registry.get_mut(owner) else {
            debug!(owner, "Owner not in registry");
            return false;
        };
        let removed = caps.remove(capability).is_some();
        if caps.is_empty() {
            inner.registry.remove(owner);
        }
        if removed {
            info!(owner, capability, "Capability unregistered");
        }
        removed
    }

    /// Drop every registration of `owner`, keeping it attached.
    pub async fn unregister_owner(&self, owner: &str) -> usize {
        let dropped = self
            .inner
            .write()
            .await
            .registry
            .remove(owner)
            .map(|c| c.len())
            .unwrap_or(0);
        if dropped > 0 {
            info!(owner, dropped, "Owner removed from registry");
        }
        dropped
    }

    /// Drop registrations whose owner is gone or unloaded, or that the owner
    /// no longer implements. Returns how many were dropped.
    pub async fn reconcile(&self) -> usize {
        let mut inner = self.inner.write().await;
        let Inner { owners, registry } = &mut *inner;
        let mut dropped = 0;

        registry.retain(|owner_name, caps| {
            match owners.get(owner_name).filter(|o| o.is_loaded()) {
                None => {
                    warn!(owner = %owner_name, count = caps.len(), "Dropping registrations of missing owner");
                    dropped += caps.len();
                    false
                }
                Some(owner) => {
                    caps.retain(|name, _| {
                        let keep = owner.implements(name);
                        if !keep {
                            warn!(owner = %owner_name, capability = %name, "Dropping unimplemented capability");
                            dropped += 1;
                        }
                        keep
                    });
                    !caps.is_empty()
                }
            }
        });

        dropped
    }

    pub async fn lookup(&self, capability: &str) -> Option<(String, CapabilitySchema)> {
        let inner = self.inner.read().await;
        inner.registry.iter().find_map(|(owner, caps)| {
            caps.get(capability)
                .map(|schema| (owner.clone(), schema.clone()))
        })
    }

    /// Every registered schema, minus the excluded names, ordered by owner then name.
    pub async fn schemas(&self, exclude: &HashSet<String>) -> Vec<CapabilitySchema> {
        let inner = self.inner.read().await;
        inner
            .registry
            .values()
            .flat_map(|caps| caps.values())
            .filter(|s| !exclude.contains(&s.name))
            .cloned()
            .collect()
    }

    /// Registered capability names per owner.
    pub async fn owners(&self) -> BTreeMap<String, Vec<String>> {
        let inner = self.inner.read().await;
        inner
            .registry
            .iter()
            .map(|(owner, caps)| (owner.clone(), caps.keys().cloned().collect()))
            .collect()
    }

    pub async fn invoke(
        &self,
        capability: &str,
        ctx: &InvocationContext,
        arguments: Value,
    ) -> Result<String, CapabilityError> {
        let owner = {
            let inner = self.inner.read().await;
            let owner_name = inner
                .owner_of(capability)
                .ok_or_else(|| CapabilityError::NotFound(capability.to_string()))?;
            inner
                .owners
                .get(owner_name)
                .cloned()
                .ok_or_else(|| CapabilityError::OwnerUnavailable(owner_name.to_string()))?
        };

        if !owner.is_loaded() {
            return Err(CapabilityError::OwnerUnavailable(owner.name().to_string()));
        }

        owner.invoke(capability, ctx, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestOwner {
        name: String,
        capabilities: Mutex<HashSet<String>>,
        loaded: AtomicBool,
    }

    impl TestOwner {
        fn new(name: &str, capabilities: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                capabilities: Mutex::new(capabilities.iter().map(|c| c.to_string()).collect()),
                loaded: AtomicBool::new(true),
            })
        }
    }

    #[async_trait]
    impl CapabilityOwner for TestOwner {
        fn name(&self) -> &str {
            &self.name
        }

        fn implements(&self, capability: &str) -> bool {
            self.capabilities.lock().unwrap().contains(capability)
        }

        fn is_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }

        async fn invoke(
            &self,
            capability: &str,
            _ctx: &InvocationContext,
            arguments: Value,
        ) -> Result<String, CapabilityError> {
            Ok(format!("{}:{}:{}", self.name, capability, arguments))
        }
    }

    fn schema(name: &str) -> Value {
        json!({
            "name": name,
            "description": format!("{name} capability"),
            "parameters": {"type": "object", "properties": {}}
        })
    }

    fn ctx() -> InvocationContext {
        InvocationContext {
            scope: 1,
            actor: 2,
            channel: 3,
            actor_roles: vec![],
        }
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let registry = CapabilityRegistry::new();
        registry.attach_owner(TestOwner::new("Weather", &["get_weather"])).await;

        registry.register("Weather", &schema("get_weather")).await.unwrap();
        let (owner, found) = registry.lookup("get_weather").await.unwrap();
        assert_eq!(owner, "Weather");
        assert_eq!(found.name, "get_weather");
        assert_eq!(found.description, "get_weather capability");
    }

    #[tokio::test]
    async fn name_conflict_keeps_first_owner() {
        let registry = CapabilityRegistry::new();
        registry.attach_owner(TestOwner::new("A", &["shared"])).await;
        registry.attach_owner(TestOwner::new("B", &["shared"])).await;

        registry.register("A", &schema("shared")).await.unwrap();
        let err = registry.register("B", &schema("shared")).await.unwrap_err();
        assert_eq!(
            err,
            RegistryError::NameConflict {
                name: "shared".into(),
                existing_owner: "A".into()
            }
        );
        assert_eq!(registry.lookup("shared").await.unwrap().0, "A");

        // Same owner re-registering overwrites
        registry.register("A", &schema("shared")).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_unknown_owner_and_missing_capability() {
        let registry = CapabilityRegistry::new();
        assert_eq!(
            registry.register("Ghost", &schema("boo")).await,
            Err(RegistryError::OwnerUnknown("Ghost".into()))
        );

        registry.attach_owner(TestOwner::new("Weather", &["get_weather"])).await;
        assert_eq!(
            registry.register("Weather", &schema("get_forecast")).await,
            Err(RegistryError::CapabilityMissing {
                owner: "Weather".into(),
                name: "get_forecast".into()
            })
        );
        assert_eq!(
            registry.register("Weather", &json!({})).await,
            Err(RegistryError::EmptySchema)
        );
    }

    #[tokio::test]
    async fn unloaded_owner_is_unknown() {
        let registry = CapabilityRegistry::new();
        let owner = TestOwner::new("Sleepy", &["nap"]);
        owner.loaded.store(false, Ordering::SeqCst);
        registry.attach_owner(owner).await;
        assert!(matches!(
            registry.register("Sleepy", &schema("nap")).await,
            Err(RegistryError::OwnerUnknown(_))
        ));
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = CapabilityRegistry::new();
        registry.attach_owner(TestOwner::new("A", &["one", "two"])).await;
        registry.register("A", &schema("one")).await.unwrap();
        registry.register("A", &schema("two")).await.unwrap();

        assert!(registry.unregister("A", "one").await);
        assert!(!registry.unregister("A", "one").await);
        assert!(!registry.unregister("Nobody", "one").await);
        assert_eq!(registry.unregister_owner("A").await, 1);
        assert_eq!(registry.unregister_owner("A").await, 0);
        assert!(registry.schemas(&HashSet::new()).await.is_empty());
    }

    #[tokio::test]
    async fn reconcile_drops_unloaded_and_unimplemented() {
        let registry = CapabilityRegistry::new();
        let a = TestOwner::new("A", &["a1", "a2"]);
        let b = TestOwner::new("B", &["b1"]);
        registry.attach_owner(a.clone()).await;
        registry.attach_owner(b.clone()).await;
        registry.register("A", &schema("a1")).await.unwrap();
        registry.register("A", &schema("a2")).await.unwrap();
        registry.register("B", &schema("b1")).await.unwrap();

        assert_eq!(registry.reconcile().await, 0);

        b.loaded.store(false, Ordering::SeqCst);
        a.capabilities.lock().unwrap().remove("a2");
        assert_eq!(registry.reconcile().await, 2);

        let owners = registry.owners().await;
        assert_eq!(owners.len(), 1);
        assert_eq!(owners["A"], vec!["a1".to_string()]);
    }

    #[tokio::test]
    async fn detach_drops_registrations() {
        let registry = CapabilityRegistry::new();
        registry.attach_owner(TestOwner::new("A", &["a1"])).await;
        registry.register("A", &schema("a1")).await.unwrap();
        assert_eq!(registry.detach_owner("A").await, 1);
        assert!(registry.lookup("a1").await.is_none());
    }

    #[tokio::test]
    async fn schemas_respect_exclusions() {
        let registry = CapabilityRegistry::new();
        registry.attach_owner(TestOwner::new("A", &["keep", "skip"])).await;
        registry.register("A", &schema("keep")).await.unwrap();
        registry.register("A", &schema("skip")).await.unwrap();

        let exclude: HashSet<String> = ["skip".to_string()].into();
        let schemas = registry.schemas(&exclude).await;
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0].name, "keep");
    }

    #[tokio::test]
    async fn invoke_routes_to_owner() {
        let registry = CapabilityRegistry::new();
        registry.attach_owner(TestOwner::new("A", &["echo"])).await;
        registry.register("A", &schema("echo")).await.unwrap();

        let out = registry.invoke("echo", &ctx(), json!({"x": 1})).await.unwrap();
        assert_eq!(out, r#"A:echo:{"x":1}"#);

        let err = registry.invoke("nope", &ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, CapabilityError::NotFound(_)));
    }

    #[tokio::test]
    async fn register_many_reports_each() {
        let registry = CapabilityRegistry::new();
        registry.attach_owner(TestOwner::new("A", &["one"])).await;
        let results = registry
            .register_many("A", &[schema("one"), schema("two")])
            .await;
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
