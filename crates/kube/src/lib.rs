//! pakt kube integration: read-only package store backed by the cluster API

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use kube::{
    api::{Api, ListParams},
    core::{DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::counter;
use pakt_core::LitePackage;
use tracing::debug;

const DEFAULT_PKG_GROUP: &str = "pkg.crossplane.io";
const PKG_VERSION: &str = "v1";

/// Class of package resources a wait operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Provider,
    ProviderRevision,
}

impl PackageKind {
    pub fn kind_str(self) -> &'static str {
        match self {
            PackageKind::Provider => "Provider",
            PackageKind::ProviderRevision => "ProviderRevision",
        }
    }

    /// Resolve to a GroupVersionKind. The API group can be pointed at a
    /// fork via PAKT_PKG_GROUP.
    pub fn gvk(self) -> GroupVersionKind {
        let group = std::env::var("PAKT_PKG_GROUP").unwrap_or_else(|_| DEFAULT_PKG_GROUP.to_string());
        GroupVersionKind {
            group,
            version: PKG_VERSION.to_string(),
            kind: self.kind_str().to_string(),
        }
    }
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind_str())
    }
}

/// Read-only source of package items. One method on purpose: the wait
/// layer only ever lists.
#[async_trait::async_trait]
pub trait PackageStore: Send + Sync {
    async fn list(&self, kind: PackageKind) -> Result<Vec<LitePackage>>;
}

/// Store backed by a live cluster through kube-rs.
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Ok(Self { client })
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn find_api_resource(client: Client, gvk: &GroupVersionKind) -> Result<kube::core::ApiResource> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                // Package kinds are cluster-scoped; tolerate namespaced
                // forks by listing across all namespaces either way.
                if matches!(caps.scope, Scope::Namespaced) {
                    debug!(kind = %gvk.kind, "package kind is namespaced; listing cluster-wide");
                }
                return Ok(ar.clone());
            }
        }
    }
    Err(anyhow!("GVK not found: {}/{}/{}", gvk.group, gvk.version, gvk.kind))
}

#[async_trait::async_trait]
impl PackageStore for KubeStore {
    async fn list(&self, kind: PackageKind) -> Result<Vec<LitePackage>> {
        let gvk = kind.gvk();
        let ar = find_api_resource(self.client.clone(), &gvk).await?;
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        let objs = api
            .list(&ListParams::default())
            .await
            .with_context(|| format!("listing {}", kind))?;
        counter!("pakt_store_lists", 1u64);
        let mut out = Vec::with_capacity(objs.items.len());
        for obj in objs.items {
            let raw = serde_json::to_value(&obj).context("serializing listed object")?;
            out.push(LitePackage::from_raw(&raw));
        }
        debug!(kind = %kind, count = out.len(), "listed packages");
        Ok(out)
    }
}

enum Script {
    Items(Vec<LitePackage>),
    Fail(String),
}

/// In-memory store yielding a programmed sequence of list responses.
/// The final entry repeats once the script runs out, so a "steady state"
/// is a one-entry script. Used by the wait tests and offline dry runs.
pub struct ScriptedStore {
    steps: Mutex<VecDeque<Script>>,
    calls: AtomicU32,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self { steps: Mutex::new(VecDeque::new()), calls: AtomicU32::new(0) }
    }

    /// Store whose every list returns the same items.
    pub fn steady(items: Vec<LitePackage>) -> Self {
        let s = Self::new();
        s.push_items(items);
        s
    }

    pub fn push_items(&self, items: Vec<LitePackage>) {
        self.steps.lock().unwrap().push_back(Script::Items(items));
    }

    pub fn push_error(&self, msg: &str) {
        self.steps.lock().unwrap().push_back(Script::Fail(msg.to_string()));
    }

    /// Number of list calls served so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PackageStore for ScriptedStore {
    async fn list(&self, _kind: PackageKind) -> Result<Vec<LitePackage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            match steps.pop_front() {
                Some(Script::Items(items)) => Ok(items),
                Some(Script::Fail(msg)) => Err(anyhow!(msg)),
                None => Ok(Vec::new()),
            }
        } else {
            // Hold the last step so the script's end state persists.
            match steps.front() {
                Some(Script::Items(items)) => Ok(items.clone()),
                Some(Script::Fail(msg)) => Err(anyhow!("{}", msg)),
                None => Ok(Vec::new()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gvk_defaults_to_package_group() {
        let gvk = PackageKind::Provider.gvk();
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Provider");
        let gvk = PackageKind::ProviderRevision.gvk();
        assert_eq!(gvk.kind, "ProviderRevision");
    }

    fn named(name: &str) -> LitePackage {
        LitePackage::from_raw(&serde_json::json!({ "metadata": { "name": name } }))
    }

    #[tokio::test]
    async fn scripted_store_steps_then_holds_last() {
        let store = ScriptedStore::new();
        store.push_items(vec![named("a")]);
        store.push_items(vec![named("a"), named("b")]);

        let first = store.list(PackageKind::Provider).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.list(PackageKind::Provider).await.unwrap();
        assert_eq!(second.len(), 2);
        // Script exhausted: last response repeats.
        let third = store.list(PackageKind::Provider).await.unwrap();
        assert_eq!(third.len(), 2);
        assert_eq!(store.calls(), 3);
    }

    #[tokio::test]
    async fn scripted_store_surfaces_errors() {
        let store = ScriptedStore::new();
        store.push_error("connection refused");
        let err = store.list(PackageKind::Provider).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn empty_script_lists_nothing() {
        let store = ScriptedStore::new();
        assert!(store.list(PackageKind::Provider).await.unwrap().is_empty());
    }
}
