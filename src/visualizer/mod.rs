//! Visualizer implementations and the registry that instantiates them.
//!
//! Every implementation is a `Visualizer`: it builds the query a content
//! endpoint needs and turns it into a `RenderDescriptor`. The trait's
//! default methods describe a plain iframe visualizer; variants override
//! only what differs. Which variant serves a config is decided by the
//! config's `visualizer` key, looked up in a `VisualizerRegistry`.

mod embed;
mod processing;
mod text;

pub use embed::{BundleVisualizer, IframeVisualizer, ImageVisualizer, PdfVisualizer};
pub use processing::{ProcessingTrigger, ProcessingVisualizer};
pub use text::{TextFormat, TextVisualizer};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::db::DbHandle;
use crate::errors::{VisualizeError, VisualizeResult};
use crate::model::{ProcessingState, VisualizerConfig};
use crate::processing::ProcessingQueue;
use crate::storage::ObjectStore;

/// Parameters passed to a content-rendering endpoint.
pub type QueryParams = BTreeMap<String, String>;

pub const PARAM_ENV: &str = "env";
pub const PARAM_RESOURCE_URL: &str = "resourceUrl";
pub const PARAM_REF_ID: &str = "refId";
pub const PARAM_DIFF_URL: &str = "diffResourceUrl";
pub const PARAM_MODE: &str = "mode";
pub const PARAM_PROCESSING_STATUS: &str = "processingStatus";
pub const PARAM_PROCESSING_RESOURCE_ID: &str = "processingResourceId";

/// How the caller should embed a rendered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedKind {
    /// Load `src` in an iframe.
    Iframe,
    /// Load `src` as an image.
    Image,
    /// Display `content` directly.
    Inline,
}

/// Text carried inline by a descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineContent {
    pub format: TextFormat,
    pub language: Option<String>,
    pub text: String,
    pub truncated: bool,
}

/// Everything a caller needs to display one resource with one visualizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderDescriptor {
    pub shortname: String,
    pub name: String,
    pub icon: Option<String>,
    pub embed: EmbedKind,
    /// URL with the encoded query attached.
    pub src: String,
    pub query: QueryParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<InlineContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_status: Option<ProcessingState>,
    pub diff: bool,
}

/// Services shared by every visualizer instance in a process.
#[derive(Clone)]
pub struct VisualizerContext {
    /// Environment tag included in every query.
    pub env: String,
    /// Base path of the content-rendering endpoints.
    pub content_base: String,
    pub db: DbHandle,
    pub storage: Arc<dyn ObjectStore>,
    /// `None` when no processing worker runs in this process.
    pub queue: Option<ProcessingQueue>,
}

/// Append `query` to `base` as an encoded query string.
pub fn url_with_query(base: &str, query: &QueryParams) -> String {
    if query.is_empty() {
        return base.to_string();
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(query.iter())
        .finish();
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}", base, sep, encoded)
}

/// Shared contract of all visualizer implementations.
pub trait Visualizer: Send + Sync {
    fn config(&self) -> &VisualizerConfig;
    fn context(&self) -> &VisualizerContext;

    fn embed_kind(&self) -> EmbedKind {
        EmbedKind::Iframe
    }

    /// Endpoint that renders content for this visualizer.
    fn content_url(&self) -> String {
        if let Some(url) = self.config().option("content_url") {
            return url.to_string();
        }
        format!(
            "{}/{}/content",
            self.context().content_base.trim_end_matches('/'),
            self.config().shortname
        )
    }

    fn get_query_for_url(&self, url: &str, extra: &QueryParams) -> Result<QueryParams> {
        let mut query = extra.clone();
        query.insert(PARAM_ENV.into(), self.context().env.clone());
        query.insert(PARAM_RESOURCE_URL.into(), url.to_string());
        Ok(query)
    }

    fn get_query_for_artifact(&self, artifact: &dyn Artifact, extra: &QueryParams) -> Result<QueryParams> {
        let mut query = self.get_query_for_url(&artifact.raw_url(), extra)?;
        query.insert(PARAM_REF_ID.into(), artifact.ref_id());
        Ok(query)
    }

    /// Turn a built query into a descriptor pointing at the content endpoint.
    fn describe(&self, query: QueryParams, diff: bool) -> RenderDescriptor {
        let config = self.config();
        let processing_status = query
            .get(PARAM_PROCESSING_STATUS)
            .and_then(|s| s.parse::<ProcessingState>().ok());
        RenderDescriptor {
            shortname: config.shortname.clone(),
            name: config.name.clone(),
            icon: config.icon.clone(),
            embed: self.embed_kind(),
            src: url_with_query(&self.content_url(), &query),
            query,
            content: None,
            processing_status,
            diff,
        }
    }

    fn render_url(&self, url: &str, extra: &QueryParams) -> Result<RenderDescriptor> {
        let query = self.get_query_for_url(url, extra)?;
        Ok(self.describe(query, false))
    }

    fn render_artifact(&self, artifact: &dyn Artifact, extra: &QueryParams) -> Result<RenderDescriptor> {
        let query = self.get_query_for_artifact(artifact, extra)?;
        Ok(self.describe(query, false))
    }

    fn render_diff_url(&self, url: &str, other: &str, extra: &QueryParams) -> Result<RenderDescriptor> {
        let mut query = self.get_query_for_url(url, extra)?;
        query.insert(PARAM_DIFF_URL.into(), other.to_string());
        query.insert(PARAM_MODE.into(), "diff".into());
        Ok(self.describe_diff(query))
    }

    fn render_diff_artifact(
        &self,
        artifact: &dyn Artifact,
        other: &dyn Artifact,
        extra: &QueryParams,
    ) -> Result<RenderDescriptor> {
        let mut query = self.get_query_for_artifact(artifact, extra)?;
        query.insert(PARAM_DIFF_URL.into(), other.raw_url());
        query.insert(PARAM_MODE.into(), "diff".into());
        Ok(self.describe_diff(query))
    }

    /// Diffs always go through the content endpoint in an iframe.
    fn describe_diff(&self, query: QueryParams) -> RenderDescriptor {
        let mut descriptor = self.describe(query, true);
        descriptor.embed = EmbedKind::Iframe;
        descriptor.src = url_with_query(&self.content_url(), &descriptor.query);
        descriptor
    }

    /// Called when an artifact is uploaded. Returns `true` if work was queued.
    fn on_upload(&self, _artifact: &dyn Artifact) -> Result<bool> {
        Ok(false)
    }
}

/// Builds a visualizer from its config.
pub type VisualizerFactory = fn(VisualizerConfig, Arc<VisualizerContext>) -> Box<dyn Visualizer>;

/// Maps implementation keys to factories, populated at startup.
#[derive(Clone)]
pub struct VisualizerRegistry {
    factories: HashMap<String, VisualizerFactory>,
}

impl Default for VisualizerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl VisualizerRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("iframe", |c, ctx| Box::new(IframeVisualizer::new(c, ctx)));
        registry.register("image", |c, ctx| Box::new(ImageVisualizer::new(c, ctx)));
        registry.register("pdf", |c, ctx| Box::new(PdfVisualizer::new(c, ctx)));
        registry.register("bundle", |c, ctx| Box::new(BundleVisualizer::new(c, ctx)));
        registry.register("markdown", |c, ctx| {
            Box::new(TextVisualizer::new(c, ctx, TextFormat::Markdown))
        });
        registry.register("syntax", |c, ctx| {
            Box::new(TextVisualizer::new(c, ctx, TextFormat::Code))
        });
        registry.register("on_demand", |c, ctx| {
            Box::new(ProcessingVisualizer::new(c, ctx, ProcessingTrigger::OnDemand))
        });
        registry.register("on_upload", |c, ctx| {
            Box::new(ProcessingVisualizer::new(c, ctx, ProcessingTrigger::OnUpload))
        });
        registry
    }

    pub fn register(&mut self, key: &str, factory: VisualizerFactory) {
        self.factories.insert(key.to_string(), factory);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn instantiate(
        &self,
        config: VisualizerConfig,
        context: Arc<VisualizerContext>,
    ) -> VisualizeResult<Box<dyn Visualizer>> {
        let factory = self.factories.get(&config.visualizer).ok_or_else(|| {
            VisualizeError::UnknownImplementation {
                key: config.visualizer.clone(),
            }
        })?;
        Ok(factory(config, context))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_url_with_query_encodes_values() {
        let mut q = QueryParams::new();
        q.insert("env".into(), "prod".into());
        q.insert("resourceUrl".into(), "/a b?x=1".into());
        assert_eq!(
            url_with_query("/visualize/pdf/content", &q),
            "/visualize/pdf/content?env=prod&resourceUrl=%2Fa+b%3Fx%3D1"
        );
        assert_eq!(url_with_query("/x?y=1", &q).matches('?').count(), 1);
        assert_eq!(url_with_query("/x", &QueryParams::new()), "/x");
    }

    #[test]
    fn test_registry_builtins_and_unknown_key() {
        let registry = VisualizerRegistry::with_builtins();
        for key in ["iframe", "image", "pdf", "bundle", "markdown", "syntax", "on_demand", "on_upload"] {
            assert!(registry.contains(key), "missing builtin {}", key);
        }
        let ctx = context(DbHandle::in_memory().unwrap(), None);
        let cfg = VisualizerConfig::new("X", "x").with_visualizer("nope");
        match registry.instantiate(cfg, ctx) {
            Err(VisualizeError::UnknownImplementation { key }) => assert_eq!(key, "nope"),
            _ => panic!("Expected UnknownImplementation"),
        }
    }

    #[test]
    fn test_custom_registration_is_data_driven() {
        let mut registry = VisualizerRegistry::empty();
        registry.register("custom", |c, ctx| Box::new(IframeVisualizer::new(c, ctx)));
        let ctx = context(DbHandle::in_memory().unwrap(), None);
        let cfg = VisualizerConfig::new("Custom", "custom").with_visualizer("custom");
        let vis = registry.instantiate(cfg, ctx).unwrap();
        assert_eq!(vis.config().shortname, "custom");
    }

    #[test]
    fn test_default_query_and_render() {
        let ctx = context(DbHandle::in_memory().unwrap(), None);
        let vis = IframeVisualizer::new(VisualizerConfig::new("Generic", "generic"), ctx);
        let artifact = StubArtifact::new("r1", "a.txt", b"hello");

        let query = vis.get_query_for_artifact(&artifact, &QueryParams::new()).unwrap();
        assert_eq!(query.get(PARAM_ENV).map(String::as_str), Some("test"));
        assert_eq!(
            query.get(PARAM_RESOURCE_URL).map(String::as_str),
            Some("/p/test/files/a.txt?format=raw")
        );
        assert_eq!(query.get(PARAM_REF_ID).map(String::as_str), Some("ref:r1"));

        let desc = vis.render_artifact(&artifact, &QueryParams::new()).unwrap();
        assert_eq!(desc.embed, EmbedKind::Iframe);
        assert!(desc.src.starts_with("/visualize/generic/content?"));
        assert!(!desc.diff);
    }

    #[test]
    fn test_diff_render_carries_both_resources() {
        let ctx = context(DbHandle::in_memory().unwrap(), None);
        let vis = IframeVisualizer::new(VisualizerConfig::new("Generic", "generic"), ctx);
        let desc = vis
            .render_diff_url("/old.txt", "/new.txt", &QueryParams::new())
            .unwrap();
        assert!(desc.diff);
        assert_eq!(desc.query.get(PARAM_DIFF_URL).map(String::as_str), Some("/new.txt"));
        assert_eq!(desc.query.get(PARAM_MODE).map(String::as_str), Some("diff"));
    }
}
