//! The render facade callers use.
//!
//! A [`Resource`] is either a forge artifact or a bare URL. Resolution
//! picks a visualizer by explicit shortname when one is given, otherwise
//! by the matcher's best match for the resource's filename.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::errors::{VisualizeError, VisualizeResult};
use crate::mapping::PatternMatcher;
use crate::mimetype::basename;
use crate::model::VisualizerConfig;
use crate::visualizer::{QueryParams, RenderDescriptor, Visualizer, VisualizerContext, VisualizerRegistry};

/// Something that can be visualized.
#[derive(Clone)]
pub enum Resource {
    Artifact(Arc<dyn Artifact>),
    Url(String),
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Resource::Artifact(a) => f.debug_tuple("Artifact").field(&a.unique_id()).finish(),
            Resource::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

impl Resource {
    pub fn url(url: impl Into<String>) -> Self {
        Resource::Url(url.into())
    }

    /// Name used for matching.
    pub fn filename(&self) -> String {
        match self {
            Resource::Artifact(a) => a.filename(),
            Resource::Url(url) => basename(url).to_string(),
        }
    }

    /// Processing status key; bare URLs have none.
    pub fn resource_id(&self) -> Option<String> {
        match self {
            Resource::Artifact(a) => Some(a.unique_id()),
            Resource::Url(_) => None,
        }
    }

    /// URL a content endpoint fetches the bytes from.
    pub fn fetch_url(&self) -> String {
        match self {
            Resource::Artifact(a) => a.raw_url(),
            Resource::Url(url) => url.clone(),
        }
    }

    fn render_with(&self, vis: &dyn Visualizer, extra: &QueryParams) -> anyhow::Result<RenderDescriptor> {
        match self {
            Resource::Artifact(a) => vis.render_artifact(a.as_ref(), extra),
            Resource::Url(url) => vis.render_url(url, extra),
        }
    }

    fn diff_with(&self, other: &Resource, vis: &dyn Visualizer, extra: &QueryParams) -> anyhow::Result<RenderDescriptor> {
        match (self, other) {
            (Resource::Artifact(a), Resource::Artifact(b)) => vis.render_diff_artifact(a.as_ref(), b.as_ref(), extra),
            _ => vis.render_diff_url(&self.fetch_url(), &other.fetch_url(), extra),
        }
    }
}

/// One visualizer's output in a tabbed view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderTab {
    pub active: bool,
    #[serde(flatten)]
    pub descriptor: RenderDescriptor,
}

/// Every applicable visualizer rendered, with exactly one marked active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullRender {
    pub tabs: Vec<RenderTab>,
}

impl FullRender {
    pub fn active(&self) -> Option<&RenderTab> {
        self.tabs.iter().find(|t| t.active)
    }

    pub fn is_empty(&self) -> bool {
        self.tabs.is_empty()
    }

    fn from_descriptors(descriptors: Vec<RenderDescriptor>, active_shortname: Option<&str>) -> Self {
        let active_index = active_shortname
            .and_then(|s| descriptors.iter().position(|d| d.shortname == s))
            .unwrap_or(0);
        let tabs = descriptors
            .into_iter()
            .enumerate()
            .map(|(i, descriptor)| RenderTab {
                active: i == active_index,
                descriptor,
            })
            .collect();
        Self { tabs }
    }
}

fn is_not_found(err: &VisualizeError) -> bool {
    matches!(
        err,
        VisualizeError::VisualizerNotFound { .. } | VisualizeError::NoVisualizer { .. }
    )
}

/// Resolution and rendering entry point.
#[derive(Clone)]
pub struct VisualizeApi {
    matcher: Arc<PatternMatcher>,
    registry: VisualizerRegistry,
    context: Arc<VisualizerContext>,
}

impl VisualizeApi {
    pub fn new(matcher: Arc<PatternMatcher>, registry: VisualizerRegistry, context: Arc<VisualizerContext>) -> Self {
        Self {
            matcher,
            registry,
            context,
        }
    }

    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }

    pub fn context(&self) -> &Arc<VisualizerContext> {
        &self.context
    }

    fn config(&self, id: i64) -> VisualizeResult<Option<VisualizerConfig>> {
        self.context
            .db
            .lock_sync()
            .map_err(|_| VisualizeError::LockPoisoned)?
            .get_config(id)
            .map_err(VisualizeError::Database)
    }

    fn active_by_shortname(&self, shortname: &str) -> VisualizeResult<VisualizerConfig> {
        let config = self
            .context
            .db
            .lock_sync()
            .map_err(|_| VisualizeError::LockPoisoned)?
            .get_config_by_shortname(shortname)
            .map_err(VisualizeError::Database)?;
        match config {
            Some(c) if c.active => Ok(c),
            _ => Err(VisualizeError::VisualizerNotFound {
                shortname: shortname.to_string(),
            }),
        }
    }

    fn instantiate(&self, config: VisualizerConfig) -> VisualizeResult<Box<dyn Visualizer>> {
        self.registry.instantiate(config, self.context.clone())
    }

    /// Instantiate matched configs, skipping any that vanished or cannot be built.
    fn instantiate_ids(&self, ids: Vec<i64>) -> VisualizeResult<Vec<Box<dyn Visualizer>>> {
        let mut visualizers = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(config) = self.config(id)? else {
                debug!(config_id = id, "Matched config no longer exists");
                continue;
            };
            if !config.active {
                continue;
            }
            match self.instantiate(config) {
                Ok(vis) => visualizers.push(vis),
                Err(e) => warn!(config_id = id, error = %e, "Skipping visualizer"),
            }
        }
        Ok(visualizers)
    }

    /// Every visualizer able to display or process the resource, best first.
    pub fn find_visualizers(&self, resource: &Resource) -> VisualizeResult<Vec<Box<dyn Visualizer>>> {
        let resource_id = resource.resource_id();
        let ids = self
            .matcher
            .find_for_all(&resource.filename(), resource_id.as_deref());
        self.instantiate_ids(ids)
    }

    /// The visualizer to use: the named one if given, else the best match.
    ///
    /// A named visualizer that is missing or inactive is an error; no match
    /// for an unnamed lookup is `Ok(None)`.
    pub fn get_visualizer(&self, resource: &Resource, shortname: Option<&str>) -> VisualizeResult<Option<Box<dyn Visualizer>>> {
        if let Some(shortname) = shortname {
            let config = self.active_by_shortname(shortname)?;
            return self.instantiate(config).map(Some);
        }
        let resource_id = resource.resource_id();
        let Some(id) = self
            .matcher
            .get_for_all(&resource.filename(), resource_id.as_deref())
        else {
            return Ok(None);
        };
        match self.config(id)? {
            Some(config) if config.active => self.instantiate(config).map(Some),
            _ => Ok(None),
        }
    }

    fn require_visualizer(&self, resource: &Resource, shortname: Option<&str>) -> VisualizeResult<Box<dyn Visualizer>> {
        self.get_visualizer(resource, shortname)?
            .ok_or_else(|| VisualizeError::NoVisualizer {
                resource: resource.filename(),
            })
    }

    /// Render with one visualizer. Misses are errors.
    pub fn render(&self, resource: &Resource, shortname: Option<&str>, extra: &QueryParams) -> VisualizeResult<RenderDescriptor> {
        let vis = self.require_visualizer(resource, shortname)?;
        Ok(resource.render_with(vis.as_ref(), extra)?)
    }

    /// Like [`render`](Self::render), but misses go to `on_not_found`.
    pub fn render_or_else<F>(
        &self,
        resource: &Resource,
        shortname: Option<&str>,
        extra: &QueryParams,
        on_not_found: F,
    ) -> VisualizeResult<RenderDescriptor>
    where
        F: FnOnce(VisualizeError) -> VisualizeResult<RenderDescriptor>,
    {
        match self.render(resource, shortname, extra) {
            Err(e) if is_not_found(&e) => on_not_found(e),
            other => other,
        }
    }

    /// Visualizers for a tabbed view: the named ones, or every match.
    fn tab_visualizers(&self, resource: &Resource, shortnames: Option<&[&str]>) -> VisualizeResult<Vec<Box<dyn Visualizer>>> {
        let Some(shortnames) = shortnames else {
            return self.find_visualizers(resource);
        };
        let mut visualizers = Vec::with_capacity(shortnames.len());
        for shortname in shortnames {
            match self.active_by_shortname(shortname) {
                Ok(config) => visualizers.push(self.instantiate(config)?),
                Err(e) if is_not_found(&e) => warn!(shortname, "Skipping unknown visualizer tab"),
                Err(e) => return Err(e),
            }
        }
        Ok(visualizers)
    }

    /// Render against every applicable visualizer.
    ///
    /// `active_shortname` picks the initially shown tab; if it is absent or
    /// not among the tabs, the first tab is active.
    pub fn full_render(
        &self,
        resource: &Resource,
        shortnames: Option<&[&str]>,
        active_shortname: Option<&str>,
        extra: &QueryParams,
    ) -> VisualizeResult<FullRender> {
        let mut descriptors = Vec::new();
        for vis in self.tab_visualizers(resource, shortnames)? {
            match resource.render_with(vis.as_ref(), extra) {
                Ok(d) => descriptors.push(d),
                Err(e) => warn!(visualizer = %vis.config().shortname, error = %e, "Skipping tab that failed to render"),
            }
        }
        Ok(FullRender::from_descriptors(descriptors, active_shortname))
    }

    /// Compare two resources. The visualizer is resolved from `resource`.
    pub fn diff(
        &self,
        resource: &Resource,
        other: &Resource,
        shortname: Option<&str>,
        extra: &QueryParams,
    ) -> VisualizeResult<RenderDescriptor> {
        let vis = self.require_visualizer(resource, shortname)?;
        Ok(resource.diff_with(other, vis.as_ref(), extra)?)
    }

    pub fn full_diff(
        &self,
        resource: &Resource,
        other: &Resource,
        shortnames: Option<&[&str]>,
        active_shortname: Option<&str>,
        extra: &QueryParams,
    ) -> VisualizeResult<FullRender> {
        let mut descriptors = Vec::new();
        for vis in self.tab_visualizers(resource, shortnames)? {
            match resource.diff_with(other, vis.as_ref(), extra) {
                Ok(d) => descriptors.push(d),
                Err(e) => warn!(visualizer = %vis.config().shortname, error = %e, "Skipping diff tab that failed to render"),
            }
        }
        Ok(FullRender::from_descriptors(descriptors, active_shortname))
    }

    /// Trigger every on-upload processing visualizer matching a new artifact.
    ///
    /// Returns how many jobs were queued.
    pub fn notify_upload(&self, artifact: Arc<dyn Artifact>) -> VisualizeResult<usize> {
        let resource_id = artifact.unique_id();
        let ids = self
            .matcher
            .find_for_processing(&artifact.filename(), Some(&resource_id));
        let mut queued = 0;
        for vis in self.instantiate_ids(ids)? {
            match vis.on_upload(artifact.as_ref()) {
                Ok(true) => queued += 1,
                Ok(false) => {}
                Err(e) => warn!(visualizer = %vis.config().shortname, error = %e, "Upload hook failed"),
            }
        }
        debug!(resource_id = %resource_id, queued, "Processed upload notification");
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemorySharedCache;
    use crate::db::DbHandle;
    use crate::mapping::invalidate_cache;
    use crate::processing::{ProcessingJob, ProcessingQueue};
    use crate::visualizer::test_support::{StubArtifact, context};
    use crate::visualizer::{EmbedKind, PARAM_DIFF_URL, PARAM_PROCESSING_STATUS};
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        db: DbHandle,
        cache: MemorySharedCache,
        api: VisualizeApi,
        rx: UnboundedReceiver<ProcessingJob>,
    }

    impl Fixture {
        fn register(&self, config: VisualizerConfig) -> VisualizerConfig {
            let saved = self.db.lock_sync().unwrap().upsert_config(&config).unwrap();
            invalidate_cache(&self.cache).unwrap();
            saved
        }
    }

    fn fixture() -> Fixture {
        let db = DbHandle::in_memory().unwrap();
        let cache = MemorySharedCache::new();
        let (queue, rx) = ProcessingQueue::channel();
        let matcher = Arc::new(PatternMatcher::new(db.clone(), Arc::new(cache.clone()), 32));
        let api = VisualizeApi::new(matcher, VisualizerRegistry::with_builtins(), context(db.clone(), Some(queue)));
        Fixture { db, cache, api, rx }
    }

    fn artifact(id: &str, name: &str) -> Resource {
        Resource::Artifact(Arc::new(StubArtifact::new(id, name, b"data")))
    }

    #[test]
    fn test_render_best_match() {
        let fx = fixture();
        fx.register(VisualizerConfig::new("Image", "image").with_visualizer("image").with_extensions(["*.png"]));
        fx.register(
            VisualizerConfig::new("Fancy", "fancy")
                .with_priority(5)
                .with_extensions(["*.png"]),
        );
        let desc = fx.api.render(&artifact("r1", "cat.png"), None, &QueryParams::new()).unwrap();
        assert_eq!(desc.shortname, "fancy");

        let desc = fx
            .api
            .render(&Resource::url("https://x/cat.png"), Some("image"), &QueryParams::new())
            .unwrap();
        assert_eq!(desc.embed, EmbedKind::Image);
    }

    #[test]
    fn test_explicit_shortname_missing_or_inactive() {
        let fx = fixture();
        fx.register(VisualizerConfig::new("Image", "image").with_extensions(["*.png"]));
        fx.db.lock_sync().unwrap().set_config_active("image", false).unwrap();
        for name in ["image", "nope"] {
            match fx.api.render(&artifact("r1", "a.png"), Some(name), &QueryParams::new()) {
                Err(VisualizeError::VisualizerNotFound { shortname }) => assert_eq!(shortname, name),
                other => panic!("Expected VisualizerNotFound, got {:?}", other.map(|d| d.shortname)),
            }
        }
    }

    #[test]
    fn test_no_match_uses_callback() {
        let fx = fixture();
        let resource = Resource::url("/files/a.unknown");
        assert!(matches!(
            fx.api.render(&resource, None, &QueryParams::new()),
            Err(VisualizeError::NoVisualizer { .. })
        ));
        assert!(fx.api.get_visualizer(&resource, None).unwrap().is_none());

        let fallback = fx
            .api
            .render_or_else(&resource, None, &QueryParams::new(), |_| {
                let ctx = context(DbHandle::in_memory().unwrap(), None);
                let vis = crate::visualizer::IframeVisualizer::new(VisualizerConfig::new("Link", "link"), ctx);
                Ok(vis.render_url("/files/a.unknown", &QueryParams::new()).unwrap())
            })
            .unwrap();
        assert_eq!(fallback.shortname, "link");
    }

    #[test]
    fn test_full_render_marks_one_active() {
        let fx = fixture();
        fx.register(VisualizerConfig::new("A", "a").with_priority(3).with_extensions(["*.txt"]));
        fx.register(VisualizerConfig::new("B", "b").with_priority(2).with_extensions(["*.txt"]));
        let resource = artifact("r1", "notes.txt");

        let full = fx.api.full_render(&resource, None, None, &QueryParams::new()).unwrap();
        let names: Vec<_> = full.tabs.iter().map(|t| t.descriptor.shortname.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(full.active().unwrap().descriptor.shortname, "a");
        assert_eq!(full.tabs.iter().filter(|t| t.active).count(), 1);

        let full = fx.api.full_render(&resource, None, Some("b"), &QueryParams::new()).unwrap();
        assert_eq!(full.active().unwrap().descriptor.shortname, "b");

        let full = fx.api.full_render(&resource, None, Some("zzz"), &QueryParams::new()).unwrap();
        assert_eq!(full.active().unwrap().descriptor.shortname, "a");

        let full = fx
            .api
            .full_render(&resource, Some(&["b", "missing"]), None, &QueryParams::new())
            .unwrap();
        assert_eq!(full.tabs.len(), 1);
        assert_eq!(full.active().unwrap().descriptor.shortname, "b");
    }

    #[test]
    fn test_diff_resolves_from_first_resource() {
        let fx = fixture();
        fx.register(VisualizerConfig::new("Text", "text").with_extensions(["*.txt"]));
        let desc = fx
            .api
            .diff(&artifact("r1", "a.txt"), &artifact("r2", "b.txt"), None, &QueryParams::new())
            .unwrap();
        assert!(desc.diff);
        assert_eq!(
            desc.query.get(PARAM_DIFF_URL).map(String::as_str),
            Some("/p/test/files/b.txt?format=raw")
        );

        let full = fx
            .api
            .full_diff(&Resource::url("/a.txt"), &Resource::url("/b.txt"), None, None, &QueryParams::new())
            .unwrap();
        assert_eq!(full.tabs.len(), 1);
        assert!(full.tabs[0].descriptor.diff);
    }

    #[test]
    fn test_processing_visualizer_reports_status() {
        let mut fx = fixture();
        fx.register(
            VisualizerConfig::new("Office", "office")
                .with_visualizer("on_demand")
                .with_processing(["*.docx"]),
        );
        let desc = fx.api.render(&artifact("r1", "a.docx"), None, &QueryParams::new()).unwrap();
        assert_eq!(desc.query.get(PARAM_PROCESSING_STATUS).map(String::as_str), Some("loading"));
        assert_eq!(fx.rx.try_recv().unwrap().resource_id, "r1");
    }

    #[test]
    fn test_notify_upload_triggers_on_upload_only() {
        let mut fx = fixture();
        let eager = fx.register(
            VisualizerConfig::new("Eager", "eager")
                .with_visualizer("on_upload")
                .with_processing(["*.docx"]),
        );
        fx.register(
            VisualizerConfig::new("Lazy", "lazy")
                .with_visualizer("on_demand")
                .with_processing(["*.docx"]),
        );
        let upload: Arc<dyn Artifact> = Arc::new(StubArtifact::new("r1", "a.docx", b"doc"));
        assert_eq!(fx.api.notify_upload(upload).unwrap(), 1);
        let job = fx.rx.try_recv().unwrap();
        assert_eq!(job.config_id, eager.id);
        assert!(fx.rx.try_recv().is_err());
    }

    #[test]
    fn test_full_render_serializes_flat_tabs() {
        let fx = fixture();
        fx.register(VisualizerConfig::new("A", "a").with_extensions(["*.txt"]));
        let full = fx
            .api
            .full_render(&Resource::url("/x.txt"), None, None, &QueryParams::new())
            .unwrap();
        let json = serde_json::to_value(&full).unwrap();
        assert_eq!(json["tabs"][0]["shortname"], "a");
        assert_eq!(json["tabs"][0]["active"], true);
    }
}
