//! Visualizers that embed the resource by URL: iframe, image, PDF and hosted bundles.

use std::sync::Arc;

use anyhow::Result;

use super::{EmbedKind, QueryParams, RenderDescriptor, Visualizer, VisualizerContext, url_with_query};
use crate::artifact::Artifact;
use crate::model::VisualizerConfig;
use crate::storage::bundle_key;

/// Generic visualizer served by the content endpoint in an iframe.
pub struct IframeVisualizer {
    config: VisualizerConfig,
    context: Arc<VisualizerContext>,
}

impl IframeVisualizer {
    pub fn new(config: VisualizerConfig, context: Arc<VisualizerContext>) -> Self {
        Self { config, context }
    }
}

impl Visualizer for IframeVisualizer {
    fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    fn context(&self) -> &VisualizerContext {
        &self.context
    }
}

/// Displays images directly from the resource URL.
pub struct ImageVisualizer {
    config: VisualizerConfig,
    context: Arc<VisualizerContext>,
}

impl ImageVisualizer {
    pub fn new(config: VisualizerConfig, context: Arc<VisualizerContext>) -> Self {
        Self { config, context }
    }

    fn describe_image(&self, src: &str, query: QueryParams) -> RenderDescriptor {
        let mut descriptor = self.describe(query, false);
        descriptor.src = src.to_string();
        descriptor
    }
}

impl Visualizer for ImageVisualizer {
    fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    fn context(&self) -> &VisualizerContext {
        &self.context
    }

    fn embed_kind(&self) -> EmbedKind {
        EmbedKind::Image
    }

    fn render_url(&self, url: &str, extra: &QueryParams) -> Result<RenderDescriptor> {
        let query = self.get_query_for_url(url, extra)?;
        Ok(self.describe_image(url, query))
    }

    fn render_artifact(&self, artifact: &dyn Artifact, extra: &QueryParams) -> Result<RenderDescriptor> {
        let query = self.get_query_for_artifact(artifact, extra)?;
        Ok(self.describe_image(&artifact.raw_url(), query))
    }
}

/// PDF viewer page that loads the document named by its `file` parameter.
pub struct PdfVisualizer {
    config: VisualizerConfig,
    context: Arc<VisualizerContext>,
}

impl PdfVisualizer {
    pub fn new(config: VisualizerConfig, context: Arc<VisualizerContext>) -> Self {
        Self { config, context }
    }
}

impl Visualizer for PdfVisualizer {
    fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    fn context(&self) -> &VisualizerContext {
        &self.context
    }

    fn content_url(&self) -> String {
        match self.config.option("viewer_url") {
            Some(url) => url.to_string(),
            None => format!(
                "{}/{}/viewer",
                self.context.content_base.trim_end_matches('/'),
                self.config.shortname
            ),
        }
    }

    fn get_query_for_url(&self, url: &str, extra: &QueryParams) -> Result<QueryParams> {
        let mut query = extra.clone();
        query.insert(super::PARAM_ENV.into(), self.context.env.clone());
        query.insert(super::PARAM_RESOURCE_URL.into(), url.to_string());
        query.insert("file".into(), url.to_string());
        if !query.contains_key("page") {
            let page = self.config.option("default_page").unwrap_or("1");
            query.insert("page".into(), page.to_string());
        }
        Ok(query)
    }
}

/// Visualizer whose front end is an uploaded bundle hosted in object storage.
///
/// Used for CAD viewers and any other bundle uploaded through the admin path.
pub struct BundleVisualizer {
    config: VisualizerConfig,
    context: Arc<VisualizerContext>,
}

impl BundleVisualizer {
    pub fn new(config: VisualizerConfig, context: Arc<VisualizerContext>) -> Self {
        Self { config, context }
    }
}

/// URL of a bundle's entry point, if the config names one or the default exists.
pub(super) fn bundle_entry_url(config: &VisualizerConfig, context: &VisualizerContext) -> String {
    let entry = config.option("entry_point").unwrap_or("index.html");
    context
        .storage
        .url(&bundle_key(&config.shortname, entry))
}

impl Visualizer for BundleVisualizer {
    fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    fn context(&self) -> &VisualizerContext {
        &self.context
    }

    fn content_url(&self) -> String {
        bundle_entry_url(&self.config, &self.context)
    }

    fn describe_diff(&self, query: QueryParams) -> RenderDescriptor {
        let mut descriptor = self.describe(query, true);
        let base = self
            .config
            .option("diff_entry_point")
            .map(|entry| self.context.storage.url(&bundle_key(&self.config.shortname, entry)))
            .unwrap_or_else(|| self.content_url());
        descriptor.src = url_with_query(&base, &descriptor.query);
        descriptor
    }
}
