//! Markdown and syntax-highlighted text, delivered inline.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{EmbedKind, InlineContent, QueryParams, RenderDescriptor, Visualizer, VisualizerContext};
use crate::artifact::Artifact;
use crate::mimetype::basename;
use crate::model::VisualizerConfig;

const DEFAULT_MAX_BYTES: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextFormat {
    Markdown,
    Code,
}

const LANGUAGES: &[(&str, &str)] = &[
    ("c", "c"),
    ("cpp", "cpp"),
    ("cs", "csharp"),
    ("css", "css"),
    ("go", "go"),
    ("h", "c"),
    ("hpp", "cpp"),
    ("html", "html"),
    ("java", "java"),
    ("js", "javascript"),
    ("json", "json"),
    ("m", "matlab"),
    ("py", "python"),
    ("rb", "ruby"),
    ("rs", "rust"),
    ("sh", "bash"),
    ("sql", "sql"),
    ("toml", "toml"),
    ("ts", "typescript"),
    ("vhd", "vhdl"),
    ("xml", "xml"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
];

/// Highlighting language for a filename, by extension.
pub fn detect_language(filename: &str) -> Option<&'static str> {
    let name = basename(filename).to_lowercase();
    let (_, ext) = name.rsplit_once('.')?;
    LANGUAGES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, lang)| *lang)
}

/// Reads artifact text and hands it to the caller inline.
///
/// Bare URLs cannot be read, so they fall back to the content endpoint.
pub struct TextVisualizer {
    config: VisualizerConfig,
    context: Arc<VisualizerContext>,
    format: TextFormat,
}

impl TextVisualizer {
    pub fn new(config: VisualizerConfig, context: Arc<VisualizerContext>, format: TextFormat) -> Self {
        Self {
            config,
            context,
            format,
        }
    }

    fn max_bytes(&self) -> usize {
        self.config
            .option("max_bytes")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_BYTES)
    }

    fn inline_content(&self, artifact: &dyn Artifact) -> Result<InlineContent> {
        let bytes = artifact.read()?;
        let limit = self.max_bytes();
        let truncated = bytes.len() > limit;
        let slice = if truncated { &bytes[..limit] } else { &bytes[..] };
        let language = match self.format {
            TextFormat::Markdown => None,
            TextFormat::Code => self
                .config
                .option("language")
                .or_else(|| detect_language(&artifact.filename()))
                .map(str::to_string),
        };
        Ok(InlineContent {
            format: self.format,
            language,
            text: String::from_utf8_lossy(slice).into_owned(),
            truncated,
        })
    }
}

impl Visualizer for TextVisualizer {
    fn config(&self) -> &VisualizerConfig {
        &self.config
    }

    fn context(&self) -> &VisualizerContext {
        &self.context
    }

    fn render_artifact(&self, artifact: &dyn Artifact, extra: &QueryParams) -> Result<RenderDescriptor> {
        let query = self.get_query_for_artifact(artifact, extra)?;
        let mut descriptor = self.describe(query, false);
        descriptor.embed = EmbedKind::Inline;
        descriptor.content = Some(self.inline_content(artifact)?);
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbHandle;
    use crate::visualizer::test_support::{StubArtifact, context};

    fn visualizer(format: TextFormat, cfg: VisualizerConfig) -> TextVisualizer {
        TextVisualizer::new(cfg, context(DbHandle::in_memory().unwrap(), None), format)
    }

    #[test]
    fn test_detect_language() {
        assert_eq!(detect_language("src/main.rs"), Some("rust"));
        assert_eq!(detect_language("/p/x/files/Script.PY?format=raw"), Some("python"));
        assert_eq!(detect_language("README"), None);
    }

    #[test]
    fn test_syntax_renders_inline_with_language() {
        let vis = visualizer(TextFormat::Code, VisualizerConfig::new("Syntax", "syntax"));
        let artifact = StubArtifact::new("r1", "lib.rs", b"fn main() {}");
        let desc = vis.render_artifact(&artifact, &QueryParams::new()).unwrap();
        assert_eq!(desc.embed, EmbedKind::Inline);
        let content = desc.content.unwrap();
        assert_eq!(content.language.as_deref(), Some("rust"));
        assert_eq!(content.text, "fn main() {}");
        assert!(!content.truncated);
    }

    #[test]
    fn test_markdown_truncates_at_limit() {
        let cfg = VisualizerConfig::new("Markdown", "markdown").with_option("max_bytes", "4");
        let vis = visualizer(TextFormat::Markdown, cfg);
        let artifact = StubArtifact::new("r1", "README.md", b"# Title");
        let content = vis
            .render_artifact(&artifact, &QueryParams::new())
            .unwrap()
            .content
            .unwrap();
        assert_eq!(content.text, "# Ti");
        assert!(content.truncated);
        assert_eq!(content.language, None);
    }

    #[test]
    fn test_url_falls_back_to_iframe() {
        let vis = visualizer(TextFormat::Markdown, VisualizerConfig::new("Markdown", "markdown"));
        let desc = vis.render_url("https://example.com/README.md", &QueryParams::new()).unwrap();
        assert_eq!(desc.embed, EmbedKind::Iframe);
        assert!(desc.content.is_none());
    }
}
