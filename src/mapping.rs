//! Visualizer pattern matching with cross-process cache invalidation.
//!
//! The matcher compiles every active `VisualizerConfig` into two ordered
//! maps (visualization and processing), sorted by descending priority with
//! registration order breaking ties. Lookups never read config rows
//! directly; they walk the compiled maps.
//!
//! Invalidation is pull-based. Writers call [`invalidate_cache`], which
//! stores a fresh generation token in the shared cache. Every lookup first
//! runs [`PatternMatcher::check_expiration`], which compares the shared token
//! with the one the current maps were built from and rebuilds on mismatch.
//! Other processes therefore observe a config change on their next lookup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use glob::{MatchOptions, Pattern};
use mini_moka::sync::Cache;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::cache::SharedCache;
use crate::db::DbHandle;
use crate::errors::{VisualizeError, VisualizeResult};
use crate::mimetype::{basename, guess_mimetype};
use crate::model::VisualizerConfig;

/// Shared cache key holding the visualizer generation token.
pub const CACHE_TOKEN_KEY: &str = "visualizer.cache_token";

const EXTENSION_MATCH: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Write a fresh generation token so every matcher rebuilds on its next lookup.
///
/// Does not rebuild anything itself.
pub fn invalidate_cache(cache: &dyn SharedCache) -> anyhow::Result<String> {
    let token = format!(
        "{}-{}",
        chrono::Utc::now().timestamp_micros(),
        uuid::Uuid::new_v4().simple()
    );
    cache.set(CACHE_TOKEN_KEY, &token)?;
    info!(token = %token, "Visualizer cache invalidated");
    Ok(token)
}

/// Which compiled map a lookup walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapKind {
    Visualization,
    Processing,
}

/// A matched config id with the priority it was indexed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchHit {
    pub config_id: i64,
    pub priority: i64,
}

/// Token the current maps were built from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Generation {
    /// Never built, or the token could not be read. Always stale.
    Init,
    /// Built while no token had been written yet.
    Missing,
    Token(String),
}

#[derive(Debug)]
struct PatternEntry {
    config_id: i64,
    shortname: String,
    priority: i64,
    extensions: Vec<Pattern>,
    mime_types: Vec<Regex>,
    match_all_extensions: bool,
    status_exclude: Vec<String>,
}

impl PatternEntry {
    fn compile(config: &VisualizerConfig, extensions: &[String], mime_types: &[String]) -> Self {
        let (extensions, match_all_extensions) = compile_extensions(&config.shortname, extensions);
        Self {
            config_id: config.id,
            shortname: config.shortname.clone(),
            priority: config.priority,
            extensions,
            mime_types: compile_mime_types(&config.shortname, mime_types),
            match_all_extensions,
            status_exclude: config.processing_status_exclude.clone(),
        }
    }

    /// A mimetype hit on a `"*"` entry skips extension checks; everything
    /// else is decided by the extension patterns.
    fn matches(&self, filename: &str, mimetype: Option<&str>) -> bool {
        if self.match_all_extensions && self.mime_matches(mimetype) {
            return true;
        }
        self.extensions
            .iter()
            .any(|p| p.matches_with(filename, EXTENSION_MATCH))
    }

    fn mime_matches(&self, mimetype: Option<&str>) -> bool {
        if self.mime_types.is_empty() {
            return true;
        }
        mimetype.is_some_and(|m| self.mime_types.iter().any(|re| re.is_match(m)))
    }
}

/// Compile extension patterns, pulling out the `"*"` match-all marker.
///
/// Bare extensions (`"png"`, `".png"`) are accepted as shorthand for `"*.png"`.
fn compile_extensions(shortname: &str, patterns: &[String]) -> (Vec<Pattern>, bool) {
    let mut compiled = Vec::with_capacity(patterns.len());
    let mut match_all = false;
    for raw in patterns {
        let raw = raw.trim();
        if raw == "*" {
            match_all = true;
            continue;
        }
        match Pattern::new(&normalize_extension(raw)) {
            Ok(p) => compiled.push(p),
            Err(e) => warn!(
                visualizer = shortname,
                pattern = raw,
                error = %e,
                "Skipping invalid extension pattern"
            ),
        }
    }
    (compiled, match_all)
}

fn normalize_extension(raw: &str) -> String {
    if raw.contains(['*', '?', '[']) {
        raw.to_string()
    } else if raw.starts_with('.') {
        format!("*{}", raw)
    } else if raw.contains('.') {
        raw.to_string()
    } else {
        format!("*.{}", raw)
    }
}

/// Mimetype patterns are anchored at the start, like a prefix match.
fn compile_mime_types(shortname: &str, patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|raw| match compile_mime_pattern(raw) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(visualizer = shortname, error = %e, "Skipping invalid mimetype pattern");
                None
            }
        })
        .collect()
}

/// Validate and compile a single mimetype pattern.
pub fn compile_mime_pattern(raw: &str) -> VisualizeResult<Regex> {
    Regex::new(&format!("(?i)^(?:{})", raw)).map_err(|e| VisualizeError::InvalidPattern {
        pattern: raw.to_string(),
        message: e.to_string(),
    })
}

/// Validate a single extension pattern.
pub fn validate_extension_pattern(raw: &str) -> VisualizeResult<()> {
    if raw.trim() == "*" {
        return Ok(());
    }
    Pattern::new(&normalize_extension(raw.trim()))
        .map(|_| ())
        .map_err(|e| VisualizeError::InvalidPattern {
            pattern: raw.to_string(),
            message: e.to_string(),
        })
}

/// Mimetype patterns are only consulted alongside the `"*"` extension, so an
/// entry without extension patterns could never match.
fn indexable(config: &VisualizerConfig, kind: MapKind, extensions: &[String]) -> bool {
    if !extensions.is_empty() {
        return true;
    }
    warn!(
        visualizer = %config.shortname,
        ?kind,
        "Not indexing mimetype-only patterns; add \"*\" to the extensions to match on mimetype"
    );
    false
}

#[derive(Debug)]
struct PatternIndex {
    epoch: u64,
    generation: Generation,
    visualization: Vec<PatternEntry>,
    processing: Vec<PatternEntry>,
}

impl PatternIndex {
    fn empty() -> Self {
        Self {
            epoch: 0,
            generation: Generation::Init,
            visualization: Vec::new(),
            processing: Vec::new(),
        }
    }

    fn map(&self, kind: MapKind) -> &[PatternEntry] {
        match kind {
            MapKind::Visualization => &self.visualization,
            MapKind::Processing => &self.processing,
        }
    }

    fn entry(&self, kind: MapKind, config_id: i64) -> Option<&PatternEntry> {
        self.map(kind).iter().find(|e| e.config_id == config_id)
    }
}

/// Per-filename match lists, keyed by the index epoch they were computed from.
type LruKey = (u64, MapKind, String);

/// Resolves filenames to the ordered set of eligible visualizer configs.
pub struct PatternMatcher {
    db: DbHandle,
    cache: Arc<dyn SharedCache>,
    index: RwLock<Arc<PatternIndex>>,
    lru: Cache<LruKey, Arc<Vec<MatchHit>>>,
    epoch: AtomicU64,
}

impl PatternMatcher {
    pub fn new(db: DbHandle, cache: Arc<dyn SharedCache>, lru_capacity: usize) -> Self {
        Self {
            db,
            cache,
            index: RwLock::new(Arc::new(PatternIndex::empty())),
            lru: Cache::builder()
                .max_capacity(u64::try_from(lru_capacity).unwrap_or(u64::MAX))
                .build(),
            epoch: AtomicU64::new(0),
        }
    }

    fn current_index(&self) -> Arc<PatternIndex> {
        let guard = self.index.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Rebuild both maps from the active configs, keeping the remembered token.
    pub fn refresh(&self) -> VisualizeResult<()> {
        let generation = self.current_index().generation.clone();
        self.rebuild(generation)
    }

    /// Build a complete index off to the side, then swap it in.
    fn rebuild(&self, generation: Generation) -> VisualizeResult<()> {
        let configs = self
            .db
            .lock_sync()
            .and_then(|db| db.list_active_configs())
            .map_err(VisualizeError::Database)?;

        let mut visualization = Vec::new();
        let mut processing = Vec::new();
        for config in &configs {
            if config.has_visualization_criteria() && indexable(config, MapKind::Visualization, &config.extensions) {
                visualization.push(PatternEntry::compile(
                    config,
                    &config.extensions,
                    &config.mime_types,
                ));
            }
            if config.has_processing_criteria()
                && indexable(config, MapKind::Processing, &config.processing_extensions)
            {
                processing.push(PatternEntry::compile(
                    config,
                    &config.processing_extensions,
                    &config.processing_mime_types,
                ));
            }
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            epoch,
            visualization = visualization.len(),
            processing = processing.len(),
            "Rebuilt visualizer pattern index"
        );
        let index = Arc::new(PatternIndex {
            epoch,
            generation,
            visualization,
            processing,
        });
        *self.index.write().unwrap_or_else(|e| e.into_inner()) = index;
        self.lru.invalidate_all();
        Ok(())
    }

    /// Rebuild if the shared generation token moved since the last build.
    ///
    /// An unreadable token is treated as always stale, so a cache outage
    /// costs extra rebuilds rather than stale matches.
    pub fn check_expiration(&self) {
        let current = match self.cache.get(CACHE_TOKEN_KEY) {
            Ok(Some(token)) => Generation::Token(token),
            Ok(None) => Generation::Missing,
            Err(e) => {
                warn!(error = %e, "Failed to read visualizer cache token");
                Generation::Init
            }
        };
        let remembered = self.current_index().generation.clone();
        if current != Generation::Init && current == remembered {
            return;
        }
        debug!(?remembered, ?current, "Visualizer cache token changed");
        if let Err(e) = self.rebuild(current) {
            warn!(error = %e, "Failed to rebuild visualizer pattern index; keeping previous maps");
        }
    }

    /// Write a fresh generation token. See [`invalidate_cache`].
    pub fn invalidate_cache(&self) -> anyhow::Result<String> {
        invalidate_cache(self.cache.as_ref())
    }

    fn lookup(&self, kind: MapKind, filename: &str) -> Arc<Vec<MatchHit>> {
        self.check_expiration();
        let index = self.current_index();
        let name = basename(filename).to_lowercase();
        let key = (index.epoch, kind, name);

        if let Some(hits) = self.lru.get(&key) {
            return hits;
        }

        let mimetype = guess_mimetype(&key.2);
        let hits: Arc<Vec<MatchHit>> = Arc::new(
            index
                .map(kind)
                .iter()
                .filter(|entry| entry.matches(&key.2, mimetype.as_deref()))
                .map(|entry| MatchHit {
                    config_id: entry.config_id,
                    priority: entry.priority,
                })
                .collect(),
        );
        debug!(
            filename = %key.2,
            mimetype = mimetype.as_deref().unwrap_or("-"),
            ?kind,
            matches = hits.len(),
            "Resolved visualizers"
        );
        self.lru.insert(key, Arc::clone(&hits));
        hits
    }

    fn processing_hits(&self, filename: &str, resource_id: Option<&str>) -> Vec<MatchHit> {
        let hits = self.lookup(MapKind::Processing, filename);
        let Some(resource_id) = resource_id else {
            return hits.to_vec();
        };
        let index = self.current_index();
        hits.iter()
            .filter(|hit| !self.is_excluded(&index, hit.config_id, resource_id))
            .copied()
            .collect()
    }

    fn is_excluded(&self, index: &PatternIndex, config_id: i64, resource_id: &str) -> bool {
        let Some(entry) = index.entry(MapKind::Processing, config_id) else {
            return false;
        };
        if entry.status_exclude.is_empty() {
            return false;
        }
        let status = match self
            .db
            .lock_sync()
            .and_then(|db| db.get_status(resource_id, config_id))
        {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, resource_id, config_id, "Failed to read processing status");
                return false;
            }
        };
        let excluded = status.is_some_and(|s| {
            entry
                .status_exclude
                .iter()
                .any(|x| x.eq_ignore_ascii_case(s.status.as_str()))
        });
        if excluded {
            debug!(visualizer = %entry.shortname, resource_id, "Excluded by processing status");
        }
        excluded
    }

    /// Config ids eligible to visualize `filename`, best first.
    pub fn find_for_visualization(&self, filename: &str) -> Vec<i64> {
        ids(&self.lookup(MapKind::Visualization, filename))
    }

    /// Config ids eligible to preprocess `filename`, best first.
    ///
    /// With a `resource_id`, configs whose `processing_status_exclude`
    /// contains that resource's current status are dropped.
    pub fn find_for_processing(&self, filename: &str, resource_id: Option<&str>) -> Vec<i64> {
        ids(&self.processing_hits(filename, resource_id))
    }

    /// Both maps merged by priority. On equal priority processing entries
    /// come first; a config present in both maps appears once.
    pub fn find_for_all(&self, filename: &str, resource_id: Option<&str>) -> Vec<i64> {
        let processing = self.processing_hits(filename, resource_id);
        let visualization = self.lookup(MapKind::Visualization, filename);

        let mut merged: Vec<MatchHit> = Vec::with_capacity(processing.len() + visualization.len());
        let (mut p, mut v) = (processing.iter().peekable(), visualization.iter().peekable());
        loop {
            let next = match (p.peek(), v.peek()) {
                (Some(a), Some(b)) if a.priority >= b.priority => p.next(),
                (Some(_), Some(_)) => v.next(),
                (Some(_), None) => p.next(),
                (None, Some(_)) => v.next(),
                (None, None) => break,
            };
            if let Some(hit) = next
                && !merged.iter().any(|m| m.config_id == hit.config_id)
            {
                merged.push(*hit);
            }
        }
        ids(&merged)
    }

    pub fn get_for_visualization(&self, filename: &str) -> Option<i64> {
        self.lookup(MapKind::Visualization, filename)
            .first()
            .map(|hit| hit.config_id)
    }

    pub fn get_for_processing(&self, filename: &str, resource_id: Option<&str>) -> Option<i64> {
        self.processing_hits(filename, resource_id)
            .first()
            .map(|hit| hit.config_id)
    }

    /// Single best match across both maps.
    ///
    /// Visualization is the default; the best processing match only
    /// overrides it when its priority is greater than or equal.
    pub fn get_for_all(&self, filename: &str, resource_id: Option<&str>) -> Option<i64> {
        let processing = self.processing_hits(filename, resource_id).first().copied();
        let visualization = self
            .lookup(MapKind::Visualization, filename)
            .first()
            .copied();
        match (processing, visualization) {
            (Some(p), Some(v)) if p.priority >= v.priority => Some(p.config_id),
            (_, Some(v)) => Some(v.config_id),
            (Some(p), None) => Some(p.config_id),
            (None, None) => None,
        }
    }
}

fn ids(hits: &[MatchHit]) -> Vec<i64> {
    hits.iter().map(|hit| hit.config_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemorySharedCache;
    use crate::model::ProcessingState;

    fn setup() -> (DbHandle, MemorySharedCache, PatternMatcher) {
        let db = DbHandle::in_memory().unwrap();
        let cache = MemorySharedCache::new();
        let matcher = PatternMatcher::new(db.clone(), Arc::new(cache.clone()), 64);
        (db, cache, matcher)
    }

    fn register(db: &DbHandle, config: VisualizerConfig) -> VisualizerConfig {
        db.lock_sync().unwrap().upsert_config(&config).unwrap()
    }

    #[test]
    fn test_priority_order_with_stable_tie_break() {
        let (db, _, matcher) = setup();
        let low = register(&db, VisualizerConfig::new("Low", "low").with_priority(1).with_extensions(["*.foo"]));
        let five_a = register(&db, VisualizerConfig::new("A", "five-a").with_priority(5).with_extensions(["*.foo"]));
        let ten = register(&db, VisualizerConfig::new("Top", "top").with_priority(10).with_extensions(["*.foo"]));
        let five_b = register(&db, VisualizerConfig::new("B", "five-b").with_priority(5).with_extensions(["*.foo"]));

        assert_eq!(
            matcher.find_for_visualization("dir/file.foo"),
            vec![ten.id, five_a.id, five_b.id, low.id]
        );
    }

    #[test]
    fn test_wildcard_extension_matches_via_mimetype() {
        let (db, _, matcher) = setup();
        let text = register(
            &db,
            VisualizerConfig::new("Text", "text")
                .with_extensions(["*"])
                .with_mime_types(["^text/"]),
        );
        assert_eq!(matcher.find_for_visualization("readme.txt"), vec![text.id]);
        assert!(matcher.find_for_visualization("photo.png").is_empty());
    }

    #[test]
    fn test_mimetype_only_config_is_not_indexed() {
        let (db, _, matcher) = setup();
        register(&db, VisualizerConfig::new("Img", "img").with_mime_types(["^image/"]));
        let proc = register(
            &db,
            VisualizerConfig::new("Conv", "conv").with_processing(["*.doc"]),
        );
        let mut mime_only = VisualizerConfig::new("Mime", "mime");
        mime_only.processing_mime_types = vec!["^image/".into()];
        register(&db, mime_only);

        assert!(matcher.find_for_visualization("cat.png").is_empty());
        assert!(matcher.find_for_processing("cat.png", None).is_empty());
        assert_eq!(matcher.find_for_processing("a.doc", None), vec![proc.id]);
    }

    #[test]
    fn test_extension_match_without_mimetype() {
        let (db, _, matcher) = setup();
        let foo = register(
            &db,
            VisualizerConfig::new("Foo", "foo")
                .with_extensions(["*.foo"])
                .with_mime_types(["^application/x-foo"]),
        );
        // No mimetype is known for .foo; extension patterns still decide.
        assert_eq!(matcher.get_for_visualization("thing.FOO"), Some(foo.id));
        assert_eq!(matcher.get_for_visualization("thing.bar"), None);
    }

    #[test]
    fn test_bare_extension_shorthand() {
        let (db, _, matcher) = setup();
        let img = register(&db, VisualizerConfig::new("Img", "img").with_extensions(["png", ".jpg"]));
        assert_eq!(matcher.get_for_visualization("a.png"), Some(img.id));
        assert_eq!(matcher.get_for_visualization("a.jpg"), Some(img.id));
    }

    #[test]
    fn test_inactive_configs_are_ignored() {
        let (db, _, matcher) = setup();
        let mut cfg = VisualizerConfig::new("Off", "off").with_extensions(["*.txt"]);
        cfg.active = false;
        register(&db, cfg);
        assert!(matcher.find_for_visualization("a.txt").is_empty());
    }

    #[test]
    fn test_invalidation_propagates_on_next_lookup() {
        let (db, cache, matcher) = setup();
        assert!(matcher.find_for_visualization("model.stl").is_empty());

        // Another process registers a config and bumps the token.
        let stl = register(&db, VisualizerConfig::new("CAD", "cad").with_extensions(["*.stl"]));
        // Without a token change the cached maps are still used.
        assert!(matcher.find_for_visualization("model.stl").is_empty());

        invalidate_cache(&cache).unwrap();
        assert_eq!(matcher.find_for_visualization("model.stl"), vec![stl.id]);
    }

    #[test]
    fn test_match_lists_are_cached_per_index_epoch() {
        let (db, cache, matcher) = setup();
        register(&db, VisualizerConfig::new("CSV", "csv").with_extensions(["*.csv"]));
        invalidate_cache(&cache).unwrap();

        let first = matcher.lookup(MapKind::Visualization, "a.csv");
        let again = matcher.lookup(MapKind::Visualization, "dir/A.CSV");
        assert!(Arc::ptr_eq(&first, &again));

        invalidate_cache(&cache).unwrap();
        let rebuilt = matcher.lookup(MapKind::Visualization, "a.csv");
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(*first, *rebuilt);
    }

    #[test]
    fn test_refresh_rebuilds_without_token_change() {
        let (db, _, matcher) = setup();
        assert!(matcher.find_for_visualization("a.md").is_empty());
        let md = register(&db, VisualizerConfig::new("MD", "md").with_extensions(["*.md"]));
        matcher.refresh().unwrap();
        assert_eq!(matcher.find_for_visualization("a.md"), vec![md.id]);
    }

    #[test]
    fn test_processing_exclusion_by_status() {
        let (db, _, matcher) = setup();
        let mut office = VisualizerConfig::new("Office", "office").with_processing(["*.docx"]);
        office.processing_status_exclude = vec!["ERROR".into()];
        let office = register(&db, office);

        assert_eq!(matcher.find_for_processing("a.docx", Some("res-1")), vec![office.id]);
        db.lock_sync()
            .unwrap()
            .set_status("res-1", office.id, ProcessingState::Error)
            .unwrap();
        assert!(matcher.find_for_processing("a.docx", Some("res-1")).is_empty());
        // Other resources and resource-less lookups are unaffected.
        assert_eq!(matcher.find_for_processing("a.docx", Some("res-2")), vec![office.id]);
        assert_eq!(matcher.find_for_processing("a.docx", None), vec![office.id]);
    }

    #[test]
    fn test_get_for_all_processing_wins_on_equal_priority() {
        let (db, _, matcher) = setup();
        let vis = register(&db, VisualizerConfig::new("Vis", "vis").with_priority(5).with_extensions(["*.doc"]));
        let proc = register(&db, VisualizerConfig::new("Proc", "proc").with_priority(5).with_processing(["*.doc"]));
        assert_eq!(matcher.get_for_all("a.doc", None), Some(proc.id));
        assert_eq!(matcher.find_for_all("a.doc", None), vec![proc.id, vis.id]);
    }

    #[test]
    fn test_excluded_processing_match_falls_back_to_visualization() {
        let (db, _, matcher) = setup();
        let vis = register(&db, VisualizerConfig::new("Vis", "vis").with_priority(5).with_extensions(["*.doc"]));
        let mut proc = VisualizerConfig::new("Proc", "proc").with_priority(5).with_processing(["*.doc"]);
        proc.processing_status_exclude = vec!["error".into()];
        let proc = register(&db, proc);

        db.lock_sync()
            .unwrap()
            .set_status("res-1", proc.id, ProcessingState::Error)
            .unwrap();
        assert_eq!(matcher.get_for_all("a.doc", Some("res-1")), Some(vis.id));
        assert_eq!(matcher.find_for_all("a.doc", Some("res-1")), vec![vis.id]);
        // A resource without that status still prefers the processing match.
        assert_eq!(matcher.get_for_all("a.doc", Some("res-2")), Some(proc.id));
    }

    #[test]
    fn test_get_for_all_visualization_wins_on_higher_priority() {
        let (db, _, matcher) = setup();
        let vis = register(&db, VisualizerConfig::new("Vis", "vis").with_priority(6).with_extensions(["*.doc"]));
        register(&db, VisualizerConfig::new("Proc", "proc").with_priority(5).with_processing(["*.doc"]));
        assert_eq!(matcher.get_for_all("a.doc", None), Some(vis.id));
    }

    #[test]
    fn test_find_for_all_dedups_configs_in_both_maps() {
        let (db, _, matcher) = setup();
        let both = register(
            &db,
            VisualizerConfig::new("Both", "both")
                .with_priority(3)
                .with_extensions(["*.odt"])
                .with_processing(["*.odt"]),
        );
        assert_eq!(matcher.find_for_all("x.odt", None), vec![both.id]);
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        let (_, _, matcher) = setup();
        assert!(matcher.find_for_visualization("anything.xyz").is_empty());
        assert_eq!(matcher.get_for_all("anything.xyz", None), None);
    }

    #[test]
    fn test_invalid_patterns_are_skipped() {
        let (db, _, matcher) = setup();
        let cfg = register(
            &db,
            VisualizerConfig::new("Broken", "broken")
                .with_extensions(["*.ok", "[unclosed"])
                .with_mime_types(["(bad"]),
        );
        assert_eq!(matcher.find_for_visualization("a.ok"), vec![cfg.id]);
    }

    #[test]
    fn test_pattern_validation_helpers() {
        assert!(compile_mime_pattern("^image/").is_ok());
        assert!(matches!(
            compile_mime_pattern("(bad"),
            Err(VisualizeError::InvalidPattern { .. })
        ));
        assert!(validate_extension_pattern("*").is_ok());
        assert!(validate_extension_pattern("*.png").is_ok());
        assert!(validate_extension_pattern("[bad").is_err());
    }

    struct FailingCache;

    impl SharedCache for FailingCache {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            anyhow::bail!("cache down")
        }
        fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            anyhow::bail!("cache down")
        }
    }

    #[test]
    fn test_unreadable_token_forces_rebuild() {
        let db = DbHandle::in_memory().unwrap();
        let matcher = PatternMatcher::new(db.clone(), Arc::new(FailingCache), 16);
        assert!(matcher.find_for_visualization("a.svg").is_empty());
        let svg = register(&db, VisualizerConfig::new("SVG", "svg").with_extensions(["*.svg"]));
        assert_eq!(matcher.find_for_visualization("a.svg"), vec![svg.id]);
    }
}
