pub mod admin;
pub mod api;
pub mod artifact;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod logging;
pub mod manifest;
pub mod mapping;
pub mod mimetype;
pub mod model;
pub mod processing;
pub mod service;
pub mod storage;
pub mod visualizer;

pub use api::{FullRender, RenderTab, Resource, VisualizeApi};
pub use errors::{ManifestError, ProcessingError, VisualizeError, VisualizeResult};
pub use mapping::PatternMatcher;
pub use model::{ProcessingState, VisualizerConfig};
pub use visualizer::{RenderDescriptor, Visualizer, VisualizerRegistry};
