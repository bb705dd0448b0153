//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                                     |
//! |-----------------|------------------------------------------------------|
//! | `project`       | `Init`                                               |
//! | `visualizers`   | `Upload`, `List`, `Activate`, `Deactivate`, `Delete`, `Invalidate` |
//! | `render`        | `Find`, `Render`, `Diff`, `Process`                  |
//! | `config`        | `Config`                                             |

pub mod config;
pub mod project;
pub mod render;
pub mod visualizers;

pub use config::cmd_config;
pub use project::cmd_init;
pub use render::{cmd_diff, cmd_find, cmd_process, cmd_render};
pub use visualizers::{cmd_delete, cmd_invalidate, cmd_list, cmd_set_active, cmd_upload};
