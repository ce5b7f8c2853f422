//! Keepsake path filtering and path rewriting
//!
//! - [`Filters`]: ordered include/exclude units deciding whether a path takes
//!   part in a backup or restore
//! - [`Replacements`]: ordered rewrite rules relocating archived paths at
//!   restore time

pub mod filters;
pub mod replace;

pub use filters::{escape_pattern, FilterUnit, Filters};
pub use replace::{Replacements, Rule, Scope};

/// Separator used in command-line pattern and replacement lists
/// (the platform's path-list separator)
pub const LIST_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// Split a separator-joined list, dropping empty elements
pub fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(LIST_SEPARATOR).filter(|s| !s.is_empty())
}
