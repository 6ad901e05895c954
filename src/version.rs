//! Version parsing, comparison and release gating.

pub mod compare;
pub mod github;
pub mod releases;

pub use compare::{Comparison, Version};
pub use releases::{ReleaseIndex, validate_target_available};
