//! Versioned snapshots of a single repository.
//!
//! [`layout`] names every path; [`publish`] produces one snapshot.

mod layout;
mod publisher;

pub use layout::{
    LATEST_LINK, PACKAGES_DIR, RepoLayout, latest_link_target, package_link_target,
};
pub use publisher::{PublishOutcome, publish};
