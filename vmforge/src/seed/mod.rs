//! First-boot configuration seed.
//!
//! Two documents (`meta-data` and `user-data`) are rendered into a private
//! scratch directory and packaged into an ISO labelled `cidata`, which the
//! guest's init system mounts on first boot.

mod builder;
mod documents;

pub use builder::SeedBuilder;
pub use documents::{MetaData, RenderedSeed, UserData, UserEntry, instance_id, render_documents};
