//! VM provisioning orchestration.
//!
//! ## Architecture
//!
//! One provisioning pass runs these stages in order, each consuming the
//! previous stage's output:
//!
//! ```text
//! 1. Validate ──→ 2. Preflight ──→ 3. Network ──→ 4. Credentials ──→ 5. Seed
//!                                                                      │
//!                          8. Address ←── 7. Domain ←── 6. Storage ←───┘
//! ```
//!
//! Cancellation is observed between stages up to the domain stage. Once the
//! domain is running the pass always succeeds; a missing address is reported
//! as pending rather than failing.
//!
//! `CleanupGuard` releases staged seeds and marks the record failed when a
//! pass does not complete; volumes are `Disk`s and delete themselves.

mod control;
mod pipeline;
mod stages;
mod types;

pub use control::ProvisionControl;
pub use pipeline::PipelineTask;
pub use pipeline::ProvisionPipeline;
pub use stages::poll_address;
pub use types::{CleanupGuard, ProvisionContext, ProvisionServices};
