//! Disk volume handles.
//!
//! - `Disk` - RAII wrapper for a volume file
//! - `DiskFormat` - volume formats (Qcow2, Raw)

pub mod constants;
mod image;

pub use image::{Disk, DiskFormat};
