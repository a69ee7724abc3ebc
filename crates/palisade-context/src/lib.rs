//! Permission context engine for sandboxed desktop applications.
//!
//! `palisade-context` models everything an application may touch outside
//! its sandbox: namespace shares, sockets, devices, filesystem locations,
//! bus names, generic policy values and USB devices.
//!
//! The pipeline has four phases:
//! 1. **Parse**: metadata documents and option specifiers into a [`Context`]
//! 2. **Merge**: layer contexts in priority order ([`LayerSources`])
//! 3. **Check**: detect escalations between two contexts ([`diff_permissions`])
//! 4. **Export**: plan the mounts for the sandbox launcher ([`plan_exports`])

pub mod bus;
pub mod conditional;
pub mod context;
pub mod error;
pub mod escalation;
pub mod export;
pub mod filesystem;
pub mod layers;
pub mod metadata;
pub mod policy;
pub mod registry;
pub mod usb;

#[cfg(test)]
mod testing;

// Re-export primary types for convenience.
pub use bus::{Bus, BusPolicy};
pub use conditional::{Device, RuntimeCondition, Socket};
pub use context::Context;
pub use error::ContextError;
pub use escalation::{PermissionDiff, adds_permissions, diff_permissions, format_report};
pub use export::{AppIdentity, ExportOp, HostLayout, plan_exports};
pub use filesystem::FilesystemMode;
pub use layers::LayerSources;
pub use metadata::MetadataDocument;
pub use registry::{Feature, NamedFamily, Share};
