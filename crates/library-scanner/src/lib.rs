//! Library scanner for comicdex.
//!
//! This crate reconciles registered storage roots against the persisted
//! catalog and feeds the scrape task queue: root registry, enumeration and
//! permission collaborators, and the scan coordinator.

pub mod coordinator;
pub mod enumerate;
pub mod permission;
pub mod registry;

pub use coordinator::ScanCoordinator;
pub use enumerate::{ItemEnumerator, LocalEnumerator};
pub use permission::{LocalPermissionProbe, PermissionProbe};
pub use registry::RootRegistry;
