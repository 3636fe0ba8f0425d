//! Stickerpack - sticker package build and publish pipeline
//!
//! Turns a customer's sticker layout and source artwork into per-platform
//! distribution archives and uploads them to object storage:
//!
//! - a tiered tree of five pixel-density directories, each folded into one
//!   archive (`<work_dir>/<pn>/<tier>/<pn>.zip`)
//! - a scaled tree of three scale directories, each with a generated
//!   placement manifest and one archive (`<work_dir>/<pn>_IOS/<xN>/`)
//!
//! [`StickerPipeline`] is the entry point; it exposes `build` and `publish`
//! and is generic over the [`ObjectStore`] it talks to.

pub mod archive;
pub mod builder;
pub mod config;
pub mod error;
pub mod fetch;
pub mod imaging;
pub mod layout;
pub mod limiter;
pub mod logging;
pub mod orchestrator;
pub mod package;
pub mod publisher;
pub mod retry;
pub mod storage;

pub use builder::{BuildArtifact, WorkingTree};
pub use config::{ConfigFile, PipelineConfig};
pub use error::{ErrorKind, PipelineError, PipelineResult, Platform};
pub use layout::{Layout, NormalizedLayout};
pub use orchestrator::{BuildReport, PackageState, PublishOutcome, StickerPipeline};
pub use package::{StickerPackage, Tenant};
pub use publisher::PlatformLocations;
pub use storage::{LocalObjectStore, MemoryObjectStore, ObjectStore, S3ObjectStore, StorageLocation};
