//! Capability discovery for mcpz.
//!
//! Plugins contribute servers and skills contribute tools. Both are found by
//! [`CapabilitySource`] implementations (global npm packages, the local
//! skill cache, local directories), merged by [`Discovery`], and folded into
//! the config document by [`reconcile_plugins`] / [`reconcile_skills`].
//! Network access goes through the injectable [`RegistryClient`]; the HTTP
//! implementation is behind the `registry` feature.

/// Skills fetched from the skills registry.
pub mod cache;
/// Plugin and skill descriptors and manifests.
pub mod descriptor;
/// The composite of capability sources.
pub mod discovery;
/// Installing and uninstalling plugins and skills.
pub mod install;
/// Manifests in local directories.
pub mod local;
/// Globally installed npm packages.
pub mod npm;
/// Folding descriptors into the config document.
pub mod reconcile;
/// Package and skill registry lookups.
pub mod registry;
/// The capability source trait.
pub mod source;

pub use cache::SkillCache;
pub use descriptor::{PluginDescriptor, PluginManifest, SkillDescriptor, SkillManifest};
pub use discovery::Discovery;
pub use install::{Installer, NpmPackageManager, PackageManager};
pub use local::LocalDirectorySource;
pub use npm::NpmGlobalSource;
pub use reconcile::{reconcile_plugins, reconcile_skills};
pub use registry::{PackageInfo, RegistryClient};
pub use source::CapabilitySource;

#[cfg(feature = "registry")]
pub use registry::HttpRegistryClient;
