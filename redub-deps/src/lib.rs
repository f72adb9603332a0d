//! redub-deps – external tool dependency handling.
//!
//! [`resolver`] answers "where is this tool and is it usable" without
//! side effects; [`installer`] downloads and installs the managed
//! Windows packages with checksum verification.

pub mod error;
pub mod installer;
pub mod resolver;

pub use error::InstallError;
pub use installer::{
    install_dependency, install_with_options, InstallProgress, InstallStage, InstalledTool,
    InstallerOptions, PackageFormat, PackageSpec, PackageTool,
};
pub use resolver::{
    build_inventory, format_report, resolve, resolve_all, DependencySource, DependencySpec,
    DependencyState, DependencyStatus, DependencyTier, ResolverHooks,
};
