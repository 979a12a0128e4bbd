//! Error taxonomy for the harness.
//!
//! Manifest-resolution and provisioning errors abort the whole run; no
//! fixture result can be trusted without a working binary. Fixture-level
//! failures are recorded in the result sequence and the run continues.

use std::time::Duration;

use thiserror::Error;

/// Fatal errors the run logic needs to distinguish.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to fetch {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("unable to locate release-manifest.json in the latest release assets")]
    ManifestNotFound,

    #[error("release manifest does not contain information for kernel '{kernel}'")]
    UnknownKernel { kernel: String },

    #[error("unsupported kernel '{kernel}'")]
    UnsupportedKernel { kernel: String },

    #[error("cannot locate downloadable asset for kernel '{kernel}'")]
    AssetNotFound { kernel: String },
}

/// A fixture-level execution failure.
///
/// Carries the partial duration when the subprocess ran long enough to
/// measure one.
#[derive(Debug)]
pub struct ExecFailure {
    pub message: String,
    pub duration: Option<Duration>,
}
