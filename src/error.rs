//! Pipeline error taxonomy.
//!
//! Every stage failure is fatal and surfaces as one of these variants; the
//! driver performs no retry or rollback. Variants that correspond to a
//! guest-side convention carry the raw exit code so it can be propagated
//! unchanged as the process exit status.

use std::path::PathBuf;

use thiserror::Error;

use crate::cargo::Diagnostic;
use crate::plan::Stage;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A compilation stage exited non-zero. Diagnostics were already
    /// rendered to the user in emission order before this was raised.
    #[error("{stage} build failed")]
    StageCompileFailure {
        stage: Stage,
        diagnostics: Vec<Diagnostic>,
    },

    /// One line of the toolchain's machine-readable output did not parse.
    #[error("malformed build record: {line}")]
    MalformedRecord {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stage that must produce a binary emitted no artifact record.
    #[error("{stage} build produced no artifact")]
    MissingArtifact { stage: Stage },

    /// The external packaging tool exited non-zero.
    #[error("iso generation failed (exit code {code})")]
    ImageAssembly { code: i32 },

    /// A required external program is not on PATH.
    #[error("'{0}' not found in PATH. Is it installed?")]
    ToolMissing(String),

    /// Spawning an external program failed.
    #[error("failed to execute '{program}'")]
    ToolSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The guest signalled test failure through the debug-exit device.
    #[error("guest reported test failure")]
    TestFailure,

    /// The emulator exited with a code outside the guest convention.
    #[error("guest crashed or exited with unexpected code {0}")]
    GuestCrash(i32),

    /// A JUnit report was requested but the captured guest output does not
    /// contain the report marker.
    #[error("captured guest output contains no JUnit report")]
    MissingExpectedReport,

    /// A coverage dump was requested but the emulator wrote nothing to the
    /// sink path.
    #[error("coverage dump was not written to {}", .0.display())]
    MissingCoverage(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Process exit code for this failure. Non-convention guest codes are
    /// passed through verbatim so they can be correlated with emulator
    /// documentation; everything else is a plain failure.
    ///
    /// A guest that shuts down without ever writing the debug-exit device
    /// makes the emulator exit 0; that is still a failed run and must not
    /// propagate as process success.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::GuestCrash(code) if *code != 0 => *code,
            _ => 1,
        }
    }
}
