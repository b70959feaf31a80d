//! Result interpreter.
//!
//! Maps the emulator's raw exit code onto the guest convention and extracts
//! test artifacts (coverage dump, JUnit report) after a headless run.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Value the guest writes to the debug-exit device on success.
pub const GUEST_SUCCESS_VALUE: u32 = 0x10;
/// Value the guest writes to the debug-exit device on test failure.
pub const GUEST_FAILURE_VALUE: u32 = 0;

/// Host-side exit status produced by a guest debug-exit write.
///
/// The device reports `(value << 1) | 1` as the emulator's own exit status;
/// this encoding is shared with the guest test harness and must stay
/// bit-exact.
pub const fn debug_exit_status(value: u32) -> i32 {
    ((value << 1) | 1) as i32
}

/// Emulator exit status meaning "all tests passed" (33).
pub const EXIT_SUCCESS: i32 = debug_exit_status(GUEST_SUCCESS_VALUE);
/// Emulator exit status meaning "a test failed" (1).
pub const EXIT_TEST_FAILURE: i32 = debug_exit_status(GUEST_FAILURE_VALUE);

/// First line of the guest's structured report; everything after the first
/// occurrence is the report body.
pub const JUNIT_REPORT_MARKER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Deterministic classification of a raw emulator exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClassification {
    Success,
    TestFailure,
    /// Anything outside the convention; the code is preserved exactly.
    Other(i32),
}

/// Pure, total exit-code mapping.
pub fn classify(code: i32) -> ExitClassification {
    match code {
        EXIT_SUCCESS => ExitClassification::Success,
        EXIT_TEST_FAILURE => ExitClassification::TestFailure,
        other => ExitClassification::Other(other),
    }
}

/// Artifacts recovered from a headless test run.
#[derive(Debug, Clone, Default)]
pub struct TestArtifacts {
    pub coverage: Option<PathBuf>,
    pub junit_xml: Option<String>,
}

/// Slice the guest's JUnit report out of captured output.
///
/// The guest prints human-readable output first, then the report; the
/// returned slice is exactly the text after the first marker occurrence.
/// A missing marker is an error, not an empty report: it means the guest
/// ran but never emitted the structured report.
pub fn extract_junit_report(output: &str) -> Result<&str, PipelineError> {
    match output.find(JUNIT_REPORT_MARKER) {
        Some(index) => Ok(&output[index + JUNIT_REPORT_MARKER.len()..]),
        None => Err(PipelineError::MissingExpectedReport),
    }
}

/// Human-readable portion of captured guest output: everything before the
/// structured report marker, or the whole capture when no report follows.
pub fn boot_log(output: &str) -> &str {
    match output.find(JUNIT_REPORT_MARKER) {
        Some(index) => &output[..index],
        None => output,
    }
}

/// Confirm the emulator wrote the coverage dump to the requested sink.
///
/// Existence check only; the dump is written by the emulator as a side
/// effect of the debug-console redirection, and an empty file is a valid
/// (if uninteresting) dump.
pub fn confirm_coverage(sink: &Path) -> Result<PathBuf, PipelineError> {
    if sink.exists() {
        Ok(sink.to_path_buf())
    } else {
        Err(PipelineError::MissingCoverage(sink.to_path_buf()))
    }
}

/// Collect requested artifacts after a successful classification.
pub fn collect_artifacts(
    coverage: Option<&Path>,
    junit_requested: bool,
    captured: Option<&str>,
) -> Result<TestArtifacts, PipelineError> {
    let mut artifacts = TestArtifacts::default();

    if let Some(sink) = coverage {
        artifacts.coverage = Some(confirm_coverage(sink)?);
    }

    if junit_requested {
        let output = captured.ok_or(PipelineError::MissingExpectedReport)?;
        artifacts.junit_xml = Some(extract_junit_report(output)?.to_string());
    }

    Ok(artifacts)
}
