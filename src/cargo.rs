//! Structured build invoker.
//!
//! Runs one compilation unit as a `cargo` subprocess with machine-readable
//! output and folds the record stream into a [`BuildOutcome`]. The stream is
//! newline-delimited JSON; each line is one self-describing record tagged by
//! a `reason` field. Unknown reasons are tolerated, an unparseable line is
//! fatal to the whole invocation.

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use serde::Deserialize;

use crate::config::Config;
use crate::error::PipelineError;
use crate::plan::{CompilationUnit, Profile};

/// Result of one compilation stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Primary filename of the last artifact record in the stream. Empty
    /// when the invocation emitted no artifact record at all.
    Artifact(PathBuf),
    /// Non-zero exit; diagnostics in emission order.
    Failed(Vec<Diagnostic>),
}

/// Diagnostic severity, folded down from the toolchain's `level` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl Severity {
    fn from_level(level: &str) -> Self {
        // "error" also covers "error: internal compiler error".
        if level.starts_with("error") {
            Severity::Error
        } else if level == "warning" {
            Severity::Warning
        } else {
            Severity::Note
        }
    }

    /// ANSI-coloured tag for terminal rendering.
    fn tag(self) -> &'static str {
        match self {
            Severity::Error => "\x1b[1;31merror\x1b[0m",
            Severity::Warning => "\x1b[1;33mwarning\x1b[0m",
            Severity::Note => "\x1b[1mnote\x1b[0m",
        }
    }
}

/// One compiler diagnostic, in toolchain emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub rendered: String,
    pub spans: Vec<DiagnosticSpan>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity.tag(), self.rendered.trim_end())
    }
}

/// Source location attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiagnosticSpan {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub line_start: usize,
    #[serde(default)]
    pub column_start: usize,
}

/// One parsed line of the toolchain's streamed output.
#[derive(Debug, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum StructuredRecord {
    CompilerArtifact {
        filenames: Vec<PathBuf>,
    },
    CompilerMessage {
        message: CompilerMessage,
    },
    /// Any reason this driver does not consume (build scripts, unit graphs,
    /// future toolchain additions).
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompilerMessage {
    pub rendered: String,
    pub level: String,
    #[serde(default)]
    pub spans: Vec<DiagnosticSpan>,
}

impl From<CompilerMessage> for Diagnostic {
    fn from(message: CompilerMessage) -> Self {
        Diagnostic {
            severity: Severity::from_level(&message.level),
            rendered: message.rendered,
            spans: message.spans,
        }
    }
}

/// Parse the full captured stream, one record per non-empty line.
pub fn parse_records(stdout: &str) -> Result<Vec<StructuredRecord>, PipelineError> {
    let mut records = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record = serde_json::from_str(line).map_err(|source| {
            PipelineError::MalformedRecord {
                line: line.to_string(),
                source,
            }
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Fold a record stream into an outcome.
///
/// On failure the artifact records are ignored entirely; on success the last
/// artifact record wins since later records supersede earlier partial
/// outputs.
pub fn outcome_from_records(success: bool, records: Vec<StructuredRecord>) -> BuildOutcome {
    if !success {
        let diagnostics = records
            .into_iter()
            .filter_map(|record| match record {
                StructuredRecord::CompilerMessage { message } => Some(Diagnostic::from(message)),
                _ => None,
            })
            .collect();
        return BuildOutcome::Failed(diagnostics);
    }

    for record in records.iter().rev() {
        if let StructuredRecord::CompilerArtifact { filenames } = record {
            if let Some(first) = filenames.first() {
                return BuildOutcome::Artifact(first.clone());
            }
        }
    }
    BuildOutcome::Artifact(PathBuf::new())
}

/// Full argument vector for one unit, after the `cargo` program name.
///
/// `cargo build` when there are no compiler passthrough flags, `cargo rustc`
/// otherwise.
pub fn invocation_args(config: &Config, unit: &CompilationUnit) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    args.push(if unit.rustc_args.is_empty() {
        "build".to_string()
    } else {
        "rustc".to_string()
    });

    if config.verbosity >= 2 {
        args.push("--verbose".to_string());
    }
    if let Some(jobs) = config.jobs {
        args.push("--jobs".to_string());
        args.push(jobs.to_string());
    }
    match unit.profile {
        Profile::Debug => {}
        Profile::Release => args.push("--release".to_string()),
        Profile::Test => {
            args.push("--profile".to_string());
            args.push("test".to_string());
        }
    }

    args.push("-p".to_string());
    args.push(unit.package.to_string());
    if let Some(binary) = unit.binary {
        args.push("--bin".to_string());
        args.push(binary.to_string());
    }
    args.push("--target".to_string());
    args.push(unit.target.clone());
    args.extend(unit.cargo_args.iter().cloned());
    args.push("--message-format=json".to_string());

    if !unit.rustc_args.is_empty() {
        args.push("--".to_string());
        args.extend(unit.rustc_args.iter().cloned());
    }
    args
}

/// Render an invocation (env overrides plus argv) as one reproducible line.
pub fn render_invocation(env: &[(String, String)], program: &str, args: &[String]) -> String {
    let mut line = String::new();
    for (key, value) in env {
        line.push_str(key);
        line.push('=');
        line.push_str(value);
        line.push(' ');
    }
    line.push_str(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Echo an invocation to the diagnostic stream before execution.
pub fn echo_invocation(env: &[(String, String)], program: &str, args: &[String]) {
    eprintln!("{}", render_invocation(env, program, args));
}

/// Render failure diagnostics to the user, preserving emission order.
pub fn render_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        eprintln!("{diagnostic}");
    }
}

/// Run one compilation unit and interpret its structured output.
pub fn invoke(config: &Config, unit: &CompilationUnit) -> Result<BuildOutcome, PipelineError> {
    let args = invocation_args(config, unit);
    if config.verbosity >= 1 {
        echo_invocation(&unit.env, "cargo", &args);
    }

    let mut command = Command::new("cargo");
    command
        .args(&args)
        .current_dir(&config.base_dir)
        .stderr(Stdio::inherit());
    for (key, value) in &unit.env {
        command.env(key, value);
    }

    let output = command.output().map_err(|source| PipelineError::ToolSpawn {
        program: "cargo".to_string(),
        source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let records = parse_records(&stdout)?;
    let outcome = outcome_from_records(output.status.success(), records);
    if let BuildOutcome::Failed(diagnostics) = &outcome {
        render_diagnostics(diagnostics);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Arch;
    use crate::plan;
    use std::collections::HashMap;
    use std::path::Path;

    fn config() -> Config {
        Config::from_env_map(Path::new("/work"), 0, Arch::Host, None, &HashMap::new())
    }

    fn artifact_line(name: &str) -> String {
        format!(
            r#"{{"reason":"compiler-artifact","package_id":"x","filenames":["{name}"],"fresh":false}}"#
        )
    }

    fn message_line(level: &str, rendered: &str) -> String {
        format!(
            r#"{{"reason":"compiler-message","message":{{"rendered":"{rendered}","level":"{level}","spans":[]}}}}"#
        )
    }

    #[test]
    fn last_artifact_record_wins() {
        let stdout = [
            message_line("warning", "unused variable"),
            artifact_line("target/debug/deps/libkernel.rlib"),
            artifact_line("target/x86_64-unknown-popcorn/debug/kernel.exec"),
            message_line("note", "finished"),
        ]
        .join("\n");

        let records = parse_records(&stdout).unwrap();
        let outcome = outcome_from_records(true, records);
        assert_eq!(
            outcome,
            BuildOutcome::Artifact(PathBuf::from(
                "target/x86_64-unknown-popcorn/debug/kernel.exec"
            ))
        );
    }

    #[test]
    fn no_artifact_record_yields_empty_path() {
        let records = parse_records(&message_line("warning", "w")).unwrap();
        let outcome = outcome_from_records(true, records);
        assert_eq!(outcome, BuildOutcome::Artifact(PathBuf::new()));
    }

    #[test]
    fn failure_collects_diagnostics_in_emission_order() {
        let stdout = [
            message_line("error", "expected `;`"),
            artifact_line("target/debug/partial.rlib"),
            message_line("warning", "unused import"),
        ]
        .join("\n");

        let records = parse_records(&stdout).unwrap();
        let outcome = outcome_from_records(false, records);
        let BuildOutcome::Failed(diagnostics) = outcome else {
            panic!("expected Failed outcome");
        };
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[0].rendered, "expected `;`");
        assert_eq!(diagnostics[1].severity, Severity::Warning);
    }

    #[test]
    fn unknown_reason_is_tolerated() {
        let stdout = [
            r#"{"reason":"build-script-executed","package_id":"x","out_dir":"/tmp"}"#.to_string(),
            artifact_line("target/debug/bootloader.efi"),
        ]
        .join("\n");

        let records = parse_records(&stdout).unwrap();
        assert!(matches!(records[0], StructuredRecord::Other));
        let outcome = outcome_from_records(true, records);
        assert_eq!(
            outcome,
            BuildOutcome::Artifact(PathBuf::from("target/debug/bootloader.efi"))
        );
    }

    #[test]
    fn malformed_line_is_fatal() {
        let stdout = format!("{}\nnot json at all", artifact_line("a.efi"));
        let err = parse_records(&stdout).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedRecord { .. }));
    }

    #[test]
    fn severity_mapping() {
        assert_eq!(Severity::from_level("error"), Severity::Error);
        assert_eq!(
            Severity::from_level("error: internal compiler error"),
            Severity::Error
        );
        assert_eq!(Severity::from_level("warning"), Severity::Warning);
        assert_eq!(Severity::from_level("note"), Severity::Note);
        assert_eq!(Severity::from_level("help"), Severity::Note);
    }

    #[test]
    fn build_form_for_units_without_rustc_args() {
        let unit = plan::bootloader(&config(), Profile::Debug);
        let args = invocation_args(&config(), &unit);
        assert_eq!(
            args,
            vec![
                "build",
                "-p",
                "bootloader",
                "--target",
                "x86_64-unknown-uefi",
                "--message-format=json",
            ]
        );
    }

    #[test]
    fn rustc_form_for_units_with_passthrough_flags() {
        let unit = plan::driver(&config(), Profile::Debug);
        let args = invocation_args(&config(), &unit);
        assert_eq!(args[0], "rustc");
        assert!(args.contains(&"--bin".to_string()));
        assert!(args.contains(&"popfs_uefi_driver".to_string()));
        let sep = args.iter().position(|a| a == "--").unwrap();
        assert_eq!(args[sep + 1..], ["-Z", "pre-link-args=/subsystem:efi_boot_service_driver"]);
        // Machine-readable output requested before the separator.
        assert!(args[..sep].contains(&"--message-format=json".to_string()));
    }

    #[test]
    fn common_flags_are_threaded() {
        let mut config = config();
        config.verbosity = 2;
        config.jobs = Some(4);
        let unit = plan::bootloader(&config, Profile::Release);
        let args = invocation_args(&config, &unit);
        assert_eq!(args[1], "--verbose");
        assert_eq!(&args[2..4], ["--jobs", "4"]);
        assert!(args.contains(&"--release".to_string()));
    }

    #[test]
    fn rendered_invocation_shows_env_then_argv() {
        let env = vec![
            ("OUT_DIR".to_string(), "target/debug".to_string()),
            ("CARGO_CFG_TARGET_ARCH".to_string(), "x86_64".to_string()),
        ];
        let args = vec!["run".to_string(), "-p".to_string(), "builder".to_string()];
        assert_eq!(
            render_invocation(&env, "cargo", &args),
            "OUT_DIR=target/debug CARGO_CFG_TARGET_ARCH=x86_64 cargo run -p builder"
        );
    }

    #[test]
    fn rendered_invocation_without_env_is_just_argv() {
        let unit = plan::bootloader(&config(), Profile::Debug);
        let args = invocation_args(&config(), &unit);
        assert_eq!(
            render_invocation(&unit.env, "cargo", &args),
            "cargo build -p bootloader --target x86_64-unknown-uefi --message-format=json"
        );
    }

    #[test]
    fn test_profile_selects_test_build() {
        let unit = plan::kernel(&config(), Profile::Test, false);
        let args = invocation_args(&config(), &unit);
        let profile = args.iter().position(|a| a == "--profile").unwrap();
        assert_eq!(args[profile + 1], "test");
        assert_eq!(args.last(), Some(&"--test".to_string()));
    }
}
