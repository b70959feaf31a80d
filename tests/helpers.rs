//! Shared test utilities: a recording fake toolchain and config fixtures.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use pop::cargo::{BuildOutcome, Diagnostic};
use pop::config::{Arch, Config};
use pop::error::PipelineError;
use pop::image::ImageAssemblyRequest;
use pop::pipeline::Toolchain;
use pop::plan::{CompilationUnit, Stage};
use pop::qemu::{EmulatorExit, RunMode};

/// Config rooted at a throwaway path, no env overrides.
pub fn test_config(base_dir: &Path) -> Config {
    Config::from_env_map(base_dir, 0, Arch::Host, None, &HashMap::new())
}

/// Toolchain double that records every call instead of spawning processes.
#[derive(Default)]
pub struct FakeToolchain {
    /// Every compiled unit, in invocation order.
    pub compiled: Vec<CompilationUnit>,
    /// Every assembly request, in invocation order.
    pub assembled: Vec<ImageAssemblyRequest>,
    /// Every emulator launch, in invocation order.
    pub launched: Vec<(PathBuf, RunMode)>,

    /// Stage whose compilation should report failure.
    pub fail_stage: Option<Stage>,
    pub fail_diagnostics: Vec<Diagnostic>,
    /// Report a non-zero packaging tool exit.
    pub assemble_fails: bool,
    /// Emulator exit code to report.
    pub exit_code: i32,
    /// Guest stdout, handed back when the mode requests capture.
    pub guest_output: Option<String>,
}

impl FakeToolchain {
    pub fn passing() -> Self {
        Self {
            exit_code: 0,
            ..Self::default()
        }
    }

    /// Stage names in invocation order, for ordering assertions.
    pub fn stage_order(&self) -> Vec<String> {
        self.compiled
            .iter()
            .map(|unit| unit.stage.to_string())
            .collect()
    }
}

impl Toolchain for FakeToolchain {
    fn compile(&mut self, unit: &CompilationUnit) -> Result<BuildOutcome, PipelineError> {
        self.compiled.push(unit.clone());
        if self.fail_stage == Some(unit.stage) {
            return Ok(BuildOutcome::Failed(self.fail_diagnostics.clone()));
        }
        Ok(BuildOutcome::Artifact(PathBuf::from(format!(
            "target/fake/{}.bin",
            unit.stage
        ))))
    }

    fn assemble(&mut self, request: &ImageAssemblyRequest) -> Result<PathBuf, PipelineError> {
        self.assembled.push(request.clone());
        if self.assemble_fails {
            return Err(PipelineError::ImageAssembly { code: 1 });
        }
        Ok(request.image_path())
    }

    fn launch(&mut self, image: &Path, mode: &RunMode) -> Result<EmulatorExit, PipelineError> {
        self.launched.push((image.to_path_buf(), mode.clone()));

        // Mirror the emulator side effect: the debug console redirection
        // writes the coverage dump to the sink path.
        if let RunMode::HeadlessTest {
            coverage: Some(sink),
            ..
        } = mode
        {
            fs::write(sink, b"").expect("failed to write fake coverage dump");
        }

        let capture = matches!(mode, RunMode::HeadlessTest { capture: true, .. });
        Ok(EmulatorExit {
            code: self.exit_code,
            stdout: if capture { self.guest_output.clone() } else { None },
        })
    }
}
