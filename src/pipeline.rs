//! Pipeline driver.
//!
//! Sequences the compilation stages, the image assembly and the emulator
//! run for one top-level action, short-circuiting on the first failure.
//! There is no retry and no rollback; partial artifacts from a failed run
//! stay on disk for inspection.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::cargo::{self, BuildOutcome};
use crate::config::Config;
use crate::error::PipelineError;
use crate::image::{self, ImageAssemblyRequest};
use crate::plan::{self, CompilationUnit, Profile};
use crate::qemu::{self, EmulatorExit, RunMode};
use crate::report::{self, ExitClassification};

/// Requested top-level action. Exactly one per invocation.
#[derive(Debug, Clone)]
pub enum Action {
    Build {
        /// Pre-built kernel artifact; skips the kernel stage entirely.
        from_kernel_file: Option<PathBuf>,
    },
    Run,
    Test {
        coverage: Option<PathBuf>,
        junit: Option<PathBuf>,
    },
}

/// Seam between the driver and the external tools it coordinates.
///
/// The real implementation shells out to cargo and QEMU; tests substitute a
/// recording fake to verify ordering and short-circuit behavior.
pub trait Toolchain {
    fn compile(&mut self, unit: &CompilationUnit) -> Result<BuildOutcome, PipelineError>;
    fn assemble(&mut self, request: &ImageAssemblyRequest) -> Result<PathBuf, PipelineError>;
    fn launch(&mut self, image: &Path, mode: &RunMode) -> Result<EmulatorExit, PipelineError>;
}

/// Subprocess-backed toolchain.
pub struct CargoToolchain<'a> {
    config: &'a Config,
}

impl<'a> CargoToolchain<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }
}

impl Toolchain for CargoToolchain<'_> {
    fn compile(&mut self, unit: &CompilationUnit) -> Result<BuildOutcome, PipelineError> {
        cargo::invoke(self.config, unit)
    }

    fn assemble(&mut self, request: &ImageAssemblyRequest) -> Result<PathBuf, PipelineError> {
        image::assemble(self.config, request)
    }

    fn launch(&mut self, image: &Path, mode: &RunMode) -> Result<EmulatorExit, PipelineError> {
        qemu::launch(self.config, image, mode)
    }
}

/// One pipeline invocation over a toolchain.
pub struct Pipeline<'a, T: Toolchain> {
    config: &'a Config,
    toolchain: T,
}

impl<'a, T: Toolchain> Pipeline<'a, T> {
    pub fn new(config: &'a Config, toolchain: T) -> Self {
        Self { config, toolchain }
    }

    /// Recover the toolchain, e.g. to inspect a recording fake.
    pub fn into_toolchain(self) -> T {
        self.toolchain
    }

    /// Run one action to completion.
    pub fn execute(&mut self, action: &Action) -> Result<(), PipelineError> {
        match action {
            Action::Build { from_kernel_file } => {
                self.build_image(from_kernel_file.as_deref(), false, false)?;
                Ok(())
            }
            Action::Run => {
                let image = self.build_image(None, false, false)?;
                println!("Booting {}...", image.display());
                let exit = self.toolchain.launch(&image, &RunMode::Interactive)?;
                match exit.code {
                    0 => Ok(()),
                    code => Err(PipelineError::GuestCrash(code)),
                }
            }
            Action::Test { coverage, junit } => self.run_test(coverage.as_deref(), junit.as_deref()),
        }
    }

    /// Build states: bootloader, kernel (skippable), driver, assemble.
    fn build_image(
        &mut self,
        kernel_override: Option<&Path>,
        test_kernel: bool,
        junit: bool,
    ) -> Result<PathBuf, PipelineError> {
        let profile = if self.config.release {
            Profile::Release
        } else {
            Profile::Debug
        };

        let bootloader = self.compile_stage(plan::bootloader(self.config, profile))?;

        let kernel = match kernel_override {
            Some(path) => {
                println!("[SKIP] kernel build (using {})", path.display());
                path.to_path_buf()
            }
            None => {
                let kernel_profile = if test_kernel { Profile::Test } else { profile };
                self.compile_stage(plan::kernel(self.config, kernel_profile, junit))?
            }
        };

        let driver = self.compile_stage(plan::driver(self.config, profile))?;

        println!("Assembling disk image...");
        let request = ImageAssemblyRequest {
            bootloader,
            kernel,
            driver,
            out_dir: self.config.out_dir(),
        };
        let image = self.toolchain.assemble(&request)?;
        println!("Image at {}", image.display());
        Ok(image)
    }

    fn compile_stage(&mut self, unit: CompilationUnit) -> Result<PathBuf, PipelineError> {
        println!("Building {}...", unit.stage);
        match self.toolchain.compile(&unit)? {
            BuildOutcome::Artifact(path) => {
                if path.as_os_str().is_empty() && unit.expects_artifact {
                    return Err(PipelineError::MissingArtifact { stage: unit.stage });
                }
                Ok(path)
            }
            BuildOutcome::Failed(diagnostics) => Err(PipelineError::StageCompileFailure {
                stage: unit.stage,
                diagnostics,
            }),
        }
    }

    /// Headless test: build with the test kernel, boot, classify, extract.
    fn run_test(
        &mut self,
        coverage: Option<&Path>,
        junit: Option<&Path>,
    ) -> Result<(), PipelineError> {
        let image = self.build_image(None, true, junit.is_some())?;

        let mode = RunMode::HeadlessTest {
            coverage: coverage.map(Path::to_path_buf),
            capture: junit.is_some(),
        };
        println!("Running tests in {}...", self.config.qemu_binary);
        let exit = self.toolchain.launch(&image, &mode)?;

        match report::classify(exit.code) {
            ExitClassification::Success => {
                // The boot log precedes the structured report; keep it
                // inspectable on success too.
                if let Some(output) = &exit.stdout {
                    print!("{}", report::boot_log(output));
                }
            }
            ExitClassification::TestFailure => {
                // Captured output is the only record of what failed.
                if let Some(output) = &exit.stdout {
                    print!("{output}");
                }
                return Err(PipelineError::TestFailure);
            }
            ExitClassification::Other(code) => {
                if let Some(output) = &exit.stdout {
                    print!("{output}");
                }
                return Err(PipelineError::GuestCrash(code));
            }
        }

        let artifacts =
            report::collect_artifacts(coverage, junit.is_some(), exit.stdout.as_deref())?;

        if let Some(path) = junit {
            // Re-prefix the marker so the file is a complete XML document.
            let body = artifacts.junit_xml.as_deref().unwrap_or("");
            std::fs::write(path, format!("{}{}", report::JUNIT_REPORT_MARKER, body))?;
            println!("JUnit report written to {}", path.display());
        }
        if let Some(sink) = &artifacts.coverage {
            println!("Coverage dump at {}", sink.display());
        }
        println!("=== Tests passed ===");
        Ok(())
    }
}

/// Clean bypasses the state machine: one toolchain-wide clean command.
///
/// Returns the toolchain's exit code so the driver can propagate it.
/// The parallelism hint is deliberately not forwarded here; `cargo clean`
/// does not accept it.
pub fn clean(config: &Config) -> Result<i32, PipelineError> {
    let mut args = vec!["clean".to_string()];
    if config.verbosity >= 2 {
        args.push("--verbose".to_string());
    }
    if config.verbosity >= 1 {
        cargo::echo_invocation(&[], "cargo", &args);
    }

    let status = Command::new("cargo")
        .args(&args)
        .current_dir(&config.base_dir)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|source| PipelineError::ToolSpawn {
            program: "cargo".to_string(),
            source,
        })?;

    Ok(status.code().unwrap_or(-1))
}
