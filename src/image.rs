//! Image assembler adapter.
//!
//! Hands the three stage artifacts to the external packaging tool
//! (`cargo run -p builder`) through its environment contract and derives
//! the resulting disk image path. The variable names below are consumed by
//! the builder package and must not be renamed.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::cargo::echo_invocation;
use crate::config::Config;
use crate::error::PipelineError;

pub const ENV_BOOTLOADER: &str = "CARGO_BIN_FILE_BOOTLOADER";
pub const ENV_KERNEL: &str = "CARGO_BIN_FILE_KERNEL";
pub const ENV_DRIVER: &str = "CARGO_BIN_FILE_POPFS_popfs_uefi_driver";
pub const ENV_TARGET_ARCH: &str = "CARGO_CFG_TARGET_ARCH";
pub const ENV_OUT_DIR: &str = "OUT_DIR";

/// Fixed name of the assembled disk image inside the output directory.
pub const IMAGE_FILE_NAME: &str = "popcorn2.iso";

/// Inputs for one image assembly run. Consumed once.
#[derive(Debug, Clone)]
pub struct ImageAssemblyRequest {
    pub bootloader: PathBuf,
    pub kernel: PathBuf,
    pub driver: PathBuf,
    pub out_dir: PathBuf,
}

impl ImageAssemblyRequest {
    /// Path the packaging tool writes the image to.
    pub fn image_path(&self) -> PathBuf {
        self.out_dir.join(IMAGE_FILE_NAME)
    }

    /// Environment bindings for the packaging tool.
    pub fn env_bindings(&self, arch_marker: &str) -> Vec<(String, String)> {
        vec![
            (
                ENV_BOOTLOADER.to_string(),
                self.bootloader.display().to_string(),
            ),
            (ENV_KERNEL.to_string(), self.kernel.display().to_string()),
            (ENV_DRIVER.to_string(), self.driver.display().to_string()),
            (ENV_TARGET_ARCH.to_string(), arch_marker.to_string()),
            (ENV_OUT_DIR.to_string(), self.out_dir.display().to_string()),
        ]
    }
}

/// Invoke the packaging tool. No partial-output recovery: a non-zero exit
/// fails the whole pipeline.
pub fn assemble(config: &Config, request: &ImageAssemblyRequest) -> Result<PathBuf, PipelineError> {
    let env = request.env_bindings(config.arch.marker());
    let args: Vec<String> = ["run", "-p", "builder"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if config.verbosity >= 1 {
        echo_invocation(&env, "cargo", &args);
    }

    let mut command = Command::new("cargo");
    command
        .args(&args)
        .current_dir(&config.base_dir)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    for (key, value) in &env {
        command.env(key, value);
    }

    let status = command.status().map_err(|source| PipelineError::ToolSpawn {
        program: "cargo".to_string(),
        source,
    })?;

    if !status.success() {
        return Err(PipelineError::ImageAssembly {
            code: status.code().unwrap_or(-1),
        });
    }
    Ok(request.image_path())
}
