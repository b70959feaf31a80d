//! Emulator launcher.
//!
//! Builds the QEMU argument list for the assembled disk image and runs it.
//! The drive/device shape is a contract with the guest: the kernel's test
//! harness signals completion through the isa-debug-exit device and streams
//! coverage through the debug console, so the port numbers here must match
//! the guest HAL exactly.

use std::path::Path;
use std::process::{Command, Stdio};

use crate::cargo::echo_invocation;
use crate::config::{Accel, Config};
use crate::error::PipelineError;

/// Debug-exit device the guest writes its exit value to.
pub const DEBUG_EXIT_DEVICE: &str = "isa-debug-exit,iobase=0xf4,iosize=0x04";

/// How the image should be booted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Inherit the terminal; a human watches the boot.
    Interactive,
    /// No display, automated pass/fail via the debug-exit device.
    HeadlessTest {
        /// File the emulator mirrors the guest debug console into.
        coverage: Option<std::path::PathBuf>,
        /// Buffer stdout for post-hoc report extraction.
        capture: bool,
    },
}

/// Raw result of one emulator run.
#[derive(Debug, Clone)]
pub struct EmulatorExit {
    /// Process exit code, -1 if terminated by signal.
    pub code: i32,
    /// Captured stdout, present iff capture was requested.
    pub stdout: Option<String>,
}

/// Construct the full argument list for one run.
pub fn emulator_args(config: &Config, image: &Path, mode: &RunMode) -> Vec<String> {
    let mut args = vec![
        "-drive".to_string(),
        format!(
            "if=pflash,format=raw,readonly=on,file={}",
            config.ovmf_code.display()
        ),
        "-drive".to_string(),
        format!("if=pflash,format=raw,file={}", config.ovmf_vars.display()),
        "--no-reboot".to_string(),
        "-serial".to_string(),
        "stdio".to_string(),
    ];

    if let RunMode::HeadlessTest { coverage, .. } = mode {
        args.push("-display".to_string());
        args.push("none".to_string());

        args.push("-drive".to_string());
        args.push(format!("format=raw,file={}", image.display()));

        args.push("-device".to_string());
        args.push(DEBUG_EXIT_DEVICE.to_string());

        if let Some(sink) = coverage {
            args.push("-debugcon".to_string());
            args.push(format!("file:{}", sink.display()));
        }
    } else {
        args.push("-drive".to_string());
        args.push(format!("format=raw,file={}", image.display()));
    }

    if config.accel == Accel::Kvm {
        args.push("-enable-kvm".to_string());
    }
    args
}

/// Launch the emulator and wait for it to exit.
///
/// Interactive mode inherits the terminal; headless capture buffers stdout
/// in full. The two are never mixed.
pub fn launch(config: &Config, image: &Path, mode: &RunMode) -> Result<EmulatorExit, PipelineError> {
    which::which(&config.qemu_binary)
        .map_err(|_| PipelineError::ToolMissing(config.qemu_binary.clone()))?;

    let args = emulator_args(config, image, mode);
    if config.verbosity >= 1 {
        echo_invocation(&[], &config.qemu_binary, &args);
    }

    let mut command = Command::new(&config.qemu_binary);
    command.args(&args).current_dir(&config.base_dir);

    let capture = matches!(mode, RunMode::HeadlessTest { capture: true, .. });
    if capture {
        command.stdout(Stdio::piped()).stderr(Stdio::inherit());
        let output = command.output().map_err(|source| PipelineError::ToolSpawn {
            program: config.qemu_binary.clone(),
            source,
        })?;
        Ok(EmulatorExit {
            code: output.status.code().unwrap_or(-1),
            stdout: Some(String::from_utf8_lossy(&output.stdout).into_owned()),
        })
    } else {
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let status = command.status().map_err(|source| PipelineError::ToolSpawn {
            program: config.qemu_binary.clone(),
            source,
        })?;
        Ok(EmulatorExit {
            code: status.code().unwrap_or(-1),
            stdout: None,
        })
    }
}
