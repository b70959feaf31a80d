//! Configuration for a single pop invocation.
//!
//! The CLI layer builds one immutable `Config` and passes it down the
//! pipeline; no component reads flag state from the environment on its own.
//! Emulator and firmware locations can be overridden through environment
//! variables (or a `.env` file loaded in `main`).

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Override for the emulator binary name.
pub const ENV_QEMU: &str = "POP_QEMU";
/// Override for the read-only UEFI firmware image.
pub const ENV_OVMF_CODE: &str = "POP_OVMF_CODE";
/// Override for the writable UEFI variable store.
pub const ENV_OVMF_VARS: &str = "POP_OVMF_VARS";

/// Target architecture selector.
///
/// `Host` exists for forward compatibility; the only image architecture the
/// packaging tool understands today is x86_64, so `Host` resolves to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arch {
    X86_64,
    #[default]
    Host,
}

impl Arch {
    /// Architecture marker handed to the packaging tool.
    pub fn marker(self) -> &'static str {
        "x86_64"
    }

    /// Target triple for the UEFI-hosted stages (bootloader, popfs driver).
    pub fn uefi_triple(self) -> &'static str {
        "x86_64-unknown-uefi"
    }

    /// Custom OS target for the kernel stage.
    pub fn kernel_target(self) -> &'static str {
        "x86_64-unknown-popcorn.json"
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X86_64 => write!(f, "x86_64"),
            Arch::Host => write!(f, "host"),
        }
    }
}

/// Hardware acceleration selector for the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accel {
    #[default]
    None,
    Kvm,
}

/// Immutable per-invocation configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace root the toolchain runs in.
    pub base_dir: PathBuf,
    /// 0 = quiet, 1 = echo invocations, 2+ = verbose toolchain output.
    pub verbosity: u8,
    pub arch: Arch,
    /// Parallelism hint forwarded to the compiler toolchain.
    pub jobs: Option<u32>,
    pub release: bool,
    pub accel: Accel,
    /// Emulator binary (default `qemu-system-x86_64`).
    pub qemu_binary: String,
    pub ovmf_code: PathBuf,
    pub ovmf_vars: PathBuf,
}

impl Config {
    /// Build a configuration from CLI flags plus process environment.
    pub fn new(base_dir: &Path, verbosity: u8, arch: Arch, jobs: Option<u32>) -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_env_map(base_dir, verbosity, arch, jobs, &vars)
    }

    /// Same as [`Config::new`] but with an explicit variable map.
    pub fn from_env_map(
        base_dir: &Path,
        verbosity: u8,
        arch: Arch,
        jobs: Option<u32>,
        vars: &HashMap<String, String>,
    ) -> Self {
        let qemu_binary = vars
            .get(ENV_QEMU)
            .cloned()
            .unwrap_or_else(|| "qemu-system-x86_64".to_string());
        let ovmf_code = vars
            .get(ENV_OVMF_CODE)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("OVMF_CODE.fd"));
        let ovmf_vars = vars
            .get(ENV_OVMF_VARS)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("OVMF_VARS.fd"));

        Self {
            base_dir: base_dir.to_path_buf(),
            verbosity,
            arch,
            jobs,
            release: false,
            accel: Accel::None,
            qemu_binary,
            ovmf_code,
            ovmf_vars,
        }
    }

    pub fn with_release(mut self, release: bool) -> Self {
        self.release = release;
        self
    }

    pub fn with_accel(mut self, accel: Accel) -> Self {
        self.accel = accel;
        self
    }

    /// Profile segment of the target directory (`debug` or `release`).
    pub fn profile_segment(&self) -> &'static str {
        if self.release {
            "release"
        } else {
            "debug"
        }
    }

    /// Output directory the packaging tool writes the disk image into.
    pub fn out_dir(&self) -> PathBuf {
        self.base_dir.join("target").join(self.profile_segment())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_env_map(Path::new("/work"), 0, Arch::Host, None, &map)
    }

    #[test]
    fn defaults_without_overrides() {
        let config = config_with(&[]);
        assert_eq!(config.qemu_binary, "qemu-system-x86_64");
        assert_eq!(config.ovmf_code, PathBuf::from("OVMF_CODE.fd"));
        assert_eq!(config.ovmf_vars, PathBuf::from("OVMF_VARS.fd"));
    }

    #[test]
    fn env_overrides_take_effect() {
        let config = config_with(&[
            (ENV_QEMU, "/opt/qemu/bin/qemu-system-x86_64"),
            (ENV_OVMF_CODE, "/usr/share/OVMF/OVMF_CODE.fd"),
        ]);
        assert_eq!(config.qemu_binary, "/opt/qemu/bin/qemu-system-x86_64");
        assert_eq!(
            config.ovmf_code,
            PathBuf::from("/usr/share/OVMF/OVMF_CODE.fd")
        );
        assert_eq!(config.ovmf_vars, PathBuf::from("OVMF_VARS.fd"));
    }

    #[test]
    fn out_dir_follows_profile() {
        let config = config_with(&[]);
        assert_eq!(config.out_dir(), PathBuf::from("/work/target/debug"));
        assert_eq!(
            config.with_release(true).out_dir(),
            PathBuf::from("/work/target/release")
        );
    }

    #[test]
    fn host_arch_resolves_to_x86_64() {
        assert_eq!(Arch::Host.marker(), "x86_64");
        assert_eq!(Arch::Host.uefi_triple(), "x86_64-unknown-uefi");
        assert_eq!(Arch::Host.kernel_target(), "x86_64-unknown-popcorn.json");
    }
}
