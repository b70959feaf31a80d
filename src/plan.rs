//! The static compilation plan: three fixed stages compiled by independent
//! toolchain invocations, then handed to the packaging tool.
//!
//! The flag sets below are a contract with the kernel's linker script and
//! the UEFI loader; they are constructed here once and never mutated.

use std::fmt;

use crate::config::Config;

/// Build profile for a compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Debug,
    Release,
    /// Kernel test harness build (`cargo rustc --profile test`).
    Test,
}

/// Pipeline stage identifier, used for failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Bootloader,
    Kernel,
    Driver,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Bootloader => write!(f, "bootloader"),
            Stage::Kernel => write!(f, "kernel"),
            Stage::Driver => write!(f, "popfs"),
        }
    }
}

/// One package/target/flags tuple compiled by a single toolchain invocation.
///
/// Immutable once constructed. `rustc_args` go after the `--` separator,
/// which also selects the `cargo rustc` form of the invocation.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    pub stage: Stage,
    pub package: &'static str,
    pub binary: Option<&'static str>,
    pub target: String,
    /// Extra arguments before `--` (e.g. `-Zbuild-std=...`).
    pub cargo_args: Vec<String>,
    /// Arguments after `--`, passed through to the compiler.
    pub rustc_args: Vec<String>,
    /// Extra environment bindings for the invocation.
    pub env: Vec<(String, String)>,
    pub profile: Profile,
    /// Whether the pipeline requires an artifact record from this unit.
    pub expects_artifact: bool,
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Bootloader stage: plain UEFI build, no extra flags.
pub fn bootloader(config: &Config, profile: Profile) -> CompilationUnit {
    CompilationUnit {
        stage: Stage::Bootloader,
        package: "bootloader",
        binary: None,
        target: config.arch.uefi_triple().to_string(),
        cargo_args: Vec::new(),
        rustc_args: Vec::new(),
        env: Vec::new(),
        profile,
        expects_artifact: true,
    }
}

/// Kernel stage: from-source std rebuild plus the link contract the
/// bootloader depends on (exported dynamic symbols, static relocation,
/// stable mangling, unwinding panics, explicit linker script).
///
/// `junit` switches the in-kernel test harness to machine-readable output;
/// it only makes sense together with [`Profile::Test`].
pub fn kernel(config: &Config, profile: Profile, junit: bool) -> CompilationUnit {
    let mut cargo_args = strings(&[
        "-Zbuild-std=compiler_builtins,core,alloc",
        "-Zbuild-std-features=compiler-builtins-mem",
    ]);
    if junit {
        cargo_args.push("--features".to_string());
        cargo_args.push("junit".to_string());
    }

    let mut rustc_args = strings(&[
        "-C",
        "link-args=-export-dynamic",
        "-Z",
        "export-executable-symbols=on",
        "-C",
        "relocation-model=static",
        "-C",
        "symbol-mangling-version=v0",
        "-C",
        "panic=unwind",
        "-C",
        "link-args=-Tkernel/src/arch/amd64/linker.ld",
    ]);
    if profile == Profile::Test {
        rustc_args.push("--test".to_string());
    }

    CompilationUnit {
        stage: Stage::Kernel,
        package: "kernel",
        binary: None,
        target: config.arch.kernel_target().to_string(),
        cargo_args,
        rustc_args,
        env: Vec::new(),
        profile,
        expects_artifact: true,
    }
}

/// Filesystem driver stage: linked as a UEFI boot-service driver.
pub fn driver(config: &Config, profile: Profile) -> CompilationUnit {
    CompilationUnit {
        stage: Stage::Driver,
        package: "popfs",
        binary: Some("popfs_uefi_driver"),
        target: config.arch.uefi_triple().to_string(),
        cargo_args: Vec::new(),
        rustc_args: strings(&["-Z", "pre-link-args=/subsystem:efi_boot_service_driver"]),
        env: Vec::new(),
        profile,
        expects_artifact: true,
    }
}
