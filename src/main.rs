//! pop - build and test driver for the Popcorn OS disk image.
//!
//! Compiles the bootloader, kernel and popfs driver as independently
//! targeted units, assembles them into a bootable image, and optionally
//! boots the image in QEMU interactively or as an automated test.

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use pop::config::{Accel, Arch, Config};
use pop::error::PipelineError;
use pop::pipeline::{self, Action, CargoToolchain, Pipeline};

#[derive(Parser)]
#[command(name = "pop")]
#[command(about = "Popcorn build and test driver")]
#[command(
    after_help = "QUICK START:\n  pop build        Build the disk image\n  pop run          Boot it in QEMU\n  pop test         Run the kernel test suite headless\n  pop clean        Remove build artifacts"
)]
struct Cli {
    /// Echo invocations (-v); also request verbose toolchain output (-vv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Target architecture
    #[arg(long, value_enum, default_value_t = ArchArg::Host, global = true)]
    arch: ArchArg,

    /// Parallelism hint forwarded to the compiler toolchain
    #[arg(short, long, global = true)]
    jobs: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the bootloader, kernel and popfs driver, then assemble the image
    Build {
        /// Optimized build
        #[arg(long)]
        release: bool,
        /// Use a pre-built kernel artifact instead of compiling the kernel
        #[arg(long, value_name = "PATH")]
        from_kernel_file: Option<PathBuf>,
    },

    /// Build the image and boot it in QEMU (interactive)
    Run {
        /// Optimized build
        #[arg(long)]
        release: bool,
        /// Hardware acceleration
        #[arg(long, value_enum, default_value_t = AccelArg::None)]
        accel: AccelArg,
    },

    /// Build the test kernel, boot headless and classify the result
    Test {
        /// Optimized build
        #[arg(long)]
        release: bool,
        /// Hardware acceleration
        #[arg(long, value_enum, default_value_t = AccelArg::None)]
        accel: AccelArg,
        /// File the guest coverage dump is written to
        #[arg(long, value_name = "PATH")]
        coverage: Option<PathBuf>,
        /// File the extracted JUnit report is written to
        #[arg(long, value_name = "PATH")]
        junit: Option<PathBuf>,
    },

    /// Clean build artifacts
    Clean,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ArchArg {
    #[value(name = "x86_64")]
    X86_64,
    Host,
}

impl From<ArchArg> for Arch {
    fn from(arch: ArchArg) -> Self {
        match arch {
            ArchArg::X86_64 => Arch::X86_64,
            ArchArg::Host => Arch::Host,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AccelArg {
    None,
    Kvm,
}

impl From<AccelArg> for Accel {
    fn from(accel: AccelArg) -> Self {
        match accel {
            AccelArg::None => Accel::None,
            AccelArg::Kvm => Accel::Kvm,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Load .env if present (emulator/firmware overrides).
    dotenvy::dotenv().ok();

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            let code = err
                .downcast_ref::<PipelineError>()
                .map_or(1, PipelineError::exit_code);
            process::exit(code);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let base_dir = std::env::current_dir().context("cannot determine working directory")?;
    let config = Config::new(&base_dir, cli.verbose, cli.arch.into(), cli.jobs);

    let (config, action) = match cli.command {
        Commands::Build {
            release,
            from_kernel_file,
        } => (
            config.with_release(release),
            Action::Build { from_kernel_file },
        ),
        Commands::Run { release, accel } => (
            config.with_release(release).with_accel(accel.into()),
            Action::Run,
        ),
        Commands::Test {
            release,
            accel,
            coverage,
            junit,
        } => (
            config.with_release(release).with_accel(accel.into()),
            Action::Test { coverage, junit },
        ),
        Commands::Clean => return Ok(pipeline::clean(&config)?),
    };

    let toolchain = CargoToolchain::new(&config);
    Pipeline::new(&config, toolchain).execute(&action)?;
    Ok(0)
}
