use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const LAMBDA_PACKAGE: &str = "replication_lambda";
const LAMBDA_BIN: &str = "replicator";

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the config-data replication workspace"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks
    Ci {
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Run only the end-to-end replication scenarios
    Scenarios,
    /// Release-build the replicator for `target` and zip it as `bootstrap`
    /// for the provided.al2023 runtime
    Package {
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        #[arg(long, env = "REPLICATOR_DIST_DIR", default_value = "dist")]
        out_dir: PathBuf,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Tests only
    Test,
    /// Check plus a release build of the Lambda binary
    All,
}

/// Runs cargo, exiting with its status code on failure.
fn cargo(label: &str, args: &[&str]) {
    eprintln!("\n=== {label} ===\n+ cargo {}", args.join(" "));
    let status = Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo");
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn ci(job: CiJob) {
    if matches!(job, CiJob::Check | CiJob::All) {
        cargo("Check formatting", &["fmt", "--all", "--", "--check"]);
        cargo(
            "Clippy",
            &["clippy", "--all-targets", "--", "-D", "warnings"],
        );
    }
    cargo("Test workspace", &["test", "--workspace"]);
    if matches!(job, CiJob::All) {
        cargo(
            "Release build",
            &["build", "-p", LAMBDA_PACKAGE, "--bin", LAMBDA_BIN, "--release"],
        );
    }
}

fn package(target: &str, out_dir: &Path) {
    cargo(
        "Build replicator",
        &[
            "build", "-p", LAMBDA_PACKAGE, "--bin", LAMBDA_BIN, "--release", "--target", target,
        ],
    );

    let binary_path = Path::new("target").join(target).join("release").join(LAMBDA_BIN);
    let binary = fs::read(&binary_path)
        .unwrap_or_else(|error| panic!("reading {}: {error}", binary_path.display()));
    fs::create_dir_all(out_dir).expect("failed to create dist directory");

    let zip_path = out_dir.join(format!("{LAMBDA_BIN}.zip"));
    let mut zip = ZipWriter::new(fs::File::create(&zip_path).expect("failed to create zip"));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file("bootstrap", options)
        .expect("failed to start bootstrap entry");
    zip.write_all(&binary).expect("failed to write bootstrap entry");
    zip.finish().expect("failed to finish zip");

    eprintln!("\nPackaged {}", zip_path.display());
}

fn main() {
    match Cli::parse().command {
        Commands::Ci { job } => {
            ci(job);
            eprintln!("\nCI job passed.");
        }
        Commands::Scenarios => cargo(
            "Replication scenarios",
            &["test", "-p", LAMBDA_PACKAGE, "--test", "replication_scenarios"],
        ),
        Commands::Package { target, out_dir } => package(&target, &out_dir),
    }
}
