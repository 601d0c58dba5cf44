//! SSH/SCP connectivity smoke test.
//!
//! Verifies that the deploy host is reachable before a rollout: the key file
//! exists, `ssh` can run a remote command, and (when a target is given) `scp`
//! can copy a file up. Exit codes are stable so launch scripts can branch on
//! them: 0 success, 2 missing key, 3 SSH failure, 4 SCP failure.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use clap::Parser;

const EXIT_MISSING_KEY: u8 = 2;
const EXIT_SSH_FAILED: u8 = 3;
const EXIT_SCP_FAILED: u8 = 4;

#[derive(Parser, Debug)]
#[command(name = "ssh-check")]
#[command(about = "Smoke-test SSH and SCP connectivity to a deploy host")]
struct Args {
    /// Remote host name or address
    #[arg(long)]
    host: String,

    /// Remote user
    #[arg(long, default_value = "deploy")]
    user: String,

    /// Private key file
    #[arg(long)]
    key: PathBuf,

    /// SSH port
    #[arg(long, default_value_t = 22)]
    port: u16,

    /// Remote directory to test SCP upload into; skips the SCP check if unset
    #[arg(long)]
    target: Option<String>,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Override the ssh binary (used by tests)
    #[arg(long, default_value = "ssh", hide = true)]
    ssh_bin: String,

    /// Override the scp binary (used by tests)
    #[arg(long, default_value = "scp", hide = true)]
    scp_bin: String,
}

fn ssh_args(args: &Args) -> Vec<String> {
    vec![
        "-i".into(),
        args.key.display().to_string(),
        "-p".into(),
        args.port.to_string(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        "StrictHostKeyChecking=accept-new".into(),
        "-o".into(),
        format!("ConnectTimeout={}", args.timeout),
        format!("{}@{}", args.user, args.host),
        "echo connectivity-ok".into(),
    ]
}

fn scp_args(args: &Args, local: &Path, target: &str) -> Vec<String> {
    vec![
        "-i".into(),
        args.key.display().to_string(),
        // scp takes a capital P for the port
        "-P".into(),
        args.port.to_string(),
        "-o".into(),
        "BatchMode=yes".into(),
        "-o".into(),
        format!("ConnectTimeout={}", args.timeout),
        local.display().to_string(),
        format!("{}@{}:{}", args.user, args.host, target),
    ]
}

fn run(program: &str, argv: &[String]) -> bool {
    match Command::new(program).args(argv).status() {
        Ok(status) => status.success(),
        Err(e) => {
            eprintln!("failed to run {}: {}", program, e);
            false
        }
    }
}

fn check(args: &Args) -> u8 {
    if !args.key.is_file() {
        eprintln!("key file not found: {}", args.key.display());
        return EXIT_MISSING_KEY;
    }

    println!("[1/2] ssh {}@{} ...", args.user, args.host);
    if !run(&args.ssh_bin, &ssh_args(args)) {
        eprintln!("SSH connection failed");
        return EXIT_SSH_FAILED;
    }

    if let Some(target) = &args.target {
        println!("[2/2] scp probe to {} ...", target);
        let probe = std::env::temp_dir().join(format!("ssh-check-{}.txt", std::process::id()));
        let write_ok = std::fs::File::create(&probe)
            .and_then(|mut f| writeln!(f, "ssh-check probe"))
            .is_ok();
        if !write_ok {
            eprintln!("could not create probe file {}", probe.display());
            return EXIT_SCP_FAILED;
        }
        let ok = run(&args.scp_bin, &scp_args(args, &probe, target));
        let _ = std::fs::remove_file(&probe);
        if !ok {
            eprintln!("SCP upload failed");
            return EXIT_SCP_FAILED;
        }
    } else {
        println!("[2/2] scp probe skipped (no --target)");
    }

    println!("All tests passed.");
    0
}

fn main() -> ExitCode {
    let args = Args::parse();
    ExitCode::from(check(&args))
}
