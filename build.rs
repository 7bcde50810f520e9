//! Embeds build identification for the startup banner.
//!
//! None of these stamps fail the build when the tool behind them is
//! missing; the banner then shows "unknown".

use std::process::Command;

fn main() {
    println!(
        "cargo:rustc-env=BUILD_DATE={}",
        capture("date", &["+%Y-%m-%d"])
    );
    println!(
        "cargo:rustc-env=BUILD_TIME={}",
        capture("date", &["+%H:%M:%S"])
    );
    println!(
        "cargo:rustc-env=GIT_HASH={}",
        capture("git", &["rev-parse", "--short", "HEAD"])
    );

    println!("cargo:rerun-if-changed=.git/HEAD");
}

/// Trimmed stdout of a command, or "unknown" when it fails or prints nothing.
fn capture(program: &str, args: &[&str]) -> String {
    let output = match Command::new(program).args(args).output() {
        Ok(output) if output.status.success() => output,
        _ => return "unknown".into(),
    };
    let stamp = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stamp.is_empty() {
        "unknown".into()
    } else {
        stamp
    }
}
