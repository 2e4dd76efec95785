//! Embeds the short commit hash as the GIT_HASH compile-time env var,
//! surfaced in the startup log line.

use std::process::Command;

fn main() {
    let git_hash = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    // A new commit must rebuild the binary so the logged hash stays honest.
    println!("cargo:rerun-if-changed=.git/HEAD");
}
