//! Build script for rxflow-engine
//!
//! Stamps the binary with RXFLOW_BUILD, a single provenance string
//! (package version + short git revision + UTC build date) surfaced by
//! the health probe and the audit-export provenance note.

use std::env;
use std::process::Command;

fn git_short_rev() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short=9", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let rev = String::from_utf8(output.stdout).ok()?;
    let rev = rev.trim();
    if rev.is_empty() {
        None
    } else {
        Some(rev.to_string())
    }
}

fn main() {
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let rev = git_short_rev().unwrap_or_else(|| "untracked".to_string());
    let built_on = chrono::Utc::now().format("%Y-%m-%d").to_string();

    println!("cargo:rustc-env=RXFLOW_BUILD={}+{}.{}", version, rev, built_on);

    // Re-stamp when the checked-out revision moves
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");
}
