// build.rs - Build information export for the alarm registry
//
// Exposes build metadata as compile-time environment variables consumed by
// `alarm_registry::build_info`.

use std::env;
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=build.rs");

    set_build_env_vars();
    check_feature_combinations();
}

/// Set build environment variables that the code expects
fn set_build_env_vars() {
    println!(
        "cargo:rustc-env=ALARM_REGISTRY_BUILD_TIMESTAMP={}",
        chrono::Utc::now().to_rfc3339()
    );

    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let rustc_version = Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=ALARM_REGISTRY_RUST_VERSION={}", rustc_version);

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=ALARM_REGISTRY_TARGET={}", target);

    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=ALARM_REGISTRY_PROFILE={}", profile);

    // Only exported when the build runs inside a git checkout
    if let Ok(output) = Command::new("git").args(["rev-parse", "HEAD"]).output() {
        if output.status.success() {
            if let Ok(git_hash) = String::from_utf8(output.stdout) {
                println!("cargo:rustc-env=ALARM_REGISTRY_GIT_HASH={}", git_hash.trim());
            }
        }
    }
}

/// Warn about feature sets that build but are of little use
fn check_feature_combinations() {
    let tcp = env::var("CARGO_FEATURE_TCP_TRANSPORT").is_ok();
    let cli = env::var("CARGO_FEATURE_CLI").is_ok();

    if !tcp && !cli {
        println!(
            "cargo:warning=Building without 'tcp-transport': only the in-process transport is available"
        );
    }
}
