//! Build script.
//!
//! Records the rustc version used for the build so `--version` can report
//! it alongside the crate version.

fn main() {
    let version = rustc_version::version().map(|v| v.to_string())
        .unwrap_or_else(|_| String::from("unknown"));
    println!("cargo:rustc-env=RUSTC_VERSION={}", version);
}
