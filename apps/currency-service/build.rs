//! Build Script for Currency Service
//!
//! Generates Rust protobuf stubs from workspace proto definitions.
//!
//! # Panics Policy
//!
//! Build scripts intentionally use `.expect()` and panic on failure because:
//! - Build scripts MUST halt the build process when prerequisites are missing
//! - There is no caller to propagate errors to - the build system handles panics
//! - Descriptive panic messages guide developers to fix configuration issues
#![allow(clippy::expect_used)]

use std::{env, path::PathBuf};

fn main() {
    // Rerun build script if it changes
    println!("cargo:rerun-if-changed=build.rs");

    // Rerun if proto files change
    println!("cargo:rerun-if-changed=../../packages/proto/currency/");

    // Emit cfg for coverage detection
    if env::var("CARGO_LLVM_COV").is_ok()
        || env::var("LLVM_PROFILE_FILE").is_ok()
        || env::var("RUSTFLAGS")
            .map(|f| f.contains("instrument-coverage"))
            .unwrap_or(false)
    {
        println!("cargo:rustc-cfg=coverage");
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let proto_root = manifest_dir.join("../../packages/proto");
    let proto_files = [proto_root.join("currency/v1/currency.proto")];

    for proto in &proto_files {
        println!("cargo:rerun-if-changed={}", proto.display());
    }

    // Build the file descriptor set in-process (no protoc or buf in PATH).
    let fds = protox::compile(&proto_files, [&proto_root])
        .expect("Failed to parse currency proto definitions");

    tonic_prost_build::configure()
        .build_client(true) // Enable client for integration tests
        .build_server(true)
        .compile_fds(fds)
        .expect("Failed to compile protobuf definitions");
}
