// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CRD YAML Generator
//!
//! Writes one YAML manifest per custom resource defined in `src/crd.rs`.
//!
//! Usage:
//!   cargo run --bin crdgen -- [--output-dir deploy/crds]

use clap::Parser;
use kube::CustomResourceExt;
use std::fs;
use std::path::{Path, PathBuf};
use topohub::crd::{BindingIp, HostEndpoint, HostOperation, RedfishStatus, SshStatus, Subnet};

const COPYRIGHT_HEADER: &str = "# Copyright (c) 2025 Erick Bourgeois, firestoned
# SPDX-License-Identifier: MIT
#
# This file is AUTO-GENERATED from src/crd.rs
# DO NOT EDIT MANUALLY - Run `cargo run --bin crdgen` to regenerate
#
";

/// Generate topohub CRD manifests.
#[derive(Debug, Parser)]
#[command(name = "crdgen", version, about)]
struct Args {
    /// Directory the manifests are written to.
    #[arg(long, default_value = "deploy/crds")]
    output_dir: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let output_dir = args.output_dir.as_path();

    fs::create_dir_all(output_dir)?;

    println!("Generating CRD YAML files from src/crd.rs...");

    generate_crd::<Subnet>("subnets.crd.yaml", output_dir)?;
    generate_crd::<BindingIp>("bindingips.crd.yaml", output_dir)?;
    generate_crd::<HostEndpoint>("hostendpoints.crd.yaml", output_dir)?;
    generate_crd::<RedfishStatus>("redfishstatuses.crd.yaml", output_dir)?;
    generate_crd::<SshStatus>("sshstatuses.crd.yaml", output_dir)?;
    generate_crd::<HostOperation>("hostoperations.crd.yaml", output_dir)?;

    println!(
        "✓ Successfully generated CRD YAML files in {}",
        output_dir.display()
    );
    println!("\nNext steps:");
    println!("  1. Review the generated files");
    println!("  2. Deploy with: kubectl apply -f {}", output_dir.display());

    Ok(())
}

fn generate_crd<T>(filename: &str, output_dir: &Path) -> Result<(), Box<dyn std::error::Error>>
where
    T: CustomResourceExt,
{
    let yaml = serde_yaml::to_string(&T::crd())?;
    let output_path = output_dir.join(filename);
    fs::write(&output_path, format!("{COPYRIGHT_HEADER}{yaml}"))?;

    println!("  ✓ Generated {filename}");

    Ok(())
}
