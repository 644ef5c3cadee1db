//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions for every resource kind owned by the
//! controller as a multi-document YAML stream.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen -- --output config/crd/crds.yaml
//!
//! # Generate and apply directly
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use clap::Parser;
use kube::core::CustomResourceExt;
use secret_access_controller::crd::{ExternalSecret, ExternalSecretAccess, ExternalSecretProvider};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "crdgen", about = "Print the controller's CRDs as YAML")]
struct Args {
    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let crds = [
        ExternalSecret::crd(),
        ExternalSecretAccess::crd(),
        ExternalSecretProvider::crd(),
    ];

    let mut stream = String::new();
    for crd in &crds {
        match serde_yaml::to_string(crd) {
            Ok(yaml) => {
                stream.push_str("---\n");
                stream.push_str(&yaml);
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }

    match args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, stream) {
                eprintln!("Failed to write {}: {e}", path.display());
                std::process::exit(1);
            }
        }
        None => print!("{stream}"),
    }
}
