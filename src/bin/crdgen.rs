//! # CRD Generator
//!
//! Prints the `VaultSecret` CustomResourceDefinition as YAML.
//!
//! ```bash
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use secrets_broker::crd::VaultSecret;

fn main() {
    match serde_yaml::to_string(&VaultSecret::crd()) {
        Ok(yaml) => {
            println!("# Generated by crdgen from src/crd/spec.rs, do not edit");
            println!("---");
            print!("{yaml}");
        }
        Err(e) => {
            eprintln!("Failed to serialize CRD to YAML: {e}");
            std::process::exit(1);
        }
    }
}
