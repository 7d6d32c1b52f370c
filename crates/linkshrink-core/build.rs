/// Builds the gRPC client and server code for `linkshrink.proto` using
/// `tonic-prost-build`.
///
/// The generated module is exposed as [`proto`](crate::proto) and a file
/// descriptor set is written next to it so the server can register gRPC
/// reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/linkshrink.proto`
/// - Includes: `proto/`
use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/");

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("linkshrink_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure().compile_with_config(
        config,
        &["proto/linkshrink.proto"],
        &["proto"],
    )?;
    Ok(())
}
