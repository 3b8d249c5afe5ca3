fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/../../proto");
    let proto_path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../proto/trainwatch.proto");
    println!("cargo:rerun-if-changed={proto_path}");
    println!("cargo:rerun-if-env-changed=PROTOC");

    // A configured PROTOC wins; otherwise use the vendored binary.
    let mut config = prost_build::Config::new();
    if std::env::var_os("PROTOC").is_none() {
        config.protoc_executable(protoc_bin_vendored::protoc_bin_path()?);
    }

    tonic_prost_build::configure().compile_with_config(
        config,
        &[proto_path],
        &[proto_dir],
    )?;
    Ok(())
}
