fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Vendored protoc so builds do not depend on a system installation.
    let protoc = protoc_bin_vendored::protoc_bin_path()?;
    std::env::set_var("PROTOC", protoc);

    println!("cargo:rerun-if-changed=proto/sns.proto");
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/sns.proto"], &["proto/"])?;

    Ok(())
}
