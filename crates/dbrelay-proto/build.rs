use std::io::Result;

fn main() -> Result<()> {
    // Fall back to the vendored compiler when no system protoc is configured.
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(path) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", path);
        }
    }

    println!("cargo:rerun-if-changed=proto/dbrelay.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .bytes(["."])
        .compile_protos(&["proto/dbrelay.proto"], &["proto"])?;
    Ok(())
}
