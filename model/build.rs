extern crate protoc_bin_vendored;
extern crate tonic_build;

fn main() {
    // protoc-bin-vendored provides the protoc compiler, this makes it available to
    // prost-build together with the bundled well-known types
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
    std::env::set_var("PROTOC_INCLUDE", protoc_bin_vendored::include_path().unwrap());

    let proto_files = ["proto/model.proto", "proto/storage.proto"];

    for proto in &proto_files {
        println!("cargo:rerun-if-changed={}", proto);
    }

    tonic_build::configure()
        .build_client(true)
        .compile_protos(&proto_files, &["proto"])
        .unwrap();
}
