// Build script to generate the Authenticator gRPC stubs.
//
// Message types are hand-written prost structs in src/lib.rs, so the service
// is described with tonic-build's manual builder and no protoc is required.

use tonic_build::manual::{Builder, Method, Service};

const CODEC: &str = "tonic::codec::ProstCodec";

fn main() {
    let authenticator = Service::builder()
        .name("Authenticator")
        .package("apiv1")
        .method(
            Method::builder()
                .name("login")
                .route_name("Login")
                .input_type("crate::apiv1::LoginRequest")
                .output_type("crate::apiv1::LoginResponse")
                .codec_path(CODEC)
                .build(),
        )
        .method(
            Method::builder()
                .name("refresh")
                .route_name("Refresh")
                .input_type("crate::apiv1::TokenRefreshRequest")
                .output_type("crate::apiv1::LoginResponse")
                .codec_path(CODEC)
                .build(),
        )
        .build();

    Builder::new().compile(&[authenticator]);

    println!("cargo:rerun-if-changed=build.rs");
}
