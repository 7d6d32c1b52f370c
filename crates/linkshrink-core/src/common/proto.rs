//! Generated protobuf messages and gRPC client/server stubs for
//! `linkshrink.v1`.

tonic::include_proto!("linkshrink.v1");

/// Encoded file descriptor set of `linkshrink.proto`, used to serve gRPC
/// reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("linkshrink_descriptor");
