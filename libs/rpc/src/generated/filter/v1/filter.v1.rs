// @generated
// This file is @generated by prost-build.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DistanceList {
    #[prost(message, repeated, tag = "1")]
    pub distances: ::prost::alloc::vec::Vec<super::super::agent::v1::Distance>,
}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Object {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "2")]
    pub object: ::prost::alloc::vec::Vec<u8>,
}
include!("filter.v1.tonic.rs");
// @@protoc_insertion_point(module)
