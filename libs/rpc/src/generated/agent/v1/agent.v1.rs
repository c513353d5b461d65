// @generated
// This file is @generated by prost-build.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct ObjectId {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Vector {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(float, repeated, tag = "2")]
    pub vector: ::prost::alloc::vec::Vec<f32>,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct InsertRequest {
    #[prost(message, optional, tag = "1")]
    pub vector: ::core::option::Option<Vector>,
    #[prost(bool, tag = "2")]
    pub skip_strict_exist_check: bool,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpdateRequest {
    #[prost(message, optional, tag = "1")]
    pub vector: ::core::option::Option<Vector>,
    #[prost(bool, tag = "2")]
    pub skip_strict_exist_check: bool,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UpsertRequest {
    #[prost(message, optional, tag = "1")]
    pub vector: ::core::option::Option<Vector>,
    #[prost(bool, tag = "2")]
    pub skip_strict_exist_check: bool,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct RemoveRequest {
    #[prost(message, optional, tag = "1")]
    pub id: ::core::option::Option<ObjectId>,
    #[prost(bool, tag = "2")]
    pub skip_strict_exist_check: bool,
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
}
#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct TimestampCondition {
    /// nanoseconds
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
    #[prost(enumeration = "timestamp_condition::Operator", tag = "2")]
    pub operator: i32,
}
/// Nested message and enum types in `TimestampCondition`.
pub mod timestamp_condition {
    #[derive(
        Clone,
        Copy,
        Debug,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        ::prost::Enumeration
    )]
    #[repr(i32)]
    pub enum Operator {
        Eq = 0,
        Ne = 1,
        Ge = 2,
        Gt = 3,
        Le = 4,
        Lt = 5,
    }
    impl Operator {
        /// String value of the enum field names used in the ProtoBuf definition.
        ///
        /// The values are not transformed in any way and thus are considered stable
        /// (if the ProtoBuf definition does not change) and safe for programmatic use.
        pub fn as_str_name(&self) -> &'static str {
            match self {
                Self::Eq => "EQ",
                Self::Ne => "NE",
                Self::Ge => "GE",
                Self::Gt => "GT",
                Self::Le => "LE",
                Self::Lt => "LT",
            }
        }
        /// Creates an enum from field names used in the ProtoBuf definition.
        pub fn from_str_name(value: &str) -> ::core::option::Option<Self> {
            match value {
                "EQ" => Some(Self::Eq),
                "NE" => Some(Self::Ne),
                "GE" => Some(Self::Ge),
                "GT" => Some(Self::Gt),
                "LE" => Some(Self::Le),
                "LT" => Some(Self::Lt),
                _ => None,
            }
        }
    }
}
/// Removes every object whose timestamp matches all conditions.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct RemoveByTimestampRequest {
    #[prost(message, repeated, tag = "1")]
    pub timestamps: ::prost::alloc::vec::Vec<TimestampCondition>,
}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Location {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub uuid: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "3")]
    pub ips: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Locations {
    #[prost(message, repeated, tag = "1")]
    pub locations: ::prost::alloc::vec::Vec<Location>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchConfig {
    #[prost(string, tag = "1")]
    pub request_id: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub num: u32,
    #[prost(float, tag = "3")]
    pub radius: f32,
    #[prost(float, tag = "4")]
    pub epsilon: f32,
    /// nanoseconds
    #[prost(int64, tag = "5")]
    pub timeout: i64,
    #[prost(uint32, tag = "6")]
    pub min_num: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchRequest {
    #[prost(float, repeated, tag = "1")]
    pub vector: ::prost::alloc::vec::Vec<f32>,
    #[prost(message, optional, tag = "2")]
    pub config: ::core::option::Option<SearchConfig>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchIdRequest {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub config: ::core::option::Option<SearchConfig>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Distance {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(float, tag = "2")]
    pub distance: f32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchResponse {
    #[prost(string, tag = "1")]
    pub request_id: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "2")]
    pub results: ::prost::alloc::vec::Vec<Distance>,
    /// Agents that did not contribute; set by the gateway only.
    #[prost(string, repeated, tag = "3")]
    pub warnings: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SearchResponses {
    #[prost(message, repeated, tag = "1")]
    pub responses: ::prost::alloc::vec::Vec<SearchResponse>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiInsertRequest {
    #[prost(message, repeated, tag = "1")]
    pub requests: ::prost::alloc::vec::Vec<InsertRequest>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiUpdateRequest {
    #[prost(message, repeated, tag = "1")]
    pub requests: ::prost::alloc::vec::Vec<UpdateRequest>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiUpsertRequest {
    #[prost(message, repeated, tag = "1")]
    pub requests: ::prost::alloc::vec::Vec<UpsertRequest>,
}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct MultiRemoveRequest {
    #[prost(message, repeated, tag = "1")]
    pub requests: ::prost::alloc::vec::Vec<RemoveRequest>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiSearchRequest {
    #[prost(message, repeated, tag = "1")]
    pub requests: ::prost::alloc::vec::Vec<SearchRequest>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MultiSearchIdRequest {
    #[prost(message, repeated, tag = "1")]
    pub requests: ::prost::alloc::vec::Vec<SearchIdRequest>,
}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct Status {
    /// google.rpc.Code
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct StreamLocation {
    #[prost(oneof = "stream_location::Payload", tags = "1, 2")]
    pub payload: ::core::option::Option<stream_location::Payload>,
}
/// Nested message and enum types in `StreamLocation`.
pub mod stream_location {
    #[derive(Clone, PartialEq, Eq, Hash, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Location(super::Location),
        #[prost(message, tag = "2")]
        Status(super::Status),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamSearchResponse {
    #[prost(oneof = "stream_search_response::Payload", tags = "1, 2")]
    pub payload: ::core::option::Option<stream_search_response::Payload>,
}
/// Nested message and enum types in `StreamSearchResponse`.
pub mod stream_search_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Response(super::SearchResponse),
        #[prost(message, tag = "2")]
        Status(super::Status),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamVector {
    #[prost(oneof = "stream_vector::Payload", tags = "1, 2")]
    pub payload: ::core::option::Option<stream_vector::Payload>,
}
/// Nested message and enum types in `StreamVector`.
pub mod stream_vector {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag = "1")]
        Vector(super::Vector),
        #[prost(message, tag = "2")]
        Status(super::Status),
    }
}
include!("agent.v1.tonic.rs");
// @@protoc_insertion_point(module)
