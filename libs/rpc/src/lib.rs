//! Wire bindings for the index agents and the external filter services.
//!
//! The message and client modules under `generated/` are produced from
//! `proto/` with prost-build and tonic-prost-build and checked in, so
//! building this crate needs no protoc.

pub mod agent {
    pub mod v1 {
        include!("generated/agent/v1/agent.v1.rs");
    }
}

pub mod filter {
    pub mod v1 {
        include!("generated/filter/v1/filter.v1.rs");
    }
}
