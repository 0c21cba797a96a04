//! Generated protobuf and gRPC code for controller/agent communication.
//!
//! Agents initiate outbound connections to the controller. After
//! enrollment they open `AgentDispatch::ControlStream`, a bidirectional
//! stream the controller uses as its reverse-dial transport: commands
//! flow controller-to-agent, replies flow back matched by `command_id`.

#![allow(missing_docs)]

pub mod v1 {
    tonic::include_proto!("controller.v1");
}

pub use v1::*;
