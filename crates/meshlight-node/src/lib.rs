//! Meshlight Node - a Generic OnOff mesh node
//!
//! Wires the OnOff server and client to a transport and a timer:
//! - [`NodeConfig`]: defaults, JSON file, `MESHLIGHT_*` environment
//! - [`provisioning`]: static credentials and address derivation
//! - [`MeshNode`]: the single-task event loop
//! - [`LogActuator`]: output reported through tracing
//!
//! # Example
//!
//! ```rust,ignore
//! use meshlight_node::{LogActuator, MeshNode, NodeConfig};
//! use meshlight_transfer::LoopbackMesh;
//! use std::sync::Arc;
//!
//! let mesh = LoopbackMesh::new();
//! let link = Arc::new(mesh.endpoint(None));
//! let (node, handle) = MeshNode::new(&NodeConfig::default(), link, LogActuator::default())?;
//! node.spawn();
//! handle.trigger().await?; // provisions
//! handle.trigger().await?; // sends SET-UNACK "on"
//! ```

pub mod actuator;
pub mod command;
pub mod config;
pub mod error;
pub mod node;
pub mod provisioning;

pub use actuator::LogActuator;
pub use command::Command;
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use node::{MeshNode, NodeEvent, NodeHandle, NodeStatus, Responder, TriggerOutcome};
pub use provisioning::{Credentials, Provisioned};
