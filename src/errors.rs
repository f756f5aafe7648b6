//! Error types for the lab engine and its substrates

use crate::node::NodeId;
use crate::topology::Phase;
use std::fmt;
use thiserror::Error;

/// Errors raised by a substrate backend while touching a node's stack.
#[derive(Error, Debug)]
pub enum SubstrateError {
    #[error("command failed: {command}: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stack '{0}' does not exist")]
    UnknownStack(String),

    #[error("interface '{interface}' does not exist in stack '{stack}'")]
    UnknownInterface { stack: String, interface: String },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("injected failure: {0}")]
    Injected(String),
}

/// The declaration materialization was working on when it failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MaterializationTarget {
    Node(NodeId),
    Link {
        index: usize,
        a: NodeId,
        b: NodeId,
    },
    Address {
        node: NodeId,
        interface: String,
    },
}

impl fmt::Display for MaterializationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node '{id}'"),
            Self::Link { index, a, b } => write!(f, "link #{index} ({a} <-> {b})"),
            Self::Address { node, interface } => {
                write!(f, "primary address of '{node}' on {interface}")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum LabError {
    #[error("node '{0}' is already declared")]
    DuplicateNode(NodeId),

    #[error("node '{0}' is not declared")]
    UnknownNode(NodeId),

    #[error("interface '{interface}' is already used on node '{node}'")]
    DuplicateInterface { node: NodeId, interface: String },

    #[error("invalid interface name '{0}'")]
    InvalidInterfaceName(String),

    #[error("node '{0}' is not a switch")]
    NotASwitch(NodeId),

    #[error("invalid address '{value}': {reason}")]
    InvalidAddress { value: String, reason: String },

    #[error("failed to materialize {target}: {source}")]
    Materialization {
        target: MaterializationTarget,
        source: SubstrateError,
    },

    #[error("failed to configure '{node}': {reason}")]
    RouteApplication { node: NodeId, reason: String },

    #[error("{operation} is not allowed while the topology is {phase}")]
    OutOfPhase {
        operation: &'static str,
        phase: Phase,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LabError>;
