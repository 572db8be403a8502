//! Protocol Stack Layers Library
//!
//! This crate implements the LTE sidelink protocol stack layers according to 3GPP Release 14.

pub mod mac;

use common::types::MacCid;
use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid protocol data unit")]
    InvalidPdu,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unable to find mac buffer for cid {0}")]
    MissingMacBuffer(MacCid),

    #[error("Empty buffer for cid {cid}, while expected SDUs were {expected}")]
    EmptyMacBuffer { cid: MacCid, expected: usize },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}
