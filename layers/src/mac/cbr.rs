//! Channel Busy Ratio Policy
//!
//! Maps the most recent CBR measurement onto effective transmission bounds.
//! The congested channel narrows the MCS range, the subchannel count and the
//! number of retransmissions a reservation may use.

use tracing::trace;

use crate::mac::config::MacConfig;

/// Effective transmission bounds after CBR adaptation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxBounds {
    pub min_mcs: u8,
    pub max_mcs: u8,
    pub min_subchannels: usize,
    pub max_subchannels: usize,
    pub allowed_retx: u8,
}

impl TxBounds {
    fn base(config: &MacConfig, allowed_retx: u8) -> Self {
        Self {
            min_mcs: config.min_mcs,
            max_mcs: config.max_mcs,
            min_subchannels: config.min_subchannels,
            max_subchannels: config.max_subchannels,
            allowed_retx,
        }
    }
}

/// Tx-config index for a CBR value: the first level whose upper bound the
/// value stays below, the default index otherwise.
pub fn cbr_index(config: &MacConfig, cbr: u16) -> usize {
    for level in &config.cbr_levels {
        if cbr < level.upper {
            return level.tx_config_index;
        }
    }
    config.default_cbr_index
}

/// Compute the effective bounds for the current CBR value.
///
/// `allowed_retx` is the caller's current retransmission allowance; the
/// result never exceeds it. With `useCBR` disabled the base bounds are
/// returned unchanged.
pub fn effective_bounds(config: &MacConfig, allowed_retx: u8, cbr: u16) -> TxBounds {
    if !config.use_cbr {
        return TxBounds::base(config, allowed_retx);
    }

    let index = cbr_index(config, cbr);
    let entry = &config.cbr_tx_configs[index];

    let mut bounds = TxBounds::base(config, allowed_retx.min(entry.allowed_retx));

    let disjoint = config.max_mcs < entry.min_mcs || entry.max_mcs < config.min_mcs;
    if disjoint {
        // No MCS overlap: the CBR entry wins outright. Taking the base
        // instead would be equally standards-compliant; the choice is the UE's.
        bounds.min_mcs = entry.min_mcs;
        bounds.max_mcs = entry.max_mcs;
        bounds.min_subchannels = entry.min_subchannels;
        bounds.max_subchannels = entry.max_subchannels;
    } else {
        bounds.min_mcs = config.min_mcs.max(entry.min_mcs);
        bounds.max_mcs = config.max_mcs.min(entry.max_mcs);
        bounds.min_subchannels = config.min_subchannels.max(entry.min_subchannels);
        bounds.max_subchannels = config.max_subchannels.min(entry.max_subchannels);
    }

    trace!(
        cbr,
        index,
        min_mcs = bounds.min_mcs,
        max_mcs = bounds.max_mcs,
        "applied CBR tx bounds"
    );

    bounds
}
