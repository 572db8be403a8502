//! Validated MAC Configuration
//!
//! Immutable view of the sidelink transmission parameters after the
//! configuration document has been parsed. Construction happens in the UE
//! binary; everything here is checked once and never mutated afterwards.

use common::types::MacNodeId;

use crate::mac::amc::{MAX_MCS_PSSCH, TBS_MAX_PRB};
use crate::LayerError;

/// One CBR occupancy level mapping to a tx-config entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbrLevel {
    /// Inclusive lower bound of the channel busy ratio for this level
    pub lower: u16,
    /// Exclusive upper bound of the channel busy ratio for this level
    pub upper: u16,
    /// Index into the tx-config table applied at this level
    pub tx_config_index: usize,
}

/// Transmission bounds applied at one CBR level
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CbrTxConfig {
    pub min_mcs: u8,
    pub max_mcs: u8,
    pub min_subchannels: usize,
    pub max_subchannels: usize,
    pub allowed_retx: u8,
    /// Channel occupancy ratio limit carried in the config, not enforced here
    pub cr_limit: Option<u32>,
}

/// Validated sidelink MAC configuration
#[derive(Debug, Clone)]
pub struct MacConfig {
    /// Local MAC node id
    pub node_id: MacNodeId,
    /// Serving cell id (keys the DL HARQ rx buffer)
    pub cell_id: MacNodeId,
    pub min_mcs: u8,
    pub max_mcs: u8,
    pub min_subchannels: usize,
    pub max_subchannels: usize,
    /// Retransmissions allowed per HARQ process
    pub allowed_retx: u8,
    /// Resource blocks per subchannel
    pub subchannel_size: usize,
    /// Subchannels in the sidelink band
    pub num_subchannels: usize,
    /// Probability of keeping the reservation at the terminal tick
    pub prob_resource_keep: f64,
    /// Missed transmissions tolerated before the grant is broken
    pub reselect_after: u32,
    pub use_cbr: bool,
    pub use_preconfigured_tx_params: bool,
    /// Tx-config index applied when no CBR level matches
    pub default_cbr_index: usize,
    pub cbr_levels: Vec<CbrLevel>,
    pub cbr_tx_configs: Vec<CbrTxConfig>,
    /// Allowed resource reservation intervals; the first entry is active
    pub valid_rris: Vec<u32>,
    /// HARQ processes per tx buffer
    pub harq_processes: usize,
}

impl MacConfig {
    /// Check every invariant the rest of the MAC relies on. Any failure here
    /// is fatal at startup.
    pub fn validate(&self) -> Result<(), LayerError> {
        if self.valid_rris.is_empty() {
            return Err(LayerError::InvalidConfiguration(
                "RestrictResourceReservationPeriodList is empty".into(),
            ));
        }
        if self.max_mcs > MAX_MCS_PSSCH || self.min_mcs > self.max_mcs {
            return Err(LayerError::InvalidConfiguration(format!(
                "invalid PSSCH MCS range [{}, {}]",
                self.min_mcs, self.max_mcs
            )));
        }
        if self.min_subchannels == 0 || self.min_subchannels > self.max_subchannels {
            return Err(LayerError::InvalidConfiguration(format!(
                "invalid PSSCH subchannel range [{}, {}]",
                self.min_subchannels, self.max_subchannels
            )));
        }
        if self.max_subchannels > self.num_subchannels {
            return Err(LayerError::InvalidConfiguration(format!(
                "maxSubchannel-NumberPSSCH {} exceeds the {} configured subchannels",
                self.max_subchannels, self.num_subchannels
            )));
        }
        if self.subchannel_size == 0 || self.num_subchannels == 0 {
            return Err(LayerError::InvalidConfiguration(
                "subchannelSize and numSubchannels must be positive".into(),
            ));
        }
        if self.num_subchannels * self.subchannel_size > TBS_MAX_PRB {
            return Err(LayerError::InvalidConfiguration(format!(
                "{} subchannels of {} blocks exceed the {}-block TBS table",
                self.num_subchannels, self.subchannel_size, TBS_MAX_PRB
            )));
        }
        if !(0.0..=1.0).contains(&self.prob_resource_keep) {
            return Err(LayerError::InvalidConfiguration(format!(
                "probResourceKeep {} outside [0, 1]",
                self.prob_resource_keep
            )));
        }
        if self.harq_processes < 2 {
            return Err(LayerError::InvalidConfiguration(
                "at least two HARQ processes are required".into(),
            ));
        }
        if self.use_cbr {
            if self.cbr_tx_configs.is_empty() {
                return Err(LayerError::InvalidConfiguration(
                    "useCBR set but no cbr-PSSCH-TxConfig entries present".into(),
                ));
            }
            if self.default_cbr_index >= self.cbr_tx_configs.len() {
                return Err(LayerError::InvalidConfiguration(format!(
                    "default-cbr-ConfigIndex {} outside the {} tx-config entries",
                    self.default_cbr_index,
                    self.cbr_tx_configs.len()
                )));
            }
            for entry in &self.cbr_tx_configs {
                if entry.min_subchannels == 0
                    || entry.min_subchannels > entry.max_subchannels
                    || entry.max_subchannels > self.num_subchannels
                {
                    return Err(LayerError::InvalidConfiguration(format!(
                        "cbr tx-config subchannel range [{}, {}] invalid for a {}-subchannel band",
                        entry.min_subchannels, entry.max_subchannels, self.num_subchannels
                    )));
                }
            }
            for level in &self.cbr_levels {
                if level.tx_config_index >= self.cbr_tx_configs.len() {
                    return Err(LayerError::InvalidConfiguration(format!(
                        "cbr-PSSCH-TxConfig-Index {} outside the {} tx-config entries",
                        level.tx_config_index,
                        self.cbr_tx_configs.len()
                    )));
                }
                if level.lower >= level.upper {
                    return Err(LayerError::InvalidConfiguration(format!(
                        "cbr level [{}, {}) is empty",
                        level.lower, level.upper
                    )));
                }
            }
        }
        Ok(())
    }

    /// Total resource blocks in the sidelink band
    pub fn num_bands(&self) -> usize {
        self.num_subchannels * self.subchannel_size
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> MacConfig {
    MacConfig {
        node_id: MacNodeId(1025),
        cell_id: MacNodeId(1),
        min_mcs: 0,
        max_mcs: 11,
        min_subchannels: 2,
        max_subchannels: 2,
        allowed_retx: 1,
        subchannel_size: 10,
        num_subchannels: 3,
        prob_resource_keep: 1.0,
        reselect_after: 3,
        use_cbr: false,
        use_preconfigured_tx_params: true,
        default_cbr_index: 0,
        cbr_levels: Vec::new(),
        cbr_tx_configs: Vec::new(),
        valid_rris: vec![1],
        harq_processes: common::types::UE_TX_HARQ_PROCESSES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config_passes() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_empty_rri_list_fatal() {
        let mut cfg = test_config();
        cfg.valid_rris.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_probability_fatal() {
        let mut cfg = test_config();
        cfg.prob_resource_keep = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_inverted_mcs_range_fatal() {
        let mut cfg = test_config();
        cfg.min_mcs = 12;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_band_exceeding_tbs_table_fatal() {
        let mut cfg = test_config();
        cfg.num_subchannels = 12;
        cfg.subchannel_size = 10;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_cbr_index_out_of_range_fatal() {
        let mut cfg = test_config();
        cfg.use_cbr = true;
        cfg.cbr_tx_configs = vec![CbrTxConfig {
            min_mcs: 0,
            max_mcs: 11,
            min_subchannels: 1,
            max_subchannels: 2,
            allowed_retx: 1,
            cr_limit: None,
        }];
        cfg.cbr_levels = vec![CbrLevel {
            lower: 0,
            upper: 50,
            tx_config_index: 3,
        }];
        assert!(cfg.validate().is_err());
    }
}
