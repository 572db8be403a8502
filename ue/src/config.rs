//! YAML Configuration Structures for the sidelink UE
//!
//! These structures match the sidelink configuration document key for key;
//! the names follow the 3GPP reference XML elements
//! (`userEquipment-txParameters`, `Sl-CBR-CommonTxConfigList`, ...).

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use common::types::{MacNodeId, UE_TX_HARQ_PROCESSES};
use layers::mac::{CbrLevel, CbrTxConfig, MacConfig};

/// Top-level configuration document
#[derive(Debug, Clone, Deserialize)]
pub struct UeConfigFile {
    /// Node parameters
    pub ue: UeParams,
    /// Sidelink transmission configuration
    #[serde(rename = "txConfig")]
    pub tx_config: TxConfig,
    /// Scripted application traffic (optional)
    #[serde(default)]
    pub traffic: Option<TrafficConfig>,
}

/// Node-level parameters
#[derive(Debug, Clone, Deserialize)]
pub struct UeParams {
    #[serde(rename = "nodeId")]
    pub node_id: u16,
    #[serde(rename = "cellId", default = "default_cell_id")]
    pub cell_id: u16,
    #[serde(rename = "subchannelSize")]
    pub subchannel_size: usize,
    #[serde(rename = "numSubchannels")]
    pub num_subchannels: usize,
    #[serde(rename = "probResourceKeep")]
    pub prob_resource_keep: f64,
    #[serde(rename = "reselectAfter")]
    pub reselect_after: u32,
    #[serde(rename = "useCBR")]
    pub use_cbr: bool,
    #[serde(rename = "usePreconfiguredTxParams", default = "default_true")]
    pub use_preconfigured_tx_params: bool,
}

fn default_cell_id() -> u16 {
    1
}

fn default_true() -> bool {
    true
}

/// Transmission configuration document
#[derive(Debug, Clone, Deserialize)]
pub struct TxConfig {
    /// Exactly one per configuration
    #[serde(rename = "userEquipment-txParameters")]
    pub ue_tx_parameters: TxParameters,
    #[serde(rename = "Sl-CBR-CommonTxConfigList")]
    pub cbr_common_tx_config_list: CbrCommonTxConfigList,
    #[serde(rename = "RestrictResourceReservationPeriodList")]
    pub rri_list: RriList,
}

/// PSSCH transmission parameter block
#[derive(Debug, Clone, Deserialize)]
pub struct TxParameters {
    #[serde(rename = "minMCS-PSSCH")]
    pub min_mcs: u8,
    #[serde(rename = "maxMCS-PSSCH")]
    pub max_mcs: u8,
    #[serde(rename = "minSubchannel-NumberPSSCH")]
    pub min_subchannel_number: usize,
    #[serde(rename = "maxSubchannel-NumberPSSCH")]
    pub max_subchannel_number: usize,
    #[serde(rename = "allowedRetxNumberPSSCH")]
    pub allowed_retx_number: u8,
    #[serde(rename = "cr-Limit", default)]
    pub cr_limit: Option<u32>,
}

/// CBR adaptation tables
#[derive(Debug, Clone, Deserialize)]
pub struct CbrCommonTxConfigList {
    #[serde(rename = "default-cbr-ConfigIndex")]
    pub default_cbr_config_index: usize,
    #[serde(rename = "cbr-Levels-Config", default)]
    pub cbr_levels_config: Vec<CbrLevelConfig>,
    #[serde(rename = "cbr-PSSCH-TxConfig", default)]
    pub cbr_pssch_tx_config: Vec<CbrPsschTxConfig>,
}

/// One CBR occupancy level
#[derive(Debug, Clone, Deserialize)]
pub struct CbrLevelConfig {
    #[serde(rename = "cbr-lower")]
    pub cbr_lower: u16,
    #[serde(rename = "cbr-upper")]
    pub cbr_upper: u16,
    #[serde(rename = "cbr-PSSCH-TxConfig-Index")]
    pub tx_config_index: usize,
}

/// One CBR tx-config entry
#[derive(Debug, Clone, Deserialize)]
pub struct CbrPsschTxConfig {
    #[serde(rename = "txParameters")]
    pub tx_parameters: TxParameters,
}

/// Allowed resource reservation intervals
#[derive(Debug, Clone, Deserialize)]
pub struct RriList {
    #[serde(rename = "RestrictResourceReservationPeriod")]
    pub periods: Vec<RriEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RriEntry {
    pub rri: u32,
}

/// Scripted application traffic: periodic fixed-size messages
#[derive(Debug, Clone, Deserialize)]
pub struct TrafficConfig {
    #[serde(rename = "periodMs", default = "default_traffic_period")]
    pub period_ms: u64,
    #[serde(rename = "packetBytes", default = "default_packet_bytes")]
    pub packet_bytes: usize,
    #[serde(rename = "durationMs", default = "default_duration")]
    pub duration_ms: i64,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_traffic_period() -> u64 {
    100
}

fn default_packet_bytes() -> usize {
    190
}

fn default_duration() -> i64 {
    100
}

fn default_priority() -> u8 {
    4
}

impl UeConfigFile {
    /// Load the configuration document from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration file {path}"))?;
        let config: UeConfigFile =
            serde_yaml::from_str(&contents).context("parsing sidelink configuration")?;
        Ok(config)
    }

    /// Build the validated MAC view from the file document
    pub fn to_mac_config(&self) -> Result<MacConfig> {
        let tx = &self.tx_config.ue_tx_parameters;
        let cbr = &self.tx_config.cbr_common_tx_config_list;

        let valid_rris: Vec<u32> = self.tx_config.rri_list.periods.iter().map(|p| p.rri).collect();
        if valid_rris.is_empty() {
            bail!("no RestrictResourceReservationPeriod entries in configuration");
        }

        let config = MacConfig {
            node_id: MacNodeId(self.ue.node_id),
            cell_id: MacNodeId(self.ue.cell_id),
            min_mcs: tx.min_mcs,
            max_mcs: tx.max_mcs,
            min_subchannels: tx.min_subchannel_number,
            max_subchannels: tx.max_subchannel_number,
            allowed_retx: tx.allowed_retx_number,
            subchannel_size: self.ue.subchannel_size,
            num_subchannels: self.ue.num_subchannels,
            prob_resource_keep: self.ue.prob_resource_keep,
            reselect_after: self.ue.reselect_after,
            use_cbr: self.ue.use_cbr,
            use_preconfigured_tx_params: self.ue.use_preconfigured_tx_params,
            default_cbr_index: cbr.default_cbr_config_index,
            cbr_levels: cbr
                .cbr_levels_config
                .iter()
                .map(|level| CbrLevel {
                    lower: level.cbr_lower,
                    upper: level.cbr_upper,
                    tx_config_index: level.tx_config_index,
                })
                .collect(),
            cbr_tx_configs: cbr
                .cbr_pssch_tx_config
                .iter()
                .map(|entry| CbrTxConfig {
                    min_mcs: entry.tx_parameters.min_mcs,
                    max_mcs: entry.tx_parameters.max_mcs,
                    min_subchannels: entry.tx_parameters.min_subchannel_number,
                    max_subchannels: entry.tx_parameters.max_subchannel_number,
                    allowed_retx: entry.tx_parameters.allowed_retx_number,
                    cr_limit: entry.tx_parameters.cr_limit,
                })
                .collect(),
            valid_rris,
            harq_processes: UE_TX_HARQ_PROCESSES,
        };
        config
            .validate()
            .context("validating sidelink configuration")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
ue:
  nodeId: 1025
  subchannelSize: 10
  numSubchannels: 3
  probResourceKeep: 0.4
  reselectAfter: 3
  useCBR: true

txConfig:
  userEquipment-txParameters:
    minMCS-PSSCH: 3
    maxMCS-PSSCH: 11
    minSubchannel-NumberPSSCH: 1
    maxSubchannel-NumberPSSCH: 3
    allowedRetxNumberPSSCH: 1

  Sl-CBR-CommonTxConfigList:
    default-cbr-ConfigIndex: 0
    cbr-Levels-Config:
      - cbr-lower: 0
        cbr-upper: 65
        cbr-PSSCH-TxConfig-Index: 0
      - cbr-lower: 65
        cbr-upper: 100
        cbr-PSSCH-TxConfig-Index: 1
    cbr-PSSCH-TxConfig:
      - txParameters:
          minMCS-PSSCH: 3
          maxMCS-PSSCH: 11
          minSubchannel-NumberPSSCH: 1
          maxSubchannel-NumberPSSCH: 3
          allowedRetxNumberPSSCH: 1
          cr-Limit: 1000
      - txParameters:
          minMCS-PSSCH: 3
          maxMCS-PSSCH: 9
          minSubchannel-NumberPSSCH: 1
          maxSubchannel-NumberPSSCH: 2
          allowedRetxNumberPSSCH: 0
          cr-Limit: 800

  RestrictResourceReservationPeriodList:
    RestrictResourceReservationPeriod:
      - rri: 1
"#;

    #[test]
    fn test_parse_sample_document() {
        let file: UeConfigFile = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(file.ue.node_id, 1025);
        assert!(file.ue.use_preconfigured_tx_params);
        assert_eq!(file.tx_config.ue_tx_parameters.max_mcs, 11);
        assert_eq!(file.tx_config.cbr_common_tx_config_list.cbr_levels_config.len(), 2);
        assert_eq!(
            file.tx_config.cbr_common_tx_config_list.cbr_pssch_tx_config[1]
                .tx_parameters
                .cr_limit,
            Some(800)
        );
    }

    #[test]
    fn test_to_mac_config() {
        let file: UeConfigFile = serde_yaml::from_str(SAMPLE).unwrap();
        let config = file.to_mac_config().unwrap();
        assert_eq!(config.node_id, MacNodeId(1025));
        assert_eq!(config.max_mcs, 11);
        assert_eq!(config.cbr_levels[1].upper, 100);
        assert_eq!(config.cbr_levels[1].tx_config_index, 1);
        assert_eq!(config.cbr_tx_configs[1].allowed_retx, 0);
        assert_eq!(config.valid_rris, vec![1]);
    }

    #[test]
    fn test_missing_tx_parameters_is_fatal() {
        let broken = SAMPLE.replace("userEquipment-txParameters", "otherParameters");
        assert!(serde_yaml::from_str::<UeConfigFile>(&broken).is_err());
    }

    #[test]
    fn test_missing_cbr_list_is_fatal() {
        let broken = SAMPLE.replace("Sl-CBR-CommonTxConfigList", "Sl-Other");
        assert!(serde_yaml::from_str::<UeConfigFile>(&broken).is_err());
    }

    #[test]
    fn test_empty_rri_list_is_fatal() {
        let broken = SAMPLE.replace("      - rri: 1\n", "      []\n");
        let parsed = serde_yaml::from_str::<UeConfigFile>(&broken);
        match parsed {
            Ok(file) => assert!(file.to_mac_config().is_err()),
            Err(_) => {}
        }
    }
}
