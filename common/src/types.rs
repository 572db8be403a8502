//! Common Types for the LTE Sidelink UE
//!
//! Defines fundamental types used throughout the protocol stack

use std::collections::{BTreeMap, BTreeSet};

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Simulation time in milliseconds. One TTI is one tick.
pub type SimTime = u64;

/// Transmission Time Interval in milliseconds
pub const TTI_MS: SimTime = 1;

/// Number of HARQ processes on a UE transmit buffer
pub const UE_TX_HARQ_PROCESSES: usize = 8;

/// Maximum number of codewords per TTI
pub const MAX_CODEWORDS: usize = 2;

/// MAC header size in bytes
pub const MAC_HEADER_BYTES: usize = 2;

/// RLC UM header size in bytes, accounted in BSR sizing
pub const RLC_HEADER_UM: usize = 2;

/// RLC AM header size in bytes, accounted in BSR sizing
pub const RLC_HEADER_AM: usize = 4;

/// MAC Node Identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MacNodeId(pub u16);

impl MacNodeId {
    /// Create a new node id
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for MacNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MAC Connection Identifier (one logical connection per destination flow)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MacCid(pub u32);

impl std::fmt::Display for MacCid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Codeword index (0 or 1)
pub type Codeword = usize;

/// HARQ process identifier
pub type Acid = usize;

/// Resource block index within the sidelink band
pub type Band = u16;

/// Traffic direction of a MAC connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Downlink (eNB to UE)
    Dl,
    /// Uplink (UE to eNB)
    Ul,
    /// Sidelink unicast
    D2d,
    /// Sidelink groupcast/broadcast
    D2dMulti,
}

/// Frame type attached to packets exchanged with the PHY layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameType {
    /// Scheduling grant (request or SCI source)
    GrantPkt,
    /// MAC PDU carrying user data
    DataPkt,
}

/// Remote antenna set identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Remote {
    /// The macro antenna port
    Macro,
}

/// Map of granted resource blocks per antenna: antenna -> band -> block count
pub type RbMap = BTreeMap<Remote, BTreeMap<Band, u8>>;

/// Transmission mode signalled in the user tx parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    /// Single antenna port 0, the only mode used on the sidelink
    SingleAntennaPort0,
}

/// Modulation order of an MCS index
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Modulation {
    /// QPSK, 2 bits per symbol
    Qpsk = 2,
    /// 16QAM, 4 bits per symbol
    Qam16 = 4,
    /// 64QAM, 6 bits per symbol
    Qam64 = 6,
}

/// Logical channel identifiers carried in MAC subheaders
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum Lcid {
    /// Dedicated traffic channel
    Dtch = 3,
    /// Short buffer status report control element
    ShortBsr = 29,
}

/// RLC mode of a connection, used for BSR header accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RlcType {
    /// Transparent mode
    Tm,
    /// Unacknowledged mode
    Um,
    /// Acknowledged mode
    Am,
}

/// Per-user transmission parameters attached to grants and PDUs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTxParams {
    /// Transmission mode
    pub tx_mode: TxMode,
    /// Transmission rank (number of layers)
    pub rank: u8,
    /// Precoding matrix indicator
    pub pmi: u8,
    /// Bands usable for transmission
    pub bands: BTreeSet<Band>,
    /// Antenna set
    pub antennas: BTreeSet<Remote>,
}

impl UserTxParams {
    /// Number of spatial layers carried by these parameters
    pub fn layers(&self) -> usize {
        self.rank as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_roundtrip() {
        let id = MacNodeId::new(1025);
        assert_eq!(id.value(), 1025);
        assert_eq!(format!("{}", id), "1025");
    }

    #[test]
    fn test_modulation_bits() {
        assert_eq!(Modulation::Qpsk as u8, 2);
        assert_eq!(Modulation::Qam16 as u8, 4);
        assert_eq!(Modulation::Qam64 as u8, 6);
    }

    #[test]
    fn test_user_tx_params_layers() {
        let params = UserTxParams {
            tx_mode: TxMode::SingleAntennaPort0,
            rank: 1,
            pmi: 1,
            bands: BTreeSet::new(),
            antennas: BTreeSet::new(),
        };
        assert_eq!(params.layers(), 1);
    }
}
