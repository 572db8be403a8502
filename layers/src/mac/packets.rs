//! MAC Packet and Message Types
//!
//! Messages crossing the MAC boundaries: PDUs and SDUs, candidate-resource
//! and CBR reports from the PHY, upper-layer notifications, and the inbox
//! and outbox of the per-TTI step machine.

use bytes::Bytes;

use common::types::{
    Direction, FrameType, Lcid, MacCid, MacNodeId, RlcType, SimTime, UserTxParams,
};

use crate::mac::grant::SchedulingGrant;

/// MAC Service Data Unit handed down by the RLC
#[derive(Debug, Clone)]
pub struct MacSdu {
    /// Connection the SDU belongs to
    pub cid: MacCid,
    /// Payload data
    pub payload: Bytes,
    /// Multicast group id, when the flow is groupcast
    pub multicast_group: Option<u32>,
    /// Creation time at the application
    pub creation_time: SimTime,
}

impl MacSdu {
    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Control element attached to packets exchanged with the PHY
#[derive(Debug, Clone)]
pub struct UserControlInfo {
    pub source: MacNodeId,
    pub dest: MacNodeId,
    /// Logical channel id, present on data PDUs
    pub lcid: Option<Lcid>,
    pub direction: Direction,
    pub frame_type: FrameType,
    /// Transmission number signalled with SCI grants
    pub tx_number: u8,
    pub user_tx_params: Option<UserTxParams>,
    pub multicast_group: Option<u32>,
}

/// MAC Protocol Data Unit: one or more SDUs behind a MAC header
#[derive(Debug, Clone)]
pub struct MacPdu {
    /// MAC header length in bytes
    pub header_bytes: usize,
    /// Assembly time
    pub timestamp: SimTime,
    /// Control element
    pub control: UserControlInfo,
    sdus: Vec<MacSdu>,
}

impl MacPdu {
    /// Create an empty PDU with the given control element
    pub fn new(header_bytes: usize, timestamp: SimTime, control: UserControlInfo) -> Self {
        Self {
            header_bytes,
            timestamp,
            control,
            sdus: Vec::new(),
        }
    }

    /// Append an SDU to the PDU
    pub fn push_sdu(&mut self, sdu: MacSdu) {
        self.sdus.push(sdu);
    }

    /// Number of SDUs carried
    pub fn sdu_count(&self) -> usize {
        self.sdus.len()
    }

    /// Total length in bytes: header plus payloads
    pub fn len(&self) -> usize {
        self.header_bytes + self.sdus.iter().map(MacSdu::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.sdus.is_empty()
    }

    /// Disassemble the PDU into its SDUs
    pub fn into_sdus(self) -> Vec<MacSdu> {
        self.sdus
    }
}

/// One candidate single-subframe resource proposed by the PHY sensing layer
#[derive(Debug, Clone, Copy)]
pub struct CsrEntry {
    /// Sensing metric of the candidate
    pub metric: f64,
    /// Offset of the candidate subframe from now, in TTIs
    pub tti_offset: u32,
    /// First subchannel of the candidate
    pub subchannel_index: usize,
}

/// Candidate resource report ("CSRs") from the PHY, consumed one-shot
#[derive(Debug, Clone)]
pub struct SpsCandidateResources {
    pub csrs: Vec<CsrEntry>,
}

/// Channel busy ratio report ("CBR") from the PHY
#[derive(Debug, Clone, Copy)]
pub struct CbrReport {
    pub cbr: u16,
}

/// Upper-layer notification of a new SDU awaiting transmission ("newDataPkt")
#[derive(Debug, Clone)]
pub struct NewDataNotification {
    pub cid: MacCid,
    pub dest: MacNodeId,
    /// Packet priority (0..7)
    pub priority: u8,
    /// Creation time at the application
    pub creation_time: SimTime,
    /// Latency budget of the message, in ms
    pub duration_ms: i64,
    /// Size of the waiting SDU, in bytes
    pub sdu_bytes: usize,
    pub direction: Direction,
    pub rlc_type: RlcType,
    pub multicast_group: Option<u32>,
}

/// Inbox of the per-TTI step machine
#[derive(Debug)]
pub enum MacEvent {
    /// Main-loop tick, once per TTI
    TtiTick,
    /// Deferred HARQ flush, delivered at the same instant with lower priority
    FlushHarq,
    /// Upper gate: new data notification
    NewData(NewDataNotification),
    /// Upper gate: SDU delivered after a request
    SduFromRlc(MacSdu),
    /// Down gate: candidate resources for a pending grant
    SpsCandidates(SpsCandidateResources),
    /// Down gate: channel busy ratio update
    CbrUpdate(CbrReport),
    /// Down gate: PDU received over the air for the rx HARQ buffer of `source`
    PduFromPhy {
        source: MacNodeId,
        pdu: MacPdu,
        correct: bool,
    },
}

/// Outbox of the per-TTI step machine
#[derive(Debug)]
pub enum MacAction {
    /// Grant duplicate sent down, for CSR search or SCI creation
    GrantToPhy(Box<SchedulingGrant>, UserControlInfo),
    /// MAC PDU sent down for transmission
    PduToPhy(MacPdu),
    /// SDU request to the RLC for a scheduled connection
    SduRequest { cid: MacCid, bytes: usize },
    /// Correctly received SDU delivered upward
    SduToUpper(MacSdu),
    /// CBR report forwarded upward verbatim
    CbrToUpper(CbrReport),
    /// Deliver `FlushHarq` at the current instant, after any same-instant
    /// SDU arrivals
    ScheduleFlush,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::MAC_HEADER_BYTES;

    fn control() -> UserControlInfo {
        UserControlInfo {
            source: MacNodeId(1),
            dest: MacNodeId(2),
            lcid: Some(Lcid::ShortBsr),
            direction: Direction::D2dMulti,
            frame_type: FrameType::DataPkt,
            tx_number: 0,
            user_tx_params: None,
            multicast_group: None,
        }
    }

    #[test]
    fn test_pdu_length_accounting() {
        let mut pdu = MacPdu::new(MAC_HEADER_BYTES, 0, control());
        assert!(pdu.is_empty());
        assert_eq!(pdu.len(), MAC_HEADER_BYTES);
        pdu.push_sdu(MacSdu {
            cid: MacCid(1),
            payload: Bytes::from(vec![0u8; 100]),
            multicast_group: None,
            creation_time: 0,
        });
        assert_eq!(pdu.sdu_count(), 1);
        assert_eq!(pdu.len(), MAC_HEADER_BYTES + 100);
    }

    #[test]
    fn test_pdu_unmake_returns_sdus() {
        let mut pdu = MacPdu::new(MAC_HEADER_BYTES, 0, control());
        for i in 0..3u8 {
            pdu.push_sdu(MacSdu {
                cid: MacCid(1),
                payload: Bytes::from(vec![i; 10]),
                multicast_group: Some(7),
                creation_time: 0,
            });
        }
        let sdus = pdu.into_sdus();
        assert_eq!(sdus.len(), 3);
        assert_eq!(sdus[2].payload[0], 2);
    }
}
