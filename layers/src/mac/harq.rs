//! HARQ Buffer Facade
//!
//! Opaque transmit and receive HARQ storage behind a small capability
//! surface. Two transmit buffer kinds exist, selected by direction when the
//! buffer is created; both share the process and unit machinery below.
//! Buffers are owned by the MAC instance and dropped with it.

use common::types::{Acid, Codeword, Direction, MAX_CODEWORDS};

use crate::mac::packets::MacPdu;

/// Concrete transmit buffer kind, chosen by the traffic direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarqTxBufferKind {
    /// Uplink buffer towards the eNB
    Ul,
    /// Sidelink groupcast buffer
    D2dMulti,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitStatus {
    /// Free for a new PDU
    Empty,
    /// Holds a PDU picked for transmission this TTI
    Selected,
    /// Transmitted, a blind retransmission is still allowed
    ReadyRetx,
}

#[derive(Debug)]
struct HarqUnitTx {
    pdu: Option<MacPdu>,
    status: UnitStatus,
    transmissions: u8,
}

impl HarqUnitTx {
    fn new() -> Self {
        Self {
            pdu: None,
            status: UnitStatus::Empty,
            transmissions: 0,
        }
    }

    fn reset(&mut self) {
        self.pdu = None;
        self.status = UnitStatus::Empty;
        self.transmissions = 0;
    }
}

/// One HARQ transmit process: a unit per codeword
#[derive(Debug)]
pub struct HarqProcessTx {
    units: Vec<HarqUnitTx>,
}

impl HarqProcessTx {
    fn new() -> Self {
        Self {
            units: (0..MAX_CODEWORDS).map(|_| HarqUnitTx::new()).collect(),
        }
    }

    /// Length in bytes of the PDU held on `cw`, zero when empty
    pub fn pdu_length(&self, cw: Codeword) -> usize {
        self.units[cw].pdu.as_ref().map(MacPdu::len).unwrap_or(0)
    }

    /// Codewords with a retransmission pending
    pub fn ready_units_ids(&self) -> Vec<Codeword> {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.status == UnitStatus::ReadyRetx)
            .map(|(cw, _)| cw)
            .collect()
    }

    /// Any retransmission pending on this process
    pub fn has_ready_units(&self) -> bool {
        self.units.iter().any(|u| u.status == UnitStatus::ReadyRetx)
    }

    fn is_selected(&self) -> bool {
        self.units.iter().any(|u| u.status == UnitStatus::Selected)
    }

    /// Drop every unit of the process, releasing the held PDUs
    pub fn force_drop(&mut self) {
        for unit in &mut self.units {
            unit.reset();
        }
    }

    fn empty_units(&self) -> Vec<Codeword> {
        self.units
            .iter()
            .enumerate()
            .filter(|(_, u)| u.status == UnitStatus::Empty)
            .map(|(cw, _)| cw)
            .collect()
    }
}

/// HARQ transmit buffer towards one destination
#[derive(Debug)]
pub struct HarqTxBuffer {
    kind: HarqTxBufferKind,
    processes: Vec<HarqProcessTx>,
}

impl HarqTxBuffer {
    /// Create a buffer of the given kind with `num_processes` processes
    pub fn new(kind: HarqTxBufferKind, num_processes: usize) -> Self {
        Self {
            kind,
            processes: (0..num_processes).map(|_| HarqProcessTx::new()).collect(),
        }
    }

    /// Create the buffer kind matching a traffic direction
    pub fn for_direction(direction: Direction, num_processes: usize) -> Self {
        let kind = match direction {
            Direction::Ul => HarqTxBufferKind::Ul,
            _ => HarqTxBufferKind::D2dMulti,
        };
        Self::new(kind, num_processes)
    }

    pub fn kind(&self) -> HarqTxBufferKind {
        self.kind
    }

    pub fn num_processes(&self) -> usize {
        self.processes.len()
    }

    /// Borrow one process
    pub fn process(&self, acid: Acid) -> &HarqProcessTx {
        &self.processes[acid]
    }

    /// Empty units of the process `acid`: `(acid, free codewords)`
    pub fn get_empty_units(&self, acid: Acid) -> (Acid, Vec<Codeword>) {
        (acid, self.processes[acid].empty_units())
    }

    /// Insert a PDU into an empty unit; the unit is selected for this TTI.
    /// Inserting over a non-empty unit is a caller bug.
    pub fn insert_pdu(&mut self, acid: Acid, cw: Codeword, pdu: MacPdu) {
        let unit = &mut self.processes[acid].units[cw];
        debug_assert_eq!(unit.status, UnitStatus::Empty);
        unit.pdu = Some(pdu);
        unit.status = UnitStatus::Selected;
        unit.transmissions = 0;
    }

    /// Select retransmission-ready units for this TTI, at most `layers` of them
    pub fn mark_selected(&mut self, units: (Acid, Vec<Codeword>), layers: usize) {
        let (acid, cws) = units;
        for cw in cws.into_iter().take(layers) {
            let unit = &mut self.processes[acid].units[cw];
            if unit.status == UnitStatus::ReadyRetx {
                unit.status = UnitStatus::Selected;
            }
        }
    }

    /// Any process selected for transmission this TTI
    pub fn is_selected(&self) -> bool {
        self.processes.iter().any(HarqProcessTx::is_selected)
    }

    /// The process selected for transmission this TTI, if any
    pub fn selected_process(&self) -> Option<&HarqProcessTx> {
        self.processes.iter().find(|p| p.is_selected())
    }

    /// Mutable access to the selected process
    pub fn selected_process_mut(&mut self) -> Option<&mut HarqProcessTx> {
        self.processes.iter_mut().find(|p| p.is_selected())
    }

    /// Send every selected unit down. Units with retransmission budget left
    /// keep their PDU and become ready again; exhausted units are freed.
    pub fn send_selected_down(&mut self, allowed_retx: u8) -> Vec<MacPdu> {
        let mut sent = Vec::new();
        for process in &mut self.processes {
            for unit in &mut process.units {
                if unit.status != UnitStatus::Selected {
                    continue;
                }
                let pdu = unit.pdu.as_ref().expect("selected unit holds a pdu");
                sent.push(pdu.clone());
                unit.transmissions += 1;
                if unit.transmissions <= allowed_retx {
                    unit.status = UnitStatus::ReadyRetx;
                } else {
                    unit.reset();
                }
            }
        }
        sent
    }

    /// Units currently holding a PDU, for the per-TTI status dump
    pub fn occupied_units(&self) -> usize {
        self.processes
            .iter()
            .flat_map(|p| p.units.iter())
            .filter(|u| u.pdu.is_some())
            .count()
    }
}

/// HARQ receive buffer for one peer
#[derive(Debug, Default)]
pub struct HarqRxBuffer {
    pending: Vec<(MacPdu, bool)>,
}

impl HarqRxBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a received PDU together with its decoding outcome
    pub fn insert_pdu(&mut self, pdu: MacPdu, correct: bool) {
        self.pending.push((pdu, correct));
    }

    /// Drain every correctly decoded PDU
    pub fn extract_correct_pdus(&mut self) -> Vec<MacPdu> {
        let (correct, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(_, ok)| *ok);
        self.pending = rest;
        correct.into_iter().map(|(pdu, _)| pdu).collect()
    }

    /// Discard corrupted PDUs, returning how many were purged
    pub fn purge_corrupted_pdus(&mut self) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(_, ok)| *ok);
        before - self.pending.len()
    }

    /// PDUs currently waiting
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::packets::{MacSdu, UserControlInfo};
    use bytes::Bytes;
    use common::types::{
        Direction, FrameType, Lcid, MacCid, MacNodeId, MAC_HEADER_BYTES, UE_TX_HARQ_PROCESSES,
    };

    fn pdu(bytes: usize) -> MacPdu {
        let control = UserControlInfo {
            source: MacNodeId(1),
            dest: MacNodeId(2),
            lcid: Some(Lcid::ShortBsr),
            direction: Direction::D2dMulti,
            frame_type: FrameType::DataPkt,
            tx_number: 0,
            user_tx_params: None,
            multicast_group: None,
        };
        let mut pdu = MacPdu::new(MAC_HEADER_BYTES, 0, control);
        pdu.push_sdu(MacSdu {
            cid: MacCid(1),
            payload: Bytes::from(vec![0u8; bytes]),
            multicast_group: None,
            creation_time: 0,
        });
        pdu
    }

    #[test]
    fn test_kind_follows_direction() {
        let buf = HarqTxBuffer::for_direction(Direction::Ul, UE_TX_HARQ_PROCESSES);
        assert_eq!(buf.kind(), HarqTxBufferKind::Ul);
        let buf = HarqTxBuffer::for_direction(Direction::D2dMulti, UE_TX_HARQ_PROCESSES);
        assert_eq!(buf.kind(), HarqTxBufferKind::D2dMulti);
    }

    #[test]
    fn test_insert_selects_unit() {
        let mut buf = HarqTxBuffer::for_direction(Direction::D2dMulti, UE_TX_HARQ_PROCESSES);
        let (acid, cws) = buf.get_empty_units(3);
        assert_eq!(acid, 3);
        assert_eq!(cws.len(), MAX_CODEWORDS);
        buf.insert_pdu(3, 0, pdu(50));
        assert!(buf.is_selected());
        let process = buf.selected_process().unwrap();
        assert_eq!(process.pdu_length(0), MAC_HEADER_BYTES + 50);
        assert_eq!(process.pdu_length(1), 0);
    }

    #[test]
    fn test_send_with_retx_budget() {
        let mut buf = HarqTxBuffer::for_direction(Direction::D2dMulti, UE_TX_HARQ_PROCESSES);
        buf.insert_pdu(0, 0, pdu(50));
        let sent = buf.send_selected_down(1);
        assert_eq!(sent.len(), 1);
        // One blind retransmission remains.
        assert!(buf.process(0).has_ready_units());
        assert_eq!(buf.process(0).ready_units_ids(), vec![0]);
        buf.mark_selected((0, vec![0]), 1);
        let sent = buf.send_selected_down(1);
        assert_eq!(sent.len(), 1);
        // Budget exhausted: the unit is free again.
        assert!(!buf.process(0).has_ready_units());
        assert_eq!(buf.get_empty_units(0).1.len(), MAX_CODEWORDS);
    }

    #[test]
    fn test_zero_retx_suppresses_retransmissions() {
        let mut buf = HarqTxBuffer::for_direction(Direction::D2dMulti, UE_TX_HARQ_PROCESSES);
        buf.insert_pdu(0, 0, pdu(50));
        let sent = buf.send_selected_down(0);
        assert_eq!(sent.len(), 1);
        assert!(!buf.process(0).has_ready_units());
        assert!(!buf.is_selected());
    }

    #[test]
    fn test_force_drop_clears_process() {
        let mut buf = HarqTxBuffer::for_direction(Direction::D2dMulti, UE_TX_HARQ_PROCESSES);
        buf.insert_pdu(5, 0, pdu(50));
        buf.selected_process_mut().unwrap().force_drop();
        assert!(!buf.is_selected());
        assert_eq!(buf.occupied_units(), 0);
    }

    #[test]
    fn test_rx_extract_and_purge() {
        let mut rx = HarqRxBuffer::new();
        rx.insert_pdu(pdu(10), true);
        rx.insert_pdu(pdu(20), false);
        rx.insert_pdu(pdu(30), true);
        let correct = rx.extract_correct_pdus();
        assert_eq!(correct.len(), 2);
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.purge_corrupted_pdus(), 1);
        assert!(rx.is_empty());
    }
}
