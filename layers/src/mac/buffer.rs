//! MAC Buffers and Logical Channel Scheduling
//!
//! Real SDU queues filled by the RLC on request, virtual buffers mirroring
//! upper-layer occupancy for BSR accounting, and the logical channel
//! scheduler producing the per-TTI schedule list.

use std::collections::{BTreeMap, VecDeque};

use common::types::{Codeword, Direction, MacCid, MacNodeId, RlcType};

use crate::mac::packets::MacSdu;

/// FIFO of SDUs retrieved from the RLC, per connection
#[derive(Debug, Default)]
pub struct MacQueue {
    queue: VecDeque<MacSdu>,
}

impl MacQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, sdu: MacSdu) {
        self.queue.push_back(sdu);
    }

    pub fn pop_front(&mut self) -> Option<MacSdu> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Virtual buffer mirroring upper-layer queue occupancy, consulted for BSR
/// sizing
#[derive(Debug, Default)]
pub struct VirtualBuffer {
    occupancy: usize,
}

impl VirtualBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account newly notified upper-layer bytes
    pub fn add(&mut self, bytes: usize) {
        self.occupancy += bytes;
    }

    /// Account bytes handed over by the RLC
    pub fn drain(&mut self, bytes: usize) {
        self.occupancy = self.occupancy.saturating_sub(bytes);
    }

    /// Bytes still waiting above the MAC
    pub fn occupancy(&self) -> usize {
        self.occupancy
    }
}

/// Descriptor of an active MAC connection
#[derive(Debug, Clone)]
pub struct ConnDesc {
    pub cid: MacCid,
    pub dest: MacNodeId,
    pub direction: Direction,
    pub rlc_type: RlcType,
    pub multicast_group: Option<u32>,
}

/// Per-TTI schedule: `(connection, codeword)` mapped to the SDU count to draw
pub type ScheduleList = Vec<((MacCid, Codeword), usize)>;

/// Logical channel group scheduler.
///
/// Sidelink grants carry a single codeword and the safety-message traffic
/// model delivers one SDU per reservation period, so the schedule is one SDU
/// per backlogged connection on the grant's codeword.
#[derive(Debug, Default)]
pub struct LcgScheduler;

impl LcgScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Build the schedule list for this TTI
    pub fn schedule(
        &mut self,
        virtual_buffers: &BTreeMap<MacCid, VirtualBuffer>,
        cw: Codeword,
    ) -> ScheduleList {
        virtual_buffers
            .iter()
            .filter(|(_, buffer)| buffer.occupancy() > 0)
            .map(|(cid, _)| ((*cid, cw), 1))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_buffer_saturating_drain() {
        let mut buffer = VirtualBuffer::new();
        buffer.add(100);
        buffer.drain(40);
        assert_eq!(buffer.occupancy(), 60);
        buffer.drain(200);
        assert_eq!(buffer.occupancy(), 0);
    }

    #[test]
    fn test_scheduler_skips_empty_connections() {
        let mut buffers = BTreeMap::new();
        buffers.insert(MacCid(1), VirtualBuffer::new());
        let mut backlogged = VirtualBuffer::new();
        backlogged.add(190);
        buffers.insert(MacCid(2), backlogged);

        let mut scheduler = LcgScheduler::new();
        let list = scheduler.schedule(&buffers, 0);
        assert_eq!(list, vec![((MacCid(2), 0), 1)]);
    }
}
