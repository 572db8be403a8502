//! Medium Access Control Layer
//!
//! LTE Release-14 Mode 4 sidelink MAC: the UE reserves periodic resources on
//! the shared channel without eNB coordination, transmits safety messages on
//! the reservation and re-reserves with randomized persistence. The layer is
//! a single-threaded step machine driven by per-TTI events; every outgoing
//! message is returned as an action for the surrounding driver to dispatch.

pub mod amc;
pub mod binder;
pub mod buffer;
pub mod cbr;
pub mod config;
pub mod grant;
pub mod harq;
pub mod packets;
pub mod rng;
pub mod signals;

use std::collections::BTreeMap;

use tracing::{debug, info, trace, warn};

use common::types::{
    Codeword, Direction, FrameType, Lcid, MacCid, MacNodeId, Remote, RlcType, SimTime, TxMode,
    UserTxParams, MAC_HEADER_BYTES, MAX_CODEWORDS, RLC_HEADER_AM, RLC_HEADER_UM, TTI_MS,
};
use common::utils::{bytes_to_hex, elapsed_ms};

use crate::LayerError;

pub use binder::{Binder, BinderHandle, UeInfo};
pub use buffer::{ConnDesc, LcgScheduler, MacQueue, ScheduleList, VirtualBuffer};
pub use config::{CbrLevel, CbrTxConfig, MacConfig};
pub use grant::{GrantPhase, SchedulingGrant, TtiDecision};
pub use harq::{HarqRxBuffer, HarqTxBuffer};
pub use packets::{
    CbrReport, CsrEntry, MacAction, MacEvent, MacPdu, MacSdu, NewDataNotification,
    SpsCandidateResources, UserControlInfo,
};
pub use rng::SidelinkRng;
pub use signals::{Signal, SignalRecord, SignalTrace};

/// Mode 4 sidelink MAC instance
pub struct Mode4Mac {
    config: MacConfig,
    rng: SidelinkRng,
    binder: BinderHandle,
    signals: SignalTrace,

    /// The single scheduling grant of this UE
    grant: Option<SchedulingGrant>,
    /// Retransmission allowance, ratcheted down by the CBR policy
    allowed_retx: u8,
    current_harq: usize,
    /// Set on the very first transmission ever
    first_tx: bool,
    current_cw: Codeword,
    missed_transmissions: u32,
    /// Latest channel busy ratio reported by the PHY
    cbr: u16,
    /// Arrival time of the latest upper-layer notification
    received_time: SimTime,
    /// Latency budget remaining for the latest message, in ms
    remaining_time: i64,
    preconfigured_tx_params: Option<UserTxParams>,

    harq_tx_buffers: BTreeMap<MacNodeId, HarqTxBuffer>,
    harq_rx_buffers: BTreeMap<MacNodeId, HarqRxBuffer>,
    mbuf: BTreeMap<MacCid, MacQueue>,
    mac_buffers: BTreeMap<MacCid, VirtualBuffer>,
    conn_desc: BTreeMap<MacCid, ConnDesc>,
    lcg_scheduler: LcgScheduler,
    schedule_list: ScheduleList,
    /// SDU requests outstanding this TTI; assembly runs when they all arrive
    pending_sdu_requests: usize,
}

impl Mode4Mac {
    /// Build a MAC instance, validate its configuration and register the UE
    /// with the binder.
    pub fn new(
        config: MacConfig,
        binder: BinderHandle,
        mut rng: SidelinkRng,
    ) -> Result<Self, LayerError> {
        config.validate()?;

        let preconfigured_tx_params = if config.use_preconfigured_tx_params {
            Some(build_preconfigured_tx_params(&config, &mut rng))
        } else {
            None
        };

        binder.borrow_mut().add_ue_info(UeInfo {
            id: config.node_id,
            cell_id: config.cell_id,
            init: false,
        });

        info!(node = %config.node_id, seed = rng.seed(), "sidelink MAC initialized");

        Ok(Self {
            allowed_retx: config.allowed_retx,
            config,
            rng,
            binder,
            signals: SignalTrace::new(),
            grant: None,
            current_harq: 0,
            first_tx: false,
            current_cw: 0,
            missed_transmissions: 0,
            cbr: 0,
            received_time: 0,
            remaining_time: 0,
            preconfigured_tx_params,
            harq_tx_buffers: BTreeMap::new(),
            harq_rx_buffers: BTreeMap::new(),
            mbuf: BTreeMap::new(),
            mac_buffers: BTreeMap::new(),
            conn_desc: BTreeMap::new(),
            lcg_scheduler: LcgScheduler::new(),
            schedule_list: ScheduleList::new(),
            pending_sdu_requests: 0,
        })
    }

    /// Local node id
    pub fn node_id(&self) -> MacNodeId {
        self.config.node_id
    }

    /// Current grant, if one exists
    pub fn grant(&self) -> Option<&SchedulingGrant> {
        self.grant.as_ref()
    }

    /// Observations emitted so far
    pub fn signals(&self) -> &SignalTrace {
        &self.signals
    }

    /// Missed transmissions since the last successful flush
    pub fn missed_transmissions(&self) -> u32 {
        self.missed_transmissions
    }

    /// Deregister from the binder. HARQ buffers are owned by the instance
    /// and released with it.
    pub fn shutdown(&mut self) {
        self.binder.borrow_mut().remove_ue_info(self.config.node_id);
        info!(node = %self.config.node_id, "sidelink MAC shut down");
    }

    /// Step the MAC with one event, returning the messages to dispatch
    pub fn handle_event(
        &mut self,
        now: SimTime,
        event: MacEvent,
    ) -> Result<Vec<MacAction>, LayerError> {
        match event {
            MacEvent::TtiTick => self.handle_tti(now),
            MacEvent::FlushHarq => self.flush_harq_buffers(now),
            MacEvent::NewData(notice) => self.handle_new_data(now, notice),
            MacEvent::SduFromRlc(sdu) => self.handle_sdu(now, sdu),
            MacEvent::SpsCandidates(pkt) => self.handle_sps_candidates(now, pkt),
            MacEvent::CbrUpdate(report) => {
                self.cbr = report.cbr;
                Ok(vec![MacAction::CbrToUpper(report)])
            }
            MacEvent::PduFromPhy {
                source,
                pdu,
                correct,
            } => {
                self.harq_rx_buffers
                    .entry(source)
                    .or_default()
                    .insert_pdu(pdu, correct);
                Ok(Vec::new())
            }
        }
    }

    /// Upper-layer notification of a new message awaiting transmission
    fn handle_new_data(
        &mut self,
        now: SimTime,
        notice: NewDataNotification,
    ) -> Result<Vec<MacAction>, LayerError> {
        let mut actions = Vec::new();

        self.received_time = now;
        let elapsed = elapsed_ms(now, notice.creation_time) as i64;
        let remaining = notice.duration_ms - elapsed;
        self.remaining_time = remaining;

        self.conn_desc.entry(notice.cid).or_insert_with(|| ConnDesc {
            cid: notice.cid,
            dest: notice.dest,
            direction: notice.direction,
            rlc_type: notice.rlc_type,
            multicast_group: notice.multicast_group,
        });
        self.mbuf.entry(notice.cid).or_default();
        self.mac_buffers
            .entry(notice.cid)
            .or_default()
            .add(notice.sdu_bytes);

        let break_timing =
            matches!(&self.grant, Some(grant) if grant.period_counter > remaining);
        if break_timing {
            // The current reservation cycle ends too late for this message.
            debug!(now, remaining, "grant cannot serve new data in time");
            self.signals.emit(now, Signal::GrantBreakTiming, 1);
            self.grant = None;
        }

        if self.grant.is_none() {
            actions.extend(self.generate_scheduling_grant(now, remaining, notice.priority));
        } else if let Some(grant) = self.grant.as_mut() {
            grant.priority = notice.priority;
            grant.max_latency = remaining;
        }

        // Tell the RLC request path how large an SDU to ask for.
        if let Some(grant) = self.grant.as_mut() {
            grant.granted_cw_bytes[MAX_CODEWORDS - 1 - self.current_cw] = notice.sdu_bytes;
        }

        Ok(actions)
    }

    /// Issue a new grant request towards the PHY
    fn generate_scheduling_grant(
        &mut self,
        now: SimTime,
        remaining_latency: i64,
        priority: u8,
    ) -> Vec<MacAction> {
        let rri = self.config.valid_rris[0];
        let period = rri as u64 * 100;
        let mut grant =
            SchedulingGrant::new(priority, remaining_latency, period, self.config.valid_rris.clone());

        let bounds = cbr::effective_bounds(&self.config, self.allowed_retx, self.cbr);
        self.allowed_retx = bounds.allowed_retx;

        // The standard leaves the subchannel count in the allowed range to
        // the UE; it is drawn uniformly, unlike the MCS.
        grant.num_subchannels = self
            .rng
            .uniform_int(bounds.min_subchannels, bounds.max_subchannels);
        grant.resource_reselection_counter = self
            .rng
            .uniform_int(grant::RESELECTION_COUNTER_MIN, grant::RESELECTION_COUNTER_MAX);

        debug!(
            now,
            priority,
            remaining_latency,
            num_subchannels = grant.num_subchannels,
            "requesting sidelink grant"
        );

        let control = UserControlInfo {
            source: self.config.node_id,
            dest: self.config.node_id,
            lcid: None,
            direction: Direction::D2dMulti,
            frame_type: FrameType::GrantPkt,
            tx_number: 0,
            user_tx_params: None,
            multicast_group: None,
        };
        let phy_grant = Box::new(grant.clone());
        self.grant = Some(grant);
        self.signals.emit(now, Signal::GrantRequests, 1);

        vec![MacAction::GrantToPhy(phy_grant, control)]
    }

    /// Turn a candidate resource report into a concrete reservation.
    /// The report is consumed one-shot.
    fn handle_sps_candidates(
        &mut self,
        now: SimTime,
        pkt: SpsCandidateResources,
    ) -> Result<Vec<MacAction>, LayerError> {
        match self.grant.as_ref() {
            None => {
                debug!(now, "discarding stale CSR report: no grant configured");
                return Ok(Vec::new());
            }
            Some(grant) if grant.periodic => {
                debug!(now, "discarding stale CSR report: resources already assigned");
                return Ok(Vec::new());
            }
            Some(_) => {}
        }
        if pkt.csrs.is_empty() {
            warn!(now, "discarding empty CSR report");
            return Ok(Vec::new());
        }

        let index = self.rng.uniform_int(0, pkt.csrs.len() - 1);
        let selected = pkt.csrs[index];
        let grant = self.grant.as_mut().expect("guarded above");

        if selected.subchannel_index + grant.num_subchannels > self.config.num_subchannels {
            return Err(LayerError::InvalidState(format!(
                "CSR at subchannel {} cannot host {} subchannels in a band of {}",
                selected.subchannel_index, grant.num_subchannels, self.config.num_subchannels
            )));
        }

        self.signals
            .emit(now, Signal::SelectedSubchannelIndex, selected.subchannel_index as i64);
        self.signals
            .emit(now, Signal::SelectedNumSubchannels, grant.num_subchannels as i64);

        grant.assign_subchannels(selected.subchannel_index, self.config.subchannel_size);
        grant.direction = Direction::D2dMulti;
        grant.codewords = 1;
        // Tentative MCS until the first PDU is sized against the blocks.
        grant.mcs = self.config.max_mcs;
        let capacity = amc::capacity_bytes(self.config.max_mcs, grant.total_granted_blocks);
        grant.granted_cw_bytes[self.current_cw] = capacity;
        self.current_cw = MAX_CODEWORDS - 1 - self.current_cw;

        let start_time = now + TTI_MS * selected.tti_offset as u64;
        grant.arm(start_time);

        debug!(
            now,
            start_time,
            subchannel = grant.starting_subchannel,
            blocks = grant.total_granted_blocks,
            capacity,
            "sidelink grant activated"
        );
        self.signals.emit(now, Signal::GeneratedGrants, 1);

        Ok(Vec::new())
    }

    /// SDU delivered by the RLC after a request
    fn handle_sdu(&mut self, now: SimTime, sdu: MacSdu) -> Result<Vec<MacAction>, LayerError> {
        self.mac_buffers.entry(sdu.cid).or_default().drain(sdu.len());
        self.mbuf.entry(sdu.cid).or_default().push_back(sdu);

        if self.pending_sdu_requests > 0 {
            self.pending_sdu_requests -= 1;
            if self.pending_sdu_requests == 0 {
                return self.mac_pdu_make(now);
            }
        }
        Ok(Vec::new())
    }

    /// Main loop, once per TTI
    fn handle_tti(&mut self, now: SimTime) -> Result<Vec<MacAction>, LayerError> {
        let mut actions = Vec::new();

        // Extract correctly received PDUs and hand their SDUs upward.
        let mut received = Vec::new();
        for rx in self.harq_rx_buffers.values_mut() {
            received.extend(rx.extract_correct_pdus());
        }
        for pdu in received {
            actions.extend(self.mac_pdu_unmake(pdu));
        }

        // Step the grant counters.
        let mut decision = TtiDecision::Inactive;
        if let Some(grant) = self.grant.as_mut() {
            decision = grant.advance_tti(now, self.config.prob_resource_keep, &mut self.rng);
        }
        if decision == TtiDecision::Expired {
            debug!(now, "sidelink grant expired");
            self.signals.emit(now, Signal::GrantBreak, 1);
            self.grant = None;
        }

        let mut requested_sdu = false;
        if decision == TtiDecision::Transmit {
            let grant = self.grant.as_mut().expect("transmit decision implies a grant");
            if grant.first_transmission {
                grant.first_transmission = false;
            }
            let layers = grant
                .user_tx_params
                .as_ref()
                .map(UserTxParams::layers)
                .unwrap_or(1);

            if !self.first_tx {
                // The receiver sees the first PDU two TTIs out.
                self.first_tx = true;
                self.current_harq = self.config.harq_processes - 2;
            }
            let current_harq = self.current_harq;

            let mut retx = false;
            let mut available_pdu = false;
            for buf in self.harq_tx_buffers.values_mut() {
                let ready = buf.process(current_harq).ready_units_ids();
                if let Some(process) = buf.selected_process() {
                    for cw in 0..MAX_CODEWORDS {
                        if process.pdu_length(cw) != 0 {
                            available_pdu = true;
                        }
                    }
                }
                trace!(
                    now,
                    process = current_harq,
                    retx = !ready.is_empty(),
                    n = ready.len(),
                    "retransmission check"
                );
                if !ready.is_empty() {
                    retx = true;
                    buf.mark_selected((current_harq, ready), layers);
                }
            }

            // No retransmission and nothing waiting: run normal scheduling.
            if !retx && !available_pdu {
                self.schedule_list = self.lcg_scheduler.schedule(&self.mac_buffers, 0);
                let grant = self.grant.as_ref().expect("transmit decision implies a grant");
                let mut requests = Vec::new();
                for ((cid, cw), sdu_count) in &self.schedule_list {
                    if *sdu_count > 0 {
                        requests.push(MacAction::SduRequest {
                            cid: *cid,
                            bytes: grant.granted_cw_bytes[*cw],
                        });
                    }
                }
                if requests.is_empty() {
                    // Nothing to draw from the RLC; assemble anyway so a
                    // BSR-only PDU can go out.
                    self.mac_pdu_make(now)?;
                } else {
                    self.pending_sdu_requests = requests.len();
                    requested_sdu = true;
                    actions.extend(requests);
                }
            }

            // Flushing runs after the (possible) arrival of new MAC PDUs in
            // this same instant.
            actions.push(MacAction::ScheduleFlush);
        }

        // Purge corrupted PDUs only from the DL buffer; purging D2D buffers
        // would also purge the mirror buffers.
        let mut purged = 0;
        for (peer, rx) in self.harq_rx_buffers.iter_mut() {
            if *peer == self.config.cell_id {
                purged += rx.purge_corrupted_pdus();
            }
        }
        if purged > 0 {
            trace!(now, purged, "purged corrupted PDUs");
        }
        for (dest, buf) in &self.harq_tx_buffers {
            trace!(now, dest = %dest, occupied = buf.occupied_units(), "tx HARQ status");
        }

        if !requested_sdu {
            self.current_harq = (self.current_harq + 1) % self.config.harq_processes;
        }

        Ok(actions)
    }

    /// Build MAC PDUs from the schedule list and store them in the HARQ
    /// transmit buffers
    fn mac_pdu_make(&mut self, now: SimTime) -> Result<Vec<MacAction>, LayerError> {
        let mut size: usize = 0;
        let mut pdu_list: BTreeMap<(MacNodeId, Codeword), MacPdu> = BTreeMap::new();

        let schedule = std::mem::take(&mut self.schedule_list);
        for ((cid, cw), sdu_count) in schedule {
            if sdu_count == 0 {
                continue;
            }
            let conn = self
                .conn_desc
                .get(&cid)
                .ok_or(LayerError::MissingMacBuffer(cid))?
                .clone();
            let key = (conn.dest, cw);

            if !pdu_list.contains_key(&key) {
                let user_tx_params = if self.config.use_preconfigured_tx_params {
                    if let Some(grant) = self.grant.as_mut() {
                        grant.user_tx_params = self.preconfigured_tx_params.clone();
                    }
                    self.preconfigured_tx_params.clone()
                } else {
                    self.grant.as_ref().and_then(|g| g.user_tx_params.clone())
                };
                let control = UserControlInfo {
                    source: self.config.node_id,
                    dest: conn.dest,
                    lcid: Some(Lcid::ShortBsr),
                    direction: conn.direction,
                    frame_type: FrameType::DataPkt,
                    tx_number: 0,
                    user_tx_params,
                    multicast_group: None,
                };
                pdu_list.insert(key, MacPdu::new(MAC_HEADER_BYTES, now, control));
            }
            let pdu = pdu_list.get_mut(&key).expect("inserted above");

            let queue = self
                .mbuf
                .get_mut(&cid)
                .ok_or(LayerError::MissingMacBuffer(cid))?;
            for drawn in 0..sdu_count {
                let sdu = queue.pop_front().ok_or(LayerError::EmptyMacBuffer {
                    cid,
                    expected: sdu_count - drawn,
                })?;
                // Groupcast: the group id travels from the SDU to the PDU.
                if let Some(group) = sdu.multicast_group {
                    pdu.control.multicast_group = Some(group);
                }
                trace!(
                    now,
                    %cid,
                    len = sdu.len(),
                    payload = %bytes_to_hex(&sdu.payload),
                    "SDU added to PDU"
                );
                pdu.push_sdu(sdu);
            }

            // Virtual occupancy feeds the BSR size, plus one RLC header while
            // data is still waiting above.
            size += self
                .mac_buffers
                .get(&cid)
                .map(VirtualBuffer::occupancy)
                .unwrap_or(0);
            if size > 0 {
                size += match conn.rlc_type {
                    RlcType::Um => RLC_HEADER_UM,
                    RlcType::Am => RLC_HEADER_AM,
                    RlcType::Tm => 0,
                };
            }
        }
        if size > 0 {
            trace!(now, bsr_bytes = size, "buffer status accounted");
        }

        let harq_processes = self.config.harq_processes;
        for ((dest, cw), pdu) in pdu_list {
            let direction = pdu.control.direction;
            let buf = self
                .harq_tx_buffers
                .entry(dest)
                .or_insert_with(|| HarqTxBuffer::for_direction(direction, harq_processes));
            let (acid, empty) = buf.get_empty_units(self.current_harq);
            if empty.is_empty() {
                warn!(now, dest = %dest, process = acid, "no available HARQ unit, dropping PDU");
            } else {
                trace!(now, dest = %dest, process = acid, len = pdu.len(), "PDU stored for transmission");
                buf.insert_pdu(acid, cw, pdu);
            }
        }

        Ok(Vec::new())
    }

    /// Disassemble a received PDU into SDUs for the upper layer
    fn mac_pdu_unmake(&self, pdu: MacPdu) -> Vec<MacAction> {
        pdu.into_sdus()
            .into_iter()
            .map(MacAction::SduToUpper)
            .collect()
    }

    /// Deferred flush: size the waiting PDU, send the grant down for SCI
    /// creation and release the selected HARQ units
    fn flush_harq_buffers(&mut self, now: SimTime) -> Result<Vec<MacAction>, LayerError> {
        let mut actions = Vec::new();
        let dests: Vec<MacNodeId> = self.harq_tx_buffers.keys().copied().collect();

        for dest in dests {
            let Some(grant) = self.grant.as_ref() else {
                break;
            };
            let total_granted_blocks = grant.total_granted_blocks;
            let grant_priority = grant.priority;

            let buf = self.harq_tx_buffers.get_mut(&dest).expect("key collected above");
            let Some(process) = buf.selected_process() else {
                // No PDU made it into the buffer for this opportunity.
                self.missed_transmissions += 1;
                self.signals.emit(now, Signal::MissedTransmission, 1);
                debug!(now, missed = self.missed_transmissions, "missed transmission");

                let mut phy_grant = self.grant.as_ref().expect("checked above").clone();
                // Lowered priority keeps the SCI chain alive without data.
                phy_grant.priority = 0;
                if self.missed_transmissions >= self.config.reselect_after {
                    phy_grant.period = 0;
                    self.grant = None;
                    self.missed_transmissions = 0;
                    self.signals.emit(now, Signal::GrantBreakMissedTrans, 1);
                }
                actions.push(MacAction::GrantToPhy(
                    Box::new(phy_grant),
                    self.sci_control_info(),
                ));
                continue;
            };

            let Some((cw, pdu_len)) = (0..MAX_CODEWORDS)
                .map(|cw| (cw, process.pdu_length(cw)))
                .find(|(_, len)| *len > 0)
            else {
                continue;
            };

            let bounds = cbr::effective_bounds(&self.config, self.allowed_retx, self.cbr);
            match amc::select_mcs(pdu_len, total_granted_blocks, bounds.min_mcs, bounds.max_mcs) {
                Ok(selection) => {
                    let grant = self.grant.as_mut().expect("checked above");
                    grant.mcs = selection.mcs;
                    grant.granted_cw_bytes[cw] = selection.capacity;
                    if grant.user_tx_params.is_none() {
                        grant.user_tx_params = self.preconfigured_tx_params.clone();
                    }
                    let phy_grant = Box::new(grant.clone());
                    actions.push(MacAction::GrantToPhy(phy_grant, self.sci_control_info()));

                    let allowed_retx = self.allowed_retx;
                    let buf = self.harq_tx_buffers.get_mut(&dest).expect("key collected above");
                    for pdu in buf.send_selected_down(allowed_retx) {
                        actions.push(MacAction::PduToPhy(pdu));
                    }

                    self.missed_transmissions = 0;
                    self.signals.emit(now, Signal::SelectedMcs, selection.mcs as i64);
                }
                Err(err) => {
                    // No MCS can carry this PDU on the granted blocks.
                    warn!(now, pdu_len, capacity = err.max_capacity, "grant too small for PDU");
                    self.signals.emit(now, Signal::GrantBreakSize, pdu_len as i64);
                    self.signals
                        .emit(now, Signal::MaximumCapacity, err.max_capacity as i64);

                    let elapsed = elapsed_ms(now, self.received_time) as i64;
                    self.remaining_time -= elapsed;
                    if self.remaining_time <= 0 {
                        // Too late to reselect: the message is dropped.
                        self.signals.emit(now, Signal::DroppedTimeout, 1);
                        let buf =
                            self.harq_tx_buffers.get_mut(&dest).expect("key collected above");
                        if let Some(process) = buf.selected_process_mut() {
                            process.force_drop();
                        }
                        self.grant = None;
                    } else {
                        let remaining = self.remaining_time;
                        self.grant = None;
                        actions.extend(self.generate_scheduling_grant(
                            now,
                            remaining,
                            grant_priority,
                        ));
                    }
                }
            }
        }

        Ok(actions)
    }

    /// Control element for grants sent down for SCI creation
    fn sci_control_info(&self) -> UserControlInfo {
        UserControlInfo {
            source: self.config.node_id,
            dest: self.config.node_id,
            lcid: None,
            direction: Direction::D2dMulti,
            frame_type: FrameType::GrantPkt,
            tx_number: 1,
            user_tx_params: self.preconfigured_tx_params.clone(),
            multicast_group: None,
        }
    }
}

/// Default D2D transmission parameters: single antenna port, rank one, the
/// whole configured band on the macro antenna.
fn build_preconfigured_tx_params(config: &MacConfig, rng: &mut SidelinkRng) -> UserTxParams {
    let rank = 1u8;
    UserTxParams {
        tx_mode: TxMode::SingleAntennaPort0,
        rank,
        pmi: rng.uniform_int(1, rank * rank),
        bands: (0..config.num_bands() as u16).collect(),
        antennas: std::iter::once(Remote::Macro).collect(),
    }
}
