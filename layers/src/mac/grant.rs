//! Sidelink Scheduling Grant
//!
//! The semi-persistent scheduling grant record and its per-TTI lifecycle:
//! periodic re-arming, the randomized keep-or-reselect draw at the terminal
//! tick, and expiry once the counters drain.

use std::collections::BTreeMap;

use common::types::{
    Band, Direction, RbMap, Remote, SimTime, UserTxParams, MAX_CODEWORDS,
};

use crate::mac::rng::SidelinkRng;

/// Reselection counter bounds per TS 36.321 (SL_RESOURCE_RESELECTION_COUNTER)
pub const RESELECTION_COUNTER_MIN: u32 = 5;
pub const RESELECTION_COUNTER_MAX: u32 = 15;

/// Lifecycle phase of a grant, derived from its counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantPhase {
    /// Created, awaiting candidate resources from the PHY
    Pending,
    /// Resources assigned; armed or transmitting
    Active,
    /// Counters drained; to be collected
    Expired,
}

/// What the grant allows in the current TTI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtiDecision {
    /// No resources assigned yet, or before the start time
    Inactive,
    /// Within the period, no transmission this TTI
    Hold,
    /// Transmission opportunity this TTI
    Transmit,
    /// Counters drained, the grant must be dropped
    Expired,
}

/// Semi-persistent scheduling grant
#[derive(Debug, Clone)]
pub struct SchedulingGrant {
    /// Packet priority (0..7)
    pub priority: u8,
    /// Reservation period in TTIs (RRI x 100)
    pub period: u64,
    /// Latency budget remaining when the grant was requested, in ms
    pub max_latency: i64,
    /// Reservation intervals the configuration allows
    pub possible_rris: Vec<u32>,
    /// Contiguous subchannels occupied per transmission
    pub num_subchannels: usize,
    /// First occupied subchannel
    pub starting_subchannel: usize,
    /// Granted resource blocks per antenna and band
    pub granted_blocks: RbMap,
    /// Total granted resource blocks
    pub total_granted_blocks: usize,
    /// Current MCS index
    pub mcs: u8,
    /// Granted bytes per codeword
    pub granted_cw_bytes: [usize; MAX_CODEWORDS],
    /// Absolute time of the first reserved subframe
    pub start_time: SimTime,
    /// Periods remaining before the keep-or-reselect draw
    pub resource_reselection_counter: u32,
    /// TTIs until the reservation runs out
    pub expiration_counter: i64,
    /// TTIs until the next transmission within the current period
    pub period_counter: i64,
    /// Resources assigned and recurring
    pub periodic: bool,
    /// Bypasses the intra-period gate for the first subframe of a reservation
    pub first_transmission: bool,
    /// Transmission parameters attached once the first PDU is built
    pub user_tx_params: Option<UserTxParams>,
    /// Transmission direction
    pub direction: Direction,
    /// Codewords in use
    pub codewords: usize,
}

impl SchedulingGrant {
    /// Create an unselected grant awaiting candidate resources
    pub fn new(priority: u8, max_latency: i64, period: u64, possible_rris: Vec<u32>) -> Self {
        Self {
            priority,
            period,
            max_latency,
            possible_rris,
            num_subchannels: 0,
            starting_subchannel: 0,
            granted_blocks: RbMap::new(),
            total_granted_blocks: 0,
            mcs: 0,
            granted_cw_bytes: [0; MAX_CODEWORDS],
            start_time: 0,
            resource_reselection_counter: 0,
            expiration_counter: 0,
            period_counter: 0,
            periodic: false,
            first_transmission: true,
            user_tx_params: None,
            direction: Direction::D2dMulti,
            codewords: 1,
        }
    }

    /// Lifecycle phase derived from the counters
    pub fn phase(&self) -> GrantPhase {
        if !self.periodic {
            GrantPhase::Pending
        } else if self.expiration_counter > 0 {
            GrantPhase::Active
        } else {
            GrantPhase::Expired
        }
    }

    /// Occupy `num_subchannels` contiguous subchannels starting at
    /// `starting`, mapping each onto its resource blocks in the MACRO band.
    pub fn assign_subchannels(&mut self, starting: usize, subchannel_size: usize) {
        let mut bands: BTreeMap<Band, u8> = BTreeMap::new();
        let mut total = 0;
        for subchannel in starting..starting + self.num_subchannels {
            for band in subchannel * subchannel_size..(subchannel + 1) * subchannel_size {
                bands.insert(band as Band, 1);
                total += 1;
            }
        }
        self.starting_subchannel = starting;
        self.granted_blocks.insert(Remote::Macro, bands);
        self.total_granted_blocks = total;
    }

    /// Arm the periodic counters after resource assignment. The extra tick
    /// places every terminal draw on a transmission opportunity.
    pub fn arm(&mut self, start_time: SimTime) {
        self.start_time = start_time;
        self.periodic = true;
        self.period_counter = self.period as i64;
        self.expiration_counter =
            self.resource_reselection_counter as i64 * self.period as i64 + 1;
    }

    /// Step the grant by one TTI and decide what this TTI may do.
    ///
    /// The terminal-tick draw runs strictly before the intra-period gate:
    /// when the expiration counter crosses one period remaining, the
    /// reservation is kept with probability `prob_resource_keep` (a fresh
    /// reselection counter extends the expiration); otherwise the counters
    /// run out the full time of the current reservation so the next grant
    /// does not start early.
    pub fn advance_tti(
        &mut self,
        now: SimTime,
        prob_resource_keep: f64,
        rng: &mut SidelinkRng,
    ) -> TtiDecision {
        if !self.periodic || self.start_time > now {
            return TtiDecision::Inactive;
        }

        self.expiration_counter -= 1;
        if self.expiration_counter == self.period as i64 {
            let draw = rng.uniform_real();
            if draw < prob_resource_keep {
                let counter =
                    rng.uniform_int(RESELECTION_COUNTER_MIN, RESELECTION_COUNTER_MAX);
                self.resource_reselection_counter = counter;
                self.first_transmission = true;
                self.expiration_counter += counter as i64 * self.period as i64;
            }
        }

        self.period_counter -= 1;
        if self.period_counter > 0 && !self.first_transmission {
            return TtiDecision::Hold;
        }
        if self.expiration_counter > 0 {
            self.period_counter = self.period as i64;
            TtiDecision::Transmit
        } else {
            TtiDecision::Expired
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_grant(period: u64, reselection_counter: u32) -> SchedulingGrant {
        let mut grant = SchedulingGrant::new(4, 100, period, vec![1]);
        grant.num_subchannels = 2;
        grant.resource_reselection_counter = reselection_counter;
        grant.assign_subchannels(0, 10);
        grant.arm(0);
        grant
    }

    #[test]
    fn test_new_grant_is_pending() {
        let grant = SchedulingGrant::new(4, 100, 100, vec![1]);
        assert_eq!(grant.phase(), GrantPhase::Pending);
        assert!(grant.first_transmission);
    }

    #[test]
    fn test_assign_subchannels_block_accounting() {
        let mut grant = SchedulingGrant::new(4, 100, 100, vec![1]);
        grant.num_subchannels = 2;
        grant.assign_subchannels(1, 10);
        assert_eq!(grant.total_granted_blocks, 20);
        assert_eq!(grant.starting_subchannel, 1);
        let bands = &grant.granted_blocks[&Remote::Macro];
        assert_eq!(bands.len(), 20);
        assert!(bands.contains_key(&10));
        assert!(bands.contains_key(&29));
        assert!(!bands.contains_key(&30));
    }

    #[test]
    fn test_full_band_occupation_starts_at_zero() {
        let mut grant = SchedulingGrant::new(4, 100, 100, vec![1]);
        grant.num_subchannels = 3;
        grant.assign_subchannels(0, 10);
        assert_eq!(grant.total_granted_blocks, 30);
        assert_eq!(grant.starting_subchannel, 0);
    }

    #[test]
    fn test_inactive_before_start_time() {
        let mut rng = SidelinkRng::seeded(1);
        let mut grant = active_grant(100, 5);
        grant.start_time = 10;
        assert_eq!(grant.advance_tti(5, 1.0, &mut rng), TtiDecision::Inactive);
        assert_eq!(grant.expiration_counter, 501);
    }

    #[test]
    fn test_first_transmission_bypasses_gate() {
        let mut rng = SidelinkRng::seeded(1);
        let mut grant = active_grant(100, 5);
        assert_eq!(grant.advance_tti(0, 1.0, &mut rng), TtiDecision::Transmit);
        assert_eq!(grant.period_counter, grant.period as i64);
    }

    #[test]
    fn test_periodic_transmission_cadence() {
        let mut rng = SidelinkRng::seeded(1);
        let mut grant = active_grant(100, 5);
        let mut tx_ticks = Vec::new();
        for now in 0..301u64 {
            match grant.advance_tti(now, 1.0, &mut rng) {
                TtiDecision::Transmit => {
                    grant.first_transmission = false;
                    tx_ticks.push(now);
                }
                TtiDecision::Expired => panic!("grant must survive with keep probability 1"),
                _ => {}
            }
            // Counter invariants hold after every TTI.
            assert!(grant.period_counter >= 0);
            assert!(grant.period_counter <= grant.period as i64);
        }
        assert_eq!(tx_ticks, vec![0, 100, 200, 300]);
    }

    #[test]
    fn test_zero_keep_probability_expires_once() {
        let mut rng = SidelinkRng::seeded(9);
        let mut grant = active_grant(100, 5);
        let mut expired_at = None;
        for now in 0..2000u64 {
            match grant.advance_tti(now, 0.0, &mut rng) {
                TtiDecision::Transmit => grant.first_transmission = false,
                TtiDecision::Expired => {
                    expired_at = Some(now);
                    break;
                }
                _ => {}
            }
        }
        // Expiration lands on the transmission opportunity after the last
        // reserved period: 5 * 100 ticks past the first subframe.
        assert_eq!(expired_at, Some(500));
    }

    #[test]
    fn test_keep_extends_expiration() {
        let mut rng = SidelinkRng::seeded(3);
        let mut grant = active_grant(10, 5);
        grant.first_transmission = false;
        grant.expiration_counter = 11;
        grant.period_counter = 5;
        let decision = grant.advance_tti(0, 1.0, &mut rng);
        // The renewed reservation transmits immediately: the draw raised
        // first_transmission, which bypasses the intra-period gate.
        assert_eq!(decision, TtiDecision::Transmit);
        assert_eq!(grant.period_counter, 10);
        let counter = grant.resource_reselection_counter as i64;
        assert!((5..=15).contains(&counter));
        assert_eq!(grant.expiration_counter, 10 + counter * 10);
        assert!(grant.first_transmission);
    }

    #[test]
    fn test_keep_fraction_converges_to_probability() {
        // Over N terminal draws the kept fraction approaches the configured
        // probability within 3 sigma.
        let mut rng = SidelinkRng::seeded(42);
        let p = 0.7;
        let n = 1000;
        let mut kept = 0;
        for _ in 0..n {
            let mut grant = active_grant(10, 5);
            grant.first_transmission = false;
            grant.expiration_counter = 11;
            grant.period_counter = 5;
            grant.advance_tti(0, p, &mut rng);
            if grant.expiration_counter > 10 {
                kept += 1;
            }
        }
        let sigma = (n as f64 * p * (1.0 - p)).sqrt();
        let expected = n as f64 * p;
        assert!((kept as f64 - expected).abs() < 3.0 * sigma,
            "kept {} of {} draws, expected about {}", kept, n, expected);
    }
}
