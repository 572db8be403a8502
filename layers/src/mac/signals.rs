//! Emitted Observations
//!
//! Counters and value signals produced by the MAC. Records accumulate in an
//! in-memory trace mirrored to `tracing`; drivers serialize the trace for
//! offline analysis and determinism checks.

use common::types::SimTime;
use serde::Serialize;
use tracing::trace;

/// Observation signals emitted by the sidelink MAC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Signal {
    #[serde(rename = "generatedGrants")]
    GeneratedGrants,
    #[serde(rename = "grantBreak")]
    GrantBreak,
    #[serde(rename = "grantBreakTiming")]
    GrantBreakTiming,
    #[serde(rename = "grantBreakSize")]
    GrantBreakSize,
    #[serde(rename = "grantBreakMissedTrans")]
    GrantBreakMissedTrans,
    #[serde(rename = "droppedTimeout")]
    DroppedTimeout,
    #[serde(rename = "missedTransmission")]
    MissedTransmission,
    #[serde(rename = "selectedMCS")]
    SelectedMcs,
    #[serde(rename = "selectedSubchannelIndex")]
    SelectedSubchannelIndex,
    #[serde(rename = "selectedNumSubchannels")]
    SelectedNumSubchannels,
    #[serde(rename = "maximumCapacity")]
    MaximumCapacity,
    #[serde(rename = "grantRequests")]
    GrantRequests,
}

impl Signal {
    /// Signal name as registered with the statistics backend
    pub fn name(&self) -> &'static str {
        match self {
            Signal::GeneratedGrants => "generatedGrants",
            Signal::GrantBreak => "grantBreak",
            Signal::GrantBreakTiming => "grantBreakTiming",
            Signal::GrantBreakSize => "grantBreakSize",
            Signal::GrantBreakMissedTrans => "grantBreakMissedTrans",
            Signal::DroppedTimeout => "droppedTimeout",
            Signal::MissedTransmission => "missedTransmission",
            Signal::SelectedMcs => "selectedMCS",
            Signal::SelectedSubchannelIndex => "selectedSubchannelIndex",
            Signal::SelectedNumSubchannels => "selectedNumSubchannels",
            Signal::MaximumCapacity => "maximumCapacity",
            Signal::GrantRequests => "grantRequests",
        }
    }
}

/// One emitted observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SignalRecord {
    pub time: SimTime,
    pub signal: Signal,
    pub value: i64,
}

/// Ordered trace of every observation emitted in a run
#[derive(Debug, Default)]
pub struct SignalTrace {
    records: Vec<SignalRecord>,
}

impl SignalTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation
    pub fn emit(&mut self, time: SimTime, signal: Signal, value: i64) {
        trace!(time, signal = signal.name(), value, "signal");
        self.records.push(SignalRecord { time, signal, value });
    }

    /// All records in emission order
    pub fn records(&self) -> &[SignalRecord] {
        &self.records
    }

    /// How often a signal fired
    pub fn count(&self, signal: Signal) -> usize {
        self.records.iter().filter(|r| r.signal == signal).count()
    }

    /// Values carried by a signal, in emission order
    pub fn values(&self, signal: Signal) -> Vec<i64> {
        self.records
            .iter()
            .filter(|r| r.signal == signal)
            .map(|r| r.value)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_counts_and_values() {
        let mut trace = SignalTrace::new();
        trace.emit(1, Signal::GrantRequests, 1);
        trace.emit(4, Signal::SelectedMcs, 7);
        trace.emit(104, Signal::SelectedMcs, 9);
        assert_eq!(trace.count(Signal::GrantRequests), 1);
        assert_eq!(trace.count(Signal::GrantBreak), 0);
        assert_eq!(trace.values(Signal::SelectedMcs), vec![7, 9]);
    }

    #[test]
    fn test_signal_names_match_registration() {
        assert_eq!(Signal::GrantBreakMissedTrans.name(), "grantBreakMissedTrans");
        assert_eq!(Signal::SelectedMcs.name(), "selectedMCS");
    }
}
