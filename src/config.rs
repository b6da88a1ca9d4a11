//! Scan configuration in terms of the quantities the hardware negotiates.

use std::time::Duration;

use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AiInputMode {
    #[default]
    SingleEnded,
    Differential,
}

/// Full-scale input range of the A/D converter, in volts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    Bip10Volts,
    Bip5Volts,
    Bip2Volts,
    Bip1Volts,
}

impl Range {
    pub fn volts(self) -> f64 {
        match self {
            Self::Bip10Volts => 10.0,
            Self::Bip5Volts => 5.0,
            Self::Bip2Volts => 2.0,
            Self::Bip1Volts => 1.0,
        }
    }
}

bitflags! {
    /// Pacing and triggering behavior of a scan.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ScanOption: u32 {
        const SINGLE_IO   = 1<<0;
        const BLOCK_IO    = 1<<1;
        const BURST_IO    = 1<<2;
        const CONTINUOUS  = 1<<3;
        const EXT_CLOCK   = 1<<4;
        const EXT_TRIGGER = 1<<5;
        const RETRIGGER   = 1<<6;
    }
}

bitflags! {
    /// Data conditioning applied by the device before samples reach the buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AInScanFlag: u32 {
        const NO_SCALE_DATA     = 1<<0;
        const NO_CALIBRATE_DATA = 1<<1;
    }
}

/// Everything the device needs to start a paced analog input scan.
///
/// Fixed once acquisition starts. `sample_rate` is the requested rate; the
/// device reports the rate it actually achieved when the scan starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanConfig {
    pub low_channel: u32,
    pub high_channel: u32,
    pub input_mode: AiInputMode,
    pub range: Range,
    pub samples_per_channel: usize,
    pub sample_rate: f64,
    pub options: ScanOption,
    pub flags: AInScanFlag,
}

impl ScanConfig {
    pub fn channel_count(&self) -> usize {
        (self.high_channel - self.low_channel + 1) as usize
    }

    /// Total buffer capacity in samples, all channels interleaved.
    pub fn buffer_len(&self) -> usize {
        self.samples_per_channel * self.channel_count()
    }
}

/// User-facing knobs for one streaming run, before capability negotiation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamRequest {
    pub low_channel: u32,
    pub high_channel: u32,
    pub sample_rate: f64,
    pub range_index: usize,
    /// How often a chunk of new samples is drained to the sink.
    pub poll_interval: Duration,
    /// Over-provisioning factor: the buffer holds this many poll intervals
    /// worth of data before wraparound becomes a loss risk.
    pub buffer_margin: u32,
    /// Drain once more after cancellation, picking up samples that arrived
    /// since the last completed poll.
    pub drain_on_stop: bool,
}

impl Default for StreamRequest {
    fn default() -> Self {
        StreamRequest {
            low_channel: 0,
            high_channel: 3,
            sample_rate: 20_000.0,
            range_index: 0,
            poll_interval: Duration::from_millis(100),
            buffer_margin: 20,
            drain_on_stop: false,
        }
    }
}

impl StreamRequest {
    /// Buffer depth per channel implied by the margin, poll interval and rate.
    pub fn samples_per_channel(&self) -> usize {
        (self.buffer_margin as f64 * self.poll_interval.as_secs_f64() * self.sample_rate) as usize
    }
}
