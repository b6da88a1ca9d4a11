//! Simulated hardware-paced analog input device.
//!
//! Stands in for real acquisition hardware behind [`AiDevice`]: a worker
//! thread plays the role of the device's DMA engine, writing interleaved
//! frames into the scan buffer at the paced rate and publishing its write
//! position for `scan_status` to report.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::buffer::ScanBuffer;
use crate::config::{AiInputMode, Range, ScanConfig};
use crate::device::{AiDevice, ScanStatus, TransferStatus};
use crate::{Error, Result};

const PACER_CLOCK_HZ: f64 = 1_000_000.0;

const RANGES: [Range; 4] = [
    Range::Bip10Volts,
    Range::Bip5Volts,
    Range::Bip2Volts,
    Range::Bip1Volts,
];

/// What the simulated front end measures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimSignal {
    /// Sine per channel, `frequency * (channel + 1)` Hz at `amplitude` volts.
    Sine { frequency: f64, amplitude: f64 },
    /// Every sample is its own ordinal, `frame * channel_count + channel`.
    /// Lets a consumer verify losslessness sample by sample.
    Ramp,
}

impl SimSignal {
    fn sample(self, frame: u64, channel: usize, channel_count: usize, rate: f64) -> f64 {
        match self {
            Self::Sine { frequency, amplitude } => {
                let t = frame as f64 / rate;
                amplitude * (TAU * frequency * (channel + 1) as f64 * t).sin()
            }
            Self::Ramp =>
                (frame * channel_count as u64 + channel as u64) as f64,
        }
    }
}

#[derive(Debug)]
struct ScanShared {
    stop: AtomicBool,
    /// Samples written and published, in sample units.
    total: AtomicU64,
}

#[derive(Debug)]
struct ScanWorker {
    shared: Arc<ScanShared>,
    thread: thread::JoinHandle<()>,
    channel_count: usize,
    buffer_len: usize,
}

#[derive(Debug)]
pub struct SimDevice {
    name: String,
    signal: SimSignal,
    has_pacer: bool,
    connected: bool,
    scan: Option<ScanWorker>,
}

impl SimDevice {
    pub fn new(name: &str) -> SimDevice {
        SimDevice::with_signal(name, SimSignal::Sine { frequency: 50.0, amplitude: 5.0 })
    }

    pub fn with_signal(name: &str, signal: SimSignal) -> SimDevice {
        SimDevice {
            name: name.to_owned(),
            signal,
            has_pacer: true,
            connected: false,
            scan: None,
        }
    }

    /// A device whose analog input cannot be hardware paced. Streaming setup
    /// must refuse it.
    pub fn without_pacer(name: &str) -> SimDevice {
        SimDevice { has_pacer: false, ..SimDevice::new(name) }
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.scan.take() {
            worker.shared.stop.store(true, Ordering::Release);
            let _ = worker.thread.join();
            log::debug!("{}: scan worker stopped", self.name);
        }
    }
}

impl AiDevice for SimDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_pacer(&self) -> bool {
        self.has_pacer
    }

    fn channel_count(&self, mode: AiInputMode) -> u32 {
        match mode {
            AiInputMode::SingleEnded => 8,
            AiInputMode::Differential => 4,
        }
    }

    fn ranges(&self, _mode: AiInputMode) -> &[Range] {
        &RANGES
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::debug!("{}: connected", self.name);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.stop_worker();
            self.connected = false;
            log::debug!("{}: disconnected", self.name);
        }
    }

    fn release(&mut self) {
        self.stop_worker();
        self.connected = false;
    }

    fn a_in_scan(&mut self, config: &ScanConfig, buffer: Arc<ScanBuffer>) -> Result<f64> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        if config.sample_rate <= 0.0 {
            return Err(Error::BadRate(config.sample_rate));
        }
        self.stop_worker();

        // the pacer divides a fixed clock, so the achieved rate is the
        // closest divisor, not necessarily the requested rate
        let divisor = (PACER_CLOCK_HZ / config.sample_rate).round().max(1.0);
        let rate = PACER_CLOCK_HZ / divisor;

        let channel_count = config.channel_count();
        let buffer_len = config.buffer_len();
        assert_eq!(buffer.len(), buffer_len);
        let signal = self.signal;
        let shared = Arc::new(ScanShared {
            stop: AtomicBool::new(false),
            total: AtomicU64::new(0),
        });
        let worker_shared = shared.clone();
        let thread = thread::spawn(move || {
            produce(&buffer, &worker_shared, signal, rate, channel_count)
        });
        self.scan = Some(ScanWorker { shared, thread, channel_count, buffer_len });
        log::debug!("{}: scanning {} channels at {} Hz into {} slots",
            self.name, channel_count, rate, buffer_len);
        Ok(rate)
    }

    fn scan_status(&mut self) -> Result<(ScanStatus, TransferStatus)> {
        let Some(worker) = &self.scan else {
            return Ok((ScanStatus::Idle, TransferStatus::default()));
        };
        let total = worker.shared.total.load(Ordering::Acquire);
        let channel_count = worker.channel_count as u64;
        let xfer = if total == 0 {
            TransferStatus::default()
        } else {
            TransferStatus {
                current_scan_count: total / channel_count,
                current_total_count: total,
                current_index: ((total - channel_count) % worker.buffer_len as u64) as i64,
            }
        };
        let status = if worker.shared.stop.load(Ordering::Relaxed) {
            ScanStatus::Idle
        } else {
            ScanStatus::Running
        };
        Ok((status, xfer))
    }

    fn scan_stop(&mut self) -> Result<()> {
        self.stop_worker();
        Ok(())
    }
}

fn produce(buffer: &ScanBuffer, shared: &ScanShared, signal: SimSignal,
        rate: f64, channel_count: usize) {
    let buffer_len = buffer.len();
    let start = Instant::now();
    let mut frames: u64 = 0;
    while !shared.stop.load(Ordering::Acquire) {
        let due = (start.elapsed().as_secs_f64() * rate) as u64;
        while frames < due {
            let base = ((frames * channel_count as u64) % buffer_len as u64) as usize;
            for channel in 0..channel_count {
                buffer.put(base + channel, signal.sample(frames, channel, channel_count, rate));
            }
            frames += 1;
        }
        // samples first, position second: the release store is what makes
        // them visible to a reader that observed the new total
        shared.total.store(frames * channel_count as u64, Ordering::Release);
        thread::sleep(Duration::from_millis(1));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{AInScanFlag, ScanOption};

    fn config() -> ScanConfig {
        ScanConfig {
            low_channel: 0,
            high_channel: 1,
            input_mode: AiInputMode::SingleEnded,
            range: Range::Bip10Volts,
            samples_per_channel: 500,
            sample_rate: 10_000.0,
            options: ScanOption::CONTINUOUS,
            flags: AInScanFlag::empty(),
        }
    }

    fn wait_for_data(device: &mut SimDevice) -> TransferStatus {
        for _ in 0..500 {
            let (_, xfer) = device.scan_status().unwrap();
            if xfer.current_index >= 0 {
                return xfer;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("simulated scan produced no data");
    }

    #[test]
    fn test_scan_produces_frames() {
        let mut device = SimDevice::with_signal("sim0", SimSignal::Ramp);
        device.connect().unwrap();
        let buffer = Arc::new(ScanBuffer::for_scan(500, 2));
        let rate = device.a_in_scan(&config(), buffer.clone()).unwrap();
        assert_eq!(rate, 10_000.0);

        let xfer = wait_for_data(&mut device);
        assert_eq!(xfer.current_total_count % 2, 0);
        assert_eq!(xfer.current_index % 2, 0);
        assert_eq!(xfer.current_scan_count * 2, xfer.current_total_count);
        // the newest complete frame holds its own ordinals
        let frame = (xfer.current_total_count - 2) / 2;
        let slot = xfer.current_index as usize;
        assert_eq!(buffer.get(slot), (frame * 2) as f64);
        assert_eq!(buffer.get(slot + 1), (frame * 2 + 1) as f64);

        device.scan_stop().unwrap();
        let (status, _) = device.scan_status().unwrap();
        assert_eq!(status, ScanStatus::Idle);
    }

    #[test]
    fn test_achieved_rate_follows_the_divisor() {
        let mut device = SimDevice::new("sim0");
        device.connect().unwrap();
        let request = ScanConfig { sample_rate: 300_000.0, ..config() };
        let buffer = Arc::new(ScanBuffer::for_scan(500, 2));
        let rate = device.a_in_scan(&request, buffer).unwrap();
        // 1 MHz clock, divisor 3
        assert!((rate - 333_333.333).abs() < 1.0);
        device.scan_stop().unwrap();
    }

    #[test]
    fn test_scan_requires_connection() {
        let mut device = SimDevice::new("sim0");
        let buffer = Arc::new(ScanBuffer::for_scan(500, 2));
        assert!(matches!(device.a_in_scan(&config(), buffer), Err(Error::NotConnected)));
    }

    #[test]
    fn test_disconnect_and_release_are_idempotent() {
        let mut device = SimDevice::new("sim0");
        device.connect().unwrap();
        let buffer = Arc::new(ScanBuffer::for_scan(500, 2));
        device.a_in_scan(&config(), buffer).unwrap();
        device.disconnect();
        assert!(!device.is_connected());
        device.disconnect();
        device.release();
        device.release();
        let (status, xfer) = device.scan_status().unwrap();
        assert_eq!(status, ScanStatus::Idle);
        assert_eq!(xfer.current_index, -1);
    }
}
