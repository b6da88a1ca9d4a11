//! Poll loop and scan lifecycle.
//!
//! A [`Streamer`] owns the device for the duration of one streaming session:
//! it negotiates capabilities, sizes and allocates the scan buffer, starts
//! the paced scan, then drains the buffer to the sink on a fixed wall-clock
//! interval until cancelled or a fatal device error. Teardown runs on every
//! exit path, exactly once.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::buffer::ScanBuffer;
use crate::capture::DrainCursor;
use crate::config::{AInScanFlag, AiInputMode, ScanConfig, ScanOption, StreamRequest};
use crate::device::{AiDevice, ScanStatus};
use crate::writer::FrameWriter;
use crate::{Error, Result};

/// Cooperative cancellation flag, checked once per poll iteration.
///
/// Clones share the flag, so one copy can live in a signal handler or another
/// thread while the poll loop holds its own. Worst-case latency from `cancel`
/// to the loop noticing is one poll interval.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Starting,
    Polling,
    Stopping,
    Stopped,
}

/// Totals for one completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StreamStats {
    pub frames: u64,
    pub samples: u64,
    pub polls: u64,
    pub overruns: u64,
    /// Rate the pacer actually ran at, in Hz.
    pub achieved_rate: f64,
}

/// One streaming session over a device.
pub struct Streamer<D: AiDevice> {
    device: D,
    request: StreamRequest,
    config: ScanConfig,
    buffer: Arc<ScanBuffer>,
    status: ScanStatus,
    shut_down: bool,
}

impl<D: AiDevice> Streamer<D> {
    /// Negotiate capabilities and connect, without starting the scan.
    ///
    /// The high channel is clamped to what the device exposes and the range
    /// index to its supported ranges. Single ended input is preferred,
    /// falling back to differential when the device has no single ended
    /// channels. A device without a hardware pacer is refused outright.
    pub fn open(mut device: D, request: StreamRequest) -> Result<Streamer<D>> {
        if !device.has_pacer() {
            return Err(Error::NoPacer);
        }
        if request.sample_rate <= 0.0 {
            return Err(Error::BadRate(request.sample_rate));
        }

        let mut input_mode = AiInputMode::SingleEnded;
        if device.channel_count(input_mode) == 0 {
            input_mode = AiInputMode::Differential;
        }
        let available = device.channel_count(input_mode);
        if available == 0 {
            return Err(Error::NoAnalogInput);
        }
        let high_channel = request.high_channel.min(available - 1);
        if request.low_channel > high_channel {
            return Err(Error::BadChannels {
                low: request.low_channel,
                high: request.high_channel,
                available,
            });
        }

        let ranges = device.ranges(input_mode);
        if ranges.is_empty() {
            return Err(Error::BadRange { index: request.range_index, available: 0 });
        }
        let range = ranges[request.range_index.min(ranges.len() - 1)];

        let samples_per_channel = request.samples_per_channel();
        if samples_per_channel == 0 {
            return Err(Error::BadRate(request.sample_rate));
        }

        device.connect()?;

        let config = ScanConfig {
            low_channel: request.low_channel,
            high_channel,
            input_mode,
            range,
            samples_per_channel,
            sample_rate: request.sample_rate,
            options: ScanOption::CONTINUOUS,
            flags: AInScanFlag::empty(),
        };
        let buffer = Arc::new(ScanBuffer::for_scan(samples_per_channel, config.channel_count()));

        log::info!("{} ready", device.name());
        log::info!("    channels: {}-{} ({:?})", config.low_channel, config.high_channel,
            config.input_mode);
        log::info!("    range: {:?} (±{} V)", config.range, config.range.volts());
        log::info!("    samples per channel: {}", config.samples_per_channel);
        log::info!("    rate: {} Hz", config.sample_rate);
        log::info!("    scan options: {:?}", config.options);

        Ok(Streamer {
            device,
            request,
            config,
            buffer,
            status: ScanStatus::Idle,
            shut_down: false,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Stream frames into `sink` until `cancel` fires or the device fails.
    ///
    /// Tears the session down before returning, on success and on error
    /// alike. Cancellation is not an error.
    pub fn run<W: Write>(&mut self, sink: W, cancel: &CancelToken) -> Result<StreamStats> {
        let result = self.run_inner(sink, cancel);
        self.shutdown();
        result
    }

    fn run_inner<W: Write>(&mut self, sink: W, cancel: &CancelToken) -> Result<StreamStats> {
        if self.shut_down {
            return Err(Error::NotConnected);
        }
        let mut writer = FrameWriter::new(sink);
        let mut cursor = DrainCursor::new(self.config.buffer_len(), self.config.channel_count());
        let mut stats = StreamStats::default();

        let mut state = State::Starting;
        while state != State::Stopped {
            state = match state {
                State::Starting => {
                    let achieved_rate =
                        self.device.a_in_scan(&self.config, self.buffer.clone())?;
                    // the first status poll may still be a moment away; the
                    // scan call succeeding is what makes a stop necessary at
                    // teardown
                    self.status = ScanStatus::Running;
                    if achieved_rate != self.config.sample_rate {
                        log::info!("pacer running at {} Hz (requested {} Hz)",
                            achieved_rate, self.config.sample_rate);
                    }
                    stats.achieved_rate = achieved_rate;
                    log::debug!("polling every {:?}", self.request.poll_interval);
                    State::Polling
                }
                State::Polling => {
                    if cancel.is_cancelled() {
                        State::Stopping
                    } else {
                        let (status, xfer) = self.device.scan_status()?;
                        self.status = status;
                        if status == ScanStatus::Error {
                            return Err(Error::ScanFault);
                        }
                        stats.polls += 1;
                        let report = cursor.drain(&self.buffer, &xfer,
                            |frame| Ok(writer.write_frame(&frame)?))?;
                        stats.frames += report.frames as u64;
                        stats.samples += report.samples as u64;
                        if report.overrun {
                            stats.overruns += 1;
                        }
                        // a negative write index at startup takes this same
                        // path: one full interval of sleep, never a tight
                        // retry loop
                        thread::sleep(self.request.poll_interval);
                        State::Polling
                    }
                }
                State::Stopping => {
                    if self.request.drain_on_stop {
                        let (status, xfer) = self.device.scan_status()?;
                        self.status = status;
                        let report = cursor.drain(&self.buffer, &xfer,
                            |frame| Ok(writer.write_frame(&frame)?))?;
                        stats.frames += report.frames as u64;
                        stats.samples += report.samples as u64;
                        log::debug!("final drain picked up {} frames", report.frames);
                    }
                    writer.flush()?;
                    State::Stopped
                }
                State::Stopped => unreachable!(),
            };
        }
        log::info!("streamed {} frames over {} polls", stats.frames, stats.polls);
        Ok(stats)
    }

    /// Stop the scan if it is running, disconnect if connected, release the
    /// device. Runs at most once; later calls and the destructor are no-ops.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        if self.status == ScanStatus::Running {
            if let Err(error) = self.device.scan_stop() {
                log::warn!("failed to stop scan: {}", error);
            }
        }
        if self.device.is_connected() {
            self.device.disconnect();
        }
        self.device.release();
        log::debug!("{} released", self.device.name());
    }
}

impl<D: AiDevice> Drop for Streamer<D> {
    fn drop(&mut self) {
        self.shutdown()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::config::Range;
    use crate::device::TransferStatus;
    use crate::sim::{SimDevice, SimSignal};

    #[derive(Debug, Clone, Default)]
    struct OpLog(Arc<Mutex<Vec<&'static str>>>);

    impl OpLog {
        fn push(&self, op: &'static str) {
            self.0.lock().unwrap().push(op)
        }

        fn take(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().clone()
        }
    }

    /// Scripted device: reports a fixed status sequence and records every
    /// lifecycle call.
    struct ScriptedDevice {
        ops: OpLog,
        connected: bool,
        statuses: Vec<ScanStatus>,
    }

    impl ScriptedDevice {
        fn new(ops: OpLog, statuses: Vec<ScanStatus>) -> ScriptedDevice {
            ScriptedDevice { ops, connected: false, statuses }
        }
    }

    impl AiDevice for ScriptedDevice {
        fn name(&self) -> &str {
            "scripted"
        }

        fn has_pacer(&self) -> bool {
            true
        }

        fn channel_count(&self, _mode: AiInputMode) -> u32 {
            4
        }

        fn ranges(&self, _mode: AiInputMode) -> &[Range] {
            &[Range::Bip10Volts]
        }

        fn connect(&mut self) -> Result<()> {
            self.ops.push("connect");
            self.connected = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn disconnect(&mut self) {
            if self.connected {
                self.ops.push("disconnect");
                self.connected = false;
            }
        }

        fn release(&mut self) {
            self.ops.push("release");
        }

        fn a_in_scan(&mut self, _config: &ScanConfig, _buffer: Arc<ScanBuffer>) -> Result<f64> {
            self.ops.push("a_in_scan");
            Ok(1_000.0)
        }

        fn scan_status(&mut self) -> Result<(ScanStatus, TransferStatus)> {
            let status = if self.statuses.is_empty() {
                ScanStatus::Running
            } else {
                self.statuses.remove(0)
            };
            Ok((status, TransferStatus::default()))
        }

        fn scan_stop(&mut self) -> Result<()> {
            self.ops.push("scan_stop");
            Ok(())
        }
    }

    fn request() -> StreamRequest {
        StreamRequest {
            low_channel: 0,
            high_channel: 1,
            sample_rate: 1_000.0,
            poll_interval: Duration::from_millis(5),
            buffer_margin: 100,
            ..StreamRequest::default()
        }
    }

    #[test]
    fn test_refuses_device_without_pacer() {
        let device = SimDevice::without_pacer("sim0");
        assert!(matches!(Streamer::open(device, request()), Err(Error::NoPacer)));
    }

    #[test]
    fn test_clamps_channels_and_range() {
        let device = SimDevice::new("sim0");
        let streamer = Streamer::open(device, StreamRequest {
            high_channel: 100,
            range_index: 17,
            ..request()
        }).unwrap();
        // 8 single ended channels, 4 supported ranges
        assert_eq!(streamer.config().high_channel, 7);
        assert_eq!(streamer.config().range, Range::Bip1Volts);
    }

    #[test]
    fn test_rejects_inverted_channel_selection() {
        let device = SimDevice::new("sim0");
        let result = Streamer::open(device, StreamRequest {
            low_channel: 5,
            high_channel: 2,
            ..request()
        });
        assert!(matches!(result, Err(Error::BadChannels { .. })));
    }

    #[test]
    fn test_teardown_runs_once_and_in_order() {
        let ops = OpLog::default();
        let device = ScriptedDevice::new(ops.clone(), Vec::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut streamer = Streamer::open(device, request()).unwrap();
        let stats = streamer.run(Vec::<u8>::new(), &cancel).unwrap();
        assert_eq!(stats.frames, 0);
        // a second explicit shutdown and the destructor add nothing
        streamer.shutdown();
        drop(streamer);
        assert_eq!(ops.take(),
            vec!["connect", "a_in_scan", "scan_stop", "disconnect", "release"]);
    }

    #[test]
    fn test_scan_fault_routes_through_teardown() {
        let ops = OpLog::default();
        let device = ScriptedDevice::new(ops.clone(), vec![ScanStatus::Error]);
        let cancel = CancelToken::new();
        let mut streamer = Streamer::open(device, request()).unwrap();
        let result = streamer.run(Vec::<u8>::new(), &cancel);
        assert!(matches!(result, Err(Error::ScanFault)));
        // the device already stopped on its own, so no stop call is issued
        assert_eq!(ops.take(), vec!["connect", "a_in_scan", "disconnect", "release"]);
    }

    #[test]
    fn test_streams_contiguous_frames_from_sim() {
        let device = SimDevice::with_signal("sim0", SimSignal::Ramp);
        let cancel = CancelToken::new();
        let watcher = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            watcher.cancel();
        });
        let mut streamer = Streamer::open(device, StreamRequest {
            sample_rate: 2_000.0,
            poll_interval: Duration::from_millis(10),
            buffer_margin: 100,
            high_channel: 1,
            ..request()
        }).unwrap();
        let mut sink = Vec::new();
        let stats = streamer.run(&mut sink, &cancel).unwrap();
        handle.join().unwrap();

        assert!(stats.frames > 0);
        assert_eq!(stats.overruns, 0);
        assert_eq!(stats.samples, stats.frames * 2);
        assert_eq!(stats.achieved_rate, 2_000.0);

        let text = String::from_utf8(sink).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len() as u64, stats.frames);
        for (expected, line) in lines.iter().enumerate() {
            let fields: Vec<f64> = line.split(' ')
                .map(|field| field.parse().unwrap())
                .collect();
            assert_eq!(fields.len(), 3);
            // save count, then the ramp ordinals for both channels
            assert_eq!(fields[0], expected as f64);
            assert_eq!(fields[1], (expected * 2) as f64);
            assert_eq!(fields[2], (expected * 2 + 1) as f64);
        }
    }

    #[test]
    fn test_records_to_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        let device = SimDevice::with_signal("sim0", SimSignal::Ramp);
        let cancel = CancelToken::new();
        let watcher = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            watcher.cancel();
        });
        let mut streamer = Streamer::open(device, request()).unwrap();
        let sink = std::io::BufWriter::new(std::fs::File::create(&path).unwrap());
        let stats = streamer.run(sink, &cancel).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count() as u64, stats.frames);
    }

    #[test]
    fn test_drain_on_stop_flushes_the_tail() {
        let device = SimDevice::with_signal("sim0", SimSignal::Ramp);
        let cancel = CancelToken::new();
        let watcher = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            watcher.cancel();
        });
        let mut streamer = Streamer::open(device, StreamRequest {
            sample_rate: 2_000.0,
            poll_interval: Duration::from_millis(10),
            buffer_margin: 100,
            high_channel: 1,
            drain_on_stop: true,
            ..request()
        }).unwrap();
        let mut sink = Vec::new();
        let stats = streamer.run(&mut sink, &cancel).unwrap();
        let text = String::from_utf8(sink).unwrap();
        assert_eq!(text.lines().count() as u64, stats.frames);
    }
}
