//! The acquisition device boundary.

use std::sync::Arc;

use crate::buffer::ScanBuffer;
use crate::config::{AiInputMode, Range, ScanConfig};
use crate::Result;

/// State of the background scan as the device reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Idle,
    Running,
    Error,
}

/// Progress of the background transfer into the scan buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatus {
    /// Complete frames transferred since the scan started.
    pub current_scan_count: u64,
    /// Samples transferred since the scan started, all channels counted.
    pub current_total_count: u64,
    /// Channel-0 slot of the most recent complete frame, or -1 before the
    /// first transfer lands.
    pub current_index: i64,
}

impl Default for TransferStatus {
    fn default() -> Self {
        TransferStatus {
            current_scan_count: 0,
            current_total_count: 0,
            current_index: -1,
        }
    }
}

/// A DAQ device's analog input subsystem.
///
/// The device runs its own producer activity (DMA, driver thread, firmware)
/// outside the host's control; the host only observes it through
/// `scan_status`. Implementations must keep `disconnect` and `release`
/// idempotent, and must publish the transfer status with ordering that makes
/// every sample up to `current_index` visible to the reader.
pub trait AiDevice {
    fn name(&self) -> &str;

    /// Whether the analog input subsystem can pace a scan from its own clock.
    fn has_pacer(&self) -> bool;
    fn channel_count(&self, mode: AiInputMode) -> u32;
    fn ranges(&self, mode: AiInputMode) -> &[Range];

    fn connect(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn disconnect(&mut self);
    fn release(&mut self);

    /// Start a paced scan writing into `buffer`. Returns the rate the pacer
    /// actually achieved, which may differ from the requested one.
    fn a_in_scan(&mut self, config: &ScanConfig, buffer: Arc<ScanBuffer>) -> Result<f64>;
    fn scan_status(&mut self) -> Result<(ScanStatus, TransferStatus)>;
    /// Only meaningful while the scan is running.
    fn scan_stop(&mut self) -> Result<()>;
}
