mod buffer;
mod capture;
mod config;
mod device;
mod sim;
mod stream;
mod writer;

#[derive(Debug)]
pub enum Error {
    NoDevice,
    NoAnalogInput,
    NoPacer,
    NotConnected,
    BadChannels { low: u32, high: u32, available: u32 },
    BadRange { index: usize, available: usize },
    BadRate(f64),
    ScanFault,
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::NoDevice =>
                write!(f, "no DAQ devices found"),
            Self::NoAnalogInput =>
                write!(f, "device does not support analog input"),
            Self::NoPacer =>
                write!(f, "device does not support hardware paced analog input"),
            Self::NotConnected =>
                write!(f, "device not connected"),
            Self::BadChannels { low, high, available } =>
                write!(f, "invalid channel selection {}..={} (device has {} channels)",
                    low, high, available),
            Self::BadRange { index, available } =>
                write!(f, "invalid range index {} (device supports {} ranges)",
                    index, available),
            Self::BadRate(rate) =>
                write!(f, "invalid sample rate {} Hz", rate),
            Self::ScanFault =>
                write!(f, "device reported a scan fault"),
            Self::Io(io_error) =>
                write!(f, "I/O error: {}", io_error),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            &Self::Io(ref io_error) => Some(io_error),
            _ => None
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(error)
    }
}

pub type Result<T> =
    core::result::Result<T, Error>;

pub use config::{
    AiInputMode,
    Range,
    ScanOption,
    AInScanFlag,
    ScanConfig,
    StreamRequest,
};

pub use buffer::ScanBuffer;

pub use capture::{
    RingCursor,
    SampleFrame,
    DrainReport,
    DrainCursor,
};

pub use writer::FrameWriter;

pub use device::{
    ScanStatus,
    TransferStatus,
    AiDevice,
};

pub use stream::{
    CancelToken,
    StreamStats,
    Streamer,
};

pub use sim::{
    SimSignal,
    SimDevice,
};
