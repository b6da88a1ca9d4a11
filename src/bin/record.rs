use std::fs::File;
use std::io::BufWriter;
use std::str::FromStr;
use std::sync::OnceLock;

use daqstream::{CancelToken, SimDevice, StreamRequest, Streamer};

const DEFAULT_OUTPUT: &str = "data.txt";

fn usage() -> ! {
    eprintln!("usage: daqstream-record [OUTPUT [LOW HIGH [RATE]]]");
    std::process::exit(2)
}

fn parse<T: FromStr>(value: &str, what: &str) -> T {
    value.parse().unwrap_or_else(|_| {
        eprintln!("invalid {}: {}", what, value);
        usage()
    })
}

fn install_sigint_handler(cancel: &CancelToken) {
    static TOKEN: OnceLock<CancelToken> = OnceLock::new();
    let _ = TOKEN.set(cancel.clone());
    extern "C" fn handle_sigint(_signum: libc::c_int) {
        // nothing but an atomic store is safe here
        if let Some(token) = TOKEN.get() {
            token.cancel()
        }
    }
    let handler: extern "C" fn(libc::c_int) = handle_sigint;
    // SAFETY: the handler only performs atomic operations.
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

fn main() -> daqstream::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") || args.len() == 2 || args.len() > 4 {
        usage()
    }
    let output = args.first().map(String::as_str).unwrap_or(DEFAULT_OUTPUT);
    let mut request = StreamRequest::default();
    if args.len() >= 3 {
        request.low_channel = parse(&args[1], "low channel");
        request.high_channel = parse(&args[2], "high channel");
    }
    if args.len() >= 4 {
        request.sample_rate = parse(&args[3], "sample rate");
    }

    let cancel = CancelToken::new();
    install_sigint_handler(&cancel);

    let mut streamer = Streamer::open(SimDevice::new("sim0"), request)?;
    let sink = BufWriter::new(File::create(output)?);
    println!("acquiring into {}, ^C to stop", output);
    let stats = streamer.run(sink, &cancel)?;
    println!("wrote {} frames ({} samples) at {} Hz", stats.frames, stats.samples,
        stats.achieved_rate);
    if stats.overruns > 0 {
        println!("warning: {} overruns, some data was lost", stats.overruns);
    }
    Ok(())
}
