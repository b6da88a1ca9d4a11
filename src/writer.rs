//! Plain-text sink for drained sample frames.

use std::io::{self, Write};

use crate::capture::SampleFrame;

/// Appends frames to a sink, one line per frame: the save count followed by
/// one voltage per channel, space separated.
///
/// Values are formatted as shortest round-trip decimals, so the file parses
/// back to the exact bit pattern that was acquired. Each line is composed in
/// full before a single write reaches the sink; a frame is never interleaved
/// with a partial one.
#[derive(Debug)]
pub struct FrameWriter<W: Write> {
    sink: W,
    line: String,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(sink: W) -> FrameWriter<W> {
        FrameWriter { sink, line: String::new() }
    }

    pub fn write_frame(&mut self, frame: &SampleFrame) -> io::Result<()> {
        use std::fmt::Write as _;
        self.line.clear();
        let _ = write!(self.line, "{}", frame.index);
        for value in frame.values {
            let _ = write!(self.line, " {:?}", value);
        }
        self.line.push('\n');
        self.sink.write_all(self.line.as_bytes())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_exact_line() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(&SampleFrame {
            index: 5,
            values: &[1.234, -0.567, 2.001, 0.0],
        }).unwrap();
        assert_eq!(writer.into_inner(), b"5 1.234 -0.567 2.001 0.0\n");
    }

    #[test]
    fn test_values_round_trip() {
        let values = [0.1 + 0.2, 1.0 / 3.0, -2.5e-3];
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(&SampleFrame { index: 0, values: &values }).unwrap();
        let line = String::from_utf8(writer.into_inner()).unwrap();
        let parsed: Vec<f64> = line.trim_end().split(' ').skip(1)
            .map(|field| field.parse().unwrap())
            .collect();
        assert_eq!(parsed, values);
    }

    #[test]
    fn test_one_line_per_frame() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_frame(&SampleFrame { index: 0, values: &[0.5, -0.5] }).unwrap();
        writer.write_frame(&SampleFrame { index: 1, values: &[0.25, -0.25] }).unwrap();
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text, "0 0.5 -0.5\n1 0.25 -0.25\n");
    }
}
