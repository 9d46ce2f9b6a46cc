//! One-way link to the display device, plus the success/error signal sink.
//!
//! Lines are `instruction|HH:MM\n`. Nothing is acknowledged; a failed write is logged and
//! forgotten.

use std::fmt;
use std::sync::Arc;

use embedded_hal::serial::Write;
use nb::block;
use parking_lot::Mutex;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    Main,
    Scan,
    Successful,
    Unsuccessful,
    Processing,
}

impl Instruction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Scan => "scan",
            Self::Successful => "successful",
            Self::Unsuccessful => "unsuccessful",
            Self::Processing => "processing",
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audible/visual outcome signal, separate from the display instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Success,
    Error,
}

/// Sink for user feedback. Shared by both execution contexts.
pub trait Feedback: Send + Sync {
    fn show(&self, instruction: Instruction);

    fn signal(&self, signal: Signal) {
        log::debug!("feedback: {:?} signal", signal);
    }

    fn succeed(&self) {
        self.show(Instruction::Successful);
        self.signal(Signal::Success);
    }

    fn fail(&self) {
        self.show(Instruction::Unsuccessful);
        self.signal(Signal::Error);
    }
}

pub fn format_line(instruction: Instruction, hhmm: Option<&str>) -> String {
    match hhmm {
        Some(time) => format!("{}|{}\n", instruction, time),
        None => format!("{}\n", instruction),
    }
}

/// Display reached over a serial transmit half.
#[derive(Debug)]
pub struct SerialDisplay<TX> {
    tx: Mutex<TX>,
    clock: Arc<Clock>,
    with_time: bool,
}

impl<TX> SerialDisplay<TX>
where
    TX: Write<u8>,
{
    pub fn new(tx: TX, clock: Arc<Clock>) -> Self {
        Self {
            tx: Mutex::new(tx),
            clock,
            with_time: true,
        }
    }

    /// Sends bare instructions without the `|HH:MM` suffix.
    pub fn without_time(mut self) -> Self {
        self.with_time = false;
        self
    }

    fn send(&self, line: &str) -> Result<(), TX::Error> {
        let mut tx = self.tx.lock();
        for byte in line.bytes() {
            block!(tx.write(byte))?;
        }
        block!(tx.flush())
    }
}

impl<TX> Feedback for SerialDisplay<TX>
where
    TX: Write<u8> + Send,
{
    fn show(&self, instruction: Instruction) {
        let time = if self.with_time {
            Some(self.clock.hhmm())
        } else {
            None
        };
        let line = format_line(instruction, time.as_deref());
        match self.send(&line) {
            Ok(()) => log::debug!("display: sent {}", line.trim_end()),
            Err(_) => log::warn!("display: dropped {}", line.trim_end()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc};
    use std::time::Instant;

    #[derive(Debug, Default, Clone)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write<u8> for Sink {
        type Error = ();
        fn write(&mut self, word: u8) -> nb::Result<(), ()> {
            self.0.lock().push(word);
            Ok(())
        }
        fn flush(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write<u8> for Broken {
        type Error = ();
        fn write(&mut self, _: u8) -> nb::Result<(), ()> {
            Err(nb::Error::Other(()))
        }
        fn flush(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }
    }

    fn clock() -> Arc<Clock> {
        let utc = Utc.with_ymd_and_hms(2025, 8, 29, 13, 5, 0).unwrap();
        Arc::new(Clock::anchored(
            FixedOffset::east_opt(3600).unwrap(),
            utc,
            Instant::now(),
        ))
    }

    #[test]
    fn lines_carry_local_time() {
        let sink = Sink::default();
        let display = SerialDisplay::new(sink.clone(), clock());
        display.show(Instruction::Successful);
        let sent = String::from_utf8(sink.0.lock().clone()).unwrap();
        assert!(sent.starts_with("successful|14:0"), "{}", sent);
        assert!(sent.ends_with('\n'));
    }

    #[test]
    fn bare_lines_without_time() {
        let sink = Sink::default();
        let display = SerialDisplay::new(sink.clone(), clock()).without_time();
        display.show(Instruction::Processing);
        assert_eq!(sink.0.lock().as_slice(), b"processing\n");
    }

    #[test]
    fn write_failures_are_swallowed() {
        let display = SerialDisplay::new(Broken, clock());
        display.show(Instruction::Main);
    }
}
