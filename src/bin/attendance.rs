//! Attendance terminal on a host with the R502 and the display on two serial ports.
//!
//! Usage: `attendance [config.toml]` (default `attendance.toml`, or `$ATTENDANCE_CONFIG`).

use std::env;
use std::error::Error;
use std::io::{self, Read as _, Write as _};
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use embedded_hal::serial::{Read, Write};
use serialport::SerialPort;

use r502_attendance::{
    Clock, Config, Feedback, NetworkWorker, RestBackend, SerialDisplay, SharedStore, TcpProbe,
    Terminal, R502,
};

const DEFAULT_CONFIG: &str = "attendance.toml";
const SERIAL_TIMEOUT: Duration = Duration::from_secs(2);

// The host serial port stands in for the UART; these adapt it to embedded-hal.

struct SerialReader(Box<dyn SerialPort>);
struct SerialWriter(Box<dyn SerialPort>);

impl Read<u8> for SerialReader {
    type Error = io::Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        let mut buf = [0u8];
        loop {
            match self.0.read(&mut buf) {
                Ok(1) => return Ok(buf[0]),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(nb::Error::Other(e)),
            }
        }
    }
}

impl Write<u8> for SerialWriter {
    type Error = io::Error;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        loop {
            match self.0.write(&[word]) {
                Ok(1) => return Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(nb::Error::Other(e)),
            }
        }
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        self.0.flush().map_err(nb::Error::Other)
    }
}

fn open_port(path: &str, baud: u32) -> serialport::Result<Box<dyn SerialPort>> {
    log::info!("opening {} at {} baud", path, baud);
    serialport::new(path, baud).timeout(SERIAL_TIMEOUT).open()
}

fn run() -> Result<(), Box<dyn Error>> {
    let path = env::args()
        .nth(1)
        .or_else(|| env::var("ATTENDANCE_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = Config::load(&path)?;
    log::info!("loaded configuration from {}", path);

    let offset = config
        .utc_offset()
        .ok_or("clock.utc_offset_seconds is out of range")?;
    let clock = Arc::new(Clock::new(offset));
    let store = Arc::new(SharedStore::new(config.lock_timeout()));

    let display_port = open_port(&config.serial.display_port, config.serial.display_baud)?;
    let display = SerialDisplay::new(SerialWriter(display_port), Arc::clone(&clock));
    let display = if config.serial.display_time {
        display
    } else {
        display.without_time()
    };
    let ui: Arc<dyn Feedback> = Arc::new(display);

    let sensor_port = open_port(&config.serial.sensor_port, config.serial.sensor_baud)?;
    let reader = SerialReader(sensor_port.try_clone()?);
    let writer = SerialWriter(sensor_port);
    let r502 = R502::new(writer, reader, config.sensor.address);

    let mut terminal = Terminal::new(
        r502,
        Arc::clone(&store),
        Arc::clone(&ui),
        Arc::clone(&clock),
        config.scan(),
        config.enroll(),
        config.terminal(),
    );
    terminal.check_sensor(config.sensor.password)?;

    let stop = Arc::new(AtomicBool::new(false));
    let worker = NetworkWorker::new(
        RestBackend::new(config.rest()),
        TcpProbe::for_url(&config.backend.base_url)?,
        Arc::clone(&store),
        Arc::clone(&ui),
        Arc::clone(&clock),
        config.worker(),
    );
    let worker_stop = Arc::clone(&stop);
    let handle = thread::Builder::new()
        .name("network".into())
        .spawn(move || worker.run(worker_stop))?;

    terminal.run(&stop);
    if handle.join().is_err() {
        log::error!("network worker panicked");
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        log::error!("fatal: {}", err);
        process::exit(1);
    }
}
