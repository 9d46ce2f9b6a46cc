//! **r502-attendance** is the core of a fingerprint attendance terminal built around the HZ Grow
//! R502 fingerprint module.
//!
//! The crate is split into two execution contexts sharing one lock-guarded [`SharedStore`]:
//!
//! * the [`Terminal`] drives the module through the [`ScanEngine`] (attendance taking) and the
//!   [`EnrollmentEngine`] (binding a new template to a person), never blocking on the network;
//! * the [`NetworkWorker`] polls the backend for commands, keeps the identity and collection
//!   caches fresh and drains the pending action queue.
//!
//! The low-level embedded-hal driver is still available on its own.
//!
//! ## Example
//!
//! To authenticate with the R502:
//! ```
//! # use embedded_hal::serial::{Read, Write};
//! use r502_attendance::{R502, Command, Reply};
//! # struct TestTx;
//! # struct TestRx(usize);
//! #
//! # impl Write<u8> for TestTx {
//! #     type Error = ();
//! #     fn write(&mut self, _word: u8) -> nb::Result<(), Self::Error> {
//! #         return Ok(());
//! #     }
//! #     fn flush(&mut self) -> nb::Result<(), Self::Error> {
//! #         return Ok(());
//! #     }
//! # }
//! #
//! # const res_data: &[u8] = &[ 0xef, 0x01, 0xff, 0xff, 0xff, 0xff, 0x07, 0x00, 0x03, 0x00, 0x00, 0x0a ];
//! #
//! # impl Read<u8> for TestRx {
//! #     type Error = ();
//! #     fn read(&mut self) -> nb::Result<u8, Self::Error> {
//! #         let word = res_data[self.0];
//! #         self.0 += 1;
//! #         return Ok(word);
//! #     }
//! # }
//! # let mut rx = TestRx(0);
//! # let mut tx = TestTx;
//!
//! // Obtain tx, rx from some serial port implementation
//! let mut r502 = R502::new(tx, rx, 0xffffffff);
//! match r502.send_command(Command::VfyPwd { password: 0x00000000 }) {
//!     Ok(Reply::VfyPwd(result)) => println!("Status: {:?}", result.confirmation_code),
//!     Err(error) => panic!("Error: {}", error),
//!     _ => {},
//! }
//! ```
//!
//! The `attendance` binary (feature `host`) wires everything to two host serial ports.
#![warn(missing_debug_implementations, rust_2018_idioms)]

mod commands;
mod driver;
mod responses;
mod utils;

pub mod backend;
pub mod clock;
pub mod config;
pub mod display;
pub mod enroll;
pub mod error;
pub mod model;
pub mod scan;
pub mod sensor;
pub mod store;
pub mod terminal;
pub mod worker;

pub use crate::backend::{Backend, RestBackend, RestConfig};
pub use crate::clock::Clock;
pub use crate::commands::Command;
pub use crate::config::Config;
pub use crate::display::{Feedback, Instruction, SerialDisplay, Signal};
pub use crate::driver::{Error, R502};
pub use crate::enroll::{EnrollStep, EnrollmentEngine, EnrollmentSession};
pub use crate::error::{BackendError, BootError, ConfigError};
pub use crate::model::{
    BindUpdate, CollectionRecord, CommandToken, ControlCommand, ControlState, IdentityId,
    IdentityRecord, Mode, PendingAction, ResolveRequest, Slot, Tag,
};
pub use crate::responses::{
    AckResult, ReadSysParaResult, Reply, SearchResult, SensorCode, SystemParameters,
    TemplateNumResult,
};
pub use crate::scan::{ScanEngine, ScanState};
pub use crate::sensor::{CharBuffer, Match, Sensor};
pub use crate::store::SharedStore;
pub use crate::terminal::Terminal;
pub use crate::worker::{Connectivity, NetworkWorker, Pass, TcpProbe};
