//! Capability view of the fingerprint module used by the scan and enrollment engines.

use std::ops::RangeInclusive;

use embedded_hal::serial::{Read, Write};

use crate::commands::Command;
use crate::driver::R502;
use crate::responses::{Reply, SensorCode};

/// One of the module's two character buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharBuffer {
    One = 1,
    Two = 2,
}

/// A successful library search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub slot: u16,
    pub confidence: u16,
}

/// Capability calls the engines need from a fingerprint module. Every call reports a
/// [`SensorCode`]; only [`SensorCode::Ok`] is success.
pub trait Sensor {
    fn verify_password(&mut self, password: u32) -> SensorCode;

    /// Captures an image. `NoFinger` doubles as the presence check.
    fn capture(&mut self) -> SensorCode;

    /// Extracts features from the last captured image into `buffer`.
    fn extract(&mut self, buffer: CharBuffer) -> SensorCode;

    /// Searches slots `1..=capacity` for the features in buffer 1.
    fn fast_search(&mut self, capacity: u16) -> Result<Match, SensorCode>;

    /// Combines both character buffers into one template.
    fn create_model(&mut self) -> SensorCode;

    fn store_model(&mut self, slot: u16) -> SensorCode;

    /// Loads the template at `slot`. `InvalidTemplate` or `BadLocation` means the slot is free.
    fn load_model(&mut self, slot: u16) -> SensorCode;

    fn template_count(&mut self) -> Result<u16, SensorCode>;

    /// Template pages the module can hold, from its system parameters.
    fn library_size(&mut self) -> Result<u16, SensorCode>;
}

/// First slot in `slots` that holds no template. Any reply other than a loaded template or an
/// empty page ends the search with that code, since it says nothing about the slot.
pub fn find_free_slot<S: Sensor + ?Sized>(
    sensor: &mut S,
    slots: RangeInclusive<u16>,
) -> Result<Option<u16>, SensorCode> {
    for slot in slots {
        match sensor.load_model(slot) {
            SensorCode::Ok => {}
            SensorCode::InvalidTemplate | SensorCode::BadLocation => return Ok(Some(slot)),
            code => return Err(code),
        }
    }
    Ok(None)
}

impl<TX, RX> R502<TX, RX>
where
    TX: Write<u8>,
    RX: Read<u8>,
{
    fn confirm(&mut self, cmd: Command) -> SensorCode {
        match self.send_command(cmd) {
            Ok(reply) => reply.confirmation_code(),
            Err(err) => {
                log::warn!("sensor: {:?} failed: {}", cmd, err);
                SensorCode::Unreachable
            }
        }
    }
}

impl<TX, RX> Sensor for R502<TX, RX>
where
    TX: Write<u8>,
    RX: Read<u8>,
{
    fn verify_password(&mut self, password: u32) -> SensorCode {
        self.confirm(Command::VfyPwd { password })
    }

    fn capture(&mut self) -> SensorCode {
        self.confirm(Command::GenImg)
    }

    fn extract(&mut self, buffer: CharBuffer) -> SensorCode {
        self.confirm(Command::Img2Tz {
            buffer: buffer as u8,
        })
    }

    fn fast_search(&mut self, capacity: u16) -> Result<Match, SensorCode> {
        let cmd = Command::Search {
            buffer: CharBuffer::One as u8,
            start_index: 1,
            page_count: capacity,
        };
        match self.send_command(cmd) {
            Ok(Reply::Search(result)) if result.confirmation_code.is_ok() => Ok(Match {
                slot: result.page_id,
                confidence: result.match_score,
            }),
            Ok(reply) => Err(reply.confirmation_code()),
            Err(err) => {
                log::warn!("sensor: search failed: {}", err);
                Err(SensorCode::Unreachable)
            }
        }
    }

    fn create_model(&mut self) -> SensorCode {
        self.confirm(Command::RegModel)
    }

    fn store_model(&mut self, slot: u16) -> SensorCode {
        self.confirm(Command::Store {
            buffer: CharBuffer::One as u8,
            page_id: slot,
        })
    }

    fn load_model(&mut self, slot: u16) -> SensorCode {
        self.confirm(Command::LoadChar {
            buffer: CharBuffer::One as u8,
            page_id: slot,
        })
    }

    fn template_count(&mut self) -> Result<u16, SensorCode> {
        match self.send_command(Command::TemplateNum) {
            Ok(Reply::TemplateNum(result)) if result.confirmation_code.is_ok() => {
                Ok(result.template_num)
            }
            Ok(reply) => Err(reply.confirmation_code()),
            Err(err) => {
                log::warn!("sensor: template count failed: {}", err);
                Err(SensorCode::Unreachable)
            }
        }
    }

    fn library_size(&mut self) -> Result<u16, SensorCode> {
        match self.send_command(Command::ReadSysPara) {
            Ok(Reply::ReadSysPara(result)) if result.confirmation_code.is_ok() => {
                let params = result.system_parameters;
                if params.busy() {
                    log::debug!("sensor: module reports busy");
                }
                Ok(params.finger_library_size)
            }
            Ok(reply) => Err(reply.confirmation_code()),
            Err(err) => {
                log::warn!("sensor: reading system parameters failed: {}", err);
                Err(SensorCode::Unreachable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::tests::{device, reply};

    #[test]
    fn free_slot_is_first_empty_page() {
        let (mut r502, _) = device(&[reply(&[0x00]), reply(&[0x00]), reply(&[0x0C])]);
        assert_eq!(find_free_slot(&mut r502, 1..=127), Ok(Some(3)));
    }

    #[test]
    fn occupied_range_has_no_free_slot() {
        let (mut r502, _) = device(&[reply(&[0x00]), reply(&[0x00])]);
        assert_eq!(find_free_slot(&mut r502, 5..=6), Ok(None));
    }

    #[test]
    fn silent_module_never_yields_a_free_slot() {
        let (mut r502, _) = device(&[]);
        assert_eq!(
            find_free_slot(&mut r502, 1..=127),
            Err(SensorCode::Unreachable)
        );
    }

    #[test]
    fn corrupted_reply_stops_the_search() {
        let mut corrupt = reply(&[0x00]);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xff;
        let (mut r502, _) = device(&[corrupt, reply(&[0x00]), reply(&[0x0C])]);
        assert_eq!(
            find_free_slot(&mut r502, 1..=127),
            Err(SensorCode::Unreachable)
        );
    }

    #[test]
    fn unknown_code_stops_the_search() {
        let (mut r502, _) = device(&[reply(&[0x01])]);
        assert_eq!(
            find_free_slot(&mut r502, 1..=127),
            Err(SensorCode::PacketError)
        );
    }

    #[test]
    fn unreachable_module_reports_unreachable() {
        let (mut r502, _) = device(&[]);
        assert_eq!(r502.capture(), SensorCode::Unreachable);
    }

    #[test]
    fn library_size_comes_from_system_parameters() {
        let body = [
            0x00, 0x00, 0x04, 0x00, 0x09, 0x00, 0xc8, 0x00, 0x03, 0xff, 0xff, 0xff, 0xff, 0x00,
            0x02, 0x00, 0x06,
        ];
        let (mut r502, _) = device(&[reply(&body)]);
        assert_eq!(r502.library_size(), Ok(200));
    }

    #[test]
    fn search_miss_reports_not_found() {
        let (mut r502, _) = device(&[reply(&[0x09, 0x00, 0x00, 0x00, 0x00])]);
        assert_eq!(r502.fast_search(127), Err(SensorCode::NotFound));
    }
}
