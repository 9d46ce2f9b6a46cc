use byteorder::{BigEndian, ByteOrder};

use crate::utils::FromPayload;

/// Responses to commands returned by the R502. Names are the same as commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Contains system status and configuration information
    ReadSysPara(ReadSysParaResult),

    VfyPwd(AckResult),

    TemplateNum(TemplateNumResult),

    GenImg(AckResult),

    Img2Tz(AckResult),

    Search(SearchResult),

    RegModel(AckResult),

    Store(AckResult),

    LoadChar(AckResult),
}

impl Reply {
    /// The confirmation code carried by every reply.
    pub fn confirmation_code(&self) -> SensorCode {
        match self {
            Self::ReadSysPara(r) => r.confirmation_code,
            Self::TemplateNum(r) => r.confirmation_code,
            Self::Search(r) => r.confirmation_code,
            Self::VfyPwd(r)
            | Self::GenImg(r)
            | Self::Img2Tz(r)
            | Self::RegModel(r)
            | Self::Store(r)
            | Self::LoadChar(r) => r.confirmation_code,
        }
    }
}

/// Reply that only carries a confirmation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckResult {
    pub address: u32,
    pub confirmation_code: SensorCode,
    pub checksum: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSysParaResult {
    pub address: u32,
    pub confirmation_code: SensorCode,
    pub system_parameters: SystemParameters,
    pub checksum: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateNumResult {
    pub address: u32,
    pub confirmation_code: SensorCode,
    /// Number of templates in the finger library.
    pub template_num: u16,
    pub checksum: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub address: u32,
    pub confirmation_code: SensorCode,
    /// Library page of the matching template. Only meaningful on `Ok`.
    pub page_id: u16,
    pub match_score: u16,
    pub checksum: u16,
}

/// Confirmation codes shared by every R502 reply. `Ok` is the only success value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorCode {
    Ok,
    PacketError,
    NoFinger,
    ImageFail,
    ImageMessy,
    FeatureFail,
    NoMatch,
    NotFound,
    EnrollMismatch,
    BadLocation,
    InvalidTemplate,
    WrongPassword,
    FlashError,
    /// The device could not be reached at all (serial error or malformed reply).
    Unreachable,
    /// A confirmation byte this crate does not know.
    Other(u8),
}

impl SensorCode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Ok,
            0x01 => Self::PacketError,
            0x02 => Self::NoFinger,
            0x03 => Self::ImageFail,
            0x06 => Self::ImageMessy,
            0x07 => Self::FeatureFail,
            0x08 => Self::NoMatch,
            0x09 => Self::NotFound,
            0x0A => Self::EnrollMismatch,
            0x0B => Self::BadLocation,
            0x0C => Self::InvalidTemplate,
            0x13 => Self::WrongPassword,
            0x18 => Self::FlashError,
            other => Self::Other(other),
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

/// Contents of the module's system parameter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemParameters {
    /// Bit field; see [`busy`](Self::busy) and [`password_ok`](Self::password_ok).
    pub status_register: u16,
    /// Always `0x0009` on the R502.
    pub system_identifier_code: u16,
    /// Number of template pages in the finger library.
    pub finger_library_size: u16,
    /// Matching threshold, 1 to 5.
    pub security_level: u16,
    pub device_address: u32,
    /// Size code: 32 << code bytes per data packet.
    pub packet_size: u16,
    /// Baud rate in multiples of 9600.
    pub baud_setting: u16,
}

impl FromPayload for SystemParameters {
    fn from_payload(payload: &[u8]) -> Self {
        // six words and one double word, in datasheet order
        SystemParameters {
            status_register: BigEndian::read_u16(&payload[0..2]),
            system_identifier_code: BigEndian::read_u16(&payload[2..4]),
            finger_library_size: BigEndian::read_u16(&payload[4..6]),
            security_level: BigEndian::read_u16(&payload[6..8]),
            device_address: BigEndian::read_u32(&payload[8..12]),
            packet_size: BigEndian::read_u16(&payload[12..14]),
            baud_setting: BigEndian::read_u16(&payload[14..16]),
        }
    }
}

impl SystemParameters {
    /// True if the R502 is busy executing another command.
    ///
    /// *Busy* in the datasheet.
    pub fn busy(&self) -> bool {
        self.status_register & (1u16 << 0) != 0
    }

    /// True if the password given in the handshake is correct.
    ///
    /// *PWD* in the datasheet.
    pub fn password_ok(&self) -> bool {
        self.status_register & (1u16 << 2) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_confirmation_bytes_are_kept() {
        assert_eq!(SensorCode::from_byte(0x42), SensorCode::Other(0x42));
        assert!(!SensorCode::from_byte(0x42).is_ok());
        assert!(SensorCode::from_byte(0x00).is_ok());
    }

    #[test]
    fn system_parameters_decode_status_bits() {
        let payload = [
            0x00, 0x04, 0x00, 0x09, 0x00, 0xc8, 0x00, 0x03, 0xff, 0xff, 0xff, 0xff, 0x00, 0x02,
            0x00, 0x06,
        ];
        let params = SystemParameters::from_payload(&payload);
        assert!(params.password_ok());
        assert!(!params.busy());
        assert_eq!(params.finger_library_size, 200);
        assert_eq!(params.baud_setting, 6);
    }
}
