use arrayvec::ArrayVec;
use byteorder::{BigEndian, ByteOrder};
use embedded_hal::serial::{Read, Write};
use nb::block;

use crate::commands::Command;
use crate::responses::{
    AckResult, ReadSysParaResult, Reply, SearchResult, SensorCode, SystemParameters,
    TemplateNumResult,
};
use crate::utils::{checksum, CommandWriter, FromPayload, ToPayload};

const HEADER: [u8; 2] = [0xEF, 0x01];
const ACK_PACKET: u8 = 0x07;

/// Errors talking to the module itself, as opposed to a non-`Ok` confirmation code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("serial write failed")]
    Write,
    #[error("serial read failed")]
    Read,
    #[error("command does not fit the command buffer")]
    CommandTooLong,
    #[error("reply does not start with the packet header")]
    BadHeader,
    #[error("unexpected packet identifier {0:#04x}")]
    UnexpectedPacket(u8),
    #[error("reply length field {declared} does not match expected {expected}")]
    BadLength { declared: u16, expected: u16 },
    #[error("reply checksum {received:#06x} does not match computed {computed:#06x}")]
    BadChecksum { received: u16, computed: u16 },
}

/// Represents a R502 device connected to a U(S)ART.
#[derive(Debug)]
pub struct R502<TX, RX> {
    tx: TX,
    rx: RX,
    address: u32,
    received: ArrayVec<[u8; 64]>,
    cmd_buffer: ArrayVec<[u8; 32]>,
    overflowed: bool,
}

impl<TX, RX> R502<TX, RX>
where
    TX: Write<u8>,
    RX: Read<u8>,
{
    /// Wraps the serial halves. `address` is the module address, `0xffffffff` by default.
    pub fn new(tx: TX, rx: RX, address: u32) -> Self {
        Self {
            tx,
            rx,
            address,
            received: ArrayVec::new(),
            cmd_buffer: ArrayVec::new(),
            overflowed: false,
        }
    }

    /// Sends a command to the R502 and then blocks waiting for the reply.
    pub fn send_command(&mut self, cmd: Command) -> Result<Reply, Error> {
        self.cmd_buffer.clear();
        self.overflowed = false;

        let address = self.address;
        self.write_cmd_bytes(&HEADER);
        self.write_cmd_bytes(&address.to_be_bytes()[..]);
        cmd.to_payload(self);
        let chk = checksum(&self.cmd_buffer[6..]);
        self.write_cmd_bytes(&chk.to_be_bytes()[..]);
        if self.overflowed {
            return Err(Error::CommandTooLong);
        }

        for byte in self.cmd_buffer.iter() {
            block!(self.tx.write(*byte)).map_err(|_| Error::Write)?;
        }
        block!(self.tx.flush()).map_err(|_| Error::Write)?;

        self.received.clear();
        for _ in 0..cmd.reply_len() {
            let byte = block!(self.rx.read()).map_err(|_| Error::Read)?;
            self.received.try_push(byte).map_err(|_| Error::Read)?;
        }

        self.parse_reply(cmd)
    }

    /// Releases the serial halves.
    pub fn release(self) -> (TX, RX) {
        (self.tx, self.rx)
    }

    fn parse_reply(&self, cmd: Command) -> Result<Reply, Error> {
        let packet = &self.received[..];
        let len = packet.len();

        if packet[0..2] != HEADER {
            return Err(Error::BadHeader);
        }
        if packet[6] != ACK_PACKET {
            return Err(Error::UnexpectedPacket(packet[6]));
        }
        let declared = BigEndian::read_u16(&packet[7..9]);
        let expected = (len - 9) as u16;
        if declared != expected {
            return Err(Error::BadLength { declared, expected });
        }
        let received = BigEndian::read_u16(&packet[len - 2..]);
        let computed = checksum(&packet[6..len - 2]);
        if received != computed {
            return Err(Error::BadChecksum { received, computed });
        }

        // Expected packet:
        // headr  | 0xEF 0x01 [2]
        // addr   | address [4]
        // ident  | 0x07 [1]
        // length | [2]
        // confrm | [1]
        // params | (params) [length - 3]
        // chksum | checksum [2]
        let address = BigEndian::read_u32(&packet[2..6]);
        let confirmation_code = SensorCode::from_byte(packet[9]);
        let ack = AckResult {
            address,
            confirmation_code,
            checksum: received,
        };

        Ok(match cmd {
            Command::ReadSysPara => Reply::ReadSysPara(ReadSysParaResult {
                address,
                confirmation_code,
                system_parameters: SystemParameters::from_payload(&packet[10..26]),
                checksum: received,
            }),
            Command::TemplateNum => Reply::TemplateNum(TemplateNumResult {
                address,
                confirmation_code,
                template_num: BigEndian::read_u16(&packet[10..12]),
                checksum: received,
            }),
            Command::Search { .. } => Reply::Search(SearchResult {
                address,
                confirmation_code,
                page_id: BigEndian::read_u16(&packet[10..12]),
                match_score: BigEndian::read_u16(&packet[12..14]),
                checksum: received,
            }),
            Command::VfyPwd { .. } => Reply::VfyPwd(ack),
            Command::GenImg => Reply::GenImg(ack),
            Command::Img2Tz { .. } => Reply::Img2Tz(ack),
            Command::RegModel => Reply::RegModel(ack),
            Command::Store { .. } => Reply::Store(ack),
            Command::LoadChar { .. } => Reply::LoadChar(ack),
        })
    }
}

impl<TX, RX> CommandWriter for R502<TX, RX> {
    fn write_cmd_bytes(&mut self, bytes: &[u8]) {
        if self.cmd_buffer.try_extend_from_slice(bytes).is_err() {
            self.overflowed = true;
        }
    }
}
