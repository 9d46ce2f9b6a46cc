use crate::utils::{CommandWriter, ToPayload};
//# Naming conventions etc follow the R502 datasheet, see:
//# https://www.dropbox.com/sh/epucei8lmoz7xpp/AAAmon04b1DiSOeh1q4nAhzAa?dl=0&preview=R502+fingerprint+module+user+manual-V1.2.pdf

/// Enum for commands one can send to the R502. Names match the datasheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reads system status and basic configuration
    ReadSysPara,

    /// Performs a handshake with the device to verify the password.
    /// The default password on the R502 is 0x00000000.
    VfyPwd {
        /// The device password.
        password: u32,
    },

    /// Reads the number of templates stored in the finger library.
    TemplateNum,

    /// Captures an image of the fingerprint. Replies `NoFinger` when nothing is on the
    /// sensor, which makes it double as the presence check.
    GenImg,

    /// Processes an image into a _character buffer_
    Img2Tz {
        /// Which buffer to store the processed fingerprint data into (there are 2).
        ///
        /// **Note:** The buffers are named **1** and **2**. Any other value defaults to 2.
        buffer: u8,
    },

    /// Matches the captured fingerprint against a number of stored templates.
    Search {
        /// Which character buffer holds the fingerprint to search for.
        buffer: u8,

        /// First library page to compare against.
        start_index: u16,

        /// Number of pages to search, counted from `start_index`.
        page_count: u16,
    },

    /// Combines character buffers 1 and 2 into one template, left in both buffers.
    RegModel,

    /// Writes a character buffer into the finger library.
    Store {
        buffer: u8,
        page_id: u16,
    },

    /// Loads a template from the finger library into a character buffer.
    LoadChar {
        buffer: u8,
        page_id: u16,
    },
}

impl Command {
    /// Length of the reply packet the device sends back, header and checksum included.
    pub fn reply_len(&self) -> usize {
        match self {
            Self::ReadSysPara => 28,
            Self::TemplateNum => 14,
            Self::Search { .. } => 16,
            _ => 12,
        }
    }
}

impl ToPayload for Command {
    fn to_payload(&self, writer: &mut dyn CommandWriter) {
        match self {
            // Required packet:
            // headr  | 0xEF 0x01 [2]
            // addr   | cmd.address [4]
            // ident  | 0x01 [1]
            // length | 0x00 0x03 [2]
            // instr  | 0x0F [1]
            // chksum | checksum [2]
            Self::ReadSysPara => {
                writer.write_cmd_bytes(&[0x01]);
                writer.write_cmd_bytes(&[0x00, 0x03]);
                writer.write_cmd_bytes(&[0x0F]);
            }

            // ident  | 0x01 [1]
            // length | 0x00 0x07 [2]
            // instr  | 0x13 [1]
            // passwd | cmd.password [4]
            Self::VfyPwd { password } => {
                writer.write_cmd_bytes(&[0x01]);
                writer.write_cmd_bytes(&[0x00, 0x07]);
                writer.write_cmd_bytes(&[0x13]);
                writer.write_cmd_bytes(&password.to_be_bytes()[..]);
            }

            Self::TemplateNum => {
                writer.write_cmd_bytes(&[0x01]);
                writer.write_cmd_bytes(&[0x00, 0x03]);
                writer.write_cmd_bytes(&[0x1D]);
            }

            Self::GenImg => {
                writer.write_cmd_bytes(&[0x01]);
                writer.write_cmd_bytes(&[0x00, 0x03]);
                writer.write_cmd_bytes(&[0x01]);
            }

            Self::Img2Tz { buffer } => {
                writer.write_cmd_bytes(&[0x01]);
                writer.write_cmd_bytes(&[0x00, 0x04]);
                writer.write_cmd_bytes(&[0x02]);
                writer.write_cmd_bytes(&[*buffer]);
            }

            // ident  | 0x01 [1]
            // length | 0x00 0x08 [2]
            // instr  | 0x04 [1]
            // bufid  | buffer [1]
            // sstart | start_index [2]
            // snum   | page_count [2]
            Self::Search {
                buffer,
                start_index,
                page_count,
            } => {
                writer.write_cmd_bytes(&[0x01]);
                writer.write_cmd_bytes(&[0x00, 0x08]);
                writer.write_cmd_bytes(&[0x04]);
                writer.write_cmd_bytes(&[*buffer]);
                writer.write_cmd_bytes(&start_index.to_be_bytes()[..]);
                writer.write_cmd_bytes(&page_count.to_be_bytes()[..]);
            }

            Self::RegModel => {
                writer.write_cmd_bytes(&[0x01]);
                writer.write_cmd_bytes(&[0x00, 0x03]);
                writer.write_cmd_bytes(&[0x05]);
            }

            // ident  | 0x01 [1]
            // length | 0x00 0x06 [2]
            // instr  | 0x06 / 0x07 [1]
            // bufid  | buffer [1]
            // pageid | page_id [2]
            Self::Store { buffer, page_id } => {
                writer.write_cmd_bytes(&[0x01]);
                writer.write_cmd_bytes(&[0x00, 0x06]);
                writer.write_cmd_bytes(&[0x06]);
                writer.write_cmd_bytes(&[*buffer]);
                writer.write_cmd_bytes(&page_id.to_be_bytes()[..]);
            }

            Self::LoadChar { buffer, page_id } => {
                writer.write_cmd_bytes(&[0x01]);
                writer.write_cmd_bytes(&[0x00, 0x06]);
                writer.write_cmd_bytes(&[0x07]);
                writer.write_cmd_bytes(&[*buffer]);
                writer.write_cmd_bytes(&page_id.to_be_bytes()[..]);
            }
        }
    }
}
