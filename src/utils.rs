pub trait FromPayload {
    fn from_payload(payload: &[u8]) -> Self;
}

pub trait CommandWriter {
    fn write_cmd_bytes(&mut self, bytes: &[u8]);
}

pub trait ToPayload {
    fn to_payload(&self, writer: &mut dyn CommandWriter);
}

/// Wrapping 16-bit sum over everything between the address and the checksum
/// (packet identifier, length and payload).
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, byte| acc.wrapping_add(*byte as u16))
}
