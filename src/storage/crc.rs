///! CRC-64 checksums for region files

use crc::{Crc, CRC_64_GO_ISO};

pub const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Incremental CRC-64 over a region written in pieces
pub struct Digest {
    digest: crc::Digest<'static, u64>,
}

impl Digest {
    pub fn new() -> Self {
        Self {
            digest: CRC64.digest(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    pub fn finalize(self) -> u64 {
        self.digest.finalize()
    }
}

impl Default for Digest {
    fn default() -> Self {
        Self::new()
    }
}

/// Footer written after the body: body crc, then crc of body + body crc.
pub fn footer(body: &[u8]) -> [u8; 16] {
    let body_crc = checksum(body);
    let mut digest = Digest::new();
    digest.update(body);
    digest.update(&body_crc.to_le_bytes());
    let file_crc = digest.finalize();

    let mut out = [0u8; 16];
    out[..8].copy_from_slice(&body_crc.to_le_bytes());
    out[8..].copy_from_slice(&file_crc.to_le_bytes());
    out
}

/// Split `bytes` into body and footer and check both checksums.
pub fn verify(bytes: &[u8]) -> Option<&[u8]> {
    if bytes.len() < 16 {
        return None;
    }
    let (body, tail) = bytes.split_at(bytes.len() - 16);
    (footer(body) == tail).then_some(body)
}
