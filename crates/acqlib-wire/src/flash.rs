//! Flash geometry and image metadata codec.
//!
//! On-board persistent memory is divided into fixed, contiguous per-image
//! regions. All sizes are powers of two; addressing derives entirely from
//! the constants below, so erase/write/verify loops never compute addresses
//! from payload contents.
//!
//! # Layout
//!
//! ```text
//! slot 0 region: [0x00000 .. 0x40000)   (factory image)
//! slot 1 region: [0x40000 .. 0x80000)
//! slot 2 region: [0x80000 .. 0xC0000)
//! slot 3 region: [0xC0000 .. 0x100000)
//! ```
//!
//! The last [`INFO_BLOCK_SIZE`] bytes of each region hold the image info
//! block (version, write timestamp, source artifact name), written and
//! verified as the closing stages of a flash-image write.

use acqlib_core::{Error, ImageMeta, Result};

/// Write/verify transfer unit.
pub const BLOCK_SIZE: usize = 1024;

/// Erase unit.
pub const SECTOR_SIZE: usize = 64 * 1024;

/// Sectors per image region.
pub const SECTORS_PER_IMAGE: usize = 4;

/// Total bytes per image region.
pub const IMAGE_SIZE: usize = SECTOR_SIZE * SECTORS_PER_IMAGE;

/// Number of image slots.
pub const IMAGE_SLOTS: u8 = 4;

/// The factory image slot. Writes here require the factory password.
pub const FACTORY_SLOT: u8 = 0;

/// Password authorizing writes to the factory slot.
pub const FACTORY_PASSWORD: u32 = 0x5AFE_C0DE;

/// Size of the per-image info block.
pub const INFO_BLOCK_SIZE: usize = 64;

/// Maximum image payload: the region minus its info block.
pub const MAX_IMAGE_LEN: usize = IMAGE_SIZE - INFO_BLOCK_SIZE;

/// Width of the artifact-name field in the info block.
pub const ARTIFACT_NAME_LEN: usize = 32;

/// Base flash address of an image slot's region.
pub fn image_base(slot: u8) -> u32 {
    slot as u32 * IMAGE_SIZE as u32
}

/// Flash address of one erase sector within a slot's region.
pub fn sector_addr(slot: u8, sector: usize) -> u32 {
    image_base(slot) + (sector * SECTOR_SIZE) as u32
}

/// Flash address of one write/verify block within a slot's region.
pub fn block_addr(slot: u8, block: usize) -> u32 {
    image_base(slot) + (block * BLOCK_SIZE) as u32
}

/// Flash address of a slot's info block (end of the region).
pub fn info_addr(slot: u8) -> u32 {
    image_base(slot) + (IMAGE_SIZE - INFO_BLOCK_SIZE) as u32
}

/// Number of whole blocks needed to cover `len` image bytes.
pub fn blocks_for(len: usize) -> usize {
    len.div_ceil(BLOCK_SIZE)
}

/// Encode an info block.
///
/// ```text
/// offset 0..4    version     u32 BE
/// offset 4..12   timestamp   u64 BE (seconds since the Unix epoch)
/// offset 12..44  artifact    UTF-8, zero-padded / truncated to 32 bytes
/// offset 44..64  reserved, zero
/// ```
pub fn encode_info(meta: &ImageMeta) -> [u8; INFO_BLOCK_SIZE] {
    let mut block = [0u8; INFO_BLOCK_SIZE];
    block[0..4].copy_from_slice(&meta.version.to_be_bytes());
    block[4..12].copy_from_slice(&meta.timestamp.to_be_bytes());
    let name = meta.artifact.as_bytes();
    let n = name.len().min(ARTIFACT_NAME_LEN);
    block[12..12 + n].copy_from_slice(&name[..n]);
    block
}

/// Decode an info block read back from the board.
pub fn decode_info(buf: &[u8]) -> Result<ImageMeta> {
    if buf.len() < INFO_BLOCK_SIZE {
        return Err(Error::Protocol(format!(
            "info block too short: {} bytes, need {INFO_BLOCK_SIZE}",
            buf.len()
        )));
    }
    let version = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let timestamp = u64::from_be_bytes([
        buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
    ]);
    let name_field = &buf[12..12 + ARTIFACT_NAME_LEN];
    let name_end = name_field
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(ARTIFACT_NAME_LEN);
    let artifact = String::from_utf8_lossy(&name_field[..name_end]).into_owned();
    Ok(ImageMeta {
        version,
        timestamp,
        artifact,
    })
}
