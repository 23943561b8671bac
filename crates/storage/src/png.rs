//! Grayscale PNG encoding for single-band tiles.
//!
//! Tiles of up to 8 bits per sample are written as 8-bit gray, wider
//! samples as 16-bit gray (big-endian, per the PNG spec).

use raster::TileImage;
use std::io::Write;

use crate::{Result, StorageError};

const PNG_SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Encode one tile as a grayscale PNG.
pub fn encode_tile(tile: &TileImage) -> Result<Vec<u8>> {
    let expected = tile.width as usize * tile.height as usize;
    if tile.width == 0 || tile.height == 0 || tile.samples.len() != expected {
        return Err(StorageError::Encode(format!(
            "{}x{} tile with {} samples",
            tile.width,
            tile.height,
            tile.samples.len()
        )));
    }

    let bit_depth = if tile.is_wide() { 16 } else { 8 };
    let mut png = Vec::new();

    png.extend_from_slice(&PNG_SIGNATURE);

    // IHDR chunk
    let mut ihdr_data = Vec::with_capacity(13);
    ihdr_data.extend_from_slice(&tile.width.to_be_bytes());
    ihdr_data.extend_from_slice(&tile.height.to_be_bytes());
    ihdr_data.push(bit_depth);
    ihdr_data.push(0); // color type (grayscale)
    ihdr_data.push(0); // compression method
    ihdr_data.push(0); // filter method
    ihdr_data.push(0); // interlace method
    write_chunk(&mut png, b"IHDR", &ihdr_data);

    let idat_data = deflate_idat_gray(tile, bit_depth)
        .map_err(|e| StorageError::Encode(format!("IDAT compression failed: {}", e)))?;
    write_chunk(&mut png, b"IDAT", &idat_data);

    write_chunk(&mut png, b"IEND", &[]);

    Ok(png)
}

/// Write a PNG chunk
fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    png.extend_from_slice(&hasher.finalize().to_be_bytes());
}

/// Deflate gray scanlines for the IDAT chunk.
fn deflate_idat_gray(tile: &TileImage, bit_depth: u8) -> std::io::Result<Vec<u8>> {
    let width = tile.width as usize;
    let bytes_per_sample = if bit_depth == 16 { 2 } else { 1 };
    let mut uncompressed =
        Vec::with_capacity(tile.height as usize * (1 + width * bytes_per_sample));

    for row in tile.samples.chunks_exact(width) {
        uncompressed.push(0); // filter type: none
        if bit_depth == 16 {
            for &v in row {
                uncompressed.extend_from_slice(&v.to_be_bytes());
            }
        } else {
            uncompressed.extend(row.iter().map(|&v| v.min(255) as u8));
        }
    }

    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(&uncompressed)?;
    encoder.finish()
}
