// assets.rs — asset bundle record shapes
//
// The asset pipeline tool and rendering backend are external
// collaborators (non-goals: asset compilation). This module exists so
// that collaborator has concrete Rust types to deserialize the bundle
// format against; it defines no producer (no gzip/MD5 writer) and the
// core never reads a bundle itself.

use crate::codec::{LengthPrefix, Reader, Writer};
use crate::error::CoreError;

/// Bundle envelope: `[md5_hash: 16][uncompressed_len: u32][compressed_len:
/// u32][gzip-compressed payload]`. The payload, once decompressed, is a
/// concatenation of asset records.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleHeader {
    pub md5_hash: [u8; 16],
    pub uncompressed_len: u32,
    pub compressed_len: u32,
}

impl BundleHeader {
    pub const SIZE: usize = 24;

    pub fn decode(data: &[u8]) -> Result<BundleHeader, CoreError> {
        if data.len() < Self::SIZE {
            return Err(CoreError::Malformed("bundle header truncated".into()));
        }
        let mut md5_hash = [0u8; 16];
        md5_hash.copy_from_slice(&data[0..16]);
        let mut r = Reader::new(&data[16..24]);
        let uncompressed_len = r.read_u32().map_err(|_| CoreError::Malformed("bundle header truncated".into()))?;
        let compressed_len = r.read_u32().map_err(|_| CoreError::Malformed("bundle header truncated".into()))?;
        Ok(BundleHeader { md5_hash, uncompressed_len, compressed_len })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRecordTag {
    Font,
    Texture,
    Shader,
}

impl AssetRecordTag {
    fn decode(r: &mut Reader) -> Result<Self, CoreError> {
        Ok(match r.read_u8().map_err(|_| CoreError::Malformed("asset record truncated".into()))? {
            0 => AssetRecordTag::Font,
            1 => AssetRecordTag::Texture,
            2 => AssetRecordTag::Shader,
            other => return Err(CoreError::Malformed(format!("unknown asset record tag {other}"))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlyphRecord {
    pub char_or_zero: u8,
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
    pub off_x: i16,
    pub off_y: i16,
    pub advance_x: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KerningRecord {
    pub first: u8,
    pub second: u8,
    pub amount: i16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FontAsset {
    pub line_height: u16,
    pub glyphs: Vec<GlyphRecord>,
    pub kerning_pairs: Vec<KerningRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureAsset {
    pub width: u32,
    pub height: u32,
    /// Premultiplied RGBA, `width * height * 4` bytes.
    pub rgba: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShaderAsset {
    pub vertex_source: String,
    pub fragment_source: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssetRecord {
    Font(FontAsset),
    Texture(TextureAsset),
    Shader(ShaderAsset),
}

impl AssetRecord {
    /// Decodes one record from the (already gzip-decompressed) bundle
    /// payload. Decompression itself is the rendering collaborator's
    /// concern — this crate carries no `flate2` dependency.
    pub fn decode(r: &mut Reader) -> Result<AssetRecord, CoreError> {
        let malformed = |_| CoreError::Malformed("asset record truncated".into());
        match AssetRecordTag::decode(r)? {
            AssetRecordTag::Font => {
                let line_height = r.read_u16().map_err(malformed)?;
                let glyph_count = r.read_u16().map_err(malformed)?;
                let kerning_pair_count = r.read_u32().map_err(malformed)?;
                let mut glyphs = Vec::with_capacity(glyph_count as usize);
                for _ in 0..glyph_count {
                    glyphs.push(GlyphRecord {
                        char_or_zero: r.read_u8().map_err(malformed)?,
                        x: r.read_u16().map_err(malformed)?,
                        y: r.read_u16().map_err(malformed)?,
                        w: r.read_u16().map_err(malformed)?,
                        h: r.read_u16().map_err(malformed)?,
                        off_x: r.read_i16().map_err(malformed)?,
                        off_y: r.read_i16().map_err(malformed)?,
                        advance_x: r.read_i16().map_err(malformed)?,
                    });
                }
                let mut kerning_pairs = Vec::with_capacity(kerning_pair_count as usize);
                for _ in 0..kerning_pair_count {
                    kerning_pairs.push(KerningRecord {
                        first: r.read_u8().map_err(malformed)?,
                        second: r.read_u8().map_err(malformed)?,
                        amount: r.read_i16().map_err(malformed)?,
                    });
                }
                Ok(AssetRecord::Font(FontAsset { line_height, glyphs, kerning_pairs }))
            }
            AssetRecordTag::Texture => {
                let width = r.read_u32().map_err(malformed)?;
                let height = r.read_u32().map_err(malformed)?;
                let byte_length = r.read_u32().map_err(malformed)?;
                let rgba = r.read_raw(byte_length as usize).map_err(malformed)?.to_vec();
                Ok(AssetRecord::Texture(TextureAsset { width, height, rgba }))
            }
            AssetRecordTag::Shader => {
                let vertex_source =
                    r.read_bounded_string(LengthPrefix::U32).map_err(malformed)?;
                let fragment_source =
                    r.read_bounded_string(LengthPrefix::U32).map_err(malformed)?;
                Ok(AssetRecord::Shader(ShaderAsset { vertex_source, fragment_source }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_header_decodes_fixed_layout() {
        let mut data = vec![0xAB; 16];
        let mut w = Writer::new(&mut data);
        w.write_u32(1000);
        w.write_u32(400);
        let header = BundleHeader::decode(&data).unwrap();
        assert_eq!(header.md5_hash, [0xAB; 16]);
        assert_eq!(header.uncompressed_len, 1000);
        assert_eq!(header.compressed_len, 400);
    }

    #[test]
    fn bundle_header_rejects_short_input() {
        let data = [0u8; 10];
        assert!(BundleHeader::decode(&data).is_err());
    }

    #[test]
    fn shader_record_round_trips() {
        let mut buf = Vec::new();
        let mut w = Writer::new(&mut buf);
        w.write_u8(2);
        w.write_bounded_string("vs", 4096, LengthPrefix::U32);
        w.write_bounded_string("fs", 4096, LengthPrefix::U32);

        let mut r = Reader::new(&buf);
        match AssetRecord::decode(&mut r).unwrap() {
            AssetRecord::Shader(shader) => {
                assert_eq!(shader.vertex_source, "vs");
                assert_eq!(shader.fragment_source, "fs");
            }
            _ => panic!("unexpected record"),
        }
    }

    #[test]
    fn unknown_record_tag_is_malformed() {
        let buf = [9u8];
        let mut r = Reader::new(&buf);
        assert!(AssetRecord::decode(&mut r).is_err());
    }
}
