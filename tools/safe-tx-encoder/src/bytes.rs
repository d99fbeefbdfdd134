//! Minimal cursor readers for fixed-width signature blocks.

use alloy_primitives::B256;

pub fn read_u8(bytes: &[u8], i: &mut usize) -> Option<u8> {
    let out = *bytes.get(*i)?;
    *i += 1;
    Some(out)
}

pub fn read_b32(bytes: &[u8], i: &mut usize) -> Option<B256> {
    if bytes.len() < *i + 32 {
        return None;
    }
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&bytes[*i..*i + 32]);
    *i += 32;
    Some(B256::from(buf))
}
