use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Sentinel in the u32 length slot meaning "a u64 length follows".
const LONG_STR_MARKER: u32 = 0xFFFF_FFFF;

pub fn write_str<W: Write>(w: &mut W, s: &[u8]) -> io::Result<()> {
    if s.len() >= LONG_STR_MARKER as usize {
        w.write_u32::<LittleEndian>(LONG_STR_MARKER)?;
        w.write_u64::<LittleEndian>(s.len() as u64)?;
    } else {
        w.write_u32::<LittleEndian>(s.len() as u32)?;
    }
    w.write_all(s)
}

pub fn read_str<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let short = r.read_u32::<LittleEndian>()?;
    let len = if short == LONG_STR_MARKER {
        r.read_u64::<LittleEndian>()? as usize
    } else {
        short as usize
    };
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_utf8<R: Read>(r: &mut R) -> io::Result<String> {
    let bytes = read_str(r)?;
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-utf8 string field"))
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_u32::<LittleEndian>(v)
}

pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    r.read_u32::<LittleEndian>()
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_u64::<LittleEndian>(v)
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    r.read_u64::<LittleEndian>()
}

pub fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_f64::<LittleEndian>(v)
}

pub fn read_f64<R: Read>(r: &mut R) -> io::Result<f64> {
    r.read_f64::<LittleEndian>()
}

pub fn write_f32<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_f32::<LittleEndian>(v)
}

pub fn read_f32<R: Read>(r: &mut R) -> io::Result<f32> {
    r.read_f32::<LittleEndian>()
}

pub fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_i32::<LittleEndian>(v)
}

pub fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    r.read_i32::<LittleEndian>()
}

pub fn write_bool<W: Write>(w: &mut W, v: bool) -> io::Result<()> {
    w.write_u8(v as u8)
}

pub fn read_bool<R: Read>(r: &mut R) -> io::Result<bool> {
    Ok(r.read_u8()? != 0)
}
