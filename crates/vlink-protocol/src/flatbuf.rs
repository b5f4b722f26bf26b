//! Minimal FlatBuffers codec for the `TLFB` telemetry payload.
//!
//! Some vehicle firmware streams telemetry as a FlatBuffer instead of
//! the protobuf [`crate::vehicle::Payload`]; the two are distinguished
//! by the 4-byte file identifier at buffer offset 4. Only the one
//! payload table shape exists on this wire, so the codec implements the
//! FlatBuffers primitives (root offset, vtable, string, vector) directly
//! rather than pulling in generated code.
//!
//! Schema, by vtable slot:
//!
//! ```text
//! table Payload  { vin: string; created_at_ms: int64; data: [Datum]; is_resend: bool; }
//! table Datum    { key: int32; string_value: string; double_value: float64;
//!                  long_value: int64; bool_value: bool; location: Location; }
//! table Location { latitude: float64; longitude: float64; }
//! ```
//!
//! Datum value kind is presence-based: exactly one value slot is set.

use thiserror::Error;

use crate::vehicle::{self, Datum, LocationValue, Payload, Timestamp, Value};

/// File identifier at buffer offset 4.
pub const FILE_IDENT: &[u8; 4] = b"TLFB";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FlatbufError {
    #[error("buffer too short for flatbuffer framing")]
    Short,

    #[error("file identifier mismatch")]
    Ident,

    #[error("out-of-bounds access at offset {0}")]
    Bounds(usize),

    #[error("malformed utf-8 string at offset {0}")]
    Utf8(usize),
}

/// True when the buffer carries the `TLFB` identifier.
#[must_use]
pub fn is_flatbuf(buf: &[u8]) -> bool {
    buf.len() >= 8 && &buf[4..8] == FILE_IDENT
}

/// Decode a `TLFB` buffer into the shared protobuf payload type.
pub fn decode_payload(buf: &[u8]) -> Result<Payload, FlatbufError> {
    if buf.len() < 8 {
        return Err(FlatbufError::Short);
    }
    if &buf[4..8] != FILE_IDENT {
        return Err(FlatbufError::Ident);
    }
    let root = read_u32(buf, 0)? as usize;
    let table = Table::at(buf, root)?;

    let vin = match table.string(buf, 0)? {
        Some(s) => s.to_string(),
        None => String::new(),
    };
    let created_at = table.i64(buf, 1)?.map(|ms| Timestamp {
        seconds: ms.div_euclid(1000),
        nanos: (ms.rem_euclid(1000) * 1_000_000) as i32,
    });
    let mut data = Vec::new();
    if let Some((start, len)) = table.vector(buf, 2)? {
        for i in 0..len {
            let slot = start + i * 4;
            let rel = read_u32(buf, slot)? as usize;
            let datum = Table::at(buf, slot + rel)?;
            data.push(decode_datum(buf, &datum)?);
        }
    }
    let is_resend = table.bool(buf, 3)?.unwrap_or(false);

    Ok(Payload {
        data,
        created_at,
        vin,
        is_resend,
    })
}

fn decode_datum(buf: &[u8], table: &Table) -> Result<Datum, FlatbufError> {
    let key = table.i32(buf, 0)?.unwrap_or(0);
    let kind = if let Some(s) = table.string(buf, 1)? {
        Some(vehicle::value::Kind::StringValue(s.to_string()))
    } else if let Some(d) = table.f64(buf, 2)? {
        Some(vehicle::value::Kind::DoubleValue(d))
    } else if let Some(l) = table.i64(buf, 3)? {
        Some(vehicle::value::Kind::LongValue(l))
    } else if let Some(b) = table.bool(buf, 4)? {
        Some(vehicle::value::Kind::BooleanValue(b))
    } else if let Some(loc) = table.table(buf, 5)? {
        Some(vehicle::value::Kind::LocationValue(LocationValue {
            latitude: loc.f64(buf, 0)?.unwrap_or(0.0),
            longitude: loc.f64(buf, 1)?.unwrap_or(0.0),
            heading: None,
            speed: None,
        }))
    } else {
        None
    };
    Ok(Datum {
        key,
        value: kind.map(|kind| Value { kind: Some(kind) }),
    })
}

// ---------------------------------------------------------------------------
// Table walking
// ---------------------------------------------------------------------------

struct Table {
    pos: usize,
    vtable: usize,
    vtable_len: u16,
}

impl Table {
    fn at(buf: &[u8], pos: usize) -> Result<Self, FlatbufError> {
        let soffset = read_i32(buf, pos)?;
        let vtable = pos
            .checked_add_signed(-(soffset as isize))
            .ok_or(FlatbufError::Bounds(pos))?;
        let vtable_len = read_u16(buf, vtable)?;
        Ok(Table {
            pos,
            vtable,
            vtable_len,
        })
    }

    /// Absolute position of a field's inline data, or `None` if absent.
    fn field(&self, buf: &[u8], slot: usize) -> Result<Option<usize>, FlatbufError> {
        let entry = 4 + slot * 2;
        if entry + 2 > self.vtable_len as usize {
            return Ok(None);
        }
        let off = read_u16(buf, self.vtable + entry)?;
        if off == 0 {
            return Ok(None);
        }
        Ok(Some(self.pos + off as usize))
    }

    fn i32(&self, buf: &[u8], slot: usize) -> Result<Option<i32>, FlatbufError> {
        self.field(buf, slot)?.map(|p| read_i32(buf, p)).transpose()
    }

    fn i64(&self, buf: &[u8], slot: usize) -> Result<Option<i64>, FlatbufError> {
        self.field(buf, slot)?.map(|p| read_i64(buf, p)).transpose()
    }

    fn f64(&self, buf: &[u8], slot: usize) -> Result<Option<f64>, FlatbufError> {
        Ok(self.i64(buf, slot)?.map(|bits| f64::from_bits(bits as u64)))
    }

    fn bool(&self, buf: &[u8], slot: usize) -> Result<Option<bool>, FlatbufError> {
        match self.field(buf, slot)? {
            Some(p) => {
                let byte = *buf.get(p).ok_or(FlatbufError::Bounds(p))?;
                Ok(Some(byte != 0))
            }
            None => Ok(None),
        }
    }

    fn indirect(&self, buf: &[u8], slot: usize) -> Result<Option<usize>, FlatbufError> {
        match self.field(buf, slot)? {
            Some(p) => {
                let rel = read_u32(buf, p)? as usize;
                Ok(Some(p + rel))
            }
            None => Ok(None),
        }
    }

    fn string<'a>(&self, buf: &'a [u8], slot: usize) -> Result<Option<&'a str>, FlatbufError> {
        match self.indirect(buf, slot)? {
            Some(p) => {
                let len = read_u32(buf, p)? as usize;
                let start = p + 4;
                let bytes = buf
                    .get(start..start + len)
                    .ok_or(FlatbufError::Bounds(start))?;
                let s = core::str::from_utf8(bytes).map_err(|_| FlatbufError::Utf8(start))?;
                Ok(Some(s))
            }
            None => Ok(None),
        }
    }

    /// Vector of offsets: returns `(first_element_pos, element_count)`.
    fn vector(&self, buf: &[u8], slot: usize) -> Result<Option<(usize, usize)>, FlatbufError> {
        match self.indirect(buf, slot)? {
            Some(p) => {
                let len = read_u32(buf, p)? as usize;
                Ok(Some((p + 4, len)))
            }
            None => Ok(None),
        }
    }

    fn table(&self, buf: &[u8], slot: usize) -> Result<Option<Table>, FlatbufError> {
        match self.indirect(buf, slot)? {
            Some(p) => Ok(Some(Table::at(buf, p)?)),
            None => Ok(None),
        }
    }
}

fn read_u16(buf: &[u8], pos: usize) -> Result<u16, FlatbufError> {
    let bytes = buf.get(pos..pos + 2).ok_or(FlatbufError::Bounds(pos))?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32, FlatbufError> {
    let bytes = buf.get(pos..pos + 4).ok_or(FlatbufError::Bounds(pos))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_i32(buf: &[u8], pos: usize) -> Result<i32, FlatbufError> {
    Ok(read_u32(buf, pos)? as i32)
}

fn read_i64(buf: &[u8], pos: usize) -> Result<i64, FlatbufError> {
    let bytes = buf.get(pos..pos + 8).ok_or(FlatbufError::Bounds(pos))?;
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    Ok(i64::from_le_bytes(arr))
}

// ---------------------------------------------------------------------------
// Builder (test harnesses and capture tooling)
// ---------------------------------------------------------------------------

/// Datum value for [`build_payload`].
#[derive(Debug, Clone)]
pub enum DatumValue {
    Str(String),
    Double(f64),
    Long(i64),
    Bool(bool),
    Location { latitude: f64, longitude: f64 },
}

/// Serialize a payload into the `TLFB` wire form.
///
/// The encoder writes objects front-to-back with forward offsets; the
/// format permits either build direction since all references are
/// relative.
#[must_use]
pub fn build_payload(
    vin: &str,
    created_at_ms: i64,
    data: &[(i32, DatumValue)],
    is_resend: bool,
) -> Vec<u8> {
    let mut buf = vec![0u8; 8];
    buf[4..8].copy_from_slice(FILE_IDENT);

    // Root: vtable then table. Slots: vin(u32 off), created(i64), data(u32 off), resend(u8).
    let root_vtable = buf.len();
    write_vtable(&mut buf, 24, &[4, 8, 16, 20]);
    let root = buf.len();
    buf[0..4].copy_from_slice(&(root as u32).to_le_bytes());
    push_i32(&mut buf, (root - root_vtable) as i32);
    let vin_slot = buf.len();
    push_u32(&mut buf, 0);
    push_i64(&mut buf, created_at_ms);
    let data_slot = buf.len();
    push_u32(&mut buf, 0);
    buf.push(u8::from(is_resend));
    buf.extend_from_slice(&[0u8; 3]);

    let vin_pos = push_string(&mut buf, vin);
    patch_offset(&mut buf, vin_slot, vin_pos);

    // Vector of datum table offsets, elements patched as tables land.
    let vec_pos = buf.len();
    push_u32(&mut buf, data.len() as u32);
    let elems = buf.len();
    for _ in data {
        push_u32(&mut buf, 0);
    }
    patch_offset(&mut buf, data_slot, vec_pos);

    for (i, (key, value)) in data.iter().enumerate() {
        let pos = push_datum(&mut buf, *key, value);
        patch_offset(&mut buf, elems + i * 4, pos);
    }

    buf
}

fn push_datum(buf: &mut Vec<u8>, key: i32, value: &DatumValue) -> usize {
    // Slots: key(i32), string(off), double(f64), long(i64), bool(u8), location(off).
    let present: usize = match value {
        DatumValue::Str(_) => 1,
        DatumValue::Double(_) => 2,
        DatumValue::Long(_) => 3,
        DatumValue::Bool(_) => 4,
        DatumValue::Location { .. } => 5,
    };
    let mut slots = [0u16; 6];
    slots[0] = 4;
    // Value data starts after soffset + key.
    slots[present] = 8;
    let table_size = match value {
        DatumValue::Str(_) | DatumValue::Location { .. } => 12,
        DatumValue::Double(_) | DatumValue::Long(_) => 16,
        DatumValue::Bool(_) => 9,
    };
    let vtable = buf.len();
    write_vtable(buf, table_size, &slots);
    let table = buf.len();
    push_i32(buf, (table - vtable) as i32);
    push_i32(buf, key);
    let mut patch_at = None;
    match value {
        DatumValue::Str(_) | DatumValue::Location { .. } => {
            patch_at = Some(buf.len());
            push_u32(buf, 0);
        }
        DatumValue::Double(d) => push_i64(buf, d.to_bits() as i64),
        DatumValue::Long(l) => push_i64(buf, *l),
        DatumValue::Bool(b) => buf.push(u8::from(*b)),
    }
    match value {
        DatumValue::Str(s) => {
            let pos = push_string(buf, s);
            if let Some(slot) = patch_at {
                patch_offset(buf, slot, pos);
            }
        }
        DatumValue::Location {
            latitude,
            longitude,
        } => {
            let vt = buf.len();
            write_vtable(buf, 20, &[4, 12]);
            let loc = buf.len();
            push_i32(buf, (loc - vt) as i32);
            push_i64(buf, latitude.to_bits() as i64);
            push_i64(buf, longitude.to_bits() as i64);
            if let Some(slot) = patch_at {
                patch_offset(buf, slot, loc);
            }
        }
        _ => {}
    }
    table
}

fn write_vtable(buf: &mut Vec<u8>, table_size: u16, slots: &[u16]) {
    let vtable_len = 4 + 2 * slots.len() as u16;
    buf.extend_from_slice(&vtable_len.to_le_bytes());
    buf.extend_from_slice(&table_size.to_le_bytes());
    for slot in slots {
        buf.extend_from_slice(&slot.to_le_bytes());
    }
}

fn push_string(buf: &mut Vec<u8>, s: &str) -> usize {
    let pos = buf.len();
    push_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    pos
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn push_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn patch_offset(buf: &mut [u8], slot: usize, target: usize) {
    let rel = (target - slot) as u32;
    buf[slot..slot + 4].copy_from_slice(&rel.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_file_identifier() {
        let buf = build_payload("5YJ3E1EA1NF000000", 0, &[], false);
        assert!(is_flatbuf(&buf));
        assert!(!is_flatbuf(&[0u8; 8]));
        assert!(!is_flatbuf(b"TLFB"));
    }

    #[test]
    fn payload_round_trip() {
        let data = vec![
            (8, DatumValue::Double(72.0)),
            (2, DatumValue::Str("Charging".to_string())),
            (59, DatumValue::Bool(true)),
            (5, DatumValue::Long(48_211)),
            (
                21,
                DatumValue::Location {
                    latitude: 37.7749,
                    longitude: -122.4194,
                },
            ),
        ];
        let buf = build_payload("5YJ3E1EA1NF000000", 1_700_000_000_500, &data, true);
        let payload = decode_payload(&buf).unwrap();

        assert_eq!(payload.vin, "5YJ3E1EA1NF000000");
        assert!(payload.is_resend);
        let ts = payload.created_at.unwrap();
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 500_000_000);
        assert_eq!(payload.data.len(), 5);

        assert_eq!(payload.data[0].key, 8);
        assert!(matches!(
            payload.data[0].value.as_ref().unwrap().kind,
            Some(vehicle::value::Kind::DoubleValue(d)) if (d - 72.0).abs() < f64::EPSILON
        ));
        assert!(matches!(
            &payload.data[1].value.as_ref().unwrap().kind,
            Some(vehicle::value::Kind::StringValue(s)) if s == "Charging"
        ));
        assert!(matches!(
            payload.data[4].value.as_ref().unwrap().kind,
            Some(vehicle::value::Kind::LocationValue(ref loc))
                if (loc.latitude - 37.7749).abs() < 1e-9
        ));
    }

    #[test]
    fn rejects_foreign_identifier() {
        let mut buf = build_payload("VIN", 0, &[], false);
        buf[4..8].copy_from_slice(b"XXXX");
        assert_eq!(decode_payload(&buf), Err(FlatbufError::Ident));
    }

    #[test]
    fn rejects_truncated_buffer() {
        let buf = build_payload("5YJ3E1EA1NF000000", 0, &[(8, DatumValue::Double(1.0))], false);
        let cut = &buf[..buf.len() - 6];
        assert!(decode_payload(cut).is_err());
    }
}
