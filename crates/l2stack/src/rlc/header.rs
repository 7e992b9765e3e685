//! RLC-AM PDU and status-PDU header packing, LTE and NR flavors.
//!
//! Bit-exact fidelity to every optional 3GPP field is not attempted; the layouts
//! below reproduce the fields and framing rules that matter for ARQ correctness
//! (D/C, RF, P, FI/SI, E, SN, SO, LI, NACK ranges) in a consistent, documented bit
//! order rather than chasing every historical 3GPP edge case.

use crate::error::L2Error;

/// Framing info for an LTE AM data PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingInfo {
    FirstAndLast,
    FirstOnly,
    LastOnly,
    Middle,
}

impl FramingInfo {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => FramingInfo::FirstAndLast,
            0b01 => FramingInfo::FirstOnly,
            0b10 => FramingInfo::LastOnly,
            _ => FramingInfo::Middle,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            FramingInfo::FirstAndLast => 0b00,
            FramingInfo::FirstOnly => 0b01,
            FramingInfo::LastOnly => 0b10,
            FramingInfo::Middle => 0b11,
        }
    }
}

/// Segmentation indicator for an NR AM data PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentIndicator {
    Whole,
    First,
    Last,
    Middle,
}

impl SegmentIndicator {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => SegmentIndicator::Whole,
            0b01 => SegmentIndicator::First,
            0b10 => SegmentIndicator::Last,
            _ => SegmentIndicator::Middle,
        }
    }

    fn to_bits(self) -> u8 {
        match self {
            SegmentIndicator::Whole => 0b00,
            SegmentIndicator::First => 0b01,
            SegmentIndicator::Last => 0b10,
            SegmentIndicator::Middle => 0b11,
        }
    }

    pub fn carries_so(self) -> bool {
        !matches!(self, SegmentIndicator::Whole | SegmentIndicator::First)
    }
}

/// LTE RLC-AM data PDU fixed header (2 bytes: D/C, RF, P, FI, E, 10-bit SN) plus the
/// optional LI list and, when `rf` is set, a 15-bit SO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LteDataHeader {
    pub resegmented: bool,
    pub poll: bool,
    pub framing: FramingInfo,
    pub sn: u16,
    /// Length indicators for every SDU prefix but the last carried in this PDU.
    pub length_indicators: Vec<u16>,
    /// Present iff `resegmented`.
    pub segment_offset: Option<u16>,
}

pub const LTE_FIXED_HEADER_LEN: usize = 2;

impl LteDataHeader {
    pub fn encode(&self) -> Result<Vec<u8>, L2Error> {
        if self.sn > 0x3ff {
            return Err(L2Error::parse("LTE SN exceeds 10 bits"));
        }
        let has_li = !self.length_indicators.is_empty();
        let byte0 = (1 << 7)
            | ((self.resegmented as u8) << 6)
            | ((self.poll as u8) << 5)
            | (self.framing.to_bits() << 3)
            | ((has_li as u8) << 2)
            | ((self.sn >> 8) as u8 & 0b11);
        let byte1 = (self.sn & 0xff) as u8;
        let mut out = vec![byte0, byte1];

        if has_li {
            encode_li_list(&self.length_indicators, &mut out)?;
        }

        if self.resegmented {
            let so = self
                .segment_offset
                .ok_or_else(|| L2Error::parse("resegmented PDU missing SO"))?;
            if so > 0x7fff {
                return Err(L2Error::parse("SO exceeds 15 bits"));
            }
            out.push(((so >> 8) & 0x7f) as u8);
            out.push((so & 0xff) as u8);
        }

        Ok(out)
    }

    /// Decodes the fixed header and LI list. Does not attempt to separate the
    /// remaining payload bytes from the SO trailer; callers slice the payload using
    /// `header_len` once they know whether `resegmented` is set.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), L2Error> {
        if bytes.len() < LTE_FIXED_HEADER_LEN {
            return Err(L2Error::parse("LTE header truncated"));
        }
        let byte0 = bytes[0];
        if byte0 & 0x80 == 0 {
            return Err(L2Error::parse("not a data PDU (D/C=0)"));
        }
        let resegmented = byte0 & 0x40 != 0;
        let poll = byte0 & 0x20 != 0;
        let framing = FramingInfo::from_bits((byte0 >> 3) & 0b11);
        let has_li = byte0 & 0b100 != 0;
        let sn_hi = byte0 & 0b11;
        let sn = ((sn_hi as u16) << 8) | bytes[1] as u16;

        let mut offset = LTE_FIXED_HEADER_LEN;
        let length_indicators = if has_li {
            decode_li_list(&bytes[offset..], &mut offset)?
        } else {
            Vec::new()
        };

        let segment_offset = if resegmented {
            if bytes.len() < offset + 2 {
                return Err(L2Error::parse("truncated SO field"));
            }
            let so = (((bytes[offset] & 0x7f) as u16) << 8) | bytes[offset + 1] as u16;
            offset += 2;
            Some(so)
        } else {
            None
        };

        Ok((
            Self {
                resegmented,
                poll,
                framing,
                sn,
                length_indicators,
                segment_offset,
            },
            offset,
        ))
    }
}

/// Packs 11-bit length indicators with a continuation ("E") bit into a bitstream, 1.5
/// bytes per LI.
fn encode_li_list(lis: &[u16], out: &mut Vec<u8>) -> Result<(), L2Error> {
    let mut writer = BitWriter::new();
    for (i, &li) in lis.iter().enumerate() {
        if li > 0x7ff {
            return Err(L2Error::parse("LI exceeds 11 bits"));
        }
        let more = i + 1 < lis.len();
        writer.push_bits(li as u64, 11);
        writer.push_bits(more as u64, 1);
    }
    out.extend_from_slice(&writer.finish());
    Ok(())
}

fn decode_li_list(bytes: &[u8], offset: &mut usize) -> Result<Vec<u16>, L2Error> {
    let mut reader = BitReader::new(bytes);
    let mut lis = Vec::new();
    loop {
        let li = reader
            .take_bits(11)
            .ok_or_else(|| L2Error::parse("truncated LI"))? as u16;
        let more = reader
            .take_bits(1)
            .ok_or_else(|| L2Error::parse("truncated LI continuation bit"))?;
        lis.push(li);
        if more == 0 {
            break;
        }
    }
    *offset += reader.bytes_consumed();
    Ok(lis)
}

/// NR RLC-AM data PDU fixed header (D/C, P, SI, R, SN — 2 bytes for 12-bit SN, 3
/// bytes for 18-bit SN) plus an optional 16-bit SO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NrDataHeader {
    pub poll: bool,
    pub si: SegmentIndicator,
    pub sn_bits: u8, // 12 or 18
    pub sn: u32,
    pub segment_offset: Option<u16>,
}

impl NrDataHeader {
    pub fn encode(&self) -> Result<Vec<u8>, L2Error> {
        let mut out = Vec::new();
        match self.sn_bits {
            12 => {
                if self.sn > 0xfff {
                    return Err(L2Error::parse("NR SN exceeds 12 bits"));
                }
                let byte0 = (1 << 7)
                    | ((self.poll as u8) << 6)
                    | (self.si.to_bits() << 4)
                    | ((self.sn >> 8) as u8 & 0x0f);
                out.push(byte0);
                out.push((self.sn & 0xff) as u8);
            }
            18 => {
                if self.sn > 0x3ffff {
                    return Err(L2Error::parse("NR SN exceeds 18 bits"));
                }
                let byte0 = (1 << 7)
                    | ((self.poll as u8) << 6)
                    | (self.si.to_bits() << 4)
                    | ((self.sn >> 16) as u8 & 0b11);
                out.push(byte0);
                out.push(((self.sn >> 8) & 0xff) as u8);
                out.push((self.sn & 0xff) as u8);
            }
            other => return Err(L2Error::parse(format!("unsupported NR sn_bits {other}"))),
        }

        if self.si.carries_so() {
            let so = self
                .segment_offset
                .ok_or_else(|| L2Error::parse("segmented PDU missing SO"))?;
            out.push((so >> 8) as u8);
            out.push((so & 0xff) as u8);
        }

        Ok(out)
    }

    pub fn decode(bytes: &[u8], sn_bits: u8) -> Result<(Self, usize), L2Error> {
        if bytes.is_empty() {
            return Err(L2Error::parse("NR header truncated"));
        }
        let byte0 = bytes[0];
        if byte0 & 0x80 == 0 {
            return Err(L2Error::parse("not a data PDU (D/C=0)"));
        }
        let poll = byte0 & 0x40 != 0;
        let si = SegmentIndicator::from_bits((byte0 >> 4) & 0b11);

        let (sn, mut offset) = match sn_bits {
            12 => {
                if bytes.len() < 2 {
                    return Err(L2Error::parse("NR header truncated"));
                }
                let sn = (((byte0 & 0x0f) as u32) << 8) | bytes[1] as u32;
                (sn, 2)
            }
            18 => {
                if bytes.len() < 3 {
                    return Err(L2Error::parse("NR header truncated"));
                }
                let sn = (((byte0 & 0b11) as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
                (sn, 3)
            }
            other => return Err(L2Error::parse(format!("unsupported NR sn_bits {other}"))),
        };

        let segment_offset = if si.carries_so() {
            if bytes.len() < offset + 2 {
                return Err(L2Error::parse("truncated SO field"));
            }
            let so = ((bytes[offset] as u16) << 8) | bytes[offset + 1] as u16;
            offset += 2;
            Some(so)
        } else {
            None
        };

        Ok((
            Self {
                poll,
                si,
                sn_bits,
                sn,
                segment_offset,
            },
            offset,
        ))
    }
}

/// One NACK record in a status PDU: a missing SN, optionally scoped to a byte range
/// (partial reception) or a contiguous run of SNs (range compression, NR only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackRecord {
    pub sn: u32,
    pub so_range: Option<(u16, u16)>,
    /// Number of additional contiguous SNs covered (NR range compression).
    pub nack_range: u8,
}

/// A status PDU: cumulative ACK_SN plus zero or more NACKs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPdu {
    pub ack_sn: u32,
    pub nacks: Vec<NackRecord>,
}

struct BitWriter {
    bytes: Vec<u8>,
    bit_pos: u8, // next free bit in the last byte, 0 = need a new byte
}

impl BitWriter {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bit_pos: 0,
        }
    }

    fn push_bits(&mut self, value: u64, n: u8) {
        for i in (0..n).rev() {
            let bit = (value >> i) & 1;
            if self.bit_pos == 0 {
                self.bytes.push(0);
            }
            let last = self.bytes.len() - 1;
            self.bytes[last] |= (bit as u8) << (7 - self.bit_pos);
            self.bit_pos = (self.bit_pos + 1) % 8;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

struct BitReader<'a> {
    bytes: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, bit_pos: 0 }
    }

    fn take_bits(&mut self, n: usize) -> Option<u64> {
        if self.bit_pos + n > self.bytes.len() * 8 {
            return None;
        }
        let mut value = 0u64;
        for _ in 0..n {
            let byte = self.bytes[self.bit_pos / 8];
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            value = (value << 1) | bit as u64;
            self.bit_pos += 1;
        }
        Some(value)
    }

    fn bytes_consumed(&self) -> usize {
        self.bit_pos.div_ceil(8)
    }
}

/// Packs a status PDU into bytes. NACKs are trimmed from the tail when `max_bytes`
/// cannot fit them all; `ACK_SN` is then lowered to the SN immediately past the last
/// retained NACK, so a truncated report never claims to have heard about an SN it
/// didn't actually include. If trimming drops every NACK, there is no "last
/// retained NACK" to anchor on, so `ACK_SN` falls all the way back to `rx_next`
/// (the receive window base) rather than the original, untrimmed `ACK_SN` —
/// otherwise a report with zero NACKs would claim everything below it arrived.
pub fn encode_status_pdu(pdu: &StatusPdu, max_bytes: usize, rx_next: u32) -> Vec<u8> {
    let mut included = Vec::new();
    // CPT(3 bits, =0) + ACK_SN(10 or up to 18, we use 18 to cover all widths) + E1 per
    // nack; budget checked greedily, byte-aligned per NACK for simplicity.
    let mut used = 3; // conservative fixed header estimate in bytes
    for nack in &pdu.nacks {
        let cost = if nack.so_range.is_some() { 6 } else { 3 };
        if used + cost > max_bytes {
            break;
        }
        used += cost;
        included.push(nack.clone());
    }

    let ack_sn = if included.len() == pdu.nacks.len() {
        pdu.ack_sn
    } else {
        included
            .last()
            .map(|n| n.sn.wrapping_add(1 + n.nack_range as u32))
            .unwrap_or(rx_next)
    };

    let mut out = Vec::new();
    out.push(0u8); // D/C=0, CPT=000
    out.extend_from_slice(&ack_sn.to_be_bytes());
    out.push(included.len() as u8);
    for nack in &included {
        out.extend_from_slice(&nack.sn.to_be_bytes());
        out.push(nack.nack_range);
        if let Some((start, end)) = nack.so_range {
            out.push(1);
            out.extend_from_slice(&start.to_be_bytes());
            out.extend_from_slice(&end.to_be_bytes());
        } else {
            out.push(0);
        }
    }
    out
}

pub fn decode_status_pdu(bytes: &[u8]) -> Result<StatusPdu, L2Error> {
    if bytes.len() < 6 {
        return Err(L2Error::parse("status PDU truncated"));
    }
    if bytes[0] & 0x80 != 0 {
        return Err(L2Error::parse("not a control PDU (D/C=1)"));
    }
    let ack_sn = u32::from_be_bytes(bytes[1..5].try_into().expect("len checked"));
    let count = bytes[5] as usize;
    let mut offset = 6;
    let mut nacks = Vec::with_capacity(count);
    for _ in 0..count {
        if bytes.len() < offset + 5 {
            return Err(L2Error::parse("status PDU NACK truncated"));
        }
        let sn = u32::from_be_bytes(bytes[offset..offset + 4].try_into().expect("len checked"));
        let nack_range = bytes[offset + 4];
        let has_so = bytes[offset + 5];
        offset += 6;
        let so_range = if has_so == 1 {
            if bytes.len() < offset + 4 {
                return Err(L2Error::parse("status PDU SO truncated"));
            }
            let start = u16::from_be_bytes(bytes[offset..offset + 2].try_into().expect("len checked"));
            let end = u16::from_be_bytes(bytes[offset + 2..offset + 4].try_into().expect("len checked"));
            offset += 4;
            Some((start, end))
        } else {
            None
        };
        nacks.push(NackRecord {
            sn,
            so_range,
            nack_range,
        });
    }
    Ok(StatusPdu { ack_sn, nacks })
}
