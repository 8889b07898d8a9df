//! Wire-format encoders for the FNE peer protocol
//!
//! Every outbound datagram is a 32-byte outer transport header followed by a
//! protocol payload:
//!
//! ```text
//! ┌──────────────┬──────────────────┬─────────────────────────┐
//! │ RTP (12)     │ Extension (4+16) │ Payload (LDU1/LDU2/TDU) │
//! └──────────────┴──────────────────┴─────────────────────────┘
//! ```
//!
//! The extension data carries a CRC-16/CCITT of everything after the header,
//! the function/sub-function pair, the stream id, the peer id, and the
//! payload length. Voice payloads start with a 24-byte P25 message header
//! (`"P25D"` + addressing + DUID) and place nine IMBE subframes at fixed
//! offsets.
//!
//! All builders are pure over their inputs plus a [`TxCounters`] pair the
//! session lends under its send mutex; nothing here touches a socket.

use super::constants::*;

/// Nine 11-byte IMBE voice frames, one logical data unit's worth
pub type VoiceGroup = [[u8; IMBE_FRAME_LEN]; 9];

/// RTP sequence/timestamp pair, owned by the session and mutated only by
/// [`build_transport_header`]
#[derive(Debug, Clone, Copy)]
pub struct TxCounters {
    pub seq: u16,
    pub ts: u32,
}

impl TxCounters {
    pub const fn new() -> Self {
        Self { seq: 0, ts: 0 }
    }
}

impl Default for TxCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-16/CCITT-FALSE: polynomial 0x1021, initial 0xFFFF, no reflection,
/// no final XOR
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Build the 32-byte outer transport header
///
/// Sequence policy: an end-of-call frame carries the literal `0xFFFF` and
/// leaves the counter untouched; any other frame writes the current counter
/// and post-increments it (wrapping). The timestamp advances by 160 on every
/// build, so the first frame of a session carries `ts = 160`.
pub fn build_transport_header(
    counters: &mut TxCounters,
    func: u8,
    sub_func: u8,
    stream_id: u32,
    peer_id: u32,
    payload_len: u32,
    end_of_call: bool,
) -> [u8; DVM_HEADER_LEN] {
    let mut buf = [0u8; DVM_HEADER_LEN];

    // RTP header (12 bytes): V=2, P=0, X=1, CC=0
    buf[0] = 0x90;
    buf[1] = RTP_PAYLOAD_TYPE;

    let seq = if end_of_call {
        RTP_END_OF_CALL_SEQ
    } else {
        let s = counters.seq;
        counters.seq = counters.seq.wrapping_add(1);
        s
    };
    buf[2..4].copy_from_slice(&seq.to_be_bytes());

    counters.ts = counters.ts.wrapping_add(RTP_TIMESTAMP_STEP);
    buf[4..8].copy_from_slice(&counters.ts.to_be_bytes());

    // SSRC carries the peer id
    buf[8..12].copy_from_slice(&peer_id.to_be_bytes());

    // RFC 3550 extension preamble: frame marker + length of 4 words
    buf[12] = 0x00;
    buf[13] = DVM_FRAME_START;
    buf[14] = 0x00;
    buf[15] = 0x04;

    // Bytes 16-17: CRC-16 placeholder, filled by insert_crc once the
    // payload is in place
    buf[18] = func;
    buf[19] = sub_func;
    buf[20..24].copy_from_slice(&stream_id.to_be_bytes());
    buf[24..28].copy_from_slice(&peer_id.to_be_bytes());
    buf[28..32].copy_from_slice(&payload_len.to_be_bytes());

    buf
}

/// Compute the CRC over everything after the outer header and store it at
/// offsets 16-17
pub fn insert_crc(frame: &mut [u8]) {
    let crc = crc16_ccitt(&frame[DVM_HEADER_LEN..]);
    frame[16..18].copy_from_slice(&crc.to_be_bytes());
}

/// Write the 24-byte P25 message header into the front of `buf`
fn write_message_header(
    buf: &mut [u8],
    duid: u8,
    src_id: u32,
    dst_id: u32,
    wacn: u32,
    system_id: u16,
    count: u8,
) {
    buf[0..4].copy_from_slice(b"P25D");

    // LCO 0x00 = group voice channel user; TDU termination overrides this
    buf[4] = P25_LCO_GROUP_VOICE;

    // Source and destination ids, 24-bit big-endian
    buf[5..8].copy_from_slice(&src_id.to_be_bytes()[1..]);
    buf[8..11].copy_from_slice(&dst_id.to_be_bytes()[1..]);

    buf[11..13].copy_from_slice(&system_id.to_be_bytes());

    // Reserved, control, manufacturer id
    buf[13] = 0x00;
    buf[14] = 0x00;
    buf[15] = 0x00;

    // WACN, 24-bit big-endian
    buf[16..19].copy_from_slice(&wacn.to_be_bytes()[1..]);

    // Reserved + two low-speed-data bytes
    buf[19] = 0x00;
    buf[20] = 0x00;
    buf[21] = 0x00;

    buf[22] = duid;
    buf[23] = count;
}

/// Encode link control for LDU1 subframes
///
/// Full compliance would be Reed-Solomon (24,12,13); this places the nine LC
/// bytes (LCO, MFID, service options, destination, source) in positions 0-8
/// and zero parity in 9-23. A real RS codec can replace the body without
/// changing the interface.
pub fn encode_link_control(src_id: u32, dst_id: u32) -> [u8; 24] {
    let mut lc = [0u8; 24];
    lc[0] = P25_LCO_GROUP_VOICE;
    lc[1] = 0x00; // MFID
    lc[2] = 0x00; // Service options
    lc[3..6].copy_from_slice(&dst_id.to_be_bytes()[1..]);
    lc[6..9].copy_from_slice(&src_id.to_be_bytes()[1..]);
    lc
}

/// Build a 201-byte LDU1 payload from nine IMBE frames
///
/// Subframe tags run 0x62-0x6A. Voice 1 carries LC bytes 0-4, voices 3-8
/// carry LC bytes 5-22 in triples, voice 9 carries the LSD pair. The trailer
/// at 180-181 flags a new call (`01 80`: header valid + unencrypted
/// algorithm) on the first LDU1 only.
pub fn build_ldu1(
    voice: &VoiceGroup,
    src_id: u32,
    dst_id: u32,
    wacn: u32,
    system_id: u16,
    first_ldu: bool,
) -> [u8; P25_LDU1_LEN] {
    let mut buf = [0u8; P25_LDU1_LEN];
    write_message_header(&mut buf, P25_DUID_LDU1, src_id, dst_id, wacn, system_id, 0xB2);

    let lc = encode_link_control(src_id, dst_id);

    // Voice 1: tag + LC bytes 0-4 + IMBE
    buf[24] = 0x62;
    buf[25..30].copy_from_slice(&lc[0..5]);
    buf[34..45].copy_from_slice(&voice[0]);

    // Voice 2: tag + IMBE only
    buf[46] = 0x63;
    buf[47..58].copy_from_slice(&voice[1]);

    // Voices 3-8: tag + three LC bytes + IMBE
    for (i, &off) in [60usize, 77, 94, 111, 128, 145].iter().enumerate() {
        buf[off] = 0x64 + i as u8;
        let lc_base = 5 + i * 3;
        buf[off + 1..off + 4].copy_from_slice(&lc[lc_base..lc_base + 3]);
        buf[off + 5..off + 16].copy_from_slice(&voice[i + 2]);
    }

    // Voice 9: tag + LSD pair (zero) + IMBE
    buf[162] = 0x6A;
    buf[166..177].copy_from_slice(&voice[8]);

    if first_ldu {
        buf[180] = 0x01; // Header valid - signals new call
        buf[181] = 0x80; // Algorithm id (0x80 = unencrypted)
    }

    buf
}

/// Build a 189-byte LDU2 payload from nine IMBE frames
///
/// Same subframe geometry as LDU1 with tags 0x6B-0x73. Link control is
/// replaced by encryption sync: zero message indicator, algorithm id 0x80
/// (unencrypted) with zero key id at voice 5, and the fixed RS parity for an
/// all-zero unencrypted ESS at voices 6 and 7.
pub fn build_ldu2(
    voice: &VoiceGroup,
    src_id: u32,
    dst_id: u32,
    wacn: u32,
    system_id: u16,
) -> [u8; P25_LDU2_LEN] {
    let mut buf = [0u8; P25_LDU2_LEN];
    write_message_header(&mut buf, P25_DUID_LDU2, src_id, dst_id, wacn, system_id, 0xB2);

    // Voice 1: tag + MI bytes (zero for unencrypted) + IMBE
    buf[24] = 0x6B;
    buf[34..45].copy_from_slice(&voice[0]);

    // Voice 2: tag + IMBE only
    buf[46] = 0x6C;
    buf[47..58].copy_from_slice(&voice[1]);

    // Voices 3-8: tag + encryption-sync bytes + IMBE
    for (i, &off) in [60usize, 77, 94, 111, 128, 145].iter().enumerate() {
        buf[off] = 0x6D + i as u8;
        buf[off + 5..off + 16].copy_from_slice(&voice[i + 2]);
    }

    // Voice 5: algorithm id + key id (unencrypted, key 0)
    buf[112] = 0x80;

    // Voices 6-7: RS parity for an all-zero unencrypted ESS
    buf[129..132].copy_from_slice(&[0xAC, 0xB8, 0xA4]);
    buf[146..149].copy_from_slice(&[0x9B, 0xDC, 0x75]);

    // Voice 9: tag + LSD pair (zero) + IMBE
    buf[162] = 0x73;
    buf[166..177].copy_from_slice(&voice[8]);

    buf
}

/// Build a 24-byte TDU payload
///
/// A grant-demand TDU sets the control flag so the FNE announces a channel
/// grant; a terminating TDU carries the call-termination LCO instead.
pub fn build_tdu(
    src_id: u32,
    dst_id: u32,
    wacn: u32,
    system_id: u16,
    grant_demand: bool,
) -> [u8; P25_TDU_LEN] {
    let mut buf = [0u8; P25_TDU_LEN];
    write_message_header(
        &mut buf,
        P25_DUID_TDU,
        src_id,
        dst_id,
        wacn,
        system_id,
        P25_TDU_LEN as u8,
    );

    if grant_demand {
        buf[14] = NET_CTRL_GRANT_DEMAND;
    } else {
        buf[4] = P25_LCO_CALL_TERM;
    }

    buf
}
