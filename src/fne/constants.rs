//! Constants for the DVMProject FNE peer protocol

// Network function codes
pub const NET_FUNC_PROTOCOL: u8 = 0x00; // Protocol payload (voice traffic)
pub const NET_FUNC_RPTL: u8 = 0x60; // Repeater login request
pub const NET_FUNC_RPTK: u8 = 0x61; // Repeater authentication key
pub const NET_FUNC_RPTC: u8 = 0x62; // Repeater configuration
pub const NET_FUNC_RPT_DISC: u8 = 0x70; // Repeater disconnect
pub const NET_FUNC_PING: u8 = 0x74; // Keep-alive ping
pub const NET_FUNC_PONG: u8 = 0x75; // Keep-alive pong
pub const NET_FUNC_ACK: u8 = 0x7E; // Acknowledge
pub const NET_FUNC_NAK: u8 = 0x7F; // Negative acknowledge

// Network sub-function codes
pub const NET_SUBFUNC_NOP: u8 = 0xFF; // No operation (control frames)
pub const NET_SUBFUNC_P25: u8 = 0x01; // P25 protocol payload

// P25 data unit identifiers
pub const P25_DUID_LDU1: u8 = 0x05;
pub const P25_DUID_LDU2: u8 = 0x0A;
pub const P25_DUID_TDU: u8 = 0x03;

// P25 link control opcodes
pub const P25_LCO_GROUP_VOICE: u8 = 0x00;
pub const P25_LCO_CALL_TERM: u8 = 0x0F;

// Network control flags
pub const NET_CTRL_GRANT_DEMAND: u8 = 0x80;

// RTP framing
pub const RTP_PAYLOAD_TYPE: u8 = 0x56; // Payload type 86 (DVMProject)
pub const RTP_END_OF_CALL_SEQ: u16 = 0xFFFF;
pub const RTP_TIMESTAMP_STEP: u32 = 160; // Samples per voice frame
pub const DVM_FRAME_START: u8 = 0xFE; // Extension header frame marker

// Frame sizes
pub const DVM_HEADER_LEN: usize = 32;
pub const P25_LDU1_LEN: usize = 201;
pub const P25_LDU2_LEN: usize = 189;
pub const P25_TDU_LEN: usize = 24;
pub const IMBE_FRAME_LEN: usize = 11;
pub const RPTL_FRAME_LEN: usize = 40;
pub const RPTK_FRAME_LEN: usize = 72;
pub const PING_FRAME_LEN: usize = 43;

// Handshake reply geometry
pub const ACK_FUNC_OFFSET: usize = 18; // Function code position in any reply
pub const SALT_OFFSET: usize = 38; // Salt position in the RPTL challenge
pub const LOGIN_CHALLENGE_MIN_LEN: usize = 42;

// Identity defaults (TIA-102 hierarchical identifiers)
pub const DEFAULT_WACN: u32 = 0x92C19;
pub const DEFAULT_SYSTEM_ID: u16 = 0x50E;
pub const DEFAULT_IDENTITY: &str = "OP25-Gateway";
pub const SOFTWARE_ID: &str = "OP25-Gateway-1.0";

// Timing constants
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 5;
pub const PING_INTERVAL_SECS: u64 = 5;
pub const RECV_TIMEOUT_SECS: u64 = 1;
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 10;
