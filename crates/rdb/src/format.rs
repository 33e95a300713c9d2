//! Wire constants for the snapshot file format (spec §4.3).

pub(crate) const MAGIC: &[u8; 9] = b"REDIS0012";

pub(crate) const OP_AUX: u8 = 0xFA;
pub(crate) const OP_SELECTDB: u8 = 0xFE;
pub(crate) const OP_RESIZEDB: u8 = 0xFB;
pub(crate) const OP_EXPIRETIME_SEC: u8 = 0xFD;
pub(crate) const OP_EXPIRETIME_MS: u8 = 0xFC;
pub(crate) const OP_EOF: u8 = 0xFF;

pub(crate) const VALUE_TYPE_STRING: u8 = 0x00;
