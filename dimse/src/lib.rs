//! DIMSE message services built atop the `dcmnet-ul` crate's upper
//! layer protocol.
//!
//! - [`commands`] and [`generated`] define the per-primitive command
//!   set structs (`CStoreRq`, `CFindRsp`, ...) and the codec that turns
//!   them into Implicit VR Little Endian bytes (PS3.7 Section 9).
//! - [`status`] categorizes the status code every DIMSE response
//!   carries (PS3.7 Annex C).
//! - [`message`] decodes a raw command set back into its logical
//!   fields and identifies which DIMSE-C primitive it represents.
//! - [`fragmentation`] and [`assembler`] split a command/data set pair
//!   into P-DATA-TF PDUs bound by a negotiated max PDU length, and
//!   reassemble them back on the receiving side.

pub mod assembler;
pub mod commands;
pub mod fragmentation;
pub mod generated;
pub mod message;
pub mod status;

pub use assembler::Assembler;
pub use commands::{Command, CommandField, CommandDatasetType, Priority};
pub use message::{decode_command_set, CommandKind, CommandSet, DimseMessage};
pub use status::{DimseStatus, StatusCategory};

pub use generated::{
    CEchoRq, CEchoRsp, CFindCncl, CFindRq, CFindRsp, CGetCncl, CGetRq, CGetRsp, CMoveCncl,
    CMoveRq, CMoveRsp, CStoreRq, CStoreRsp,
};
