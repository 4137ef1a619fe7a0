//! C-ECHO SCU: a minimal round trip used to verify connectivity (PS3.7
//! Section 9.3.5), grounded on the `echoscu` binary's association flow.

use std::time::Instant;

use dcmnet_dimse::{message::CommandKind, Assembler, CEchoRq};
use dcmnet_ul::association::{Association, ClientAssociationOptions, SyncAssociation};
use dicom_dictionary_std::{tags, uids};
use snafu::{ensure, OptionExt, ResultExt};

use crate::error::{
    AssociationSnafu, EchoFailedSnafu, InvalidStateSnafu, MissingElementSnafu, ReassembleSnafu,
    Result,
};
use crate::negotiate::accepted_context;
use crate::transport::send_command;

/// Outcome of a successful C-ECHO exchange.
#[derive(Debug, Clone)]
pub struct EchoResult {
    pub round_trip_time: std::time::Duration,
    pub remote_ae: String,
}

/// Open an association proposing only the Verification SOP Class,
/// perform one C-ECHO exchange, then release.
pub fn echo(
    address: impl std::net::ToSocketAddrs,
    calling_ae_title: &str,
    called_ae_title: &str,
) -> Result<EchoResult> {
    let started = Instant::now();

    let mut association = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae_title.to_string())
        .called_ae_title(called_ae_title.to_string())
        .with_abstract_syntax(uids::VERIFICATION)
        .establish(address)
        .context(AssociationSnafu)?;

    let pc = accepted_context(&association, uids::VERIFICATION)?;

    let remote_ae = association.peer_ae_title().to_string();

    let command = CEchoRq::builder()
        .message_id(1)
        .affected_sop_class_uid(uids::VERIFICATION)
        .build();
    send_command(&mut association, pc.id, &command, None)?;

    let mut assembler = Assembler::new([pc.id]);
    let message = loop {
        let pdu = match association.receive() {
            Ok(pdu) => pdu,
            Err(source) => {
                assembler.check_no_pending().context(ReassembleSnafu)?;
                return Err(source).context(AssociationSnafu);
            }
        };
        if let Some(message) = assembler.accept(pdu).context(ReassembleSnafu)? {
            break message;
        }
    };

    ensure!(
        message.command_kind == CommandKind::CEchoRsp,
        InvalidStateSnafu {
            message: format!("expected C-ECHO-RSP, got {:?}", message.command_kind),
        }
    );

    let status = message
        .command
        .status
        .context(MissingElementSnafu { tag: tags::STATUS })?;

    let _ = association.release();

    ensure!(status == 0, EchoFailedSnafu { status });

    Ok(EchoResult {
        round_trip_time: started.elapsed(),
        remote_ae,
    })
}
