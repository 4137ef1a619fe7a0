//! A single pooled association and the liveness probe used to validate
//! it, grounded on `dcmnet_scu::echo`'s exchange but run over an
//! already-established association instead of opening a fresh one.

use std::net::TcpStream;
use std::time::Instant;

use dcmnet_dimse::{message::CommandKind, Assembler, CEchoRq};
use dcmnet_ul::association::{Association, ClientAssociation, ClientAssociationOptions, SyncAssociation};
use dicom_dictionary_std::{tags, uids};
use snafu::ResultExt;

use crate::config::{PoolConfig, PoolKey};
use crate::error::{ConnectSnafu, Result};

/// A leased association plus the bookkeeping the pool needs to decide
/// when to recycle, health-check, or retire it.
pub struct PooledConnection {
    pub(crate) id: u64,
    pub(crate) association: ClientAssociation<TcpStream>,
    pub(crate) verification_context_id: Option<u8>,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
    healthy: bool,
}

impl PooledConnection {
    pub(crate) fn open(id: u64, key: &PoolKey, config: &PoolConfig) -> Result<Self> {
        let mut options = ClientAssociationOptions::new()
            .calling_ae_title(key.calling_ae_title.clone())
            .called_ae_title(key.called_ae_title.clone())
            .max_pdu_length(config.max_pdu_length);
        for uid in &config.abstract_syntaxes {
            options = options.with_abstract_syntax(uid.clone());
        }
        let association = options
            .establish((key.host.as_str(), key.port))
            .context(ConnectSnafu {
                host: key.host.clone(),
                port: key.port,
            })?;
        let verification_context_id = association
            .presentation_contexts()
            .iter()
            .find(|pc| pc.abstract_syntax == uids::VERIFICATION && pc.result.is_acceptance())
            .map(|pc| pc.id);
        let now = Instant::now();
        Ok(PooledConnection {
            id,
            association,
            verification_context_id,
            created_at: now,
            last_used_at: now,
            healthy: true,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn association(&mut self) -> &mut ClientAssociation<TcpStream> {
        &mut self.association
    }

    pub(crate) fn is_established(&self) -> bool {
        self.healthy
    }

    pub(crate) fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    /// Round-trip a C-ECHO over the Verification presentation context
    /// negotiated when this connection was opened. Connections opened
    /// without Verification (a caller-supplied context set that
    /// dropped it) are reported healthy unconditionally, since there is
    /// no way to probe them without sending a real operation.
    pub(crate) fn health_check(&mut self) -> bool {
        let Some(context_id) = self.verification_context_id else {
            return self.healthy;
        };
        let ok = self.send_echo(context_id).is_ok();
        self.healthy = ok;
        ok
    }

    fn send_echo(&mut self, context_id: u8) -> dcmnet_scu::Result<()> {
        use dcmnet_scu::error::{
            AssociationSnafu, EchoFailedSnafu, InvalidStateSnafu, MissingElementSnafu,
            ReassembleSnafu,
        };
        use snafu::{ensure, OptionExt};

        let command = CEchoRq::builder()
            .message_id(1)
            .affected_sop_class_uid(uids::VERIFICATION)
            .build();
        dcmnet_scu::transport::send_command(&mut self.association, context_id, &command, None)?;

        let mut assembler = Assembler::new([context_id]);
        let message = loop {
            let pdu = self.association.receive().context(AssociationSnafu)?;
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
        ensure!(status == 0, EchoFailedSnafu { status });
        Ok(())
    }

    pub(crate) fn close(mut self) {
        let _ = self.association.release();
    }
}
