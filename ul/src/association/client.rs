//! Association requestor module
//!
//! The module provides an abstraction for a DICOM association in which
//! this application entity requests an association with another node,
//! usually taking the role of a service class user (SCU). See
//! [`ClientAssociationOptions`] for details and examples on how to
//! create an association.

use std::borrow::Cow;
use std::time::Duration;
use std::{io::Write, net::TcpStream};

use bytes::BytesMut;
use snafu::{ensure, ResultExt};

use crate::association::private::SyncAssociationSealed;
use crate::association::{
    encode_pdu, read_pdu_from_wire, Association, CloseSocket, MissingAbstractSyntaxSnafu,
    NoAcceptedPresentationContextsSnafu, ProtocolVersionMismatchSnafu, RejectedSnafu,
    SendPduSnafu, SocketOptions, SyncAssociation, UnexpectedPduSnafu, UnknownPduSnafu,
    WireSendSnafu,
};
use crate::pdu::{
    AssociationAC, AssociationRQ, Pdu, PresentationContextNegotiated, PresentationContextProposed,
    UserIdentity, UserVariableItem, DEFAULT_MAX_PDU, LARGE_PDU_SIZE, PDU_HEADER_SIZE,
};
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

use super::{Error, Result};

#[cfg(feature = "sync-tls")]
pub type TlsStream = rustls::StreamOwned<rustls::ClientConnection, std::net::TcpStream>;
#[cfg(feature = "async-tls")]
pub type AsyncTlsStream = tokio_rustls::client::TlsStream<tokio::net::TcpStream>;

/// A DICOM association builder for a requestor DICOM node, often taking
/// the role of a service class user (SCU). The final outcome is a
/// [`ClientAssociation`].
///
/// This is the standard way of requesting and establishing an
/// association with another node, usually taking the role of a service
/// class provider (SCP). Unlike [`ServerAssociationOptions`], a value
/// of this type describes a single requested association and is
/// consumed by `establish`.
///
/// [`ServerAssociationOptions`]: crate::association::server::ServerAssociationOptions
///
/// # Example
///
/// ```no_run
/// # use dcmnet_ul::association::client::ClientAssociationOptions;
///
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let association = ClientAssociationOptions::new()
///    .with_abstract_syntax("1.2.840.10008.1.1")
///    .with_transfer_syntax("1.2.840.10008.1.2.1")
///    .establish("129.168.0.5:104")?;
/// # Ok(())
/// # }
/// ```
///
/// The SCU will admit by default the transfer syntaxes
/// _Implicit VR Little Endian_ and _Explicit VR Little Endian_. Other
/// transfer syntaxes can be requested via `with_transfer_syntax`.
///
/// ### Asynchronous API
///
/// Enabling the `async` feature unlocks `establish_async`, which
/// negotiates the association over a `tokio::net::TcpStream`.
///
/// ### TLS support
///
/// Enabling `sync-tls` (or `async-tls` for the async transport)
/// unlocks `tls_config`, after which `establish_tls`
/// (`establish_tls_async`) negotiates the association over a TLS
/// session.
#[derive(Debug, Clone)]
pub struct ClientAssociationOptions<'a> {
    /// the calling AE title
    calling_ae_title: Cow<'a, str>,
    /// the called AE title
    called_ae_title: Cow<'a, str>,
    /// the requested application context name
    application_context_name: Cow<'a, str>,
    /// the list of requested abstract syntaxes, each proposed with
    /// `transfer_syntax_uids`
    abstract_syntax_uids: Vec<Cow<'a, str>>,
    /// the list of requested transfer syntaxes, shared by every entry
    /// in `abstract_syntax_uids`
    transfer_syntax_uids: Vec<Cow<'a, str>>,
    /// additional presentation contexts proposed with their own,
    /// explicit transfer syntax list rather than the shared one above
    /// (needed when different abstract syntaxes require different
    /// transfer syntax fallbacks in the same association, e.g. batch
    /// C-STORE or C-GET's combined Get/Storage SOP classes)
    explicit_contexts: Vec<(Cow<'a, str>, Vec<Cow<'a, str>>)>,
    /// the expected protocol version
    protocol_version: u16,
    /// the maximum PDU length
    max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
    /// user identity to negotiate, if any
    user_identity: Option<UserIdentity>,
    /// options for the underlying TCP socket
    socket_options: SocketOptions,
    /// TLS configuration for the underlying TCP socket
    #[cfg(feature = "sync-tls")]
    tls_config: Option<(
        std::sync::Arc<rustls::ClientConfig>,
        rustls::pki_types::ServerName<'static>,
    )>,
}

impl Default for ClientAssociationOptions<'_> {
    fn default() -> Self {
        ClientAssociationOptions {
            calling_ae_title: "THIS-SCU".into(),
            called_ae_title: "ANY-SCP".into(),
            application_context_name: "1.2.840.10008.3.1.1.1".into(),
            abstract_syntax_uids: Vec::new(),
            transfer_syntax_uids: Vec::new(),
            explicit_contexts: Vec::new(),
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            user_identity: None,
            socket_options: SocketOptions::default(),
            #[cfg(feature = "sync-tls")]
            tls_config: None,
        }
    }
}

impl<'a> ClientAssociationOptions<'a> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the calling application entity title for the
    /// association, which refers to this DICOM node.
    ///
    /// The default is `THIS-SCU`.
    pub fn calling_ae_title<T>(mut self, calling_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Define the called application entity title for the
    /// association, which refers to the target DICOM node.
    ///
    /// The default is `ANY-SCP`.
    pub fn called_ae_title<T>(mut self, called_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.called_ae_title = called_ae_title.into();
        self
    }

    /// Include this abstract syntax in the list of proposed
    /// presentation contexts.
    pub fn with_abstract_syntax<T>(mut self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.abstract_syntax_uids.push(abstract_syntax_uid.into());
        self
    }

    /// Include this transfer syntax in each proposed presentation
    /// context.
    pub fn with_transfer_syntax<T>(mut self, transfer_syntax_uid: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.transfer_syntax_uids.push(transfer_syntax_uid.into());
        self
    }

    /// Propose a presentation context for `abstract_syntax_uid` with
    /// its own `transfer_syntax_uids`, independent of the shared list
    /// used by [`with_abstract_syntax`](Self::with_abstract_syntax).
    ///
    /// Use this when different abstract syntaxes in the same
    /// association need different transfer syntax fallback orders
    /// (e.g. each SOP class in a batch C-STORE proposing its own
    /// file's transfer syntax first).
    pub fn with_presentation_context<T, I, U>(mut self, abstract_syntax_uid: T, transfer_syntax_uids: I) -> Self
    where
        T: Into<Cow<'a, str>>,
        I: IntoIterator<Item = U>,
        U: Into<Cow<'a, str>>,
    {
        self.explicit_contexts.push((
            abstract_syntax_uid.into(),
            transfer_syntax_uids.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Override the maximum expected PDU length.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode: whether receiving PDUs must not surpass
    /// the negotiated maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Negotiate the given user identity (PS3.7 Annex D.3.3.7) with the
    /// acceptor, e.g. a username or a username/passcode pair.
    pub fn user_identity(mut self, identity: UserIdentity) -> Self {
        self.user_identity = Some(identity);
        self
    }

    /// Set the read timeout for the underlying TCP socket.
    pub fn read_timeout(self, timeout: Duration) -> Self {
        Self {
            socket_options: SocketOptions {
                read_timeout: Some(timeout),
                ..self.socket_options
            },
            ..self
        }
    }

    /// Set the write timeout for the underlying TCP socket.
    pub fn write_timeout(self, timeout: Duration) -> Self {
        Self {
            socket_options: SocketOptions {
                write_timeout: Some(timeout),
                ..self.socket_options
            },
            ..self
        }
    }

    /// Set the connection timeout used when establishing the TCP
    /// socket.
    pub fn connection_timeout(self, timeout: Duration) -> Self {
        Self {
            socket_options: SocketOptions {
                connection_timeout: Some(timeout),
                ..self.socket_options
            },
            ..self
        }
    }

    /// Set the TLS configuration for the underlying TCP socket, along
    /// with the server name to validate the peer's certificate
    /// against.
    #[cfg(feature = "sync-tls")]
    pub fn tls_config(
        mut self,
        config: impl Into<std::sync::Arc<rustls::ClientConfig>>,
        server_name: rustls::pki_types::ServerName<'static>,
    ) -> Self {
        self.tls_config = Some((config.into(), server_name));
        self
    }

    fn proposed_contexts(&self) -> (Vec<PresentationContextProposed>, Vec<Cow<'a, str>>) {
        let mut transfer_syntax_uids = self.transfer_syntax_uids.clone();
        if transfer_syntax_uids.is_empty() {
            // Explicit VR Little Endian
            transfer_syntax_uids.push("1.2.840.10008.1.2.1".into());
            // Implicit VR Little Endian
            transfer_syntax_uids.push("1.2.840.10008.1.2".into());
        }

        let shared = self
            .abstract_syntax_uids
            .iter()
            .map(|abstract_syntax| {
                (
                    abstract_syntax.to_string(),
                    transfer_syntax_uids.iter().map(|uid| uid.to_string()).collect(),
                )
            });
        let explicit = self
            .explicit_contexts
            .iter()
            .map(|(abstract_syntax, tss)| {
                (
                    abstract_syntax.to_string(),
                    tss.iter().map(|uid| uid.to_string()).collect::<Vec<_>>(),
                )
            });

        let presentation_contexts = shared
            .chain(explicit)
            .enumerate()
            .map(|(i, (abstract_syntax, transfer_syntaxes))| PresentationContextProposed {
                id: (i * 2 + 1) as u8,
                abstract_syntax,
                transfer_syntaxes,
            })
            .collect();
        (presentation_contexts, transfer_syntax_uids)
    }

    fn request_pdu(&self, presentation_contexts: Vec<PresentationContextProposed>) -> Pdu {
        let mut user_variables = vec![
            UserVariableItem::MaxLength(self.max_pdu_length),
            UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
            UserVariableItem::ImplementationVersionName(IMPLEMENTATION_VERSION_NAME.to_string()),
        ];
        if let Some(identity) = &self.user_identity {
            user_variables.push(UserVariableItem::UserIdentityItem(identity.clone()));
        }

        Pdu::AssociationRQ(AssociationRQ {
            protocol_version: self.protocol_version,
            calling_ae_title: self.calling_ae_title.to_string(),
            called_ae_title: self.called_ae_title.to_string(),
            application_context_name: self.application_context_name.to_string(),
            presentation_contexts,
            user_variables,
        })
    }

    /// Fetch the acceptor's declared maximum PDU length from the
    /// AC's user variables, falling back to the protocol default and
    /// treating 0 as practically unlimited, mirroring the extraction
    /// `ServerAssociationOptions` performs for the requestor's value.
    fn acceptor_declared_max_pdu_length(user_variables: &[UserVariableItem]) -> u32 {
        let declared = user_variables
            .iter()
            .find_map(|item| match item {
                UserVariableItem::MaxLength(len) => Some(*len),
                _ => None,
            })
            .unwrap_or(DEFAULT_MAX_PDU);

        if declared == 0 {
            u32::MAX
        } else {
            declared
        }
    }

    /// Process the acceptor's response to the association request,
    /// yielding the set of negotiated presentation contexts.
    #[allow(clippy::result_large_err)]
    fn process_response(
        &self,
        msg: Pdu,
        presentation_contexts: &[PresentationContextProposed],
    ) -> Result<(Vec<PresentationContextNegotiated>, Vec<UserVariableItem>)> {
        match msg {
            Pdu::AssociationAC(AssociationAC {
                protocol_version,
                presentation_contexts: presentation_contexts_scp,
                user_variables,
                ..
            }) => {
                ensure!(
                    self.protocol_version == protocol_version,
                    ProtocolVersionMismatchSnafu {
                        expected: self.protocol_version,
                        got: protocol_version,
                    }
                );

                let negotiated: Vec<_> = presentation_contexts_scp
                    .into_iter()
                    .filter_map(|pc| {
                        let proposed = presentation_contexts.iter().find(|p| p.id == pc.id)?;
                        Some(PresentationContextNegotiated {
                            id: pc.id,
                            abstract_syntax: proposed.abstract_syntax.clone(),
                            transfer_syntax: pc.transfer_syntax,
                            result: pc.reason,
                        })
                    })
                    .collect();

                ensure!(
                    negotiated.iter().any(|pc| pc.result.is_acceptance()),
                    NoAcceptedPresentationContextsSnafu
                );

                Ok((negotiated, user_variables))
            }
            Pdu::AssociationRJ(association_rj) => RejectedSnafu { association_rj }.fail(),
            pdu @ Pdu::AssociationRQ(_)
            | pdu @ Pdu::PData { .. }
            | pdu @ Pdu::ReleaseRQ
            | pdu @ Pdu::ReleaseRP
            | pdu @ Pdu::AbortRQ { .. } => UnexpectedPduSnafu { pdu }.fail(),
            pdu @ Pdu::Unknown { .. } => UnknownPduSnafu { pdu }.fail(),
        }
    }

    /// Initiate the TCP connection and negotiate the association.
    pub fn establish<A: std::net::ToSocketAddrs>(&self, address: A) -> Result<ClientAssociation<TcpStream>> {
        ensure!(
            !self.abstract_syntax_uids.is_empty() || !self.explicit_contexts.is_empty(),
            MissingAbstractSyntaxSnafu
        );

        let mut socket = TcpStream::connect(address).context(super::ConnectSnafu)?;
        socket
            .set_read_timeout(self.socket_options.read_timeout)
            .context(super::SetReadTimeoutSnafu)?;
        socket
            .set_write_timeout(self.socket_options.write_timeout)
            .context(super::SetWriteTimeoutSnafu)?;

        let (presentation_contexts, _) = self.proposed_contexts();
        let request = self.request_pdu(presentation_contexts.clone());

        let mut write_buffer = Vec::with_capacity(self.max_pdu_length as usize);
        crate::pdu::write_pdu(&mut write_buffer, &request).context(SendPduSnafu)?;
        socket.write_all(&write_buffer).context(WireSendSnafu)?;

        let mut read_buffer =
            BytesMut::with_capacity((self.max_pdu_length.min(LARGE_PDU_SIZE) + PDU_HEADER_SIZE) as usize);
        let response =
            read_pdu_from_wire(&mut socket, &mut read_buffer, self.max_pdu_length, self.strict)?;
        let (negotiated, user_variables) =
            self.process_response(response, &presentation_contexts)?;
        let acceptor_max_pdu_length = Self::acceptor_declared_max_pdu_length(&user_variables);

        Ok(ClientAssociation {
            presentation_contexts: negotiated,
            requestor_max_pdu_length: self.max_pdu_length.min(acceptor_max_pdu_length),
            acceptor_max_pdu_length: self.max_pdu_length,
            socket,
            peer_ae_title: self.called_ae_title.to_string(),
            write_buffer,
            strict: self.strict,
            read_buffer,
            user_variables,
        })
    }

    /// Initiate the TCP connection and negotiate the association over
    /// TLS.
    #[cfg(feature = "sync-tls")]
    pub fn establish_tls(&self, address: impl std::net::ToSocketAddrs) -> Result<ClientAssociation<TlsStream>> {
        ensure!(
            !self.abstract_syntax_uids.is_empty() || !self.explicit_contexts.is_empty(),
            MissingAbstractSyntaxSnafu
        );
        let (tls_config, server_name) = self
            .tls_config
            .clone()
            .ok_or_else(|| super::TlsConfigMissingSnafu {}.build())?;

        let socket = TcpStream::connect(address).context(super::ConnectSnafu)?;
        socket
            .set_read_timeout(self.socket_options.read_timeout)
            .context(super::SetReadTimeoutSnafu)?;
        socket
            .set_write_timeout(self.socket_options.write_timeout)
            .context(super::SetWriteTimeoutSnafu)?;

        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .context(super::TlsConnectionSnafu)?;
        let mut tls_stream = rustls::StreamOwned::new(conn, socket);

        let (presentation_contexts, _) = self.proposed_contexts();
        let request = self.request_pdu(presentation_contexts.clone());

        let mut write_buffer = Vec::with_capacity(self.max_pdu_length as usize);
        crate::pdu::write_pdu(&mut write_buffer, &request).context(SendPduSnafu)?;
        tls_stream.write_all(&write_buffer).context(WireSendSnafu)?;

        let mut read_buffer =
            BytesMut::with_capacity((self.max_pdu_length.min(LARGE_PDU_SIZE) + PDU_HEADER_SIZE) as usize);
        let response = read_pdu_from_wire(
            &mut tls_stream,
            &mut read_buffer,
            self.max_pdu_length,
            self.strict,
        )?;
        let (negotiated, user_variables) =
            self.process_response(response, &presentation_contexts)?;
        let acceptor_max_pdu_length = Self::acceptor_declared_max_pdu_length(&user_variables);

        Ok(ClientAssociation {
            presentation_contexts: negotiated,
            requestor_max_pdu_length: self.max_pdu_length.min(acceptor_max_pdu_length),
            acceptor_max_pdu_length: self.max_pdu_length,
            socket: tls_stream,
            peer_ae_title: self.called_ae_title.to_string(),
            write_buffer,
            strict: self.strict,
            read_buffer,
            user_variables,
        })
    }
}

/// A DICOM upper level association from the perspective of a
/// requesting application entity.
///
/// The most common operations of an established association are
/// [`send`](SyncAssociation::send) and
/// [`receive`](SyncAssociation::receive). Sending large P-Data
/// fragments may be easier through the P-Data sender abstraction (see
/// [`send_pdata`](SyncAssociation::send_pdata)).
///
/// When the value falls out of scope, the program will shut down the
/// underlying TCP connection without an orderly release; call
/// [`release`](SyncAssociation::release) explicitly to end the
/// association gracefully.
#[derive(Debug)]
pub struct ClientAssociation<S>
where
    S: std::io::Read + std::io::Write + CloseSocket,
{
    /// The accorded presentation contexts
    presentation_contexts: Vec<PresentationContextNegotiated>,
    /// The maximum PDU length that the remote application entity accepts
    requestor_max_pdu_length: u32,
    /// The maximum PDU length that this application entity is expecting to receive
    acceptor_max_pdu_length: u32,
    /// The TCP stream to the other DICOM node
    socket: S,
    /// The application entity title of the other DICOM node
    peer_ae_title: String,
    /// Reusable buffer for sending PDUs on the wire
    write_buffer: Vec<u8>,
    /// whether to receive PDUs in strict mode
    strict: bool,
    /// Read buffer from the socket
    read_buffer: BytesMut,
    /// User variables received from the peer
    user_variables: Vec<UserVariableItem>,
}

impl<S> Association for ClientAssociation<S>
where
    S: std::io::Read + std::io::Write + CloseSocket,
{
    fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
        &self.presentation_contexts
    }

    fn acceptor_max_pdu_length(&self) -> u32 {
        self.acceptor_max_pdu_length
    }

    fn requestor_max_pdu_length(&self) -> u32 {
        self.requestor_max_pdu_length
    }

    fn peer_ae_title(&self) -> &str {
        &self.peer_ae_title
    }

    fn user_variables(&self) -> &[UserVariableItem] {
        &self.user_variables
    }
}

impl<S> SyncAssociationSealed<S> for ClientAssociation<S>
where
    S: std::io::Read + std::io::Write + CloseSocket,
{
    fn send(&mut self, pdu: &Pdu) -> Result<()> {
        self.write_buffer.clear();
        encode_pdu(
            &mut self.write_buffer,
            pdu,
            self.requestor_max_pdu_length + PDU_HEADER_SIZE,
        )?;
        self.socket.write_all(&self.write_buffer).context(WireSendSnafu)
    }

    fn receive(&mut self) -> Result<Pdu> {
        read_pdu_from_wire(
            &mut self.socket,
            &mut self.read_buffer,
            self.acceptor_max_pdu_length,
            self.strict,
        )
    }

    fn close(&mut self) -> std::io::Result<()> {
        self.socket.close()
    }
}

impl<S> SyncAssociation<S> for ClientAssociation<S>
where
    S: std::io::Read + std::io::Write + CloseSocket,
{
    fn inner_stream(&mut self) -> &mut S {
        &mut self.socket
    }

    fn get_mut(&mut self) -> (&mut S, &mut BytesMut) {
        let Self {
            socket, read_buffer, ..
        } = self;
        (socket, read_buffer)
    }
}

#[cfg(feature = "async")]
impl<A> ClientAssociationOptions<'_, A>
where
    A: std::marker::Send,
{
}

#[cfg(feature = "async")]
impl ClientAssociationOptions<'_> {
    /// Initiate the TCP connection and negotiate the association,
    /// asynchronously.
    pub async fn establish_async(
        &self,
        address: impl tokio::net::ToSocketAddrs,
    ) -> Result<AsyncClientAssociation<tokio::net::TcpStream>> {
        use tokio::io::AsyncWriteExt;

        ensure!(
            !self.abstract_syntax_uids.is_empty() || !self.explicit_contexts.is_empty(),
            MissingAbstractSyntaxSnafu
        );

        let connection_timeout = self.socket_options.connection_timeout;
        let mut socket = super::timeout(connection_timeout, async {
            tokio::net::TcpStream::connect(address)
                .await
                .context(super::ConnectSnafu)
        })
        .await?;

        let (presentation_contexts, _) = self.proposed_contexts();
        let request = self.request_pdu(presentation_contexts.clone());

        let read_timeout = self.socket_options.read_timeout;
        let negotiated = super::timeout(read_timeout, async {
            let mut write_buffer = Vec::with_capacity(self.max_pdu_length as usize);
            crate::pdu::write_pdu(&mut write_buffer, &request).context(SendPduSnafu)?;
            socket.write_all(&write_buffer).await.context(WireSendSnafu)?;

            let mut read_buffer = BytesMut::with_capacity(
                (self.max_pdu_length.min(LARGE_PDU_SIZE) + PDU_HEADER_SIZE) as usize,
            );
            let response = super::read_pdu_from_wire_async(
                &mut socket,
                &mut read_buffer,
                self.max_pdu_length,
                self.strict,
            )
            .await?;
            self.process_response(response, &presentation_contexts)
                .map(|(negotiated, user_variables)| (negotiated, user_variables, read_buffer))
        })
        .await;

        let (negotiated, user_variables, read_buffer) = negotiated?;
        let acceptor_max_pdu_length = Self::acceptor_declared_max_pdu_length(&user_variables);

        Ok(AsyncClientAssociation {
            presentation_contexts: negotiated,
            requestor_max_pdu_length: self.max_pdu_length.min(acceptor_max_pdu_length),
            acceptor_max_pdu_length: self.max_pdu_length,
            socket,
            peer_ae_title: self.called_ae_title.to_string(),
            write_buffer: Vec::with_capacity(self.max_pdu_length as usize),
            strict: self.strict,
            read_buffer,
            read_timeout: self.socket_options.read_timeout,
            write_timeout: self.socket_options.write_timeout,
            user_variables,
        })
    }

    /// Initiate the TCP connection and negotiate the association over
    /// TLS, asynchronously.
    #[cfg(feature = "async-tls")]
    pub async fn establish_tls_async(
        &self,
        address: impl tokio::net::ToSocketAddrs,
    ) -> Result<AsyncClientAssociation<AsyncTlsStream>> {
        use tokio::io::AsyncWriteExt;
        use tokio_rustls::TlsConnector;

        ensure!(
            !self.abstract_syntax_uids.is_empty() || !self.explicit_contexts.is_empty(),
            MissingAbstractSyntaxSnafu
        );
        let (tls_config, server_name) = self
            .tls_config
            .clone()
            .ok_or_else(|| super::TlsConfigMissingSnafu {}.build())?;

        let socket = tokio::net::TcpStream::connect(address)
            .await
            .context(super::ConnectSnafu)?;
        let connector = TlsConnector::from(tls_config);
        let mut socket = connector
            .connect(server_name, socket)
            .await
            .context(super::ConnectSnafu)?;

        let (presentation_contexts, _) = self.proposed_contexts();
        let request = self.request_pdu(presentation_contexts.clone());

        let mut write_buffer = Vec::with_capacity(self.max_pdu_length as usize);
        crate::pdu::write_pdu(&mut write_buffer, &request).context(SendPduSnafu)?;
        socket.write_all(&write_buffer).await.context(WireSendSnafu)?;

        let mut read_buffer = BytesMut::with_capacity(
            (self.max_pdu_length.min(LARGE_PDU_SIZE) + PDU_HEADER_SIZE) as usize,
        );
        let response = super::read_pdu_from_wire_async(
            &mut socket,
            &mut read_buffer,
            self.max_pdu_length,
            self.strict,
        )
        .await?;
        let (negotiated, user_variables) =
            self.process_response(response, &presentation_contexts)?;
        let acceptor_max_pdu_length = Self::acceptor_declared_max_pdu_length(&user_variables);

        Ok(AsyncClientAssociation {
            presentation_contexts: negotiated,
            requestor_max_pdu_length: self.max_pdu_length.min(acceptor_max_pdu_length),
            acceptor_max_pdu_length: self.max_pdu_length,
            socket,
            peer_ae_title: self.called_ae_title.to_string(),
            write_buffer: Vec::with_capacity(self.max_pdu_length as usize),
            strict: self.strict,
            read_buffer,
            read_timeout: self.socket_options.read_timeout,
            write_timeout: self.socket_options.write_timeout,
            user_variables,
        })
    }
}

/// An async DICOM upper level association from the perspective of a
/// requesting application entity.
#[cfg(feature = "async")]
#[derive(Debug)]
pub struct AsyncClientAssociation<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    presentation_contexts: Vec<PresentationContextNegotiated>,
    requestor_max_pdu_length: u32,
    acceptor_max_pdu_length: u32,
    socket: S,
    peer_ae_title: String,
    write_buffer: Vec<u8>,
    strict: bool,
    read_buffer: BytesMut,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    user_variables: Vec<UserVariableItem>,
}

#[cfg(feature = "async")]
impl<S> Association for AsyncClientAssociation<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
        &self.presentation_contexts
    }

    fn acceptor_max_pdu_length(&self) -> u32 {
        self.acceptor_max_pdu_length
    }

    fn requestor_max_pdu_length(&self) -> u32 {
        self.requestor_max_pdu_length
    }

    fn peer_ae_title(&self) -> &str {
        &self.peer_ae_title
    }

    fn user_variables(&self) -> &[UserVariableItem] {
        &self.user_variables
    }
}

#[cfg(feature = "async")]
impl<S> crate::association::private::AsyncAssociationSealed<S> for AsyncClientAssociation<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, msg: &Pdu) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        self.write_buffer.clear();
        super::timeout(self.write_timeout, async {
            encode_pdu(
                &mut self.write_buffer,
                msg,
                self.requestor_max_pdu_length + PDU_HEADER_SIZE,
            )?;
            self.socket.write_all(&self.write_buffer).await.context(WireSendSnafu)
        })
        .await
    }

    async fn receive(&mut self) -> Result<Pdu> {
        super::timeout(self.read_timeout, async {
            super::read_pdu_from_wire_async(
                &mut self.socket,
                &mut self.read_buffer,
                self.acceptor_max_pdu_length,
                self.strict,
            )
            .await
        })
        .await
    }

    async fn close(&mut self) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.socket.shutdown().await
    }
}

#[cfg(feature = "async")]
impl<S> crate::association::AsyncAssociation<S> for AsyncClientAssociation<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    fn inner_stream(&mut self) -> &mut S {
        &mut self.socket
    }

    fn get_mut(&mut self) -> (&mut S, &mut BytesMut) {
        let Self {
            socket, read_buffer, ..
        } = self;
        (socket, read_buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_require_abstract_syntax() {
        let opts = ClientAssociationOptions::new();
        let err = opts.establish("127.0.0.1:0").unwrap_err();
        assert!(matches!(err, Error::MissingAbstractSyntax));
    }

    #[test]
    fn proposed_contexts_default_to_le_transfer_syntaxes() {
        let opts = ClientAssociationOptions::new().with_abstract_syntax("1.2.840.10008.1.1");
        let (contexts, _) = opts.proposed_contexts();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].id, 1);
        assert_eq!(
            contexts[0].transfer_syntaxes,
            vec!["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"]
        );
    }
}
