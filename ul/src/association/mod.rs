//! DICOM association module
//!
//! This module contains the upper layer state machine: utilities for
//! establishing, negotiating and releasing associations between DICOM
//! nodes via TCP/IP (and, with the `tls` features, over TLS).
//!
//! The [`client`] sub-module builds associations from the requestor
//! side (SCU), [`server`] from the acceptor side (SCP). Both produce a
//! value implementing [`Association`] plus [`SyncAssociation`] (or,
//! behind the `async` feature, an async counterpart), so that callers
//! above this crate (the `dimse` layer and up) can be generic over the
//! association's role.

use std::time::Duration;

use bytes::BytesMut;
use snafu::{Backtrace, ResultExt, Snafu};

use crate::pdu::{AbortRQSource, AssociationRJ, Pdu, PresentationContextNegotiated, UserVariableItem};

pub mod client;
pub mod pdata;
pub mod server;
mod uid;

pub use client::{ClientAssociation, ClientAssociationOptions};
pub use pdata::PDataWriter;
pub use server::{
    AcceptAny, AcceptCalledAeTitle, AccessControl, AccessControlList, ServerAssociation,
    ServerAssociationOptions,
};

/// Duration of the ARTIM (association request/release timer) guarding
/// negotiation and release, per PS3.8 Section 9.1.5. Implemented here
/// as the socket read timeout while in `AwaitingAc`/`AwaitingRelease`.
pub const ARTIM_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// could not connect to the remote node
    Connect {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// missing abstract syntax to begin negotiation
    MissingAbstractSyntax,

    /// failed to set the socket read timeout
    SetReadTimeout {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to set the socket write timeout
    SetWriteTimeout {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to encode a PDU to be sent
    SendPdu { source: crate::pdu::writer::Error },

    /// failed to write the encoded PDU to the wire
    WireSend {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to receive a PDU
    Receive { source: crate::pdu::reader::Error },

    #[snafu(display("operation timed out"))]
    Timeout { backtrace: Backtrace },

    #[snafu(display(
        "encoded PDU of {} bytes exceeds the maximum of {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge { pdu_length: u32, max_pdu_length: u32 },

    #[snafu(display("unexpected PDU `{:?}`", pdu))]
    #[non_exhaustive]
    UnexpectedPdu { pdu: Pdu },

    #[snafu(display("unknown (unparsed) PDU `{:?}`", pdu))]
    #[non_exhaustive]
    UnknownPdu { pdu: Pdu },

    #[snafu(display("protocol version mismatch: expected {}, got {}", expected, got))]
    ProtocolVersionMismatch { expected: u16, got: u16 },

    /// the association was rejected by the other node
    #[non_exhaustive]
    Rejected { association_rj: AssociationRJ },

    /// no presentation context was accepted by the acceptor
    NoAcceptedPresentationContexts,

    /// the association was aborted by the peer or by a transport failure
    Aborted,

    /// the TLS configuration was not set on an acceptor invoked via `establish_tls`
    #[cfg(any(feature = "sync-tls", feature = "async-tls"))]
    TlsConfigMissing,

    /// failed to negotiate the TLS session
    #[cfg(any(feature = "sync-tls", feature = "async-tls"))]
    TlsConnection {
        source: rustls::Error,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A service class user or a provider.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum ServiceClassRole {
    /// Service Class User
    Scu,
    /// Service Class Provider
    Scp,
}

/// The states of the DICOM upper layer state machine (PS3.8 Section 9.2).
///
/// Only the subset of states observable from this crate's public API is
/// modeled explicitly: the wire-level micro-states around sending each
/// individual PDU collapse into the state they lead to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum State {
    /// No transport connection exists yet.
    Idle,
    /// The requestor has sent an A-ASSOCIATE-RQ and awaits a response.
    AwaitingAc,
    /// The acceptor has received a connection and awaits an A-ASSOCIATE-RQ.
    AwaitingRq,
    /// The association is negotiated; P-DATA-TF, A-RELEASE, and A-ABORT
    /// PDUs may be exchanged.
    Established,
    /// A release has been requested and a response is awaited.
    AwaitingRelease,
    /// The association ended through an A-ABORT (sent or received) or a
    /// transport failure.
    Aborted,
    /// The association ended through a completed release.
    Closed,
}

/// Socket-level timeouts applied when establishing an association.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub connection_timeout: Option<Duration>,
}

/// The outcome of negotiating an incoming A-ASSOCIATE-RQ, prior to
/// constructing the [`ServerAssociation`](server::ServerAssociation).
pub(crate) struct NegotiatedOptions {
    pub peer_max_pdu_length: u32,
    pub user_variables: Vec<UserVariableItem>,
    pub presentation_contexts: Vec<PresentationContextNegotiated>,
    pub peer_ae_title: String,
}

/// An underlying transport that can be gracefully shut down.
///
/// Implemented for plain TCP streams and, behind the `tls` features, for
/// `rustls` stream wrappers.
pub trait CloseSocket {
    fn close(&mut self) -> std::io::Result<()>;
}

impl CloseSocket for std::net::TcpStream {
    fn close(&mut self) -> std::io::Result<()> {
        self.shutdown(std::net::Shutdown::Both)
    }
}

#[cfg(feature = "sync-tls")]
impl CloseSocket for rustls::StreamOwned<rustls::ServerConnection, std::net::TcpStream> {
    fn close(&mut self) -> std::io::Result<()> {
        self.sock.shutdown(std::net::Shutdown::Both)
    }
}

#[cfg(feature = "sync-tls")]
impl CloseSocket for rustls::StreamOwned<rustls::ClientConnection, std::net::TcpStream> {
    fn close(&mut self) -> std::io::Result<()> {
        self.sock.shutdown(std::net::Shutdown::Both)
    }
}

/// Common read-only view over a negotiated association, regardless of
/// whether this node was the requestor or the acceptor.
pub trait Association {
    /// Obtain a view of the negotiated presentation contexts.
    fn presentation_contexts(&self) -> &[PresentationContextNegotiated];

    /// The maximum PDU length this application entity declared it is
    /// willing to receive.
    fn acceptor_max_pdu_length(&self) -> u32;

    /// The maximum PDU length the remote application entity declared it
    /// is willing to receive (i.e. the cap on what we may send).
    fn requestor_max_pdu_length(&self) -> u32;

    /// The application entity title of the remote node.
    fn peer_ae_title(&self) -> &str;

    /// The user variables received from the peer during negotiation.
    fn user_variables(&self) -> &[UserVariableItem];

    /// Look up a negotiated presentation context by its accepted
    /// abstract syntax UID.
    fn presentation_context_by_abstract_syntax(
        &self,
        abstract_syntax_uid: &str,
    ) -> Option<&PresentationContextNegotiated> {
        self.presentation_contexts()
            .iter()
            .find(|pc| pc.abstract_syntax == abstract_syntax_uid)
    }
}

pub(crate) mod private {
    use crate::pdu::Pdu;

    /// Sealed half of the synchronous association interface: one impl
    /// per concrete socket type, providing the actual I/O.
    pub trait SyncAssociationSealed<S> {
        fn send(&mut self, pdu: &Pdu) -> super::Result<()>;
        fn receive(&mut self) -> super::Result<Pdu>;
        fn close(&mut self) -> std::io::Result<()>;
    }

    /// Sealed half of the async association interface.
    #[cfg(feature = "async")]
    pub trait AsyncAssociationSealed<S> {
        fn send(&mut self, pdu: &Pdu) -> impl std::future::Future<Output = super::Result<()>> + Send;
        fn receive(&mut self) -> impl std::future::Future<Output = super::Result<Pdu>> + Send;
        fn close(&mut self) -> impl std::future::Future<Output = std::io::Result<()>> + Send;
    }
}

/// The synchronous half of an established association: sending and
/// receiving PDUs, releasing, and aborting.
///
/// `send`/`receive`/`release`/`abort` are provided as default methods
/// over the sealed per-socket implementation so that this trait cannot
/// be implemented outside this crate for sockets it does not support.
pub trait SyncAssociation<S>: Association + private::SyncAssociationSealed<S>
where
    S: std::io::Read + std::io::Write + CloseSocket,
{
    /// Obtain a mutable reference to the underlying transport.
    fn inner_stream(&mut self) -> &mut S;

    /// Obtain the underlying transport together with its read buffer,
    /// for callers that need to read raw bytes (e.g. the DIMSE layer
    /// reassembling P-DATA-TF fragments).
    fn get_mut(&mut self) -> (&mut S, &mut BytesMut);

    /// Send a PDU message to the other intervenient.
    fn send(&mut self, pdu: &Pdu) -> Result<()> {
        private::SyncAssociationSealed::send(self, pdu)
    }

    /// Read a PDU message from the other intervenient.
    fn receive(&mut self) -> Result<Pdu> {
        private::SyncAssociationSealed::receive(self)
    }

    /// Gracefully release the association: send A-RELEASE-RQ, await
    /// A-RELEASE-RP, then close the transport.
    fn release(&mut self) -> Result<()> {
        self.send(&Pdu::ReleaseRQ)?;
        let pdu = self.receive()?;
        let result = match pdu {
            Pdu::ReleaseRP => Ok(()),
            pdu => UnexpectedPduSnafu { pdu }.fail(),
        };
        let _ = private::SyncAssociationSealed::close(self);
        result
    }

    /// Abort the association immediately: send A-ABORT (as the service
    /// user) and close the transport without awaiting a response.
    fn abort(&mut self) -> Result<()> {
        let result = self.send(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        });
        let _ = private::SyncAssociationSealed::close(self);
        result
    }

    /// Create a P-Data value writer for sending a large data set over
    /// the given presentation context, splitting it into as many
    /// P-DATA-TF PDUs as necessary.
    fn send_pdata(&mut self, presentation_context_id: u8) -> PDataWriter<&mut S>
    where
        Self: Sized,
    {
        let max_pdu_length = self.requestor_max_pdu_length();
        let (stream, _) = self.get_mut();
        PDataWriter::new(stream, presentation_context_id, max_pdu_length)
    }
}

/// The async half of an established association, mirroring
/// [`SyncAssociation`] over a tokio transport.
#[cfg(feature = "async")]
pub trait AsyncAssociation<S>: Association + private::AsyncAssociationSealed<S> + Send
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
{
    /// Obtain a mutable reference to the underlying transport.
    fn inner_stream(&mut self) -> &mut S;

    /// Obtain the underlying transport together with its read buffer.
    fn get_mut(&mut self) -> (&mut S, &mut BytesMut);

    /// Send a PDU message to the other intervenient.
    fn send(&mut self, pdu: &Pdu) -> impl std::future::Future<Output = Result<()>> + Send {
        private::AsyncAssociationSealed::send(self, pdu)
    }

    /// Read a PDU message from the other intervenient.
    fn receive(&mut self) -> impl std::future::Future<Output = Result<Pdu>> + Send {
        private::AsyncAssociationSealed::receive(self)
    }

    /// Gracefully release the association.
    fn release(&mut self) -> impl std::future::Future<Output = Result<()>> + Send
    where
        Self: Sized,
    {
        async {
            self.send(&Pdu::ReleaseRQ).await?;
            let pdu = self.receive().await?;
            let result = match pdu {
                Pdu::ReleaseRP => Ok(()),
                pdu => UnexpectedPduSnafu { pdu }.fail(),
            };
            let _ = private::AsyncAssociationSealed::close(self).await;
            result
        }
    }

    /// Abort the association immediately.
    fn abort(&mut self) -> impl std::future::Future<Output = Result<()>> + Send
    where
        Self: Sized,
    {
        async {
            let result = self
                .send(&Pdu::AbortRQ {
                    source: AbortRQSource::ServiceUser,
                })
                .await;
            let _ = private::AsyncAssociationSealed::close(self).await;
            result
        }
    }

    // Sending large data sets asynchronously goes through the `dimse`
    // crate's fragmenter, which builds P-DATA-TF PDUs into a plain
    // buffer and hands them to `send` one at a time; `PDataWriter`
    // wraps `std::io::Write` and has no async counterpart here.
}

/// Encode a PDU, failing early if the result would exceed `max_length`
/// rather than let an oversized frame reach the wire.
pub(crate) fn encode_pdu(buf: &mut Vec<u8>, pdu: &Pdu, max_length: u32) -> Result<()> {
    let start = buf.len();
    crate::pdu::write_pdu(buf, pdu).context(SendPduSnafu)?;
    let pdu_length = (buf.len() - start) as u32;
    if pdu_length > max_length {
        buf.truncate(start);
        return PduTooLargeSnafu {
            pdu_length,
            max_pdu_length: max_length,
        }
        .fail();
    }
    Ok(())
}

/// Read one PDU from a blocking transport. `read_buffer` is reused
/// across calls as scratch space to avoid reallocating on every
/// message, per the framed transport contract (6-byte header peek,
/// then the body in one further read).
pub(crate) fn read_pdu_from_wire<R>(
    reader: &mut R,
    read_buffer: &mut BytesMut,
    max_pdu_length: u32,
    strict: bool,
) -> Result<Pdu>
where
    R: std::io::Read,
{
    read_buffer.clear();
    crate::pdu::reader::read_pdu(reader, max_pdu_length, strict).context(ReceiveSnafu)
}

#[cfg(feature = "async")]
pub(crate) async fn read_pdu_from_wire_async<R>(
    reader: &mut R,
    read_buffer: &mut BytesMut,
    max_pdu_length: u32,
    strict: bool,
) -> Result<Pdu>
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::AsyncReadExt;

    let mut header = [0u8; 6];
    reader.read_exact(&mut header).await.context(WireSendSnafu)?;
    let (_pdu_type, body_length) = crate::pdu::read_header(&header);

    read_buffer.clear();
    read_buffer.resize(6 + body_length as usize, 0);
    read_buffer[..6].copy_from_slice(&header);
    reader
        .read_exact(&mut read_buffer[6..])
        .await
        .context(WireSendSnafu)?;

    let mut cursor = std::io::Cursor::new(&read_buffer[..]);
    crate::pdu::reader::read_pdu(&mut cursor, max_pdu_length, strict).context(ReceiveSnafu)
}

/// Apply an optional timeout to a future, translating elapsed time into
/// [`Error::Timeout`].
#[cfg(feature = "async")]
pub(crate) async fn timeout<T>(
    duration: Option<Duration>,
    future: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match duration {
        Some(d) => tokio::time::timeout(d, future)
            .await
            .unwrap_or_else(|_| TimeoutSnafu.fail()),
        None => future.await,
    }
}
