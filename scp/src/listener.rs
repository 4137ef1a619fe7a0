//! The concurrent SCP listener: binds a TCP port, negotiates each
//! incoming association on its own thread, and dispatches DIMSE
//! requests to a [`StorageDelegate`].
//!
//! Grounded on the `storescp` binary's `run` loop (accept, spawn a
//! handler thread per connection) generalized with admission rules
//! and a graceful shutdown lifecycle that a short-lived binary with
//! no persistent server loop never needed.

use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use dcmnet_ul::association::{AccessControlList, ServerAssociationOptions};

use crate::admission::Admission;
use crate::delegate::StorageDelegate;
use crate::dispatch;
use crate::error::{BindSnafu, Result};
use snafu::ResultExt;

/// How often the accept loop wakes up to check for a `stop()` request.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration and running state of a concurrent SCP listener.
///
/// Constructed with [`ScpListener::new`], configured with the fluent
/// `with_*` setters, then started with [`ScpListener::start`]. Dropping
/// a started listener without calling [`ScpListener::stop`] leaves its
/// accept thread and any in-flight associations running in the
/// background, matching plain `TcpListener` semantics.
pub struct ScpListener<D> {
    ae_title: String,
    abstract_syntaxes: Vec<String>,
    transfer_syntaxes: Vec<String>,
    max_pdu_length: u32,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    strict: bool,
    promiscuous: bool,
    acl: AccessControlList,
    max_concurrent_associations: usize,
    delegate: Arc<D>,
    active: Arc<Mutex<HashMap<u64, TcpStream>>>,
    next_id: Arc<AtomicU64>,
    active_count: Arc<AtomicUsize>,
    stop_flag: Arc<AtomicBool>,
    accept_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl<D> ScpListener<D>
where
    D: StorageDelegate + 'static,
{
    pub fn new(delegate: D) -> Self {
        ScpListener {
            ae_title: "ANY-SCP".to_string(),
            abstract_syntaxes: Vec::new(),
            transfer_syntaxes: Vec::new(),
            max_pdu_length: dcmnet_ul::pdu::DEFAULT_MAX_PDU,
            read_timeout: None,
            write_timeout: None,
            strict: true,
            promiscuous: false,
            acl: AccessControlList::new(),
            max_concurrent_associations: 32,
            delegate: Arc::new(delegate),
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            active_count: Arc::new(AtomicUsize::new(0)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            accept_handle: None,
            local_addr: None,
        }
    }

    pub fn ae_title(mut self, ae_title: impl Into<String>) -> Self {
        self.ae_title = ae_title.into();
        self
    }

    pub fn with_abstract_syntax(mut self, uid: impl Into<String>) -> Self {
        self.abstract_syntaxes.push(uid.into());
        self
    }

    pub fn with_transfer_syntax(mut self, uid: impl Into<String>) -> Self {
        self.transfer_syntaxes.push(uid.into());
        self
    }

    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    pub fn promiscuous(mut self, promiscuous: bool) -> Self {
        self.promiscuous = promiscuous;
        self
    }

    pub fn access_control_list(mut self, acl: AccessControlList) -> Self {
        self.acl = acl;
        self
    }

    pub fn max_concurrent_associations(mut self, value: usize) -> Self {
        self.max_concurrent_associations = value;
        self
    }

    /// Number of associations currently negotiating or established.
    pub fn active_associations(&self) -> usize {
        self.active_count.load(Ordering::SeqCst)
    }

    /// The address this listener is bound to, once [`ScpListener::start`]
    /// has succeeded. Useful when binding to port 0 for an ephemeral
    /// port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind `address` and begin accepting associations on a background
    /// thread. Returns once the listener is bound; negotiation and
    /// dispatch happen asynchronously.
    pub fn start(&mut self, address: impl ToSocketAddrs) -> Result<()> {
        let std_listener = StdTcpListener::bind(address).context(BindSnafu {
            address: "<scp listener>".to_string(),
        })?;
        std_listener
            .set_nonblocking(true)
            .context(BindSnafu {
                address: "<scp listener>".to_string(),
            })?;
        self.local_addr = std_listener.local_addr().ok();

        self.stop_flag.store(false, Ordering::SeqCst);

        let ae_title = self.ae_title.clone();
        let abstract_syntaxes = self.abstract_syntaxes.clone();
        let transfer_syntaxes = self.transfer_syntaxes.clone();
        let max_pdu_length = self.max_pdu_length;
        let read_timeout = self.read_timeout;
        let write_timeout = self.write_timeout;
        let strict = self.strict;
        let promiscuous = self.promiscuous;
        let acl = self.acl.clone();
        let max_concurrent = self.max_concurrent_associations;
        let delegate = Arc::clone(&self.delegate);
        let active = Arc::clone(&self.active);
        let next_id = Arc::clone(&self.next_id);
        let active_count = Arc::clone(&self.active_count);
        let stop_flag = Arc::clone(&self.stop_flag);

        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                match std_listener.accept() {
                    Ok((socket, peer_address)) => {
                        if active_count.load(Ordering::SeqCst) >= max_concurrent {
                            decline_for_capacity(socket);
                            continue;
                        }
                        let id = next_id.fetch_add(1, Ordering::SeqCst);
                        let clone = match socket.try_clone() {
                            Ok(clone) => clone,
                            Err(_) => continue,
                        };
                        active.lock().unwrap().insert(id, clone);
                        active_count.fetch_add(1, Ordering::SeqCst);

                        let options = build_connection_options(
                            &ae_title,
                            &abstract_syntaxes,
                            &transfer_syntaxes,
                            max_pdu_length,
                            read_timeout,
                            write_timeout,
                            strict,
                            promiscuous,
                            acl.clone(),
                            Arc::clone(&delegate),
                            peer_address,
                        );
                        let delegate = Arc::clone(&delegate);
                        let active = Arc::clone(&active);
                        let active_count = Arc::clone(&active_count);
                        std::thread::spawn(move || {
                            handle_connection(socket, options, &delegate);
                            active.lock().unwrap().remove(&id);
                            active_count.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(POLL_INTERVAL);
                    }
                    Err(_) => std::thread::sleep(POLL_INTERVAL),
                }
            }
        });
        self.accept_handle = Some(handle);
        Ok(())
    }

    /// Stop accepting new connections, abort every active association,
    /// and wait for the accept thread and all handlers to finish.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.accept_handle.take() {
            let _ = handle.join();
        }
        let sockets: Vec<TcpStream> = self.active.lock().unwrap().drain().map(|(_, s)| s).collect();
        for socket in sockets {
            let _ = socket.shutdown(std::net::Shutdown::Both);
        }
        // give handler threads a moment to observe the shutdown and exit
        // their dispatch loop; they hold no lock this thread needs.
        while self.active_count.load(Ordering::SeqCst) > 0 {
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_connection_options<D>(
    ae_title: &str,
    abstract_syntaxes: &[String],
    transfer_syntaxes: &[String],
    max_pdu_length: u32,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    strict: bool,
    promiscuous: bool,
    acl: AccessControlList,
    delegate: Arc<D>,
    peer_address: SocketAddr,
) -> ServerAssociationOptions<'static, Admission<D>>
where
    D: StorageDelegate,
{
    let admission = Admission::new(acl, delegate, peer_address);
    let mut options = ServerAssociationOptions::new()
        .ae_access_control(admission)
        .ae_title(ae_title.to_string())
        .max_pdu_length(max_pdu_length)
        .strict(strict)
        .promiscuous(promiscuous);
    for uid in abstract_syntaxes {
        options = options.with_abstract_syntax(uid.clone());
    }
    for uid in transfer_syntaxes {
        options = options.with_transfer_syntax(uid.clone());
    }
    if let Some(timeout) = read_timeout {
        options = options.read_timeout(timeout);
    }
    if let Some(timeout) = write_timeout {
        options = options.write_timeout(timeout);
    }
    options
}

fn handle_connection<D>(
    socket: TcpStream,
    options: ServerAssociationOptions<'static, Admission<D>>,
    delegate: &D,
) where
    D: StorageDelegate,
{
    let mut association = match options.establish(socket) {
        Ok(association) => association,
        Err(error) => {
            tracing::warn!(%error, "association negotiation failed");
            return;
        }
    };
    if let Err(error) = dispatch::run(&mut association, delegate) {
        tracing::warn!(%error, "association dispatch ended with an error");
    }
}

/// Reject a connection at capacity with an A-ASSOCIATE-RJ carrying the
/// service-provider "local limit exceeded" reason,
/// without running it through full negotiation.
fn decline_for_capacity(mut socket: TcpStream) {
    use dcmnet_ul::pdu::{
        read_pdu, write_pdu, AssociationRJ, AssociationRJResult, AssociationRJSource,
        AssociationRJServiceProviderPresentationReason, Pdu, DEFAULT_MAX_PDU,
    };
    let _ = socket.set_nonblocking(false);
    let _ = socket.set_read_timeout(Some(Duration::from_secs(5)));
    // Best-effort: read the RQ so the rejection is a well-formed reply
    // rather than an abrupt close, but don't let a malformed or slow
    // peer block the accept loop indefinitely.
    let _ = read_pdu(&mut socket, DEFAULT_MAX_PDU, false);
    let rj = Pdu::AssociationRJ(AssociationRJ {
        result: AssociationRJResult::Transient,
        source: AssociationRJSource::ServiceProviderPresentation(
            AssociationRJServiceProviderPresentationReason::LocalLimitExceeded,
        ),
    });
    let mut buf = Vec::new();
    if write_pdu(&mut buf, &rj).is_ok() {
        use std::io::Write;
        let _ = socket.write_all(&buf);
    }
    let _ = socket.shutdown(std::net::Shutdown::Both);
}

impl<D> Drop for ScpListener<D> {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }
}
