use crate::{Config, Dialer, Error, Event, Oracle, Role, Status, Transport, TransportId};
use futures::channel::mpsc;
use onionlink_cryptography::Address;
use onionlink_stream::request::SECRET_LENGTH;
use std::time::SystemTime;
use tracing::debug;

/// A transport held by a [Peer].
struct Slot<T> {
    id: TransportId,
    transport: T,
    status: Status,
}

/// Pending abort of a local attempt that raced a promoted transport.
struct Grace {
    deadline: SystemTime,
    id: TransportId,
}

/// Connection state for a single contact.
///
/// A peer holds up to two transports:
/// - `local`: dialed by us.
/// - `remote`: pushed to us by the contact (see [Peer::promote]).
///
/// The primary connection is `local` whenever it exists and `remote` otherwise, so there is never
/// more than one. A `remote` transport held next to a `local` one is a spare that takes over if
/// the local transport fails.
pub struct Peer<D: Dialer, O: Oracle> {
    address: Address,
    config: Config,
    dialer: D,
    oracle: O,
    events: mpsc::UnboundedSender<Event>,

    host: Option<String>,
    port: Option<u16>,
    secret: Option<[u8; SECRET_LENGTH]>,

    next: u64,
    local: Option<Slot<D::Transport>>,
    remote: Option<Slot<D::Transport>>,

    attempts: u32,
    reconnect: Option<SystemTime>,
    grace: Option<Grace>,
}

impl<D: Dialer, O: Oracle> Peer<D, O> {
    // ---------- Constructors ----------

    pub fn new(
        address: Address,
        config: Config,
        dialer: D,
        oracle: O,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        Self {
            address,
            config,
            dialer,
            oracle,
            events,
            host: None,
            port: None,
            secret: None,
            next: 0,
            local: None,
            remote: None,
            attempts: 0,
            reconnect: None,
            grace: None,
        }
    }

    // ---------- Getters ----------

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn secret(&self) -> Option<&[u8; SECRET_LENGTH]> {
        self.secret.as_ref()
    }

    /// Returns `true` if we know where to dial the contact.
    pub fn is_connectable(&self) -> bool {
        self.host.as_deref().is_some_and(|host| !host.is_empty()) && self.port.is_some()
    }

    /// Returns `true` if the primary connection is established.
    pub fn is_primary_connected(&self) -> bool {
        self.primary()
            .is_some_and(|slot| slot.status == Status::Connected)
    }

    /// Returns `true` if any held transport is established.
    pub fn is_any_connected(&self) -> bool {
        [&self.local, &self.remote]
            .into_iter()
            .flatten()
            .any(|slot| slot.status == Status::Connected)
    }

    /// Number of reconnection attempts since the last successful connection.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The earliest time [Peer::tick] has work to do.
    pub fn next_deadline(&self) -> Option<SystemTime> {
        let grace = self.grace.as_ref().map(|grace| grace.deadline);
        match (grace, self.reconnect) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Transport of the primary connection.
    pub fn primary_transport(&mut self) -> Option<&mut D::Transport> {
        match self.local.as_mut() {
            Some(local) => Some(&mut local.transport),
            None => self.remote.as_mut().map(|remote| &mut remote.transport),
        }
    }

    /// Id of the primary transport.
    pub fn primary_id(&self) -> Option<TransportId> {
        self.primary().map(|slot| slot.id)
    }

    // ---------- Setters ----------

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = Some(host.into());
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = Some(port);
    }

    /// Set the secret used to authenticate connections with the contact.
    ///
    /// An empty secret clears it.
    pub fn set_secret(&mut self, secret: &[u8]) -> Result<(), Error> {
        if secret.is_empty() {
            self.secret = None;
            return Ok(());
        }
        let secret = secret
            .try_into()
            .map_err(|_| Error::InvalidSecret(secret.len()))?;
        self.replace_secret(Some(secret));
        Ok(())
    }

    /// Set (or clear) the secret from a value already known to have the right length.
    pub fn replace_secret(&mut self, secret: Option<[u8; SECRET_LENGTH]>) {
        self.secret = secret;
    }

    // ---------- Operations ----------

    /// Dial the contact if there is no primary connection (or attempt) yet.
    ///
    /// Returns `true` if a connection attempt was started. Nothing happens if the contact is not
    /// connectable or the anonymizing network is not ready.
    pub fn connect(&mut self) -> bool {
        if self.primary().is_some() {
            return false;
        }
        if !self.oracle.is_ready() {
            return false;
        }
        let (Some(host), Some(port)) = (self.host.as_deref(), self.port) else {
            return false;
        };
        if host.is_empty() {
            return false;
        }
        let proxy = self.oracle.proxy();

        self.reconnect = None;
        let id = TransportId(self.next);
        self.next += 1;
        let transport = self.dialer.dial(&self.address, id, host, port, proxy);
        debug!(peer = %self.address, %id, host, port, ?proxy, attempt = self.attempts, "dialing");
        self.local = Some(Slot {
            id,
            transport,
            status: Status::Connecting,
        });
        true
    }

    /// Take ownership of an established transport pushed to us by the contact.
    ///
    /// If we are not connected (or connecting) ourselves, the transport becomes primary right
    /// away. If we are still dialing, the dial has [Config::grace] to complete before it is
    /// aborted in favor of this transport. If we are already connected, the transport is kept
    /// as a spare. Any previous spare is aborted.
    pub fn promote(
        &mut self,
        mut transport: D::Transport,
        role: Role,
        now: SystemTime,
    ) -> Result<TransportId, Error> {
        if role != Role::Primary {
            transport.abort();
            return Err(Error::Unsupported(role));
        }
        let before = self.is_primary_connected();

        let id = self.allocate();
        if let Some(mut previous) = self.remote.take() {
            debug!(peer = %self.address, id = %previous.id, "replacing remote transport");
            previous.transport.abort();
        }
        self.remote = Some(Slot {
            id,
            transport,
            status: Status::Connected,
        });

        match self.local.as_ref().map(|local| (local.id, local.status)) {
            Some((local, Status::Connecting)) => {
                // Race: give our own attempt a chance to finish
                debug!(peer = %self.address, %local, remote = %id, "holding remote transport");
                if self.grace.is_none() {
                    self.grace = Some(Grace {
                        deadline: now + self.config.grace,
                        id: local,
                    });
                }
            }
            Some((_, Status::Connected)) => {
                debug!(peer = %self.address, remote = %id, "keeping remote transport as spare");
            }
            None => {
                debug!(peer = %self.address, remote = %id, "remote transport is primary");
                self.reconnect = None;
            }
        }

        self.notify(before);
        Ok(id)
    }

    /// Transport `id` finished connecting.
    pub fn connected(&mut self, id: TransportId) {
        let before = self.is_primary_connected();
        match self.local.as_mut() {
            Some(local) if local.id == id && local.status == Status::Connecting => {
                local.status = Status::Connected;
                if self.grace.as_ref().is_some_and(|grace| grace.id == id) {
                    self.grace = None;
                }
                debug!(peer = %self.address, %id, "connected");
            }
            _ => {
                debug!(peer = %self.address, %id, "ignoring connect of stale transport");
                return;
            }
        }
        self.notify(before);
    }

    /// Transport `id` failed to connect.
    pub fn connect_failed(&mut self, id: TransportId, now: SystemTime) {
        self.disconnected(id, now);
    }

    /// Transport `id` closed.
    pub fn disconnected(&mut self, id: TransportId, now: SystemTime) {
        let before = self.is_primary_connected();
        if self.local.as_ref().is_some_and(|local| local.id == id) {
            self.local = None;
            if self.grace.as_ref().is_some_and(|grace| grace.id == id) {
                self.grace = None;
            }
            debug!(peer = %self.address, %id, "local transport closed");
            self.recover(now);
        } else if self.remote.as_ref().is_some_and(|remote| remote.id == id) {
            self.remote = None;
            debug!(peer = %self.address, %id, "remote transport closed");
            if self.local.is_none() {
                self.recover(now);
            }
        } else {
            debug!(peer = %self.address, %id, "ignoring close of stale transport");
            return;
        }
        self.notify(before);
    }

    /// Fire expired timers.
    pub fn tick(&mut self, now: SystemTime) {
        let before = self.is_primary_connected();

        let expired = match &self.grace {
            Some(grace) if grace.deadline <= now => Some(grace.id),
            _ => None,
        };
        if let Some(id) = expired {
            self.grace = None;
            let racing = self
                .local
                .as_ref()
                .is_some_and(|local| local.id == id && local.status == Status::Connecting);
            if racing {
                if let Some(mut local) = self.local.take() {
                    debug!(peer = %self.address, %id, "aborting slow local transport");
                    local.transport.abort();
                    self.recover(now);
                }
            }
        }

        if self.reconnect.is_some_and(|deadline| deadline <= now) {
            self.reconnect = None;
            self.connect();
        }

        self.notify(before);
    }

    /// The anonymizing network became ready.
    pub fn ready(&mut self) -> bool {
        self.connect()
    }

    /// Forcibly tear down every transport.
    ///
    /// No event is emitted, and events later reported for the aborted transports are ignored.
    pub fn disconnect_all(&mut self) {
        self.grace = None;
        self.reconnect = None;
        for mut slot in [self.local.take(), self.remote.take()].into_iter().flatten() {
            debug!(peer = %self.address, id = %slot.id, "aborting transport");
            slot.transport.abort();
        }
    }

    // ---------- Internal ----------

    fn primary(&self) -> Option<&Slot<D::Transport>> {
        self.local.as_ref().or(self.remote.as_ref())
    }

    fn allocate(&mut self) -> TransportId {
        let id = TransportId(self.next);
        self.next += 1;
        id
    }

    /// The local transport is gone: fail over to the spare or schedule a reconnect.
    fn recover(&mut self, now: SystemTime) {
        if self.remote.is_some() {
            debug!(peer = %self.address, "failing over to remote transport");
            self.reconnect = None;
            return;
        }
        if !self.oracle.is_ready() {
            self.attempts = 0;
            self.reconnect = None;
            return;
        }
        self.attempts = self.attempts.saturating_add(1);
        let delay = self.config.backoff.delay(self.attempts);
        debug!(peer = %self.address, attempt = self.attempts, ?delay, "scheduling reconnect");
        self.reconnect = Some(now + delay);
    }

    /// Emit an event if the primary connection changed state.
    fn notify(&mut self, before: bool) {
        let after = self.is_primary_connected();
        if after {
            self.attempts = 0;
        }
        if before == after {
            return;
        }
        let event = if after {
            Event::Connected(self.address)
        } else {
            Event::Disconnected(self.address)
        };
        debug!(?event, "primary changed");
        // The consumer may be gone
        let _ = self.events.unbounded_send(event);
    }
}
