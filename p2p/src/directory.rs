use crate::{
    settings::Settings, Config, Dialer, Error, Event, Oracle, Peer, Role, Transport, TransportId,
};
use futures::channel::mpsc;
use onionlink_cryptography::Address;
use onionlink_stream::request::SECRET_LENGTH;
use std::{collections::BTreeMap, time::SystemTime};
use tracing::{debug, warn};

/// What we know about a contact when adding it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Contact {
    pub nickname: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub secret: Option<[u8; SECRET_LENGTH]>,
}

fn key(address: &Address, field: &str) -> String {
    format!("contacts/{address}/{field}")
}

const FIELDS: [&str; 4] = ["nickname", "host", "port", "secret"];

/// Every contact we hold a connection for, keyed by address.
pub struct Directory<D: Dialer, O: Oracle, S: Settings> {
    config: Config,
    dialer: D,
    oracle: O,
    settings: S,
    events: mpsc::UnboundedSender<Event>,

    peers: BTreeMap<Address, Peer<D, O>>,
}

impl<D: Dialer, O: Oracle, S: Settings> Directory<D, O, S> {
    /// Create an empty directory and the stream of connection events of its peers.
    pub fn new(
        config: Config,
        dialer: D,
        oracle: O,
        settings: S,
    ) -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (events, receiver) = mpsc::unbounded();
        (
            Self {
                config,
                dialer,
                oracle,
                settings,
                events,
                peers: BTreeMap::new(),
            },
            receiver,
        )
    }

    /// Add a contact and persist what we know about it.
    pub fn add(&mut self, address: Address, contact: Contact) -> Result<&mut Peer<D, O>, Error> {
        if self.peers.contains_key(&address) {
            return Err(Error::PeerExists(address));
        }

        self.settings
            .set(&key(&address, "nickname"), contact.nickname.clone());
        if let Some(host) = &contact.host {
            self.settings.set(&key(&address, "host"), host.clone());
        }
        if let Some(port) = contact.port {
            self.settings.set(&key(&address, "port"), port.to_string());
        }
        if let Some(secret) = &contact.secret {
            self.settings.set(&key(&address, "secret"), hex::encode(secret));
        }
        debug!(peer = %address, nickname = %contact.nickname, "added contact");
        Ok(self.insert(address, contact))
    }

    /// Recreate a previously added contact from settings.
    pub fn restore(&mut self, address: Address) -> Result<&mut Peer<D, O>, Error> {
        if self.peers.contains_key(&address) {
            return Err(Error::PeerExists(address));
        }
        let nickname = self
            .settings
            .get(&key(&address, "nickname"))
            .ok_or(Error::UnknownPeer(address))?;
        let secret = self
            .settings
            .get(&key(&address, "secret"))
            .and_then(|secret| match hex::decode(&secret).map(<[u8; SECRET_LENGTH]>::try_from) {
                Ok(Ok(secret)) => Some(secret),
                _ => {
                    warn!(peer = %address, "ignoring invalid stored secret");
                    None
                }
            });
        // Port 0 is never dialable, so it stands in for a missing or invalid port
        let port = self.settings.get_or(&key(&address, "port"), 0u16);
        let contact = Contact {
            nickname,
            host: self.settings.get(&key(&address, "host")),
            port: (port != 0).then_some(port),
            secret,
        };
        Ok(self.insert(address, contact))
    }

    /// Forget a contact, tearing down its connections.
    pub fn remove(&mut self, address: &Address) -> Result<(), Error> {
        let mut peer = self
            .peers
            .remove(address)
            .ok_or(Error::UnknownPeer(*address))?;
        peer.disconnect_all();
        for field in FIELDS {
            self.settings.remove(&key(address, field));
        }
        debug!(peer = %address, "removed contact");
        Ok(())
    }

    pub fn get(&self, address: &Address) -> Option<&Peer<D, O>> {
        self.peers.get(address)
    }

    pub fn get_mut(&mut self, address: &Address) -> Option<&mut Peer<D, O>> {
        self.peers.get_mut(address)
    }

    /// Stored nickname of a contact.
    pub fn nickname(&self, address: &Address) -> Option<String> {
        self.settings.get(&key(address, "nickname"))
    }

    pub fn settings(&self) -> &S {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// The anonymizing network became ready: dial every contact without a connection.
    ///
    /// Returns the number of connection attempts started.
    pub fn ready(&mut self) -> usize {
        self.peers
            .values_mut()
            .map(|peer| peer.ready())
            .filter(|started| *started)
            .count()
    }

    /// Fire expired timers of every peer.
    pub fn tick(&mut self, now: SystemTime) {
        for peer in self.peers.values_mut() {
            peer.tick(now);
        }
    }

    /// The earliest time [Directory::tick] has work to do.
    pub fn next_deadline(&self) -> Option<SystemTime> {
        self.peers
            .values()
            .filter_map(|peer| peer.next_deadline())
            .min()
    }

    /// Hand a transport accepted for `address` to its peer.
    ///
    /// The transport is aborted if there is no such contact.
    pub fn promote(
        &mut self,
        address: &Address,
        mut transport: D::Transport,
        role: Role,
        now: SystemTime,
    ) -> Result<TransportId, Error> {
        let Some(peer) = self.peers.get_mut(address) else {
            transport.abort();
            return Err(Error::UnknownPeer(*address));
        };
        peer.promote(transport, role, now)
    }

    /// Transport `id` of `address` finished connecting.
    pub fn connected(&mut self, address: &Address, id: TransportId) {
        if let Some(peer) = self.peers.get_mut(address) {
            peer.connected(id);
        }
    }

    /// Transport `id` of `address` failed to connect.
    pub fn connect_failed(&mut self, address: &Address, id: TransportId, now: SystemTime) {
        if let Some(peer) = self.peers.get_mut(address) {
            peer.connect_failed(id, now);
        }
    }

    /// Transport `id` of `address` closed.
    pub fn disconnected(&mut self, address: &Address, id: TransportId, now: SystemTime) {
        if let Some(peer) = self.peers.get_mut(address) {
            peer.disconnected(id, now);
        }
    }

    fn insert(&mut self, address: Address, contact: Contact) -> &mut Peer<D, O> {
        let mut peer = Peer::new(
            address,
            self.config.clone(),
            self.dialer.clone(),
            self.oracle.clone(),
            self.events.clone(),
        );
        if let Some(host) = contact.host {
            peer.set_host(host);
        }
        if let Some(port) = contact.port {
            peer.set_port(port);
        }
        peer.replace_secret(contact.secret);
        self.peers.entry(address).or_insert(peer)
    }
}
