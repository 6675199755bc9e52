//! Accept contact requests over TCP and keep accepted contacts connected.

use crate::{
    socket::{self, spawn_reader, Dialed, Inbound, TcpSocket},
    Error,
};
use futures::{channel::mpsc::UnboundedSender, StreamExt};
use onionlink_cryptography::{Address, IdentityKey};
use onionlink_p2p::{
    settings::Memory, Config, Contact, Dialer, Directory, Event, Oracle, Requests, Role,
    TransportId,
};
use onionlink_stream::request::{self, Decision, Progress, Promotion, Server};
use rand::rngs::OsRng;
use std::{
    collections::HashMap,
    net::SocketAddr,
    time::{Duration, SystemTime},
};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Dials contacts directly over TCP.
#[derive(Clone)]
struct TcpDialer {
    sender: UnboundedSender<Inbound>,
}

impl Dialer for TcpDialer {
    type Transport = TcpSocket;

    fn dial(
        &mut self,
        address: &Address,
        id: TransportId,
        host: &str,
        port: u16,
        _: Option<SocketAddr>,
    ) -> TcpSocket {
        socket::dial(*address, id, host.to_string(), port, self.sender.clone())
    }
}

/// Direct connections need no anonymizing network, so it is always ready.
#[derive(Clone)]
struct Direct;

impl Oracle for Direct {
    fn is_ready(&self) -> bool {
        true
    }

    fn proxy(&self) -> Option<SocketAddr> {
        None
    }
}

type Contacts = Directory<TcpDialer, Direct, Memory>;

/// A contact to keep connected from the start.
#[derive(Clone, Debug)]
pub struct Known {
    pub address: Address,
    pub host: String,
    pub port: u16,
}

/// Hand an accepted connection to its contact, adding the contact if it is new.
///
/// Returns the transport the contact now owns.
fn promote(
    directory: &mut Contacts,
    promotion: Promotion<TcpSocket>,
) -> Option<(Address, TransportId)> {
    let Promotion {
        session,
        socket,
        request,
    } = promotion;
    let address = request.address;
    info!(
        peer = %address.hostname(),
        nickname = %request.nickname,
        session,
        "contact accepted"
    );
    if directory.get(&address).is_none() {
        let contact = Contact {
            nickname: request.nickname,
            secret: Some(request.secret),
            ..Default::default()
        };
        if let Err(err) = directory.add(address, contact) {
            warn!(peer = %address, ?err, "failed to add contact");
            return None;
        }
    }
    match directory.promote(&address, socket, Role::Primary, SystemTime::now()) {
        Ok(transport) => Some((address, transport)),
        Err(err) => {
            warn!(peer = %address, ?err, "failed to promote connection");
            None
        }
    }
}

/// Run a handshake listener on `port` until the process is stopped.
///
/// Requests are deferred and logged. With `accept`, every deferred request is accepted right
/// after it is logged. Accepted connections (and connections to `known` contacts) become the
/// contact's primary connection.
pub async fn run(
    identity: IdentityKey,
    port: u16,
    accept: bool,
    known: Vec<Known>,
) -> Result<(), Error> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!(
        address = %identity.network_address()?.hostname(),
        port,
        "listening"
    );

    let mut server = Server::new(OsRng, request::Config::default());
    let mut requests = Requests::default();
    let (sender, mut inbound) = futures::channel::mpsc::unbounded();
    let (mut directory, mut events) = Directory::new(
        Config::default(),
        TcpDialer {
            sender: sender.clone(),
        },
        Direct,
        Memory::default(),
    );
    for Known {
        address,
        host,
        port,
    } in known
    {
        let contact = Contact {
            host: Some(host),
            port: Some(port),
            ..Default::default()
        };
        directory.add(address, contact)?;
    }
    directory.ready();

    // Accepted connections now owned by a contact, by session
    let mut promoted: HashMap<u64, (Address, TransportId)> = HashMap::new();

    loop {
        let delay = directory.next_deadline().map(|deadline| {
            deadline
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO)
        });
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote) = accepted?;
                let (reader, writer) = stream.into_split();
                let id = match server.accept(TcpSocket::spawn(writer)) {
                    Ok(id) => id,
                    Err(err) => {
                        warn!(%remote, ?err, "failed to start handshake");
                        continue;
                    }
                };
                debug!(session = id, %remote, "new connection");
                spawn_reader(id, reader, sender.clone());
            }
            Some(event) = inbound.next() => {
                let now = SystemTime::now();
                match event {
                    Inbound::Data(id, data) => {
                        if promoted.contains_key(&id) {
                            debug!(session = id, n = data.len(), "ignoring contact data");
                            continue;
                        }
                        match server.receive(id, &data, &mut requests) {
                            Progress::Deferred(address) => {
                                if let Some(incoming) = requests.incoming(&address) {
                                    info!(
                                        peer = %address.hostname(),
                                        nickname = %incoming.nickname,
                                        message = %incoming.message,
                                        "contact request"
                                    );
                                }
                                if accept {
                                    requests.decided(&address);
                                    match server.decide(&address, Decision::Accept) {
                                        Ok(Progress::Accepted(promotion)) => {
                                            let session = promotion.session;
                                            let owner = promote(&mut directory, promotion);
                                            promoted.extend(owner.map(|owner| (session, owner)));
                                        }
                                        Ok(_) => {}
                                        Err(err) => {
                                            warn!(peer = %address, ?err, "failed to accept")
                                        }
                                    }
                                }
                            }
                            Progress::Accepted(promotion) => {
                                if let Some(owner) = promote(&mut directory, promotion) {
                                    promoted.insert(id, owner);
                                }
                            }
                            Progress::Rejected(response) => {
                                info!(session = id, ?response, "request rejected");
                            }
                            Progress::Pending | Progress::Closed => {}
                        }
                    }
                    Inbound::Closed(id) => match promoted.remove(&id) {
                        Some((address, transport)) => {
                            directory.disconnected(&address, transport, now)
                        }
                        None => server.disconnected(id, &mut requests),
                    },
                    Inbound::Dialed(address, transport, Dialed::Connected) => {
                        directory.connected(&address, transport)
                    }
                    Inbound::Dialed(address, transport, Dialed::Failed) => {
                        directory.connect_failed(&address, transport, now)
                    }
                    Inbound::Dialed(address, transport, Dialed::Closed) => {
                        directory.disconnected(&address, transport, now)
                    }
                }
                server.collect();
            }
            Some(event) = events.next() => match event {
                Event::Connected(address) => info!(peer = %address.hostname(), "contact connected"),
                Event::Disconnected(address) => {
                    info!(peer = %address.hostname(), "contact disconnected")
                }
            },
            _ = tokio::time::sleep(delay.unwrap_or_default()), if delay.is_some() => {
                directory.tick(SystemTime::now());
            }
        }
    }
}
