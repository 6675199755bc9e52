//! Send a contact request over TCP.

use crate::{socket::TcpSocket, Error};
use onionlink_cryptography::IdentityKey;
use onionlink_stream::request::{Client, Outcome, SECRET_LENGTH};
use rand::{rngs::OsRng, RngCore};
use tokio::{io::AsyncReadExt, net::TcpStream};
use tracing::info;

/// Connect to `to`, send the request and wait for the final response.
pub async fn run(
    identity: IdentityKey,
    to: &str,
    nickname: &str,
    message: &str,
) -> Result<(), Error> {
    let stream = TcpStream::connect(to).await?;
    let (mut reader, writer) = stream.into_split();
    info!(to, address = %identity.network_address()?.hostname(), "connected");

    let mut secret = [0u8; SECRET_LENGTH];
    OsRng.fill_bytes(&mut secret);
    let mut client = Client::new(TcpSocket::spawn(writer), identity, secret, nickname, message);

    let mut buf = [0u8; 256];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed);
        }
        match client.receive(&buf[..n])? {
            Outcome::Pending => {}
            Outcome::Acknowledged => info!("request acknowledged, waiting for a decision"),
            Outcome::Accepted(_) => {
                info!("request accepted");
                return Ok(());
            }
            Outcome::Rejected(response) => return Err(Error::Rejected(response)),
        }
    }
}
