//! Generate identities and exchange contact requests from the command line.
//!
//! # Usage
//!
//! Create an identity for each party:
//!
//! ```sh
//! onionlink keygen --out /tmp/alice.pem
//! onionlink keygen --out /tmp/bob.pem
//! ```
//!
//! Wait for contact requests as bob (accepting every valid one):
//!
//! ```sh
//! onionlink listen --key /tmp/bob.pem --port 9878 --accept
//! ```
//!
//! Accepted contacts stay connected for as long as the listener runs. Contacts that are already
//! known can be dialed on startup (and redialed with backoff):
//!
//! ```sh
//! onionlink listen --key /tmp/bob.pem --port 9879 --contact <address>@127.0.0.1:9878
//! ```
//!
//! Send a contact request as alice:
//!
//! ```sh
//! onionlink request --key /tmp/alice.pem --to 127.0.0.1:9878 --nickname alice --message "hi bob"
//! ```
//!
//! Connections are made directly over TCP, without the anonymizing network in between.

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use listen::Known;
use onionlink_cryptography::{control, Address, IdentityKey};
use onionlink_stream::request::Response;
use rand::rngs::OsRng;
use std::{fs, path::PathBuf};
use thiserror::Error;
use tracing::{error, info, Level};

mod listen;
mod request;
mod socket;

/// Size of generated keys.
const KEY_BITS: usize = 1024;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("cryptography: {0}")]
    Cryptography(#[from] onionlink_cryptography::Error),
    #[error("stream: {0}")]
    Stream(#[from] onionlink_stream::Error),
    #[error("p2p: {0}")]
    P2p(#[from] onionlink_p2p::Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request rejected: {0:?}")]
    Rejected(Response),
}

fn key_arg() -> Arg {
    Arg::new("key")
        .long("key")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("PEM encoded identity key")
}

/// Parse `<address>@<host>:<port>`.
fn parse_contact(value: &str) -> Result<Known, String> {
    let (address, endpoint) = value
        .split_once('@')
        .ok_or("expected <address>@<host>:<port>")?;
    let address = address
        .parse::<Address>()
        .map_err(|err| format!("invalid address: {err}"))?;
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or("expected <host>:<port>")?;
    let port = port
        .parse::<u16>()
        .map_err(|err| format!("invalid port: {err}"))?;
    Ok(Known {
        address,
        host: host.to_string(),
        port,
    })
}

fn keygen(matches: &ArgMatches) -> Result<(), Error> {
    let out = matches
        .get_one::<PathBuf>("out")
        .expect("Please provide output path");
    let identity = IdentityKey::generate(&mut OsRng, KEY_BITS)?;
    fs::write(out, identity.encoded_private_key()?.as_bytes())?;
    info!(path = %out.display(), "saved key");
    println!("{}", identity.network_address()?.hostname());
    Ok(())
}

fn address(matches: &ArgMatches) -> Result<(), Error> {
    let path = matches
        .get_one::<PathBuf>("key")
        .expect("Please provide key path");

    // Either kind of key has an address
    let identity = IdentityKey::load_file(path, true)
        .or_else(|_| IdentityKey::load_file(path, false))?;
    println!("{}", identity.network_address()?.hostname());
    Ok(())
}

fn control_password(matches: &ArgMatches) {
    let password = matches
        .get_one::<String>("password")
        .expect("Please provide password");
    println!("{}", control::hashed_password(&mut OsRng, password.as_bytes()));
}

fn private_key(matches: &ArgMatches) -> Result<IdentityKey, Error> {
    let path = matches
        .get_one::<PathBuf>("key")
        .expect("Please provide key path");
    Ok(IdentityKey::load_file(path, true)?)
}

async fn run(matches: ArgMatches) -> Result<(), Error> {
    match matches.subcommand() {
        Some(("keygen", matches)) => keygen(matches),
        Some(("address", matches)) => address(matches),
        Some(("control-password", matches)) => {
            control_password(matches);
            Ok(())
        }
        Some(("listen", matches)) => {
            let port = *matches
                .get_one::<u16>("port")
                .expect("Please provide port");
            let known = matches
                .get_many::<Known>("contact")
                .map(|known| known.cloned().collect())
                .unwrap_or_default();
            listen::run(private_key(matches)?, port, matches.get_flag("accept"), known).await
        }
        Some(("request", matches)) => {
            let to = matches
                .get_one::<String>("to")
                .expect("Please provide destination");
            let nickname = matches
                .get_one::<String>("nickname")
                .map(String::as_str)
                .unwrap_or_default();
            let message = matches
                .get_one::<String>("message")
                .map(String::as_str)
                .unwrap_or_default();
            request::run(private_key(matches)?, to, nickname, message).await
        }
        _ => unreachable!("subcommand required"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse arguments
    let matches = Command::new("onionlink")
        .about("generate identities and exchange contact requests")
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log debug output"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("keygen")
                .about("generate a new identity key")
                .arg(
                    Arg::new("out")
                        .long("out")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        )
        .subcommand(
            Command::new("address")
                .about("print the onion address of a key")
                .arg(key_arg()),
        )
        .subcommand(
            Command::new("control-password")
                .about("hash a password for the control port")
                .arg(Arg::new("password").required(true)),
        )
        .subcommand(
            Command::new("listen")
                .about("accept contact requests")
                .arg(key_arg())
                .arg(
                    Arg::new("port")
                        .long("port")
                        .default_value("9878")
                        .value_parser(value_parser!(u16)),
                )
                .arg(
                    Arg::new("accept")
                        .long("accept")
                        .action(ArgAction::SetTrue)
                        .help("Accept every valid request"),
                )
                .arg(
                    Arg::new("contact")
                        .long("contact")
                        .action(ArgAction::Append)
                        .value_parser(parse_contact)
                        .help("Contact to keep connected, as <address>@<host>:<port>"),
                ),
        )
        .subcommand(
            Command::new("request")
                .about("send a contact request")
                .arg(key_arg())
                .arg(Arg::new("to").long("to").required(true))
                .arg(Arg::new("nickname").long("nickname"))
                .arg(Arg::new("message").long("message")),
        )
        .get_matches();

    // Create logger
    let level = if matches.get_flag("verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    // Run command
    if let Err(err) = run(matches).await {
        error!(?err, "command failed");
        std::process::exit(1);
    }
}
