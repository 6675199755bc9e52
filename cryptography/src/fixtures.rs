//! Fixed 1024-bit RSA keys for tests (generated with OpenSSL).

/// Alice's private key (PKCS#1).
pub const ALICE: &str = include_str!("../fixtures/alice.pem");

/// Alice's private key (PKCS#8).
pub const ALICE_PKCS8: &str = include_str!("../fixtures/alice.pk8.pem");

/// Alice's public key (PKCS#1).
pub const ALICE_PUBLIC: &str = include_str!("../fixtures/alice.pub.pem");

/// Alice's public key (SPKI).
pub const ALICE_SPKI: &str = include_str!("../fixtures/alice.spki.pem");

/// Bob's private key (PKCS#1).
pub const BOB: &str = include_str!("../fixtures/bob.pem");
