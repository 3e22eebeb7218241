//! BLE command bytes and authentication framing for the band.
//!
//! The authentication exchange on the auth characteristic is:
//!
//! 1. host writes [`AUTH_REQUEST_CHALLENGE`]
//! 2. band notifies `[0x10, 0x82, 0x01, <16 random bytes>]`
//! 3. host writes `[0x83, 0x00, <AES-128-ECB(key, random)>]`
//! 4. band notifies `[0x10, 0x83, 0x01]` on success

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};

use miband_types::{AUTH_KEY_LEN, AuthKey};

/// Prefix of every auth notification from the band.
pub const AUTH_RESPONSE: u8 = 0x10;

/// Request a random challenge.
pub const AUTH_REQUEST_CHALLENGE: [u8; 5] = [0x82, 0x00, 0x02, 0x01, 0x00];

/// Opcode of the challenge request, echoed back by the band.
pub const AUTH_CHALLENGE_OPCODE: u8 = 0x82;

/// Opcode for sending the encrypted challenge.
pub const AUTH_SEND_ENCRYPTED_OPCODE: u8 = 0x83;

/// Status byte meaning the step succeeded.
pub const AUTH_SUCCESS: u8 = 0x01;

/// Stop a one-shot manual measurement.
pub const HR_STOP_MANUAL: [u8; 3] = [0x15, 0x02, 0x00];

/// Stop continuous measurement.
pub const HR_STOP_CONTINUOUS: [u8; 3] = [0x15, 0x01, 0x00];

/// Start continuous measurement.
pub const HR_START_CONTINUOUS: [u8; 3] = [0x15, 0x01, 0x01];

/// Keep continuous measurement alive; the band stops after ~15 s without it.
pub const HR_PING: [u8; 1] = [0x16];

/// A parsed notification from the auth characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    /// Random challenge to encrypt.
    Challenge([u8; AUTH_KEY_LEN]),
    /// The encrypted challenge was accepted.
    Accepted,
    /// The band reported a failure for `opcode`.
    Rejected { opcode: u8, status: u8 },
    /// Anything else.
    Unexpected(Vec<u8>),
}

/// Parse a notification from the auth characteristic.
pub fn parse_auth_response(data: &[u8]) -> AuthResponse {
    match data {
        [AUTH_RESPONSE, AUTH_CHALLENGE_OPCODE, AUTH_SUCCESS, rest @ ..]
            if rest.len() >= AUTH_KEY_LEN =>
        {
            let mut challenge = [0u8; AUTH_KEY_LEN];
            challenge.copy_from_slice(&rest[..AUTH_KEY_LEN]);
            AuthResponse::Challenge(challenge)
        }
        [AUTH_RESPONSE, AUTH_SEND_ENCRYPTED_OPCODE, AUTH_SUCCESS, ..] => AuthResponse::Accepted,
        [AUTH_RESPONSE, opcode, status, ..] if *status != AUTH_SUCCESS => AuthResponse::Rejected {
            opcode: *opcode,
            status: *status,
        },
        other => AuthResponse::Unexpected(other.to_vec()),
    }
}

/// Encrypt a challenge with the device key (AES-128, single block).
pub fn encrypt_challenge(key: &AuthKey, challenge: &[u8; AUTH_KEY_LEN]) -> [u8; AUTH_KEY_LEN] {
    let cipher = Aes128::new(GenericArray::from_slice(key.as_bytes()));
    let mut block = GenericArray::clone_from_slice(challenge);
    cipher.encrypt_block(&mut block);
    let mut out = [0u8; AUTH_KEY_LEN];
    out.copy_from_slice(&block);
    out
}

/// Frame the answer to a challenge.
pub fn send_encrypted_command(key: &AuthKey, challenge: &[u8; AUTH_KEY_LEN]) -> Vec<u8> {
    let mut command = Vec::with_capacity(2 + AUTH_KEY_LEN);
    command.push(AUTH_SEND_ENCRYPTED_OPCODE);
    command.push(0x00);
    command.extend_from_slice(&encrypt_challenge(key, challenge));
    command
}
