//! Client side of the SCRAM-SHA-256 exchange (RFC 5802 / RFC 7677).

use base64::prelude::{Engine, BASE64_STANDARD};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use gelx_errors::{AuthenticationError, Error, ErrorKind, ProtocolError};

type HmacSha256 = Hmac<Sha256>;

const NONCE_RAW_LEN: usize = 18;
const CHANNEL_BINDING: &str = "n,,";

pub struct ScramClient {
    password: String,
    nonce: String,
    client_first_bare: String,
    server_signature: Option<[u8; 32]>,
}

impl ScramClient {
    pub fn new(user: &str, password: &str) -> ScramClient {
        ScramClient::with_nonce(user, password, &generate_nonce())
    }

    fn with_nonce(user: &str, password: &str, nonce: &str) -> ScramClient {
        let client_first_bare = format!("n={},r={}", escape_username(user), nonce);
        ScramClient {
            password: password.nfkc().collect(),
            nonce: nonce.to_string(),
            client_first_bare,
            server_signature: None,
        }
    }

    /// The payload of the SASL initial response.
    pub fn client_first(&self) -> String {
        format!("{}{}", CHANNEL_BINDING, self.client_first_bare)
    }

    /// Process the server-first message, producing the client-final one.
    pub fn handle_server_first(&mut self, server_first: &str) -> Result<String, Error> {
        let fields = parse_fields(server_first)?;
        let combined_nonce = field(&fields, 'r')?;
        if !combined_nonce.starts_with(&self.nonce) || combined_nonce.len() <= self.nonce.len() {
            return Err(AuthenticationError::with_message(
                "server used an unexpected nonce",
            ));
        }
        let salt = BASE64_STANDARD
            .decode(field(&fields, 's')?)
            .map_err(|_| ProtocolError::with_message("invalid SCRAM salt"))?;
        let iterations: u32 = field(&fields, 'i')?
            .parse()
            .map_err(|_| ProtocolError::with_message("invalid SCRAM iteration count"))?;

        let salted_password = salted_password(self.password.as_bytes(), &salt, iterations);
        let client_key = hmac(&salted_password, b"Client Key");
        let stored_key = Sha256::digest(client_key);
        let client_final_bare = format!("c={},r={}", b64(CHANNEL_BINDING.as_bytes()), combined_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_bare
        );
        let client_signature = hmac(&stored_key, auth_message.as_bytes());
        let mut proof = client_key;
        for (proof_byte, signature_byte) in proof.iter_mut().zip(client_signature) {
            *proof_byte ^= signature_byte;
        }

        let server_key = hmac(&salted_password, b"Server Key");
        self.server_signature = Some(hmac(&server_key, auth_message.as_bytes()));

        Ok(format!("{},p={}", client_final_bare, b64(&proof)))
    }

    /// Check the server-final message against the expected signature.
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), Error> {
        let fields = parse_fields(server_final)?;
        let received = BASE64_STANDARD
            .decode(field(&fields, 'v')?)
            .map_err(|_| ProtocolError::with_message("invalid SCRAM server signature"))?;
        let Some(expected) = &self.server_signature else {
            return Err(ProtocolError::with_message(
                "SCRAM verification before the exchange finished",
            ));
        };
        // compare without early exit
        let mut diff = (received.len() != expected.len()) as u8;
        for (a, b) in received.iter().zip(expected.iter()) {
            diff |= a ^ b;
        }
        if diff != 0 {
            return Err(AuthenticationError::with_message(
                "server proof does not match: the server does not know the password",
            ));
        }
        Ok(())
    }
}

fn generate_nonce() -> String {
    let raw: [u8; NONCE_RAW_LEN] = rand::rng().random();
    b64(&raw)
}

fn escape_username(user: &str) -> String {
    user.replace('=', "=3D").replace(',', "=2C")
}

fn salted_password(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    // PBKDF2 with a single block of output
    let mut previous = {
        let mut mac = HmacSha256::new_from_slice(password).expect("any key length works");
        mac.update(salt);
        mac.update(&1u32.to_be_bytes());
        let digest: [u8; 32] = mac.finalize().into_bytes().into();
        digest
    };
    let mut result = previous;
    for _ in 1..iterations {
        let mut mac = HmacSha256::new_from_slice(password).expect("any key length works");
        mac.update(&previous);
        previous = mac.finalize().into_bytes().into();
        for (result_byte, previous_byte) in result.iter_mut().zip(previous) {
            *result_byte ^= previous_byte;
        }
    }
    result
}

fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("any key length works");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

fn b64(data: &[u8]) -> String {
    BASE64_STANDARD.encode(data)
}

fn parse_fields(message: &str) -> Result<Vec<(char, &str)>, Error> {
    message
        .split(',')
        .map(|item| {
            let mut chars = item.chars();
            let key = chars
                .next()
                .filter(char::is_ascii)
                .ok_or_else(|| ProtocolError::with_message("empty SCRAM attribute"))?;
            if chars.next() != Some('=') {
                return Err(ProtocolError::with_message("malformed SCRAM attribute"));
            }
            Ok((key, &item[2..]))
        })
        .collect()
}

fn field<'a>(fields: &[(char, &'a str)], name: char) -> Result<&'a str, Error> {
    fields
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| *value)
        .ok_or_else(|| {
            ProtocolError::build().context(format!("SCRAM attribute {name:?} is missing"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    // the SCRAM-SHA-256 example exchange from RFC 7677
    const CLIENT_NONCE: &str = "rOprNGfwEbeRWgbNEkqO";
    const SERVER_FIRST: &str =
        "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
    const SERVER_FINAL: &str = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";

    #[test]
    fn rfc7677_exchange() {
        let mut scram = ScramClient::with_nonce("user", "pencil", CLIENT_NONCE);
        assert_eq!(scram.client_first(), "n,,n=user,r=rOprNGfwEbeRWgbNEkqO");
        let client_final = scram.handle_server_first(SERVER_FIRST).unwrap();
        assert_eq!(
            client_final,
            "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
             p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
        );
        scram.verify_server_final(SERVER_FINAL).unwrap();
    }

    #[test]
    fn bad_server_signature_is_refused() {
        let mut scram = ScramClient::with_nonce("user", "pencil", CLIENT_NONCE);
        scram.handle_server_first(SERVER_FIRST).unwrap();
        let err = scram
            .verify_server_final("v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=")
            .unwrap_err();
        assert!(err.is::<AuthenticationError>());
    }

    #[test]
    fn foreign_nonce_is_refused() {
        let mut scram = ScramClient::with_nonce("user", "pencil", CLIENT_NONCE);
        let err = scram
            .handle_server_first("r=somethingelse,s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096")
            .unwrap_err();
        assert!(err.is::<AuthenticationError>());
    }

    #[test]
    fn username_escaping() {
        assert_eq!(escape_username("a=b,c"), "a=3Db=2Cc");
    }
}
