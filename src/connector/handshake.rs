//! Data channel handshake payloads.
//!
//! ```text
//! TCP: [0..37]  raw session cookie, decoded from 74 hex characters
//! UDP: [0..8]   connect marker 0x36373839, u64 BE
//! ```

use super::ConnectError;

/// Raw cookie length in bytes.
pub const COOKIE_SIZE: usize = 37;

/// Hex-encoded cookie length in characters.
pub const COOKIE_HEX_LEN: usize = COOKIE_SIZE * 2;

/// Value announcing a new UDP stream to the target.
pub const UDP_CONNECT_MARKER: u64 = 0x3637_3839;

/// Decode the session cookie from its hex form.
///
/// Only the first [`COOKIE_HEX_LEN`] characters are used; anything after
/// them is ignored.
pub fn decode_cookie(hex_cookie: &str) -> Result<[u8; COOKIE_SIZE], ConnectError> {
    let digits = hex_cookie
        .as_bytes()
        .get(..COOKIE_HEX_LEN)
        .ok_or(ConnectError::CookieTooShort {
            len: hex_cookie.len(),
            required: COOKIE_HEX_LEN,
        })?;

    let mut cookie = [0u8; COOKIE_SIZE];
    hex::decode_to_slice(digits, &mut cookie).map_err(ConnectError::CookieInvalid)?;
    Ok(cookie)
}

/// Bytes sent on a fresh UDP connection before any payload.
pub fn udp_connect_marker() -> [u8; 8] {
    UDP_CONNECT_MARKER.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_cookie_pairs() {
        let hex_cookie = "00ff7f".to_string() + &"41".repeat(34);
        let cookie = decode_cookie(&hex_cookie).unwrap();
        assert_eq!(cookie[0], 0x00);
        assert_eq!(cookie[1], 0xff);
        assert_eq!(cookie[2], 0x7f);
        assert!(cookie[3..].iter().all(|&b| b == b'A'));
    }

    #[test]
    fn test_decode_cookie_accepts_upper_case() {
        let cookie = decode_cookie(&"AB".repeat(37)).unwrap();
        assert!(cookie.iter().all(|&b| b == 0xab));
    }

    #[test]
    fn test_decode_cookie_too_short() {
        let err = decode_cookie(&"a".repeat(73)).unwrap_err();
        assert!(matches!(
            err,
            ConnectError::CookieTooShort { len: 73, required: 74 }
        ));
    }

    #[test]
    fn test_decode_cookie_ignores_trailing_characters() {
        let hex_cookie = "12".repeat(37) + "zz";
        let cookie = decode_cookie(&hex_cookie).unwrap();
        assert_eq!(cookie, [0x12; COOKIE_SIZE]);
    }

    #[test]
    fn test_decode_cookie_rejects_non_hex() {
        let hex_cookie = "g0".to_string() + &"00".repeat(36);
        assert!(matches!(
            decode_cookie(&hex_cookie),
            Err(ConnectError::CookieInvalid(_))
        ));
    }

    #[test]
    fn test_udp_marker_is_network_order() {
        assert_eq!(udp_connect_marker(), [0, 0, 0, 0, 0x36, 0x37, 0x38, 0x39]);
    }
}
