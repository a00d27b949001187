//! Scan payload decoding.
//!
//! A scanner sends whatever its QR code held: either a bare attendee id or
//! a contact card with `EMAIL:` / `FN:` lines, possibly base64-encoded.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// What a raw scan payload identifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanPayload {
    /// A bare identifier, trimmed but not yet normalized.
    AttendeeId(String),
    /// Contact-card fields; at least one is present.
    ContactCard {
        email: Option<String>,
        full_name: Option<String>,
    },
}

impl ScanPayload {
    /// Decode a raw payload. Returns `None` for a blank payload.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Some(card) = decode_base64(raw)
            .as_deref()
            .and_then(parse_card)
            .or_else(|| parse_card(raw))
        {
            return Some(card);
        }
        Some(Self::AttendeeId(raw.to_string()))
    }
}

/// Encoders commonly wrap base64 at 76 columns, so whitespace is dropped
/// before decoding.
fn decode_base64(raw: &str) -> Option<String> {
    let compact: String = raw.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact).ok()?;
    String::from_utf8(bytes).ok()
}

/// Pull `EMAIL` and `FN` out of card text. Property parameters
/// (`EMAIL;TYPE=work:...`) are ignored.
fn parse_card(text: &str) -> Option<ScanPayload> {
    let mut email = None;
    let mut full_name = None;

    for line in text.lines() {
        let Some((property, value)) = line.trim().split_once(':') else {
            continue;
        };
        let name = property.split(';').next().unwrap_or_default();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if name.eq_ignore_ascii_case("EMAIL") {
            email.get_or_insert_with(|| value.to_string());
        } else if name.eq_ignore_ascii_case("FN") {
            full_name.get_or_insert_with(|| value.to_string());
        }
    }

    if email.is_none() && full_name.is_none() {
        return None;
    }
    Some(ScanPayload::ContactCard { email, full_name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const CARD: &str = "BEGIN:VCARD\nVERSION:3.0\nFN:Ana Gómez\nEMAIL:ana@example.org\nEND:VCARD";

    #[test]
    fn bare_ids_are_trimmed() {
        assert_eq!(
            ScanPayload::parse("  0001 \n"),
            Some(ScanPayload::AttendeeId("0001".to_string()))
        );
        assert_eq!(ScanPayload::parse("   "), None);
    }

    #[test]
    fn plain_contact_card() {
        assert_eq!(
            ScanPayload::parse(CARD),
            Some(ScanPayload::ContactCard {
                email: Some("ana@example.org".to_string()),
                full_name: Some("Ana Gómez".to_string()),
            })
        );
    }

    #[test]
    fn base64_contact_card() {
        let encoded = STANDARD.encode(CARD);
        assert_eq!(ScanPayload::parse(&encoded), ScanPayload::parse(CARD));
    }

    #[test]
    fn wrapped_base64_contact_card() {
        let encoded = STANDARD.encode(CARD);
        let wrapped = encoded
            .as_bytes()
            .chunks(76)
            .map(|chunk| std::str::from_utf8(chunk).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n");
        assert!(wrapped.contains('\n'));
        assert_eq!(ScanPayload::parse(&wrapped), ScanPayload::parse(CARD));
    }

    #[test]
    fn base64_looking_id_stays_an_id() {
        // "ABCD" decodes, but not to a card.
        assert_eq!(
            ScanPayload::parse("ABCD"),
            Some(ScanPayload::AttendeeId("ABCD".to_string()))
        );
    }

    #[test]
    fn card_with_only_name_and_parameters() {
        let card = "FN:Luis Pérez\r\nEMAIL;TYPE=work:\r\nTEL:555";
        assert_eq!(
            ScanPayload::parse(card),
            Some(ScanPayload::ContactCard {
                email: None,
                full_name: Some("Luis Pérez".to_string()),
            })
        );

        let card = "email;type=INTERNET: luis@example.org ";
        assert_eq!(
            ScanPayload::parse(card),
            Some(ScanPayload::ContactCard {
                email: Some("luis@example.org".to_string()),
                full_name: None,
            })
        );
    }
}
