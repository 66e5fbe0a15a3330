use sg_types::KeyError;

/// Format version stored in bits 2.. of the header byte.
pub const FORMAT_VERSION: u8 = 1;

const ORIGIN_LEN_MASK: u8 = 0b11;
const VERSION_SHIFT: u8 = 2;

/// Header byte followed by the origin's UTF-8 bytes.
///
/// The low two bits hold the origin's byte length; a four-byte origin wraps
/// to `0b00`.
pub fn write_header(origin: char, out: &mut Vec<u8>) {
    let mut buf = [0u8; 4];
    let encoded = origin.encode_utf8(&mut buf);
    let len = encoded.len() as u8;
    out.push((FORMAT_VERSION << VERSION_SHIFT) | (len & ORIGIN_LEN_MASK));
    out.extend_from_slice(encoded.as_bytes());
}

pub fn read_header(input: &mut &[u8]) -> Result<char, KeyError> {
    let header = take(input, 1, "header")?[0];
    if header >> VERSION_SHIFT != FORMAT_VERSION {
        return Err(KeyError::UnsupportedVersion(header));
    }
    let len = match header & ORIGIN_LEN_MASK {
        0 => 4,
        n => usize::from(n),
    };
    let bytes = take(input, len, "origin")?;
    let text = std::str::from_utf8(bytes)
        .map_err(|e| KeyError::InvalidValue { kind: "origin", reason: e.to_string() })?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(KeyError::InvalidValue {
            kind: "origin",
            reason: format!("{len} bytes do not hold exactly one character"),
        }),
    }
}

/// Split `n` bytes off the front of `input`.
pub fn take<'a>(input: &mut &'a [u8], n: usize, kind: &'static str) -> Result<&'a [u8], KeyError> {
    if input.len() < n {
        return Err(KeyError::Truncated { kind });
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

/// A decoded key must consume its input exactly.
pub fn finish(input: &[u8]) -> Result<(), KeyError> {
    if input.is_empty() {
        Ok(())
    } else {
        Err(KeyError::TrailingBytes(input.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_packs_length_and_version() {
        let mut out = Vec::new();
        write_header('A', &mut out);
        assert_eq!(out, [0b101, b'A']);

        out.clear();
        write_header('é', &mut out);
        assert_eq!(out[0], 0b110);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn four_byte_origin_wraps_length_bits() {
        let mut out = Vec::new();
        write_header('🦀', &mut out);
        assert_eq!(out[0] & 0b11, 0);
        let mut input = out.as_slice();
        assert_eq!(read_header(&mut input).unwrap(), '🦀');
        assert!(input.is_empty());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut input: &[u8] = &[0b1001, b'A'];
        assert_eq!(read_header(&mut input), Err(KeyError::UnsupportedVersion(0b1001)));
        let mut input: &[u8] = &[0b001, b'A'];
        assert!(matches!(read_header(&mut input), Err(KeyError::UnsupportedVersion(_))));
    }

    #[test]
    fn trailing_bytes_are_reported() {
        assert_eq!(finish(&[1, 2]), Err(KeyError::TrailingBytes(2)));
        assert!(finish(&[]).is_ok());
    }
}
