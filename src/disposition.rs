use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// `attr-char` from RFC 5987: everything else is percent-encoded.
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Formats the `Content-Disposition` header value for a download.
pub trait DispositionEncoder: Send + Sync {
    fn encode(&self, filename: &str) -> String;
}

/// RFC 6266 disposition with an RFC 2231 encoded `filename*` parameter and a
/// plain ASCII `filename` fallback for older clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rfc2231Disposition {
    inline: bool,
}

impl Rfc2231Disposition {
    pub fn attachment() -> Self {
        Rfc2231Disposition { inline: false }
    }

    pub fn inline() -> Self {
        Rfc2231Disposition { inline: true }
    }
}

impl DispositionEncoder for Rfc2231Disposition {
    fn encode(&self, filename: &str) -> String {
        let kind = if self.inline { "inline" } else { "attachment" };
        let fallback: String = filename
            .chars()
            .map(|c| match c {
                ' '..='~' if c != '"' && c != '\\' => c,
                _ => '_',
            })
            .collect();
        let encoded = utf8_percent_encode(filename, ATTR_CHAR);
        format!("{kind}; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
    }
}
