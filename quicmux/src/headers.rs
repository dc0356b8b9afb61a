//! Ordered header lists with HTTP/3 message validation (RFC 9114 Section 4.3).

use bytes::Bytes;

use crate::qpack::HeaderField;

/// Connection-specific fields that are malformed in HTTP/3 (RFC 9114 Section 4.2).
const CONNECTION_SPECIFIC: [&[u8]; 5] = [
    b"connection",
    b"keep-alive",
    b"proxy-connection",
    b"transfer-encoding",
    b"upgrade",
];

const REQUEST_PSEUDO: [&[u8]; 5] = [b":method", b":scheme", b":authority", b":path", b":protocol"];

/// An ordered list of header fields. Names are kept as received or inserted;
/// lookups are by exact (lowercase) name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    fields: Vec<HeaderField>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field; repeated names are kept in order.
    pub fn append(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.fields.push(HeaderField::new(name, value));
    }

    /// Replace every field named `name` with a single value.
    pub fn insert(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>) {
        let field = HeaderField::new(name, value);
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.fields
            .iter()
            .find(|f| f.name == name.as_bytes())
            .map(|f| &f.value)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Bytes> + 'a {
        self.fields
            .iter()
            .filter(move |f| f.name == name.as_bytes())
            .map(|f| &f.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Parsed `:status`, if present and numeric.
    pub fn status(&self) -> Option<u16> {
        self.get_str(":status")?.parse().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeaderField> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Sum of RFC 9114 field sizes.
    pub fn field_section_size(&self) -> usize {
        self.fields.iter().map(HeaderField::size).sum()
    }

    pub fn into_fields(self) -> Vec<HeaderField> {
        self.fields
    }

    /// Build from a decoded field list, enforcing the rules shared by every
    /// message: lowercase names, pseudo-headers first, no connection-specific
    /// fields, `te` only as "trailers".
    pub(crate) fn from_decoded(fields: Vec<HeaderField>) -> Result<Self, &'static str> {
        let mut regular_seen = false;
        for field in &fields {
            if field.name.is_empty() {
                return Err("empty field name");
            }
            if field
                .name
                .iter()
                .any(|b| b.is_ascii_uppercase() || b.is_ascii_whitespace() || b.is_ascii_control())
            {
                return Err("field name is not lowercase token");
            }
            if field.value.iter().any(|&b| b == b'\r' || b == b'\n' || b == 0) {
                return Err("field value contains CR, LF or NUL");
            }
            if field.name.starts_with(b":") {
                if regular_seen {
                    return Err("pseudo-header after regular field");
                }
            } else {
                regular_seen = true;
                if is_connection_specific(&field.name) {
                    return Err("connection-specific field");
                }
                if &field.name[..] == b"te" && &field.value[..] != b"trailers" {
                    return Err("te other than trailers");
                }
            }
        }
        Ok(Self { fields })
    }

    /// Check a response head: exactly one valid `:status` and no other
    /// pseudo-headers. Returns the status code.
    pub(crate) fn response_status(&self) -> Result<u16, &'static str> {
        let mut status = None;
        for field in &self.fields {
            match &field.name[..] {
                b":status" => {
                    if status.is_some() {
                        return Err("duplicate :status");
                    }
                    status = Some(parse_status(&field.value)?);
                }
                name if name.starts_with(b":") => return Err("request pseudo-header in response"),
                _ => {}
            }
        }
        status.ok_or("missing :status")
    }

    pub(crate) fn check_trailers(&self) -> Result<(), &'static str> {
        if self.fields.iter().any(|f| f.name.starts_with(b":")) {
            return Err("pseudo-header in trailers");
        }
        Ok(())
    }

    /// Validate and normalize a request head for the wire: `:method` is
    /// required; `:authority` and `:path` are required except for CONNECT;
    /// `:scheme` defaults to `https`. Pseudo-headers are emitted first.
    pub(crate) fn into_request_fields(self) -> Result<Vec<HeaderField>, &'static str> {
        let mut pseudo: [Option<Bytes>; 5] = Default::default();
        let mut regular = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            if field.name.iter().any(u8::is_ascii_uppercase) {
                return Err("uppercase field name");
            }
            if field.name.starts_with(b":") {
                let slot = REQUEST_PSEUDO
                    .iter()
                    .position(|p| *p == &field.name[..])
                    .ok_or("unknown request pseudo-header")?;
                if pseudo[slot].replace(field.value).is_some() {
                    return Err("duplicate request pseudo-header");
                }
            } else if is_connection_specific(&field.name) {
                return Err("connection-specific field");
            } else {
                regular.push(field);
            }
        }

        let [method, scheme, authority, path, protocol] = pseudo;
        let method = method.ok_or("missing :method")?;
        let connect = &method[..] == b"CONNECT" && protocol.is_none();

        let mut out = Vec::with_capacity(regular.len() + 5);
        if connect {
            // RFC 9114 Section 4.4: only :method and :authority.
            let authority = authority.ok_or("missing :authority")?;
            if scheme.is_some() || path.is_some() {
                return Err(":scheme or :path in CONNECT request");
            }
            out.push(HeaderField::new(":method", method));
            out.push(HeaderField::new(":authority", authority));
        } else {
            let authority = authority.ok_or("missing :authority")?;
            let path = path.ok_or("missing :path")?;
            let scheme = scheme.unwrap_or_else(|| Bytes::from_static(b"https"));
            out.push(HeaderField::new(":method", method));
            out.push(HeaderField::new(":scheme", scheme));
            out.push(HeaderField::new(":authority", authority));
            out.push(HeaderField::new(":path", path));
            if let Some(protocol) = protocol {
                out.push(HeaderField::new(":protocol", protocol));
            }
        }
        out.extend(regular);
        Ok(out)
    }
}

fn is_connection_specific(name: &[u8]) -> bool {
    CONNECTION_SPECIFIC.iter().any(|n| *n == name)
}

fn parse_status(value: &[u8]) -> Result<u16, &'static str> {
    if value.len() != 3 || !value.iter().all(u8::is_ascii_digit) {
        return Err("malformed :status");
    }
    let status = value
        .iter()
        .fold(0u16, |acc, &d| acc * 10 + u16::from(d - b'0'));
    if !(100..=599).contains(&status) {
        return Err("malformed :status");
    }
    Ok(status)
}

impl<K, V> FromIterator<(K, V)> for HeaderMap
where
    K: Into<Bytes>,
    V: Into<Bytes>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| HeaderField::new(k, v))
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a HeaderMap {
    type Item = &'a HeaderField;
    type IntoIter = std::slice::Iter<'a, HeaderField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
