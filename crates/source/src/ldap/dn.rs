//! Distinguished name parsing and definitive id resolution.

use derive_more::Display;

/// Outcome of cross-checking a directory entry's key attribute against the
/// key encoded in its DN. Only [`Found`](Self::Found) yields content.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum DefinitiveId {
    #[display("found {_0}")]
    Found(String),
    /// The leading RDN does not carry the key attribute.
    #[display("key attribute missing from DN")]
    MissingFromKey,
    /// The entry has no value for the key attribute.
    #[display("key attribute missing from entry")]
    MissingAttribute,
    /// The entry has more than one distinct value for the key attribute.
    #[display("key attribute has multiple values")]
    MultipleValues,
    #[display("DN says {from_dn:?} but attribute says {from_attribute:?}")]
    Mismatch { from_dn: String, from_attribute: String },
}

impl DefinitiveId {
    pub fn resolve(dn: &str, key_attribute: &str, attribute_values: &[String]) -> Self {
        let mut distinct: Vec<&String> = attribute_values.iter().collect();
        distinct.sort();
        distinct.dedup();
        let from_attribute = match distinct.as_slice() {
            [] => return Self::MissingAttribute,
            [value] => *value,
            _ => return Self::MultipleValues,
        };
        let Some(from_dn) = dn_value(dn, key_attribute) else {
            return Self::MissingFromKey;
        };
        if from_dn.eq_ignore_ascii_case(from_attribute) {
            Self::Found(from_attribute.clone())
        } else {
            Self::Mismatch {
                from_dn,
                from_attribute: from_attribute.clone(),
            }
        }
    }
}

/// Value of `attribute` in the DN's leading (possibly multi-valued) RDN.
pub fn dn_value(dn: &str, attribute: &str) -> Option<String> {
    leading_rdn(dn)?
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
        .map(|(_, value)| value)
}

/// Attribute/value pairs of the leading RDN, with RFC 4514 escapes decoded
/// (`\,` style and `\2C` hex pairs). `None` if the DN is malformed.
pub fn leading_rdn(dn: &str) -> Option<Vec<(String, String)>> {
    let bytes = dn.as_bytes();
    let mut pairs = Vec::new();
    let mut i = 0;
    loop {
        let start = i;
        while i < bytes.len() && bytes[i] != b'=' {
            if matches!(bytes[i], b',' | b'+' | b';') {
                return None;
            }
            i += 1;
        }
        let name = dn.get(start..i)?.trim();
        if i >= bytes.len() || name.is_empty() {
            return None;
        }
        i += 1;

        let mut value = Vec::new();
        let mut last_rdn_pair = true;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => {
                    let next = *bytes.get(i + 1)?;
                    let hex = bytes.get(i + 2).and_then(|low| Some((hex_digit(next)? << 4) | hex_digit(*low)?));
                    if let Some(byte) = hex {
                        value.push(byte);
                        i += 3;
                    } else {
                        value.push(next);
                        i += 2;
                    }
                },
                b',' | b';' => break,
                b'+' => {
                    last_rdn_pair = false;
                    i += 1;
                    break;
                },
                byte => {
                    value.push(byte);
                    i += 1;
                },
            }
        }
        let value = String::from_utf8(value).ok()?;
        pairs.push((name.to_string(), value.trim().to_string()));
        if last_rdn_pair {
            return Some(pairs);
        }
    }
}

fn hex_digit(byte: u8) -> Option<u8> {
    (byte as char).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("uid=jdoe,ou=people,dc=example,dc=edu", "uid", Some("jdoe"))]
    #[case("UID=jdoe,ou=people", "uid", Some("jdoe"))]
    #[case("cn=Doe\\, John+uid=jdoe,ou=people", "uid", Some("jdoe"))]
    #[case("cn=Doe\\, John+uid=jdoe,ou=people", "cn", Some("Doe, John"))]
    #[case("cn=Jos\\C3\\A9,ou=people", "cn", Some("José"))]
    #[case(" uid = jdoe ,ou=people", "uid", Some("jdoe"))]
    #[case("cn=jdoe,ou=people", "uid", None)]
    #[case("ou=people,uid=jdoe", "uid", None)]
    #[case("not a dn", "uid", None)]
    #[case("", "uid", None)]
    fn test_dn_value(#[case] dn: &str, #[case] attribute: &str, #[case] expected: Option<&str>) {
        assert_eq!(dn_value(dn, attribute).as_deref(), expected);
    }

    fn values(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[rstest]
    #[case("uid=jdoe,ou=people", &["jdoe"], DefinitiveId::Found("jdoe".to_string()))]
    #[case("uid=JDoe,ou=people", &["jdoe", "jdoe"], DefinitiveId::Found("jdoe".to_string()))]
    #[case("cn=John Doe,ou=people", &["jdoe"], DefinitiveId::MissingFromKey)]
    #[case("uid=jdoe,ou=people", &[], DefinitiveId::MissingAttribute)]
    #[case("uid=jdoe,ou=people", &["jdoe", "john"], DefinitiveId::MultipleValues)]
    #[case(
        "uid=jdoe,ou=people",
        &["john"],
        DefinitiveId::Mismatch { from_dn: "jdoe".to_string(), from_attribute: "john".to_string() }
    )]
    fn test_resolve(#[case] dn: &str, #[case] attribute: &[&str], #[case] expected: DefinitiveId) {
        assert_eq!(DefinitiveId::resolve(dn, "uid", &values(attribute)), expected);
    }
}
