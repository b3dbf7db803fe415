use crate::timestamp::format_generalized_time;
use sorsync_config::LdapSorConfig;
use time::OffsetDateTime;

pub const MODIFY_TIMESTAMP: &str = "modifyTimestamp";
pub const CREATE_TIMESTAMP: &str = "createTimestamp";

/// Every person entry carrying the key attribute.
pub fn full(key_attribute: &str) -> String {
    format!("(&(objectClass=person)({key_attribute}=*))")
}

pub fn individual(key_attribute: &str, key: &str) -> String {
    format!("(&(objectClass=person)({key_attribute}={}))", escape(key))
}

/// Entries created or modified at or after `since`.
pub fn last_changed(key_attribute: &str, since: OffsetDateTime) -> Option<String> {
    let since = format_generalized_time(since)?;
    Some(format!(
        "(&(objectClass=person)({key_attribute}=*)(|({MODIFY_TIMESTAMP}>={since})({CREATE_TIMESTAMP}>={since})))"
    ))
}

/// Attributes to request. Operational timestamps are only returned when
/// asked for by name.
pub fn attributes(settings: &LdapSorConfig, with_timestamps: bool) -> Vec<String> {
    let mut attributes = if settings.attributes.is_empty() {
        vec!["*".to_string()]
    } else {
        let mut attributes = settings.attributes.clone();
        if !attributes.iter().any(|a| a.eq_ignore_ascii_case(&settings.key_attribute)) {
            attributes.push(settings.key_attribute.clone());
        }
        attributes
    };
    if with_timestamps {
        for operational in [MODIFY_TIMESTAMP, CREATE_TIMESTAMP] {
            if !attributes.iter().any(|a| a.eq_ignore_ascii_case(operational)) {
                attributes.push(operational.to_string());
            }
        }
    }
    attributes
}

/// Escape a filter assertion value (RFC 4515).
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_filters() {
        assert_eq!(full("uid"), "(&(objectClass=person)(uid=*))");
        assert_eq!(individual("uid", "j*doe)"), "(&(objectClass=person)(uid=j\\2adoe\\29))");
        assert_eq!(
            last_changed("uid", datetime!(2024-05-06 09:08:09 +2)).unwrap(),
            "(&(objectClass=person)(uid=*)(|(modifyTimestamp>=20240506070809Z)(createTimestamp>=20240506070809Z)))"
        );
    }

    #[test]
    fn test_attributes() {
        let mut settings = LdapSorConfig::new("dc=example");
        assert_eq!(attributes(&settings, false), ["*"]);
        assert_eq!(attributes(&settings, true), ["*", "modifyTimestamp", "createTimestamp"]);

        settings.attributes = vec!["cn".to_string(), "modifytimestamp".to_string()];
        assert_eq!(attributes(&settings, true), ["cn", "modifytimestamp", "uid", "createTimestamp"]);
    }
}
