// Copyright (c) 2025 - Cowboy AI, LLC.

//! Directory DN construction and escaping
//!
//! Attribute values in DNs are escaped per RFC 4514, filter values per
//! RFC 4515. The v2 layout keys every entry on its SHA-256 fingerprint:
//!
//! ```text
//! cn={fingerprint},o={csca|dsc|lc|mlsc|crl|ml},c={CC},{dataContainer},{baseDN}
//! cn={fingerprint},o=dsc,c={CC},{ncDataContainer},{baseDN}
//! ```
//!
//! The legacy layout (`cn={subjectDN}+sn={serial}`) is still produced
//! behind a flag for directories populated before the migration.

use crate::config::LdapConfig;
use crate::types::CertType;

/// Escape one attribute value for use in a DN (RFC 4514)
pub fn escape_dn_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() * 2);
    let chars: Vec<char> = value.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        let needs_escape = matches!(c, ',' | '=' | '+' | '"' | '\\' | '<' | '>' | ';')
            || (i == 0 && (c == ' ' || c == '#'))
            || (i == chars.len() - 1 && c == ' ');
        if needs_escape {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Reverse of [`escape_dn_value`]
pub fn unescape_dn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Escape a value for use inside a search filter (RFC 4515)
pub fn escape_filter_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'*' => escaped.push_str("\\2a"),
            b'(' => escaped.push_str("\\28"),
            b')' => escaped.push_str("\\29"),
            b'\\' => escaped.push_str("\\5c"),
            0 => escaped.push_str("\\00"),
            _ => escaped.push(b as char),
        }
    }
    escaped
}

/// Container RDN for a certificate type (conformant vs nc-data)
pub fn container_for<'a>(config: &'a LdapConfig, cert_type: CertType) -> &'a str {
    if cert_type.is_nc() {
        &config.nc_data_container
    } else {
        &config.data_container
    }
}

/// DN of a country node
pub fn country_dn(config: &LdapConfig, country_code: &str, nc: bool) -> String {
    let container = if nc {
        &config.nc_data_container
    } else {
        &config.data_container
    };
    format!(
        "c={},{},{}",
        escape_dn_value(country_code),
        container,
        config.base_dn
    )
}

/// v2 certificate DN: fingerprint RDN
pub fn certificate_dn_v2(
    config: &LdapConfig,
    cert_type: CertType,
    country_code: &str,
    fingerprint: &str,
) -> String {
    format!(
        "cn={},o={},c={},{},{}",
        escape_dn_value(fingerprint),
        cert_type.ldap_ou(),
        escape_dn_value(country_code),
        container_for(config, cert_type),
        config.base_dn
    )
}

/// Legacy certificate DN: standard subject DN + serial multi-valued RDN
pub fn certificate_dn_legacy(
    config: &LdapConfig,
    cert_type: CertType,
    country_code: &str,
    subject_dn: &str,
    serial_number: &str,
) -> String {
    let (standard_dn, _) = crate::x509::dn::split_standard_attributes(subject_dn);
    format!(
        "cn={}+sn={},o={},c={},{},{}",
        escape_dn_value(&standard_dn),
        escape_dn_value(serial_number),
        cert_type.ldap_ou(),
        escape_dn_value(country_code),
        container_for(config, cert_type),
        config.base_dn
    )
}

/// CRL DN under `o=crl`
pub fn crl_dn(config: &LdapConfig, country_code: &str, fingerprint: &str) -> String {
    format!(
        "cn={},o=crl,c={},{},{}",
        escape_dn_value(fingerprint),
        escape_dn_value(country_code),
        config.data_container,
        config.base_dn
    )
}

/// Master-list DN under `o=ml`
pub fn master_list_dn(config: &LdapConfig, country_code: &str, fingerprint: &str) -> String {
    format!(
        "cn={},o=ml,c={},{},{}",
        escape_dn_value(fingerprint),
        escape_dn_value(country_code),
        config.data_container,
        config.base_dn
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LdapConfig {
        LdapConfig::default()
    }

    #[test]
    fn escapes_special_characters() {
        assert_eq!(escape_dn_value("a,b"), "a\\,b");
        assert_eq!(escape_dn_value("a=b+c"), "a\\=b\\+c");
        assert_eq!(escape_dn_value("#lead"), "\\#lead");
        assert_eq!(escape_dn_value(" lead"), "\\ lead");
        assert_eq!(escape_dn_value("trail "), "trail\\ ");
        assert_eq!(escape_dn_value("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn escape_round_trip_is_identity() {
        for value in ["plain", "a,b=c+d", " front", "back ", "#x", "w\\x", "<>;\""] {
            assert_eq!(unescape_dn_value(&escape_dn_value(value)), value);
        }
    }

    #[test]
    fn filter_escaping() {
        assert_eq!(escape_filter_value("a*b(c)d\\e"), "a\\2ab\\28c\\29d\\5ce");
    }

    #[test]
    fn v2_dn_layout() {
        let dn = certificate_dn_v2(&config(), CertType::Dsc, "KR", "abc123");
        assert_eq!(
            dn,
            "cn=abc123,o=dsc,c=KR,dc=data,dc=pkd,dc=ldap,dc=smartcoreinc,dc=com"
        );
    }

    #[test]
    fn nc_dsc_lands_in_nc_container() {
        let dn = certificate_dn_v2(&config(), CertType::DscNc, "KR", "abc123");
        assert!(dn.contains(",dc=nc-data,"));
        assert!(dn.contains(",o=dsc,"));
    }

    #[test]
    fn link_cert_lands_in_lc_ou() {
        let dn = certificate_dn_v2(&config(), CertType::LinkCert, "LV", "fp");
        assert!(dn.contains(",o=lc,"));
        assert!(dn.contains(",dc=data,"));
    }

    #[test]
    fn legacy_dn_uses_subject_and_serial() {
        let dn = certificate_dn_legacy(
            &config(),
            CertType::Dsc,
            "LU",
            "CN=DS 7,O=Gov,C=LU,emailAddress=x@y",
            "1A2B",
        );
        assert!(dn.starts_with("cn=CN\\=DS 7\\,O\\=Gov\\,C\\=LU+sn=1A2B,"));
        assert!(!dn.contains("emailAddress"));
    }

    #[test]
    fn crl_and_ml_dns() {
        assert!(crl_dn(&config(), "KR", "fp").starts_with("cn=fp,o=crl,c=KR,"));
        assert!(master_list_dn(&config(), "UN", "fp").starts_with("cn=fp,o=ml,c=UN,"));
    }
}
