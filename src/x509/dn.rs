// Copyright (c) 2025 - Cowboy AI, LLC.

//! Distinguished-name normalization and comparison
//!
//! Two DN renderings appear in PKD data: RFC 2253 comma-separated
//! (`CN=X,O=Y,C=Z`) and OpenSSL slash-separated (`/C=Z/O=Y/CN=X`). Matching
//! is case-insensitive, whitespace-trimmed, and component-order-independent.

/// Split a DN string into its RDN components, accepting both comma and
/// slash renderings. Escaped characters (`\,`) and quoted values are kept
/// intact in the comma form.
pub fn split_components(dn: &str) -> Vec<String> {
    let mut parts = Vec::new();

    if dn.starts_with('/') {
        for segment in dn.split('/') {
            let trimmed = segment.trim();
            if !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }
        return parts;
    }

    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = dn.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
                current.clear();
            }
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            _ => current.push(c),
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    parts
}

/// Normalize a DN for equality comparison: lowercase, trimmed components,
/// sorted so that rendering order does not matter, joined with `|`.
pub fn normalize(dn: &str) -> String {
    let mut parts: Vec<String> = split_components(dn)
        .into_iter()
        .map(|p| p.to_lowercase())
        .collect();
    parts.sort();
    parts.join("|")
}

/// Case-insensitive, order-independent DN equality
pub fn equals(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Extract the value of an attribute (e.g. `C`, `CN`, `O`) from a DN in
/// either rendering, case-insensitively. Returns the raw (untrimmed-case)
/// value of the first match.
pub fn attribute(dn: &str, attr: &str) -> Option<String> {
    let wanted = attr.to_ascii_lowercase();
    for component in split_components(dn) {
        if let Some((key, value)) = component.split_once('=') {
            if key.trim().to_ascii_lowercase() == wanted {
                let value = value.trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

/// Shortened common-name fragment used in trust-chain path strings.
/// Falls back to a prefix of the whole DN when there is no CN.
pub fn short_cn(dn: &str) -> String {
    match attribute(dn, "CN") {
        Some(cn) => {
            let mut s = format!("CN={cn}");
            s.truncate(30);
            s
        }
        None => {
            let mut s = dn.to_string();
            s.truncate(30);
            s
        }
    }
}

/// ISO 3166 alpha-2 country code for a certificate subject or issuer.
///
/// `ZZ` and `O=United Nations` both normalize to `UN`; a DN with no usable
/// `C=` component yields `XX`.
pub fn country_code(dn: &str) -> String {
    if let Some(org) = attribute(dn, "O") {
        if org.eq_ignore_ascii_case("United Nations") {
            return "UN".to_string();
        }
    }
    match attribute(dn, "C") {
        Some(c) => {
            let code = c.trim().to_ascii_uppercase();
            if code.len() < 2 || code.len() > 3 || !code.chars().all(|ch| ch.is_ascii_alphabetic())
            {
                return "XX".to_string();
            }
            if code == "ZZ" {
                return "UN".to_string();
            }
            code
        }
        None => "XX".to_string(),
    }
}

/// Country code taking the subject first, then the issuer as fallback
pub fn country_code_with_fallback(subject_dn: &str, issuer_dn: &str) -> String {
    let code = country_code(subject_dn);
    if code == "XX" {
        country_code(issuer_dn)
    } else {
        code
    }
}

/// Split a subject DN into the standard RDNs understood by the directory
/// schema (CN, O, OU, C, L, ST) and the non-standard remainder
/// (emailAddress, serialNumber, ...) carried in a description attribute.
pub fn split_standard_attributes(subject_dn: &str) -> (String, String) {
    const STANDARD: [&str; 6] = ["cn", "o", "ou", "c", "l", "st"];

    let mut standard = Vec::new();
    let mut non_standard = Vec::new();

    for component in split_components(subject_dn) {
        match component.split_once('=') {
            Some((key, value)) => {
                let key_lc = key.trim().to_ascii_lowercase();
                if STANDARD.contains(&key_lc.as_str()) {
                    standard.push(format!("{}={}", key.trim().to_ascii_uppercase(), value.trim()));
                } else {
                    non_standard.push(format!("{}={}", key.trim(), value.trim()));
                }
            }
            None => non_standard.push(component),
        }
    }

    let standard_dn = if standard.is_empty() {
        subject_dn.to_string()
    } else {
        standard.join(",")
    };
    (standard_dn, non_standard.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_case_insensitive() {
        assert!(equals("CN=CSCA-KR,O=MOFA,C=KR", "cn=csca-kr, o=mofa, c=kr"));
    }

    #[test]
    fn equality_across_renderings() {
        assert!(equals("/C=KR/O=MOFA/CN=CSCA-KR", "CN=CSCA-KR,O=MOFA,C=KR"));
    }

    #[test]
    fn escaped_comma_stays_in_component() {
        let parts = split_components(r"CN=Acme\, Inc,C=US");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], r"CN=Acme\, Inc");
    }

    #[test]
    fn attribute_extraction() {
        assert_eq!(attribute("CN=X,O=Y,C=DE", "c").as_deref(), Some("DE"));
        assert_eq!(attribute("/C=FR/CN=X", "C").as_deref(), Some("FR"));
        assert_eq!(attribute("CN=X,O=Y", "C"), None);
    }

    #[test]
    fn country_code_rules() {
        assert_eq!(country_code("CN=CSCA,C=KR"), "KR");
        assert_eq!(country_code("CN=CSCA,C=zz"), "UN");
        assert_eq!(country_code("CN=ML Signer,O=United Nations"), "UN");
        assert_eq!(country_code("CN=No Country Here"), "XX");
        assert_eq!(country_code("CN=X,C=12"), "XX");
    }

    #[test]
    fn country_fallback_to_issuer() {
        assert_eq!(country_code_with_fallback("CN=leaf", "CN=root,C=NL"), "NL");
    }

    #[test]
    fn short_cn_truncates() {
        let dn = "CN=A Very Long Common Name That Goes On And On,O=Org";
        let s = short_cn(dn);
        assert!(s.starts_with("CN=A Very Long"));
        assert!(s.len() <= 30);
    }

    #[test]
    fn standard_attribute_split() {
        let (std_dn, rest) =
            split_standard_attributes("CN=DS 7,O=Gov,C=LU,emailAddress=pki@gov.lu,serialNumber=7");
        assert_eq!(std_dn, "CN=DS 7,O=Gov,C=LU");
        assert_eq!(rest, "emailAddress=pki@gov.lu,serialNumber=7");
    }
}
