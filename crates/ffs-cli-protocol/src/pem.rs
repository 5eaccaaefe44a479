//! PEM block delimiters printed by `dha_get_field`.

/// The kinds of PEM block the firmware prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PemKind {
    /// A PKCS#10 certificate signing request.
    CertificateRequest,
    /// An X.509 certificate (first certificate of the chain).
    Certificate,
}

impl PemKind {
    /// The BEGIN marker line (without terminator).
    pub fn begin_marker(&self) -> &'static str {
        match self {
            PemKind::CertificateRequest => "-----BEGIN CERTIFICATE REQUEST-----",
            PemKind::Certificate => "-----BEGIN CERTIFICATE-----",
        }
    }

    /// The END marker line (without terminator).
    pub fn end_marker(&self) -> &'static str {
        match self {
            PemKind::CertificateRequest => "-----END CERTIFICATE REQUEST-----",
            PemKind::Certificate => "-----END CERTIFICATE-----",
        }
    }

    /// Whether `line` opens a block of this kind. Leading whitespace is ignored.
    pub fn is_begin(&self, line: &str) -> bool {
        line.trim_start().starts_with(self.begin_marker())
    }

    /// Whether `line` closes a block of this kind. Leading whitespace is ignored.
    pub fn is_end(&self, line: &str) -> bool {
        line.trim_start().starts_with(self.end_marker())
    }

    /// Short name used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            PemKind::CertificateRequest => "csr",
            PemKind::Certificate => "certificate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csr_markers() {
        let kind = PemKind::CertificateRequest;
        assert!(kind.is_begin("-----BEGIN CERTIFICATE REQUEST-----\r\n"));
        assert!(kind.is_end("  -----END CERTIFICATE REQUEST-----\n"));
        assert!(!kind.is_begin("-----BEGIN CERTIFICATE-----\n"));
    }

    #[test]
    fn test_certificate_begin_does_not_match_request() {
        // "-----BEGIN CERTIFICATE" is a prefix of both markers.
        let kind = PemKind::Certificate;
        assert!(!kind.is_begin("-----BEGIN CERTIFICATE REQUEST-----\n"));
        assert!(kind.is_begin("-----BEGIN CERTIFICATE-----\n"));
    }

    #[test]
    fn test_marker_must_start_line() {
        let kind = PemKind::Certificate;
        assert!(!kind.is_end("see -----END CERTIFICATE-----\n"));
    }
}
