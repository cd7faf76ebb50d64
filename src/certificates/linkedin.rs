//! Certificate ids and LinkedIn "add certification" links.

const ADD_CERTIFICATION_URL: &str =
    "https://www.linkedin.com/profile/add?startTask=CERTIFICATION_NAME&name=";

/// Format a ledger id as `XXX-XXXXX-XX`, zero-padded to ten digits.
pub fn format_certificate_id(id: i64) -> String {
    let digits = format!("{:010}", id.max(0));
    format!("{}-{}-{}", &digits[..3], &digits[3..8], &digits[8..])
}

/// What LinkedIn needs to prefill a certification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certification<'a> {
    pub course_name: &'a str,
    pub organization_id: &'a str,
    pub issue_year: i32,
    pub issue_month: u32,
    pub certificate_url: &'a str,
    pub certificate_id: &'a str,
}

/// LinkedIn profile link that opens the "add certification" form prefilled.
pub fn add_certification_url(cert: &Certification<'_>) -> String {
    let name = format!("Certificate of Completion: {}", cert.course_name);
    format!(
        "{ADD_CERTIFICATION_URL}{}&organizationId={}&issueYear={}&issueMonth={}&certUrl={}&certId={}",
        urlencoding::encode(&name),
        urlencoding::encode(cert.organization_id),
        cert.issue_year,
        cert.issue_month,
        urlencoding::encode(cert.certificate_url),
        urlencoding::encode(cert.certificate_id),
    )
}
