#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    #[error("invalid cookie: missing {0}")]
    MissingField(&'static str),
}

const SESSION_FIELD: &str = "p-b";
const SESSION_LAT_FIELD: &str = "p-lat";

/// The session fields decomposed from a raw stored cookie blob.
///
/// A blob that cannot be decomposed is a fatal credential error; there is
/// nothing to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub session_token: String,
    pub session_lat: String,
}

impl SessionCredential {
    pub fn parse(blob: &str) -> Result<Self, CredentialError> {
        let blob = blob.trim().trim_end_matches(';');
        let session_token = cookie_value(blob, SESSION_FIELD)
            .ok_or(CredentialError::MissingField(SESSION_FIELD))?;
        let session_lat = cookie_value(blob, SESSION_LAT_FIELD)
            .ok_or(CredentialError::MissingField(SESSION_LAT_FIELD))?;
        Ok(Self {
            session_token,
            session_lat,
        })
    }
}

fn cookie_value(blob: &str, name: &str) -> Option<String> {
    for pair in blob.split(';') {
        let pair = pair.trim();
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if key.trim() == name && !value.is_empty() {
            return Some(value.trim().to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_session_fields() {
        let cred = SessionCredential::parse("p-b=abc123; p-lat=def456;").unwrap();
        assert_eq!(cred.session_token, "abc123");
        assert_eq!(cred.session_lat, "def456");
    }

    #[test]
    fn tolerates_extra_fields_and_trailing_semicolon() {
        let cred = SessionCredential::parse("other=1;p-b=x;p-lat=y;").unwrap();
        assert_eq!(cred.session_token, "x");
        assert_eq!(cred.session_lat, "y");
    }

    #[test]
    fn missing_field_is_fatal() {
        let err = SessionCredential::parse("p-b=only").unwrap_err();
        assert!(matches!(err, CredentialError::MissingField("p-lat")));
    }

    #[test]
    fn empty_value_counts_as_missing() {
        assert!(SessionCredential::parse("p-b=;p-lat=y").is_err());
    }
}
