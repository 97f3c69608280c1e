//! Completion marker extraction.
//!
//! The device answers a fetch with an XML document. Only the first element
//! named `total` (compared case-insensitively on its local name) matters: a
//! count greater than zero means the remote operation has finished.
//!
//! # Example
//!
//! ```
//! use ap_session::session::{completion_count, is_complete};
//!
//! let xml = "<scan><total>3</total><ap>HomeNet</ap></scan>";
//! assert_eq!(completion_count(xml).unwrap(), Some(3));
//! assert!(is_complete(xml).unwrap());
//! assert!(!is_complete("<scan><total>0</total></scan>").unwrap());
//! ```

use crate::error::Error;
use quick_xml::events::Event;
use quick_xml::Reader;

const MARKER: &str = "total";

fn is_marker(name: &[u8]) -> bool {
    name.eq_ignore_ascii_case(MARKER.as_bytes())
}

/// Value of the first `total` element.
///
/// Returns `Ok(None)` if the document has no such element, and
/// [`Error::Protocol`] if the document is malformed or the marker is not an
/// integer.
pub fn completion_count(xml: &str) -> Result<Option<i64>, Error> {
    let mut reader = Reader::from_str(xml.trim_start_matches('\u{feff}'));
    reader.config_mut().trim_text(true);

    let mut in_marker = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => in_marker = is_marker(e.local_name().as_ref()),
            Ok(Event::Empty(e)) if is_marker(e.local_name().as_ref()) => return Ok(Some(0)),
            Ok(Event::Text(e)) if in_marker => {
                let text = std::str::from_utf8(&e)
                    .map_err(|err| Error::Protocol(format!("marker is not UTF-8: {}", err)))?;
                return text
                    .trim()
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| Error::Protocol(format!("marker is not a number: {:?}", text)));
            }
            Ok(Event::End(e)) => {
                if in_marker && is_marker(e.local_name().as_ref()) {
                    // <total></total>
                    return Ok(Some(0));
                }
                in_marker = false;
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(Error::Protocol(format!("XML parse error: {}", e))),
            _ => {}
        }
    }
}

/// True if the first `total` element holds a count greater than zero.
pub fn is_complete(xml: &str) -> Result<bool, Error> {
    Ok(completion_count(xml)?.is_some_and(|n| n > 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positive_count_is_complete() {
        assert_eq!(completion_count("<r><total>3</total></r>").unwrap(), Some(3));
        assert!(is_complete("<r><total>3</total></r>").unwrap());
    }

    #[test]
    fn test_zero_count_is_incomplete() {
        assert_eq!(completion_count("<r><total>0</total></r>").unwrap(), Some(0));
        assert!(!is_complete("<r><total>0</total></r>").unwrap());
    }

    #[test]
    fn test_case_insensitive_marker() {
        assert_eq!(
            completion_count("<Scan><TOTAL> 5 </TOTAL></Scan>").unwrap(),
            Some(5)
        );
    }

    #[test]
    fn test_first_marker_wins() {
        let xml = "<r><total>0</total><sub><total>4</total></sub></r>";
        assert_eq!(completion_count(xml).unwrap(), Some(0));
    }

    #[test]
    fn test_missing_marker() {
        assert_eq!(completion_count("<r><ap>HomeNet</ap></r>").unwrap(), None);
        assert!(!is_complete("<r/>").unwrap());
        assert_eq!(completion_count("").unwrap(), None);
    }

    #[test]
    fn test_text_outside_marker_ignored() {
        let xml = "<r><count>9</count><total>2</total></r>";
        assert_eq!(completion_count(xml).unwrap(), Some(2));
    }

    #[test]
    fn test_empty_marker_is_zero() {
        assert_eq!(completion_count("<r><total/></r>").unwrap(), Some(0));
        assert_eq!(completion_count("<r><total></total></r>").unwrap(), Some(0));
    }

    #[test]
    fn test_non_numeric_marker() {
        assert!(matches!(
            completion_count("<r><total>many</total></r>"),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            completion_count("<r><ap>x</r>"),
            Err(Error::Protocol(_))
        ));
    }
}
