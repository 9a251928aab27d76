//! Upload validation rules.
//!
//! Applied on every transition to `ready`. The rules are pure functions of
//! the scanner's file report, so re-validating an already-validated report
//! always produces the same outcome.

use crate::scan::FileReport;

/// MIME types treated as archives, whose entries are checked individually.
const ARCHIVE_TYPES: &[&str] = &["application/zip", "application/x-zip-compressed"];

/// Configurable validation limits and allow-lists.
#[derive(Debug, Clone)]
pub struct ValidationRules {
    /// Maximum accepted file size in bytes.
    pub max_file_size: i64,
    /// Accepted MIME types, matched case-insensitively against the detected
    /// type (declared type when detection is absent).
    pub allowed_mime_types: Vec<String>,
    /// Accepted archive-entry extensions, dot-prefixed, matched
    /// case-insensitively.
    pub allowed_archive_extensions: Vec<String>,
}

impl Default for ValidationRules {
    /// 100 MiB cap, the document/image set the service accepts.
    fn default() -> Self {
        Self {
            max_file_size: 100 * 1024 * 1024,
            allowed_mime_types: [
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "application/vnd.ms-excel",
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "image/jpeg",
                "image/png",
                "application/zip",
                "application/x-zip-compressed",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
            allowed_archive_extensions: [
                ".pdf", ".doc", ".docx", ".xls", ".xlsx", ".jpg", ".jpeg", ".png",
            ]
            .iter()
            .map(|s| (*s).to_owned())
            .collect(),
        }
    }
}

/// The MIME type validation judges: detected, falling back to declared.
fn effective_content_type(file: &FileReport) -> Option<&str> {
    file.detected_content_type
        .as_deref()
        .or(file.content_type.as_deref())
}

/// Dot-prefixed, lowercased extension of an archive entry name.
fn entry_extension(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

/// Validate a file report against the rules.
///
/// # Errors
///
/// Returns every violated rule as a human-readable message. Messages are
/// joined into the record's `rejection_reason` by the caller.
pub fn validate(file: &FileReport, rules: &ValidationRules) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let length = file.content_length.unwrap_or(0);
    if length < 1 {
        errors.push("file is empty".to_owned());
    } else if length > rules.max_file_size {
        errors.push(format!(
            "file size {length} exceeds the maximum of {} bytes",
            rules.max_file_size
        ));
    }

    let effective = effective_content_type(file);
    match effective {
        None => errors.push("file has no content type".to_owned()),
        Some(content_type) => {
            if !rules
                .allowed_mime_types
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(content_type))
            {
                errors.push(format!("content type '{content_type}' is not allowed"));
            }
        }
    }

    if effective.is_some_and(|t| ARCHIVE_TYPES.iter().any(|a| a.eq_ignore_ascii_case(t))) {
        for entry in &file.contents {
            let allowed = entry_extension(entry).is_some_and(|ext| {
                rules
                    .allowed_archive_extensions
                    .iter()
                    .any(|a| a.eq_ignore_ascii_case(&ext))
            });
            if !allowed {
                errors.push(format!("archive entry '{entry}' has a disallowed extension"));
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pdf_report(length: i64) -> FileReport {
        FileReport {
            filename: Some("plan.pdf".to_owned()),
            content_type: Some("application/pdf".to_owned()),
            detected_content_type: Some("application/pdf".to_owned()),
            content_length: Some(length),
            ..FileReport::default()
        }
    }

    #[test]
    fn clean_pdf_passes() {
        assert!(validate(&pdf_report(1024), &ValidationRules::default()).is_ok());
    }

    #[test]
    fn empty_file_is_rejected() {
        let errors = validate(&pdf_report(0), &ValidationRules::default()).unwrap_err();
        assert_eq!(errors, vec!["file is empty"]);
    }

    #[test]
    fn oversized_file_is_rejected() {
        let rules = ValidationRules {
            max_file_size: 100,
            ..ValidationRules::default()
        };
        let errors = validate(&pdf_report(101), &rules).unwrap_err();
        assert!(errors[0].contains("exceeds the maximum"));
    }

    #[test]
    fn detected_type_wins_over_declared() {
        let file = FileReport {
            content_type: Some("application/pdf".to_owned()),
            detected_content_type: Some("application/x-dosexec".to_owned()),
            content_length: Some(10),
            ..FileReport::default()
        };
        let errors = validate(&file, &ValidationRules::default()).unwrap_err();
        assert!(errors[0].contains("application/x-dosexec"));
    }

    #[test]
    fn declared_type_is_used_when_detection_absent() {
        let file = FileReport {
            content_type: Some("application/pdf".to_owned()),
            detected_content_type: None,
            content_length: Some(10),
            ..FileReport::default()
        };
        assert!(validate(&file, &ValidationRules::default()).is_ok());
    }

    #[test]
    fn archive_entries_are_checked_case_insensitively() {
        let file = FileReport {
            detected_content_type: Some("application/zip".to_owned()),
            content_length: Some(10),
            contents: vec!["DOC.PDF".to_owned(), "photo.Jpg".to_owned()],
            ..FileReport::default()
        };
        assert!(validate(&file, &ValidationRules::default()).is_ok());
    }

    #[test]
    fn archive_with_disallowed_entry_names_the_entry() {
        let file = FileReport {
            detected_content_type: Some("application/zip".to_owned()),
            content_length: Some(10),
            contents: vec!["doc.pdf".to_owned(), "malware.exe".to_owned()],
            ..FileReport::default()
        };
        let rules = ValidationRules {
            allowed_archive_extensions: vec![".pdf".to_owned(), ".jpg".to_owned()],
            ..ValidationRules::default()
        };
        let errors = validate(&file, &rules).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("malware.exe"));
    }

    #[test]
    fn extensionless_archive_entry_is_rejected() {
        let file = FileReport {
            detected_content_type: Some("application/zip".to_owned()),
            content_length: Some(10),
            contents: vec!["README".to_owned()],
            ..FileReport::default()
        };
        let errors = validate(&file, &ValidationRules::default()).unwrap_err();
        assert!(errors[0].contains("README"));
    }

    #[test]
    fn validation_is_idempotent() {
        let file = FileReport {
            detected_content_type: Some("application/zip".to_owned()),
            content_length: Some(10),
            contents: vec!["malware.exe".to_owned()],
            ..FileReport::default()
        };
        let rules = ValidationRules::default();
        let first = validate(&file, &rules);
        let second = validate(&file, &rules);
        assert_eq!(first, second);
    }
}
