use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced while reading a WXR document.
///
/// The two messages are fixed strings shown to users of the importer;
/// everything more precise lives on the underlying XML processor and is
/// only surfaced in debug logging.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum WxrError {
    #[error("This does not appear to be a WXR file, missing/invalid WXR version number")]
    InvalidWxrVersion,

    #[error("There was an error when reading this WXR file")]
    MalformedXml,
}

/// Import-level failures. These are reported per entity; apart from a
/// parse error before the first entity they do not abort the import.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("WXR_parse_error: {0}")]
    WxrParse(#[from] WxrError),

    #[error("upload_dir_error: {0}")]
    UploadDir(String),

    #[error("import_file_error: {0}")]
    ImportFile(String),

    #[error("attachment_processing_error: {0}")]
    AttachmentProcessing(String),

    #[error("invalid_file_type: file URL has no usable file name")]
    InvalidFileType,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wxr_messages_are_the_published_strings() {
        assert_eq!(
            WxrError::InvalidWxrVersion.to_string(),
            "This does not appear to be a WXR file, missing/invalid WXR version number"
        );
        assert_eq!(
            WxrError::MalformedXml.to_string(),
            "There was an error when reading this WXR file"
        );
    }
}
