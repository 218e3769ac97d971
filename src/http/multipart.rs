//! `multipart/form-data` bodies for file uploads.

use bytes::{BufMut, Bytes, BytesMut};

/// One file part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub field_name: String,
    pub file_name: String,
    /// Defaults to `application/octet-stream` when absent.
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadFile {
    pub fn new(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            content_type: None,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Plain form fields plus file parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipart {
    pub fields: Vec<(String, String)>,
    pub files: Vec<UploadFile>,
}

impl Multipart {
    /// Encodes the form with a freshly generated boundary.
    ///
    /// Returns the body and the matching `Content-Type` header value.
    pub fn encode(&self) -> (Bytes, String) {
        let boundary = generate_boundary();
        let body = self.encode_with_boundary(&boundary);
        (body, format!("multipart/form-data; boundary={boundary}"))
    }

    pub(crate) fn encode_with_boundary(&self, boundary: &str) -> Bytes {
        let estimated = self.files.iter().map(|f| f.data.len() + 256).sum::<usize>()
            + self.fields.len() * 128;
        let mut buf = BytesMut::with_capacity(estimated);

        for (name, value) in &self.fields {
            buf.put(format!("--{boundary}\r\n").as_bytes());
            buf.put(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                    escape_quotes(name)
                )
                .as_bytes(),
            );
            buf.put(value.as_bytes());
            buf.put(&b"\r\n"[..]);
        }

        for file in &self.files {
            buf.put(format!("--{boundary}\r\n").as_bytes());
            buf.put(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    escape_quotes(&file.field_name),
                    escape_quotes(&file.file_name)
                )
                .as_bytes(),
            );
            let content_type = file
                .content_type
                .as_deref()
                .unwrap_or("application/octet-stream");
            buf.put(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
            buf.put(file.data.as_ref());
            buf.put(&b"\r\n"[..]);
        }

        buf.put(format!("--{boundary}--\r\n").as_bytes());
        buf.freeze()
    }
}

fn generate_boundary() -> String {
    let suffix: String = std::iter::repeat_with(fastrand::alphanumeric)
        .take(30)
        .collect();
    format!("outpost-{suffix}")
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
