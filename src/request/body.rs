//! Request bodies and the form builders.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part};
use url::form_urlencoded;

use super::HttpRequest;
use crate::error::{Error, Result};
use crate::method::Method;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Body of a request. Setting one replaces whatever was set before.
#[derive(Debug)]
pub(crate) enum RequestBody {
    Raw {
        bytes: Bytes,
        content_type: Option<String>,
    },
    /// Already-encoded `name=value` pairs.
    Form(Vec<(String, String)>),
    Multipart(Vec<(String, PartSource)>),
}

#[derive(Debug)]
pub(crate) enum PartSource {
    Text(String),
    Bytes {
        data: Bytes,
        file_name: Option<String>,
        content_type: Option<String>,
    },
    File {
        path: PathBuf,
        content_type: Option<String>,
    },
}

/// What the request builder gets once a body is finalized.
pub(crate) enum Finalized {
    None,
    Bytes(Bytes),
    Multipart(Form),
}

impl Finalized {
    /// Methods that require a body get an explicit empty one.
    pub(crate) fn absent(method: Method) -> Self {
        if method.requires_body() {
            Finalized::Bytes(Bytes::new())
        } else {
            Finalized::None
        }
    }
}

impl RequestBody {
    /// Produces the body. A content type is added to `headers` unless one is already set.
    ///
    /// File parts are read here.
    pub(crate) fn finalize(self, headers: &mut HeaderMap) -> Result<Finalized> {
        match self {
            RequestBody::Raw {
                bytes,
                content_type,
            } => {
                if let Some(content_type) = content_type {
                    set_content_type(headers, &content_type)?;
                }
                Ok(Finalized::Bytes(bytes))
            }
            RequestBody::Form(pairs) => {
                set_content_type(headers, FORM_CONTENT_TYPE)?;
                let encoded = pairs
                    .iter()
                    .map(|(name, value)| format!("{}={}", name, value))
                    .collect::<Vec<_>>()
                    .join("&");
                Ok(Finalized::Bytes(Bytes::from(encoded)))
            }
            RequestBody::Multipart(parts) => {
                // reqwest writes the boundary into the content type.
                if headers.contains_key(CONTENT_TYPE) {
                    log::warn!("request: content-type header replaced by multipart boundary");
                    headers.remove(CONTENT_TYPE);
                }
                let mut form = Form::new();
                for (name, source) in parts {
                    form = form.part(name, source.into_part()?);
                }
                Ok(Finalized::Multipart(form))
            }
        }
    }
}

impl PartSource {
    fn into_part(self) -> Result<Part> {
        match self {
            PartSource::Text(text) => Ok(Part::text(text)),
            PartSource::Bytes {
                data,
                file_name,
                content_type,
            } => {
                let mut part = Part::stream(data);
                if let Some(file_name) = file_name {
                    part = part.file_name(file_name);
                }
                with_mime(part, content_type)
            }
            PartSource::File { path, content_type } => {
                let data = std::fs::read(&path)
                    .map_err(|e| Error::Body(format!("cannot read {}: {}", path.display(), e)))?;
                let mut part = Part::bytes(data);
                if let Some(file_name) = path.file_name() {
                    part = part.file_name(file_name.to_string_lossy().into_owned());
                }
                with_mime(part, content_type)
            }
        }
    }
}

fn with_mime(part: Part, content_type: Option<String>) -> Result<Part> {
    match content_type {
        Some(content_type) => part
            .mime_str(&content_type)
            .map_err(|e| Error::Body(format!("invalid part content type {:?}: {}", content_type, e))),
        None => Ok(part),
    }
}

fn set_content_type(headers: &mut HeaderMap, content_type: &str) -> Result<()> {
    if headers.contains_key(CONTENT_TYPE) {
        return Ok(());
    }
    let value = HeaderValue::from_str(content_type).map_err(|e| Error::InvalidHeader {
        name: CONTENT_TYPE.to_string(),
        reason: e.to_string(),
    })?;
    headers.insert(CONTENT_TYPE, value);
    Ok(())
}

fn encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Collects `application/x-www-form-urlencoded` fields, then hands the request back.
#[derive(Debug)]
pub struct FormBuilder {
    request: HttpRequest,
    pairs: Vec<(String, String)>,
}

impl FormBuilder {
    pub(crate) fn new(request: HttpRequest) -> Self {
        Self {
            request,
            pairs: Vec::new(),
        }
    }

    /// Adds a field, encoding name and value.
    pub fn add(mut self, name: &str, value: impl Display) -> Self {
        self.pairs.push((encode(name), encode(&value.to_string())));
        self
    }

    /// Adds a field whose name and value are already encoded.
    pub fn add_encoded(mut self, name: &str, value: &str) -> Self {
        self.pairs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn add_map<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Display,
    {
        for (name, value) in fields {
            self = self.add(name.as_ref(), value);
        }
        self
    }

    /// Sets the form as the request body, replacing any previous body.
    pub fn build(self) -> HttpRequest {
        self.request.set_body(RequestBody::Form(self.pairs))
    }
}

/// Collects `multipart/form-data` parts, then hands the request back.
///
/// The encoded form is buffered in memory before a retry or an authentication replay.
#[derive(Debug)]
pub struct MultipartFormBuilder {
    request: HttpRequest,
    parts: Vec<(String, PartSource)>,
}

impl MultipartFormBuilder {
    pub(crate) fn new(request: HttpRequest) -> Self {
        Self {
            request,
            parts: Vec::new(),
        }
    }

    pub fn add(mut self, name: &str, value: impl Display) -> Self {
        self.parts
            .push((name.to_string(), PartSource::Text(value.to_string())));
        self
    }

    pub fn add_bytes(
        mut self,
        name: &str,
        data: impl Into<Bytes>,
        file_name: Option<&str>,
        content_type: Option<&str>,
    ) -> Self {
        self.parts.push((
            name.to_string(),
            PartSource::Bytes {
                data: data.into(),
                file_name: file_name.map(str::to_string),
                content_type: content_type.map(str::to_string),
            },
        ));
        self
    }

    /// Adds a file part. The file is read when the request executes.
    pub fn add_file(
        mut self,
        name: &str,
        path: impl AsRef<Path>,
        content_type: Option<&str>,
    ) -> Self {
        self.parts.push((
            name.to_string(),
            PartSource::File {
                path: path.as_ref().to_path_buf(),
                content_type: content_type.map(str::to_string),
            },
        ));
        self
    }

    pub fn build(self) -> HttpRequest {
        self.request.set_body(RequestBody::Multipart(self.parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn bytes_of(finalized: Finalized) -> Bytes {
        match finalized {
            Finalized::Bytes(bytes) => bytes,
            _ => panic!("expected a byte body"),
        }
    }

    #[test]
    fn test_form_body_is_encoded() {
        let body = RequestBody::Form(vec![
            (encode("q"), encode("a b&c")),
            ("raw".into(), "x%20y".into()),
        ]);
        let mut headers = HeaderMap::new();
        let bytes = bytes_of(body.finalize(&mut headers).unwrap());

        assert_eq!(bytes, "q=a+b%26c&raw=x%20y");
        assert_eq!(headers[CONTENT_TYPE], FORM_CONTENT_TYPE);
    }

    #[test]
    fn test_explicit_content_type_wins() {
        let body = RequestBody::Raw {
            bytes: Bytes::from_static(b"{}"),
            content_type: Some("application/json".into()),
        };
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/vnd.api+json"));
        body.finalize(&mut headers).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/vnd.api+json");
    }

    #[test]
    fn test_absent_body_for_body_methods() {
        assert!(matches!(Finalized::absent(Method::Get), Finalized::None));
        assert!(matches!(Finalized::absent(Method::Delete), Finalized::None));
        for method in [Method::Post, Method::Put, Method::Patch] {
            assert!(bytes_of(Finalized::absent(method)).is_empty());
        }
    }

    #[test]
    fn test_file_part_is_read_at_finalize() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();

        let body = RequestBody::Multipart(vec![(
            "upload".into(),
            PartSource::File {
                path: file.path().to_path_buf(),
                content_type: Some("text/plain".into()),
            },
        )]);
        let finalized = body.finalize(&mut HeaderMap::new()).unwrap();
        assert!(matches!(finalized, Finalized::Multipart(_)));
    }

    #[test]
    fn test_missing_file_is_a_body_error() {
        let dir = tempfile::tempdir().unwrap();
        let body = RequestBody::Multipart(vec![(
            "upload".into(),
            PartSource::File {
                path: dir.path().join("missing.bin"),
                content_type: None,
            },
        )]);
        let err = body.finalize(&mut HeaderMap::new()).err().unwrap();
        assert!(matches!(err, Error::Body(msg) if msg.contains("missing.bin")));
    }

    #[test]
    fn test_bad_part_mime_is_a_body_error() {
        let body = RequestBody::Multipart(vec![(
            "blob".into(),
            PartSource::Bytes {
                data: Bytes::from_static(b"x"),
                file_name: None,
                content_type: Some("not a mime".into()),
            },
        )]);
        assert!(matches!(
            body.finalize(&mut HeaderMap::new()),
            Err(Error::Body(_))
        ));
    }
}
