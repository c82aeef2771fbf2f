//! Endpoint URLs.
//!
//! Every request addresses an item by `path` and, for chunk transfers, a byte
//! range given as `offset` and `size`:
//!
//! | Endpoint | Method | Query |
//! |----------|--------|-------|
//! | `api/sync/upload` | POST | `path`, `offset`, `size`, `total`, `base`, `encoding` |
//! | `api/sync/info` | GET | `path` |
//! | `api/sync/download` | GET | `path`, `offset`, `size` |

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{ChunkRange, Encoding};
use url::Url;

const UPLOAD: &str = "api/sync/upload";
const INFO: &str = "api/sync/info";
const DOWNLOAD: &str = "api/sync/download";

/// Builds endpoint URLs below a server base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
}

impl Endpoints {
    /// Parses the server base URL.
    ///
    /// A missing trailing slash is added so endpoints nest below the base
    /// path instead of replacing its last segment.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or cannot carry a path.
    pub fn new(base: &str) -> ProtocolResult<Self> {
        let mut url = Url::parse(base)?;
        if url.cannot_be_a_base() {
            return Err(ProtocolError::NotABase(base.to_string()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        url.set_query(None);
        Ok(Self { base: url })
    }

    /// The normalized base URL.
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// URL for uploading `range` of an item of `total` bytes derived from
    /// server version `base_version`, stored with `encoding`.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be joined to the base.
    pub fn upload(
        &self,
        path: &str,
        range: ChunkRange,
        total: usize,
        base_version: u64,
        encoding: Encoding,
    ) -> ProtocolResult<Url> {
        let mut url = self.base.join(UPLOAD)?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("offset", &range.offset.to_string())
            .append_pair("size", &range.size.to_string())
            .append_pair("total", &total.to_string())
            .append_pair("base", &base_version.to_string())
            .append_pair("encoding", encoding.as_str());
        Ok(url)
    }

    /// URL for the metadata of an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be joined to the base.
    pub fn info(&self, path: &str) -> ProtocolResult<Url> {
        let mut url = self.base.join(INFO)?;
        url.query_pairs_mut().append_pair("path", path);
        Ok(url)
    }

    /// URL for downloading `range` of an item.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be joined to the base.
    pub fn download(&self, path: &str, range: ChunkRange) -> ProtocolResult<Url> {
        let mut url = self.base.join(DOWNLOAD)?;
        url.query_pairs_mut()
            .append_pair("path", path)
            .append_pair("offset", &range.offset.to_string())
            .append_pair("size", &range.size.to_string());
        Ok(url)
    }
}

/// A request decoded from an endpoint URL, as seen by a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointRequest {
    /// Chunk upload.
    Upload {
        /// Item path.
        path: String,
        /// Byte range carried by the body.
        range: ChunkRange,
        /// Full item size.
        total: usize,
        /// Server version the upload is based on.
        base_version: u64,
        /// Encoding of the uploaded bytes; `raw` when absent.
        encoding: Encoding,
    },
    /// Metadata lookup.
    Info {
        /// Item path.
        path: String,
    },
    /// Chunk download.
    Download {
        /// Item path.
        path: String,
        /// Requested byte range.
        range: ChunkRange,
    },
}

impl EndpointRequest {
    /// Decodes an endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidMessage`] for unknown endpoints or
    /// missing and malformed parameters.
    pub fn parse(url: &Url) -> ProtocolResult<Self> {
        let query = Query::new(url);
        let path = url.path();

        if path.ends_with(UPLOAD) {
            Ok(Self::Upload {
                path: query.text("path")?,
                range: query.range()?,
                total: query.number("total")?,
                base_version: query.number("base")?,
                encoding: query.encoding()?,
            })
        } else if path.ends_with(INFO) {
            Ok(Self::Info {
                path: query.text("path")?,
            })
        } else if path.ends_with(DOWNLOAD) {
            Ok(Self::Download {
                path: query.text("path")?,
                range: query.range()?,
            })
        } else {
            Err(ProtocolError::invalid(format!("unknown endpoint {path}")))
        }
    }

    /// Item path addressed by the request.
    pub fn path(&self) -> &str {
        match self {
            Self::Upload { path, .. } | Self::Info { path } | Self::Download { path, .. } => path,
        }
    }
}

struct Query(Vec<(String, String)>);

impl Query {
    fn new(url: &Url) -> Self {
        Self(url.query_pairs().into_owned().collect())
    }

    fn text(&self, name: &str) -> ProtocolResult<String> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| ProtocolError::invalid(format!("missing query parameter {name}")))
    }

    fn number<T: std::str::FromStr>(&self, name: &str) -> ProtocolResult<T> {
        self.text(name)?
            .parse()
            .map_err(|_| ProtocolError::invalid(format!("malformed query parameter {name}")))
    }

    fn encoding(&self) -> ProtocolResult<Encoding> {
        match self.0.iter().find(|(k, _)| k == "encoding") {
            None => Ok(Encoding::Raw),
            Some((_, v)) => Encoding::from_name(v)
                .ok_or_else(|| ProtocolError::invalid(format!("unknown encoding {v}"))),
        }
    }

    fn range(&self) -> ProtocolResult<ChunkRange> {
        Ok(ChunkRange {
            offset: self.number("offset")?,
            size: self.number("size")?,
        })
    }
}
