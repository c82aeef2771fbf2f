//! In-memory sync server.

use crate::http::{HttpClient, HttpResponse};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use tagsync_sync_protocol::{
    Encoding, EndpointRequest, ItemInfo, UploadReceipt, Url, STATUS_CONFLICT, STATUS_NOT_FOUND,
};
use tracing::trace;

const STATUS_BAD_REQUEST: u16 = 400;
const STATUS_RANGE_NOT_SATISFIABLE: u16 = 416;
const STATUS_SERVER_ERROR: u16 = 500;

#[derive(Debug, Clone)]
struct StoredItem {
    bytes: Vec<u8>,
    version: u64,
    encoding: Encoding,
}

#[derive(Debug, Default)]
struct RemoteState {
    items: BTreeMap<String, StoredItem>,
    staging: BTreeMap<String, (Vec<u8>, Encoding)>,
    last_version: u64,
    offline_requests: u32,
    path_faults: BTreeMap<String, u16>,
    scripted: VecDeque<u16>,
    requests: Vec<String>,
    corrupt_downloads: bool,
}

/// A sync server living in memory, speaking the endpoint protocol.
///
/// Implements [`HttpClient`] directly, so it can be handed to the
/// orchestrator in place of a network client. Faults can be injected per
/// path, per request, or as whole-transport outages.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
}

impl MemoryRemote {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `bytes` under `path` as if another device uploaded them.
    ///
    /// Returns the new version.
    pub fn put(&self, path: &str, bytes: &[u8]) -> u64 {
        let mut state = self.state.lock();
        state.last_version += 1;
        let version = state.last_version;
        state.items.insert(
            path.to_string(),
            StoredItem {
                bytes: bytes.to_vec(),
                version,
                encoding: Encoding::Raw,
            },
        );
        version
    }

    /// Stored bytes of `path`, exactly as uploaded.
    pub fn stored(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().items.get(path).map(|i| i.bytes.clone())
    }

    /// Payload of `path`, decompressed if it was uploaded compressed.
    pub fn payload(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        let item = state.items.get(path)?;
        match item.encoding {
            Encoding::Raw => Some(item.bytes.clone()),
            Encoding::Zstd => tagsync_codec::decompress(&item.bytes).ok(),
        }
    }

    /// Encoding `path` was stored with.
    pub fn encoding(&self, path: &str) -> Option<Encoding> {
        self.state.lock().items.get(path).map(|i| i.encoding)
    }

    /// Current version of `path`.
    pub fn version(&self, path: &str) -> Option<u64> {
        self.state.lock().items.get(path).map(|i| i.version)
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails the next `count` requests at the transport level.
    pub fn go_offline(&self, count: u32) {
        self.state.lock().offline_requests = count;
    }

    /// Answers every request for `path` with `status`.
    pub fn fail_path(&self, path: &str, status: u16) {
        self.state.lock().path_faults.insert(path.to_string(), status);
    }

    /// Removes all path faults.
    pub fn heal(&self) {
        let mut state = self.state.lock();
        state.path_faults.clear();
        state.offline_requests = 0;
        state.corrupt_downloads = false;
    }

    /// Answers the next requests with the given statuses, in order.
    pub fn script_statuses(&self, statuses: impl IntoIterator<Item = u16>) {
        self.state.lock().scripted.extend(statuses);
    }

    /// Flips a bit in every downloaded chunk.
    pub fn corrupt_downloads(&self, corrupt: bool) {
        self.state.lock().corrupt_downloads = corrupt;
    }

    /// Every request URL seen so far, as `METHOD path?query`.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    fn handle(&self, method: &str, url: &Url, body: Option<&[u8]>) -> Result<HttpResponse, String> {
        let mut state = self.state.lock();
        let line = format!("{method} {}?{}", url.path(), url.query().unwrap_or(""));
        trace!(request = %line, "memory remote");
        state.requests.push(line);

        if state.offline_requests > 0 {
            state.offline_requests -= 1;
            return Err("connection refused".into());
        }
        if let Some(status) = state.scripted.pop_front() {
            return Ok(HttpResponse::status(status));
        }

        let request = match EndpointRequest::parse(url) {
            Ok(request) => request,
            Err(_) => return Ok(HttpResponse::status(STATUS_NOT_FOUND)),
        };
        if let Some(status) = state.path_faults.get(request.path()) {
            return Ok(HttpResponse::status(*status));
        }

        Ok(match (method, request, body) {
            (
                "POST",
                EndpointRequest::Upload {
                    path,
                    range,
                    total,
                    base_version,
                    encoding,
                },
                Some(body),
            ) => state.upload(path, range.offset, range.size, total, base_version, encoding, body),
            ("GET", EndpointRequest::Info { path }, None) => match state.items.get(&path) {
                Some(item) => match ItemInfo::describe(
                    path.as_str(),
                    item.version,
                    &item.bytes,
                    item.encoding,
                )
                .encode()
                {
                    Ok(body) => HttpResponse::ok(body),
                    Err(_) => HttpResponse::status(STATUS_SERVER_ERROR),
                },
                None => HttpResponse::status(STATUS_NOT_FOUND),
            },
            ("GET", EndpointRequest::Download { path, range }, None) => {
                let corrupt = state.corrupt_downloads;
                match state.items.get(&path) {
                    Some(item) if range.end() <= item.bytes.len() => {
                        let mut chunk = item.bytes[range.offset..range.end()].to_vec();
                        if corrupt {
                            if let Some(first) = chunk.first_mut() {
                                *first ^= 0x01;
                            }
                        }
                        HttpResponse::ok(chunk)
                    }
                    Some(_) => HttpResponse::status(STATUS_RANGE_NOT_SATISFIABLE),
                    None => HttpResponse::status(STATUS_NOT_FOUND),
                }
            }
            _ => HttpResponse::status(STATUS_BAD_REQUEST),
        })
    }
}

impl RemoteState {
    #[allow(clippy::too_many_arguments)]
    fn upload(
        &mut self,
        path: String,
        offset: usize,
        size: usize,
        total: usize,
        base_version: u64,
        encoding: Encoding,
        body: &[u8],
    ) -> HttpResponse {
        if body.len() != size || offset + size > total {
            return HttpResponse::status(STATUS_BAD_REQUEST);
        }

        if offset == 0 {
            let current = self.items.get(&path).map_or(0, |i| i.version);
            if current != base_version {
                return HttpResponse::status(STATUS_CONFLICT);
            }
            self.staging.insert(path.clone(), (Vec::new(), encoding));
        }

        let Some((staged, _)) = self.staging.get_mut(&path) else {
            return HttpResponse::status(STATUS_BAD_REQUEST);
        };
        if staged.len() != offset {
            return HttpResponse::status(STATUS_BAD_REQUEST);
        }
        staged.extend_from_slice(body);

        if offset + size < total {
            return HttpResponse::ok(Vec::new());
        }

        let Some((bytes, encoding)) = self.staging.remove(&path) else {
            return HttpResponse::status(STATUS_BAD_REQUEST);
        };
        self.last_version += 1;
        let version = self.last_version;
        self.items.insert(
            path,
            StoredItem {
                bytes,
                version,
                encoding,
            },
        );
        match (UploadReceipt { version }).encode() {
            Ok(body) => HttpResponse::ok(body),
            Err(_) => HttpResponse::status(STATUS_SERVER_ERROR),
        }
    }
}

impl HttpClient for MemoryRemote {
    fn get(&self, url: &Url) -> Result<HttpResponse, String> {
        self.handle("GET", url, None)
    }

    fn post(&self, url: &Url, body: &[u8]) -> Result<HttpResponse, String> {
        self.handle("POST", url, Some(body))
    }
}
