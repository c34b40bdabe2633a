//! WebDAV adapter built on `ureq`.
//!
//! The root's `url` names the collection to scan (`https://host/dav/files`);
//! a `path` on the root narrows it further. Directories are listed with
//! `PROPFIND` at `Depth: 1` and the multistatus body is read with
//! `quick-xml`, matching elements by local name so any namespace prefix
//! works. Content is streamed from `GET` straight into the signer.
//!
//! HTTP is stateless, so there is no long-lived connection to lose; a
//! reconnect only rebuilds the agent and its connection pool.

use std::io::{self, Read};
use std::time::Duration;

use base64::Engine;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use quick_xml::events::Event;
use quick_xml::Reader;
use ureq::{Agent, AgentBuilder, Response};

use super::path_utils::{self, ROOT_PATH};
use super::{Connector, RawEntry, Session, WalkError};
use crate::catalog::signature::{sign_reader, Signature};
use crate::registry::StorageRoot;

/// Timeout for any single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:getcontentlength/>
    <D:getlastmodified/>
    <D:resourcetype/>
  </D:prop>
</D:propfind>"#;

/// Characters escaped inside one path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Connector for WebDAV roots.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebdavConnector;

impl Connector for WebdavConnector {
    fn connect(&self, root: &StorageRoot) -> Result<Box<dyn Session>, WalkError> {
        let url = root
            .url
            .as_deref()
            .ok_or_else(|| WalkError::InvalidConfiguration("webdav root without url".into()))?;
        let (origin, mut base_path) = split_url(url).ok_or_else(|| {
            WalkError::InvalidConfiguration(format!("not an http(s) url: {url}"))
        })?;
        if let Some(prefix) = root.path.as_deref() {
            let prefix = path_utils::canonicalize(prefix);
            if prefix != ROOT_PATH {
                base_path.push_str(&prefix);
            }
        }
        let authorization = root.username.as_deref().map(|user| {
            let password = root.password.as_deref().unwrap_or("");
            let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
            format!("Basic {token}")
        });

        let mut session = WebdavSession {
            agent: build_agent(),
            origin,
            base_path,
            authorization,
        };
        session.propfind(ROOT_PATH, true, "0").map_err(|e| match e {
            WalkError::PermissionDenied(_) => WalkError::Auth {
                endpoint: url.to_string(),
                message: "403 Forbidden".to_string(),
            },
            other => other,
        })?;
        log::debug!("Connected to {url}");
        Ok(Box::new(session))
    }
}

fn build_agent() -> Agent {
    AgentBuilder::new()
        .timeout(REQUEST_TIMEOUT)
        .redirects(0)
        .build()
}

/// Split `scheme://authority/path` into the origin and the decoded path
/// without a trailing slash.
fn split_url(url: &str) -> Option<(String, String)> {
    let (scheme, rest) = url.split_once("://")?;
    if !scheme.eq_ignore_ascii_case("http") && !scheme.eq_ignore_ascii_case("https") {
        return None;
    }
    let (authority, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    if authority.is_empty() {
        return None;
    }
    let path = percent_decode_str(path).decode_utf8_lossy();
    Some((
        format!("{scheme}://{authority}"),
        path.trim_end_matches('/').to_string(),
    ))
}

/// Percent-encode a decoded absolute path segment by segment.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| utf8_percent_encode(segment, SEGMENT).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Decoded path of an `href`, which may be absolute or server-relative.
/// `None` when the decoded bytes are not UTF-8.
fn href_path(href: &str) -> Option<String> {
    let path = match href.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => href,
    };
    let decoded = percent_decode_str(path).decode_utf8().ok()?;
    let trimmed = decoded.trim_end_matches('/');
    Some(if trimmed.is_empty() {
        ROOT_PATH.to_string()
    } else {
        trimmed.to_string()
    })
}

/// One `<response>` of a multistatus body.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct DavResource {
    href: String,
    size: u64,
    modified: i64,
    is_dir: bool,
}

#[derive(Clone, Copy)]
enum Field {
    Href,
    Length,
    Modified,
}

fn parse_multistatus(body: &str) -> Result<Vec<DavResource>, quick_xml::Error> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut resources = Vec::new();
    let mut current: Option<DavResource> = None;
    let mut field: Option<Field> = None;
    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"response" => current = Some(DavResource::default()),
                b"href" => field = Some(Field::Href),
                b"getcontentlength" => field = Some(Field::Length),
                b"getlastmodified" => field = Some(Field::Modified),
                b"collection" => {
                    if let Some(resource) = current.as_mut() {
                        resource.is_dir = true;
                    }
                }
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"collection" => {
                if let Some(resource) = current.as_mut() {
                    resource.is_dir = true;
                }
            }
            Event::Text(text) => {
                if let (Some(resource), Some(field)) = (current.as_mut(), field) {
                    let value = text.unescape()?;
                    let value = value.trim();
                    match field {
                        Field::Href => resource.href.push_str(value),
                        Field::Length => resource.size = value.parse().unwrap_or(0),
                        Field::Modified => {
                            resource.modified = chrono::DateTime::parse_from_rfc2822(value)
                                .map(|t| t.timestamp())
                                .unwrap_or(0);
                        }
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"response" => resources.extend(current.take()),
                b"href" | b"getcontentlength" | b"getlastmodified" => field = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(resources)
}

fn map_error(path: &str, error: ureq::Error) -> WalkError {
    match error {
        ureq::Error::Status(401, _) => WalkError::Auth {
            endpoint: path.to_string(),
            message: "401 Unauthorized".to_string(),
        },
        ureq::Error::Status(403, _) => WalkError::PermissionDenied(path.to_string()),
        ureq::Error::Status(404 | 410, _) => WalkError::NotFound(path.to_string()),
        ureq::Error::Status(code, _) if code == 408 || code == 429 || code >= 500 => {
            WalkError::Transient {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionAborted, format!("HTTP {code}")),
            }
        }
        ureq::Error::Status(code, _) => WalkError::Protocol {
            path: path.to_string(),
            message: format!("unexpected HTTP status {code}"),
        },
        ureq::Error::Transport(transport) => match transport.kind() {
            ureq::ErrorKind::InvalidUrl | ureq::ErrorKind::UnknownScheme => {
                WalkError::InvalidConfiguration(transport.to_string())
            }
            _ => WalkError::Transient {
                path: path.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionAborted, transport.to_string()),
            },
        },
    }
}

/// A WebDAV collection.
pub struct WebdavSession {
    agent: Agent,
    origin: String,
    base_path: String,
    authorization: Option<String>,
}

impl WebdavSession {
    /// Decoded server path of a catalog path.
    fn remote(&self, path: &str) -> String {
        if path == ROOT_PATH {
            if self.base_path.is_empty() {
                ROOT_PATH.to_string()
            } else {
                self.base_path.clone()
            }
        } else {
            format!("{}{path}", self.base_path)
        }
    }

    fn url(&self, path: &str, collection: bool) -> String {
        let mut url = format!("{}{}", self.origin, encode_path(&self.remote(path)));
        if collection && !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    fn send(&self, method: &str, url: &str, depth: Option<&str>) -> Result<Response, ureq::Error> {
        let mut request = self.agent.request(method, url);
        if let Some(auth) = &self.authorization {
            request = request.set("Authorization", auth);
        }
        match depth {
            Some(depth) => request
                .set("Depth", depth)
                .set("Content-Type", "application/xml; charset=utf-8")
                .send_string(PROPFIND_BODY),
            None => request.call(),
        }
    }

    /// PROPFIND `path`, retrying once as a collection when the server
    /// redirects to the slash-terminated URL.
    fn propfind(
        &self,
        path: &str,
        collection: bool,
        depth: &str,
    ) -> Result<Vec<DavResource>, WalkError> {
        let mut response = self
            .send("PROPFIND", &self.url(path, collection), Some(depth))
            .map_err(|e| map_error(path, e))?;
        if !collection && (300..400).contains(&response.status()) {
            response = self
                .send("PROPFIND", &self.url(path, true), Some(depth))
                .map_err(|e| map_error(path, e))?;
        }
        if response.status() != 207 {
            return Err(WalkError::Protocol {
                path: path.to_string(),
                message: format!("PROPFIND answered {}", response.status()),
            });
        }

        let mut body = String::new();
        response
            .into_reader()
            .read_to_string(&mut body)
            .map_err(|e| WalkError::from_io(path, e))?;
        parse_multistatus(&body).map_err(|e| WalkError::Protocol {
            path: path.to_string(),
            message: format!("bad multistatus body: {e}"),
        })
    }
}

fn to_raw(name: &str, resource: &DavResource) -> RawEntry {
    if resource.is_dir {
        RawEntry::dir(name, resource.modified)
    } else {
        RawEntry::file(name, resource.size, resource.modified)
    }
}

impl Session for WebdavSession {
    fn list(&mut self, path: &str) -> Result<Vec<RawEntry>, WalkError> {
        let remote = self.remote(path);
        let own = match remote.trim_end_matches('/') {
            "" => ROOT_PATH,
            trimmed => trimmed,
        };
        let resources = self.propfind(path, true, "1")?;

        let mut entries = Vec::with_capacity(resources.len());
        for resource in &resources {
            let Some(href) = href_path(&resource.href) else {
                let lossy = percent_decode_str(&resource.href).decode_utf8_lossy();
                let name = lossy.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
                entries.push(RawEntry::invalid_name(name));
                continue;
            };
            if href == own {
                continue;
            }
            let name = path_utils::file_name(&href);
            if !name.is_empty() {
                entries.push(to_raw(name, resource));
            }
        }
        Ok(entries)
    }

    fn stat(&mut self, path: &str) -> Result<RawEntry, WalkError> {
        let resource = self
            .propfind(path, false, "0")?
            .into_iter()
            .next()
            .ok_or_else(|| WalkError::NotFound(path.to_string()))?;
        Ok(to_raw(path_utils::file_name(path), &resource))
    }

    fn signature(&mut self, path: &str) -> Result<Signature, WalkError> {
        let response = self
            .send("GET", &self.url(path, false), None)
            .map_err(|e| map_error(path, e))?;
        if response.status() != 200 {
            return Err(WalkError::Protocol {
                path: path.to_string(),
                message: format!("GET answered {}", response.status()),
            });
        }
        let mut reader = response.into_reader();
        sign_reader(&mut reader).map_err(|e| WalkError::from_io(path, e))
    }

    fn reconnect(&mut self) -> Result<(), WalkError> {
        self.agent = build_agent();
        Ok(())
    }
}
