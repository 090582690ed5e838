pub mod listing;
pub mod mime;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use percent_encoding::percent_decode_str;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::server::http_status::HttpStatus;
use crate::server::request_parser::HttpRequest;
use crate::server::response::{Body, Response};

/// Produces the response for a request that already passed authentication.
///
/// Implementations must never expose anything outside `root`.
pub trait StaticResponder {
    fn respond(&self, request: &HttpRequest, root: &Path) -> Response;
}

/// Serves files and directory listings straight from disk.
#[derive(Debug, Clone)]
pub struct DirResponder {
    listing: bool,
}

impl DirResponder {
    pub fn new(listing: bool) -> Self {
        Self { listing }
    }
}

impl Default for DirResponder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StaticResponder for DirResponder {
    fn respond(&self, request: &HttpRequest, root: &Path) -> Response {
        if request.method != "GET" && request.method != "HEAD" {
            warn!("Unsupported method {} for {}", request.method, request.path);
            return Response::error(HttpStatus::MethodNotAllowed).with_header("Allow", "GET, HEAD");
        }

        let decoded = match percent_decode_str(&request.path).decode_utf8() {
            Ok(decoded) if !decoded.contains('\0') => decoded.into_owned(),
            _ => {
                warn!("Undecodable request path: {}", request.path);
                return Response::error(HttpStatus::BadRequest);
            }
        };

        let Some(relative) = relative_path(&decoded) else {
            warn!("Path traversal attempt: {}", request.path);
            return Response::error(HttpStatus::Forbidden);
        };

        let canonical_root = match root.canonicalize() {
            Ok(path) => path,
            Err(e) => {
                error!("Cannot resolve web root {:?}: {}", root, e);
                return Response::error(HttpStatus::InternalServerError);
            }
        };

        let resolved = match canonical_root.join(&relative).canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => {
                info!("File not found: {:?}", canonical_root.join(&relative));
                return Response::error(HttpStatus::NotFound);
            }
            Err(e) => {
                warn!("Cannot resolve {:?}: {}", relative, e);
                return Response::error(HttpStatus::Forbidden);
            }
        };

        if !resolved.starts_with(&canonical_root) {
            warn!("{:?} resolves outside the web root to {:?}", request.path, resolved);
            return Response::error(HttpStatus::Forbidden);
        }

        if resolved.is_dir() {
            self.serve_directory(request, &decoded, &resolved)
        } else {
            serve_file(request, &resolved)
        }
    }
}

impl DirResponder {
    fn serve_directory(&self, request: &HttpRequest, decoded: &str, dir: &Path) -> Response {
        if !request.path.ends_with('/') {
            let mut location = format!("{}/", request.path);
            if let Some(query) = &request.query {
                location.push('?');
                location.push_str(query);
            }
            debug!("Redirecting directory request to {}", location);
            return Response::error(HttpStatus::MovedPermanently).with_header("Location", location);
        }

        let index = dir.join("index.html");
        if index.is_file() {
            return serve_file(request, &index);
        }

        if !self.listing {
            warn!("Directory listing disabled for {:?}", dir);
            return Response::error(HttpStatus::Forbidden);
        }

        match listing::render(dir, decoded) {
            Ok(html) => html_response(request, html.into_bytes()),
            Err(e) => {
                error!("Cannot list directory {:?}: {}", dir, e);
                Response::error(HttpStatus::Forbidden)
            }
        }
    }
}

/// Maps the decoded URL path onto a path relative to the root.
///
/// Returns `None` when a `..` segment is present, whether or not it would
/// actually climb above the root.
fn relative_path(decoded: &str) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(segment) => relative.push(segment),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}

fn serve_file(request: &HttpRequest, path: &Path) -> Response {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            error!("Error opening file {:?}: {}", path, e);
            return Response::error(HttpStatus::Forbidden);
        }
    };

    let metadata = match file.metadata() {
        Ok(meta) => meta,
        Err(e) => {
            error!("Error getting metadata for {:?}: {}", path, e);
            return Response::error(HttpStatus::InternalServerError);
        }
    };

    let len = metadata.len();
    let mut response = Response::new(HttpStatus::Ok)
        .with_header("Content-Type", mime::content_type(path))
        .with_header("Content-Length", len.to_string());

    if let Ok(modified) = metadata.modified() {
        response = response.with_header("Last-Modified", http_date(modified.into()));
    }

    if request.is_head() {
        debug!("HEAD request for {:?}", path);
    } else {
        response.body = Body::File { file, len };
    }

    debug!("Serving {:?} ({} bytes)", path, len);
    response
}

fn html_response(request: &HttpRequest, html: Vec<u8>) -> Response {
    let len = html.len();
    let response = Response::new(HttpStatus::Ok)
        .with_header("Content-Type", "text/html; charset=utf-8")
        .with_header("Content-Length", len.to_string());

    if request.is_head() {
        response
    } else {
        Response {
            body: Body::Bytes(html),
            ..response
        }
    }
}

fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Reads a response fully into memory, the way a client would see it.
#[cfg(test)]
pub(crate) fn response_bytes(response: Response) -> Vec<u8> {
    use std::io::Read;

    let mut bytes = response.head_bytes(false);
    match response.body {
        Body::Empty => {}
        Body::Bytes(body) => bytes.extend_from_slice(&body),
        Body::File { mut file, .. } => {
            file.read_to_end(&mut bytes).unwrap();
        }
    }
    bytes
}
