use log::{info, warn};
use std::path::PathBuf;

use super::auth::{self, AuthDecision};
use super::config::Credentials;
use super::http_status::HttpStatus;
use super::request_parser::HttpRequest;
use super::response::Response;
use crate::static_files::StaticResponder;

pub const DEFAULT_REALM: &str = "serve-dir";

/// Decides per message whether the client sees a file or a 401 challenge.
pub struct RequestDispatcher<R> {
    root: PathBuf,
    credentials: Credentials,
    realm: String,
    responder: R,
}

impl<R: StaticResponder> RequestDispatcher<R> {
    pub fn new(root: PathBuf, credentials: Credentials, responder: R) -> Self {
        Self {
            root,
            credentials,
            realm: DEFAULT_REALM.to_string(),
            responder,
        }
    }

    #[cfg(test)]
    pub fn responder(&self) -> &R {
        &self.responder
    }

    pub fn dispatch(&self, request: &HttpRequest, peer: &str) -> Response {
        let response = match auth::evaluate(request, &self.credentials) {
            AuthDecision::Allow => self.responder.respond(request, &self.root),
            AuthDecision::Deny => {
                warn!("Rejected credentials from {} for {}", peer, request.path);
                self.challenge()
            }
        };

        info!(
            "{} \"{} {} {}\" {}",
            peer,
            request.method,
            request.path,
            request.version,
            response.status.code()
        );
        response
    }

    fn challenge(&self) -> Response {
        Response::new(HttpStatus::Unauthorized)
            .with_header("WWW-Authenticate", format!("Basic realm=\"{}\"", self.realm))
            .with_header("Content-Length", "0")
    }
}
