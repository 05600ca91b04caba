//! Redirect and authentication resolution
//!
//! Before a transfer starts, the target URI is checked with HEAD requests.
//! Redirects are followed up to a budget and a 401 earns exactly one retry
//! with the download's credential per URI. Once a HEAD request succeeds the real
//! GET is issued against the resolved URI.

use reqwest::StatusCode;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::downloader::core::{Credential, DownloadError, HttpResponse, HttpTransport, Result};

/// The GET response for a resolved URI
#[derive(Debug)]
pub struct ResolvedResponse {
    /// URI the response was obtained from, after redirects
    pub uri: Url,
    /// Whether the credential had to be presented
    pub authenticated: bool,
    pub response: HttpResponse,
}

/// Resolves one download attempt through redirects and a single auth retry
///
/// A follower holds no state between calls to [`resolve`](Self::resolve).
pub struct RedirectFollower<'a> {
    transport: &'a dyn HttpTransport,
    credential: Option<&'a Credential>,
    redirect_limit: usize,
}

impl<'a> RedirectFollower<'a> {
    pub fn new(
        transport: &'a dyn HttpTransport,
        credential: Option<&'a Credential>,
        redirect_limit: usize,
    ) -> Self {
        Self {
            transport,
            credential,
            redirect_limit,
        }
    }

    /// Resolve `target` and issue the GET for bytes from `offset` onwards
    pub async fn resolve(&self, target: &Url, offset: u64) -> Result<ResolvedResponse> {
        let mut uri = target.clone();
        let mut credential: Option<&Credential> = None;
        let mut redirects = 0usize;
        let mut retried_with_credential: HashSet<Url> = HashSet::new();

        loop {
            let head = self
                .transport
                .head(credential, &uri)
                .await
                .map_err(|e| DownloadError::transport(uri.as_str(), e))?;
            let status = head.status;
            debug!("HEAD {} -> {}", uri, status);

            if status.is_success() {
                break;
            }

            if status.is_redirection() {
                let next = Self::redirect_target(&uri, &head)?;
                if redirects >= self.redirect_limit {
                    return Err(DownloadError::RedirectLimitExceeded {
                        uri: target.to_string(),
                        limit: self.redirect_limit,
                    });
                }
                redirects += 1;
                debug!("Following redirect {}/{} to {}", redirects, self.redirect_limit, next);
                uri = next;
                credential = None;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                let Some(target_credential) = self.credential else {
                    debug!("{} requires authentication but no credential is available", uri);
                    return Err(DownloadError::Authentication {
                        uri: uri.to_string(),
                    });
                };
                if !retried_with_credential.insert(uri.clone()) {
                    debug!("{} rejected the credential", uri);
                    return Err(DownloadError::Authentication {
                        uri: uri.to_string(),
                    });
                }
                debug!("Retrying {} with credential", uri);
                credential = Some(target_credential);
                continue;
            }

            return Err(DownloadError::UnexpectedStatus {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        let response = self
            .transport
            .get(credential, &uri, offset)
            .await
            .map_err(|e| DownloadError::transport(uri.as_str(), e))?;
        debug!("GET {} from byte {} -> {}", uri, offset, response.status);

        Ok(ResolvedResponse {
            uri,
            authenticated: credential.is_some(),
            response,
        })
    }

    fn redirect_target(uri: &Url, head: &HttpResponse) -> Result<Url> {
        let locations = head.locations();
        if locations.len() != 1 {
            return Err(DownloadError::MalformedRedirect {
                uri: uri.to_string(),
                location_count: locations.len(),
            });
        }

        uri.join(locations[0])
            .map_err(|e| DownloadError::invalid_url(locations[0], e))
    }
}
