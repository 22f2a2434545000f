//! HTTP-01 challenge responder
//!
//! Serves `/.well-known/acme-challenge/<token>` from the tokens published by
//! the ACME issuer. Everything else gets a 404.

use super::ChallengeTokens;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

const CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Looks up key authorizations for challenge paths
#[derive(Clone)]
pub struct ChallengeHandler {
    tokens: ChallengeTokens,
}

impl ChallengeHandler {
    pub fn new(tokens: ChallengeTokens) -> Self {
        Self { tokens }
    }

    /// Check if a request is for ACME challenge
    pub fn is_challenge_request(&self, path: &str) -> bool {
        path.starts_with(CHALLENGE_PREFIX)
    }

    /// Get response for ACME challenge
    pub fn handle_challenge(&self, path: &str) -> Option<String> {
        let token = path.strip_prefix(CHALLENGE_PREFIX)?;
        if token.is_empty() || token.contains('/') {
            return None;
        }
        self.tokens.read().get(token).cloned()
    }

    fn respond(&self, req: &Request<Incoming>) -> Response<Full<Bytes>> {
        let body = match *req.method() {
            Method::GET | Method::HEAD => self.handle_challenge(req.uri().path()),
            _ => None,
        };

        match body {
            Some(key_authorization) => Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "text/plain")
                .body(Full::new(Bytes::from(key_authorization))),
            None => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from_static(b"Not Found"))),
        }
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
    }
}

/// Plain-HTTP listener answering challenge requests
pub struct ChallengeResponder {
    listener: TcpListener,
    handler: Arc<ChallengeHandler>,
}

impl ChallengeResponder {
    pub async fn bind(addr: SocketAddr, tokens: ChallengeTokens) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handler: Arc::new(ChallengeHandler::new(tokens)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the task is dropped
    pub async fn serve(self) {
        tracing::info!(addr = ?self.listener.local_addr().ok(), "HTTP-01 responder listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Challenge responder accept error: {}", e);
                    continue;
                }
            };

            let handler = self.handler.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let response = handler.respond(&req);
                    async move { Ok::<_, Infallible>(response) }
                });

                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    tracing::debug!(peer = %peer, "Challenge connection error: {}", e);
                }
            });
        }
    }
}
