//! HTTP responder for published challenge responses
//!
//! Serves `GET /.well-known/acme-challenge/<token>` from a [`ChallengeStore`]
//! so the CA can fetch the key authorization over plain HTTP.

use crate::challenge::WELL_KNOWN_PREFIX;
use crate::store::ChallengeStore;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::header::{ALLOW, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const ERROR_404: &str = "
<html>
 <head>
  <title>404 Not Found</title>
 </head>
 <body>
  <h1>404 Not Found</h1>
  The resource could not be found.<br /><br />
 </body>
</html>
";

fn response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Answer one request against `store`
pub async fn respond(store: &dyn ChallengeStore, method: &Method, path: &str) -> Response<Full<Bytes>> {
    if method != Method::GET {
        let mut response = response(
            StatusCode::METHOD_NOT_ALLOWED,
            "text/plain",
            "405 Method Not Allowed\n",
        );
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
        return response;
    }

    let Some(key) = path.strip_prefix(WELL_KNOWN_PREFIX) else {
        return response(StatusCode::NOT_FOUND, "text/html", ERROR_404);
    };

    match store.get(key).await {
        Ok(Some(value)) => {
            debug!(key = %key, "Serving challenge response");
            response(StatusCode::OK, "text/plain", value)
        }
        Ok(None) => {
            debug!(key = %key, "Unknown challenge requested");
            response(StatusCode::NOT_FOUND, "text/html", ERROR_404)
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Challenge store lookup failed");
            response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                "500 Internal Server Error\n",
            )
        }
    }
}

/// Accept HTTP/1 connections on `listener` and answer them from `store`
///
/// Runs until the task is dropped or the listener fails.
pub async fn serve(listener: TcpListener, store: Arc<dyn ChallengeStore>) -> std::io::Result<()> {
    info!(address = %listener.local_addr()?, "Serving ACME challenge responses");

    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept error");
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let store = store.clone();
        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| {
                let store = store.clone();
                async move {
                    let response =
                        respond(store.as_ref(), request.method(), request.uri().path()).await;
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(remote = %remote, error = %e, "HTTP connection error");
            }
        });
    }
}
