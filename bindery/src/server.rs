//! HTTP/1 serve loop on hyper and tokio.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::api::Api;
use crate::error::Error;
use crate::response::{BoxBody, IntoResponse};
use crate::router::Router;

/// Finalizes `api` and serves it on `addr` until the listener fails.
pub async fn serve(api: Api, addr: SocketAddr) -> std::io::Result<()> {
    let router = api
        .into_router()
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    serve_router(router, addr).await
}

pub async fn serve_router(router: Router, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    let router = Arc::new(router);

    loop {
        let (stream, peer) = listener.accept().await?;
        let router = Arc::clone(&router);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let router = Arc::clone(&router);
                async move { Ok::<_, Infallible>(handle_incoming(&router, req).await) }
            });

            let mut http = http1::Builder::new();
            http.keep_alive(true);
            if let Err(err) = http.serve_connection(TokioIo::new(stream), service).await {
                debug!(%peer, error = %err, "connection closed with error");
            }
        });
    }
}

async fn handle_incoming(router: &Router, req: Request<Incoming>) -> Response<BoxBody> {
    let (parts, body) = req.into_parts();
    let max = router.limits().max_body_size;
    match Limited::new(body, max).collect().await {
        Ok(collected) => {
            router
                .handle(Request::from_parts(parts, collected.to_bytes()))
                .await
        }
        Err(err) if err.is::<LengthLimitError>() => {
            debug!(max, "request body exceeds the configured limit");
            StatusCode::PAYLOAD_TOO_LARGE.into_response()
        }
        Err(err) => {
            debug!(error = %err, "failed to read request body");
            Error::new(StatusCode::BAD_REQUEST.as_u16(), "could not read request body").into_response()
        }
    }
}
