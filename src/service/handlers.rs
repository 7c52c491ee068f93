//! One handler per supported method.
//!
//! Handlers only describe what should happen; every filesystem effect goes
//! through the [`FileGateway`].

use crate::error::HttpError;
use crate::files::FileGateway;
use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// GET: the file under the root, or the directory's index.
pub async fn serve_file(gateway: &FileGateway, req: &Request) -> Result<Response, HttpError> {
    let target = gateway.resolve(&req.path)?;
    let file = gateway.read(&target).await?;

    Ok(ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", file.content_type)
        .file(file.file, file.len)
        .build())
}

/// POST: store the body as a new file in the storage directory.
pub async fn store_upload(gateway: &FileGateway, req: &Request) -> Result<Response, HttpError> {
    if req.content_length().is_none() {
        return Err(HttpError::MissingContentLength);
    }

    let name = gateway.store(&req.body).await?;
    tracing::debug!(file = %name, size = req.body.len(), "stored upload");

    Ok(ResponseBuilder::new(StatusCode::Created)
        .header("Content-Type", "text/plain")
        .header("X-Upload-Name", name.clone())
        .body(format!("File Uploaded Successfully: {name}"))
        .build())
}

/// DELETE: remove one file under the root.
pub async fn delete_file(gateway: &FileGateway, req: &Request) -> Result<Response, HttpError> {
    let target = gateway.resolve(&req.path)?;
    gateway.remove(&target).await?;

    Ok(Response::text(StatusCode::Ok, "File Deleted"))
}
