use crate::config::Config;
use crate::error::HttpError;
use crate::files::FileGateway;
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::service::handlers;

/// Which handler a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    ServeFile,
    StoreUpload,
    DeleteFile,
    Unsupported,
}

/// Maps requests to handlers and handler errors to error responses.
#[derive(Debug)]
pub struct Router {
    gateway: FileGateway,
}

impl Router {
    pub fn new(gateway: FileGateway) -> Self {
        Self { gateway }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(FileGateway::new(&config.root_dir, &config.storage_dir))
    }

    pub fn route(req: &Request) -> Route {
        match req.method {
            Method::GET => Route::ServeFile,
            Method::POST => Route::StoreUpload,
            Method::DELETE => Route::DeleteFile,
            Method::Other(_) => Route::Unsupported,
        }
    }

    /// Produces the response for `req`. Never fails: handler errors become
    /// error responses.
    pub async fn handle(&self, req: &Request) -> Response {
        let result = match Self::route(req) {
            Route::ServeFile => handlers::serve_file(&self.gateway, req).await,
            Route::StoreUpload => handlers::store_upload(&self.gateway, req).await,
            Route::DeleteFile => handlers::delete_file(&self.gateway, req).await,
            Route::Unsupported => Err(HttpError::NotImplemented(req.method.to_string())),
        };

        result.unwrap_or_else(|err| {
            match &err {
                HttpError::Io(e) => tracing::error!(
                    method = %req.method,
                    path = %req.path,
                    error = %e,
                    "filesystem error"
                ),
                other => tracing::debug!(
                    method = %req.method,
                    path = %req.path,
                    error = %other,
                    "request refused"
                ),
            }
            err.into_response()
        })
    }
}
