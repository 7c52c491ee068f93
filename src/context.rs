use crate::config::Config;
use crate::server::access_log::AccessLog;
use crate::service::Router;

/// State shared read-only by every connection.
///
/// Built once at startup and handed to connections behind an `Arc`.
#[derive(Debug)]
pub struct ServerContext {
    pub config: Config,
    pub router: Router,
    pub access_log: AccessLog,
}

impl ServerContext {
    pub fn new(config: Config, access_log: AccessLog) -> Self {
        let router = Router::from_config(&config);
        Self {
            config,
            router,
            access_log,
        }
    }
}
