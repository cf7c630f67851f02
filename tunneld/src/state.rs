use std::sync::Arc;

use crate::claims::TokenParser;
use crate::config::ConfHandle;
use crate::logger::Logger;

#[derive(Clone)]
pub struct AppState {
    pub conf: ConfHandle,
    pub logger: Arc<Logger>,
    pub token_parser: Arc<dyn TokenParser>,
    pub shutdown: tunnel_task::ShutdownSignal,
}
