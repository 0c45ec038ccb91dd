//! Shared state for the web handlers.

use crate::control::ControlHandle;
use crate::query::QueryService;
use crate::web::error::WebError;

#[derive(Clone)]
pub struct WebAppState {
    query: QueryService,
    control: Option<ControlHandle>,
}

impl WebAppState {
    /// Read-only server over recorded sessions
    pub fn new(query: QueryService) -> Self {
        Self {
            query,
            control: None,
        }
    }

    /// Also drive a live session
    pub fn with_control(mut self, control: ControlHandle) -> Self {
        self.control = Some(control);
        self
    }

    pub fn query(&self) -> &QueryService {
        &self.query
    }

    pub fn control(&self) -> Result<&ControlHandle, WebError> {
        self.control
            .as_ref()
            .ok_or_else(|| WebError::NotFound("No live session is attached".to_string()))
    }
}
