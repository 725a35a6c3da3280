use serde_json::Value;

use crate::command::Command;
use crate::util::interrupt::Interrupt;
use crate::util::request::{Client, RequestError};

/// Network side of a control surface.
///
/// Both operations resolve to the raw JSON body sent by the device, if any,
/// and must return `RequestError::Cancelled` once the interrupt is triggered.
pub trait DeviceTransport: Clone + Send + Sync + 'static {
    /// Fetch the current device status
    fn get_state(
        &self,
        interrupt: &Interrupt,
    ) -> impl Future<Output = Result<Option<Value>, RequestError>> + Send;

    /// Send a command to the device
    fn send(
        &self,
        command: &Command,
        interrupt: &Interrupt,
    ) -> impl Future<Output = Result<Option<Value>, RequestError>> + Send;
}

/// Talks to the device HTTP API under a common path prefix
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    api_prefix: String,
}

impl HttpTransport {
    pub fn new(client: Client, api_prefix: impl Into<String>) -> Self {
        let api_prefix = api_prefix.into().trim_end_matches('/').to_owned();
        Self { client, api_prefix }
    }

    fn path(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.api_prefix)
    }
}

impl DeviceTransport for HttpTransport {
    async fn get_state(&self, interrupt: &Interrupt) -> Result<Option<Value>, RequestError> {
        self.client.get(&self.path("/state"), interrupt).await
    }

    async fn send(
        &self,
        command: &Command,
        interrupt: &Interrupt,
    ) -> Result<Option<Value>, RequestError> {
        self.client
            .post(&self.path(command.endpoint()), &command.payload(), interrupt)
            .await
    }
}
