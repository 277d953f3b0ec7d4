use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use microbox_protocol::{
    CapabilityKind, Client, KernelError, KernelResult, Method, Request, ResponseHandler,
};
use tracing::instrument;

use crate::router::TransportHandle;

/// Outbound [`Client`] targeting one path on a [`LocalTransport`](crate::LocalTransport).
///
/// Every request is built from the parameters configured here; the verb is
/// chosen per call.
#[derive(Clone)]
pub struct LocalClient {
    handle: TransportHandle,
    path: String,
    query: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    timeout: Option<Duration>,
}

impl LocalClient {
    pub fn new(handle: TransportHandle, path: impl Into<String>) -> Self {
        Self {
            handle,
            path: path.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: Vec::new(),
            timeout: None,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_bearer_token(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.with_header("authorization", value)
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn request(&self, method: Method) -> Request {
        let mut request = Request::new(method, self.path.clone()).with_body(self.body.clone());
        request.query = self.query.clone();
        request.headers = self.headers.clone();
        request
    }
}

#[async_trait]
impl Client for LocalClient {
    #[instrument(skip(self, handler), fields(path = %self.path))]
    async fn send(&self, method: Method, handler: ResponseHandler) -> KernelResult<()> {
        let request = self.request(method);
        let response = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.handle.dispatch(request))
                .await
                .map_err(|_| {
                    KernelError::connection(
                        CapabilityKind::Client,
                        format!("{method} {} timed out after {timeout:?}", self.path),
                    )
                })??,
            None => self.handle.dispatch(request).await?,
        };
        handler(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use microbox_protocol::{Response, Transport, route_handler};
    use serde_json::{Value, json};

    use super::*;
    use crate::router::LocalTransport;

    fn inspect() -> microbox_protocol::RouteHandler {
        route_handler(|request: Request| async move {
            Response::json(
                200,
                &json!({
                    "method": request.method.as_str(),
                    "query": request.query,
                    "auth": request.header("Authorization"),
                    "body": String::from_utf8_lossy(&request.body),
                }),
            )
        })
    }

    #[tokio::test]
    async fn requests_carry_configured_parameters() -> Result<()> {
        let transport = LocalTransport::new("orders");
        transport.post("/inspect", inspect())?;
        transport.listen().await?;

        let client = LocalClient::new(transport.handle(), "/inspect")
            .with_query("page", "2")
            .with_bearer_token("t0k3n")
            .with_body("hello");

        let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        client
            .post(Box::new(move |response: Response| -> KernelResult<()> {
                let value: Value = serde_json::from_slice(&response.body)?;
                *slot.lock().unwrap() = Some(value);
                Ok(())
            }))
            .await?;

        let seen = seen.lock().unwrap().clone().expect("handler did not run");
        assert_eq!(seen["method"], "POST");
        assert_eq!(seen["query"]["page"], "2");
        assert_eq!(seen["auth"], "Bearer t0k3n");
        assert_eq!(seen["body"], "hello");
        Ok(())
    }

    #[tokio::test]
    async fn handler_errors_propagate() -> Result<()> {
        let transport = LocalTransport::new("orders");
        transport.listen().await?;
        let client = LocalClient::new(transport.handle(), "/missing");

        let error = client
            .get(Box::new(|response: Response| -> KernelResult<()> {
                if response.status == 404 {
                    return Err(KernelError::NotFound("/missing".to_owned()));
                }
                Ok(())
            }))
            .await
            .unwrap_err();
        assert!(error.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn slow_routes_time_out() -> Result<()> {
        let transport = LocalTransport::new("orders");
        transport.get(
            "/slow",
            route_handler(|_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Response::ok("late")
            }),
        )?;
        transport.listen().await?;

        let client = LocalClient::new(transport.handle(), "/slow")
            .with_timeout(Duration::from_millis(20));
        let error = client.get(Box::new(|_: Response| -> KernelResult<()> { Ok(()) })).await.unwrap_err();
        assert!(matches!(
            error,
            KernelError::Connection {
                capability: CapabilityKind::Client,
                ..
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_transport_is_a_connection_error() {
        let transport = LocalTransport::new("orders");
        let client = LocalClient::new(transport.handle(), "/");
        let error = client.delete(Box::new(|_: Response| -> KernelResult<()> { Ok(()) })).await.unwrap_err();
        assert!(matches!(error, KernelError::Connection { .. }));
    }
}
