use std::sync::Arc;

use async_trait::async_trait;
use microbox_kernel::{KernelFacade, Processor};
use microbox_protocol::{KernelResult, Request, Response, route_handler};
use serde_json::{Value, json};
use tracing::info;

pub const TOPIC: &str = "echo";

/// Demo processor. Answers `/health` and echoes `/echo` bodies back,
/// publishing each one on the `echo` topic.
pub struct Echo;

impl Echo {
    pub fn shared() -> Arc<dyn Processor> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Processor for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn init(&self, kernel: KernelFacade) -> KernelResult<()> {
        if let Some(transport) = kernel.transport() {
            let name = kernel.name().to_owned();
            transport.get(
                "/health",
                route_handler(move |_| {
                    let name = name.clone();
                    async move { Response::json(200, &json!({ "service": name, "status": "ok" })) }
                }),
            )?;

            let facade = kernel.clone();
            transport.post(
                "/echo",
                route_handler(move |request: Request| {
                    let facade = facade.clone();
                    async move {
                        if let Some(broker) = facade.broker() {
                            let _ = broker.publish(TOPIC, request.body.clone()).await;
                        }
                        Response::ok(request.body)
                    }
                }),
            )?;
        }

        Ok(())
    }

    async fn close(&self) -> KernelResult<()> {
        info!("echo processor closed");
        Ok(())
    }

    async fn process(&self, input: Value) -> KernelResult<Value> {
        Ok(json!({ "echo": input }))
    }
}
