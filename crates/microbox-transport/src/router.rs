use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use microbox_protocol::{
    CapabilityKind, KernelError, KernelResult, Method, Request, Response, RouteHandler,
    Transport,
};
use parking_lot::RwLock;
use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_QUEUE: usize = 256;

struct Envelope {
    request: Request,
    reply: oneshot::Sender<Response>,
}

#[derive(Default)]
struct RouteTable {
    routes: HashMap<(Method, String), RouteHandler>,
    mounts: Vec<(String, PathBuf)>,
}

impl RouteTable {
    fn handler(&self, method: Method, path: &str) -> Option<RouteHandler> {
        self.routes.get(&(method, path.to_owned())).cloned()
    }

    /// Longest mount prefix covering `path`, with the remainder.
    fn mount(&self, path: &str) -> Option<(PathBuf, String)> {
        self.mounts
            .iter()
            .filter_map(|(prefix, folder)| {
                let rest = path.strip_prefix(prefix.as_str())?;
                let boundary = prefix.ends_with('/') || rest.is_empty() || rest.starts_with('/');
                boundary.then(|| (prefix.len(), folder.clone(), rest.to_owned()))
            })
            .max_by_key(|(len, _, _)| *len)
            .map(|(_, folder, rest)| (folder, rest))
    }
}

fn normalize(path: &str) -> KernelResult<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(KernelError::validation("route", "path cannot be empty"));
    }
    if trimmed.starts_with('/') {
        Ok(trimmed.to_owned())
    } else {
        Ok(format!("/{trimmed}"))
    }
}

/// Resolve `relative` inside `folder`, refusing anything that climbs out.
fn confined(folder: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative.trim_start_matches('/'));
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return None;
    }
    let candidate = folder.join(relative);
    if candidate == folder {
        return Some(candidate.join("index.html"));
    }
    Some(candidate)
}

async fn serve_file(folder: PathBuf, rest: String) -> Response {
    let Some(path) = confined(&folder, &rest) else {
        return Response::new(403, "forbidden");
    };
    match fs::read(&path).await {
        Ok(body) => Response::ok(body),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Response::not_found(),
        Err(error) => {
            warn!(path = %path.display(), %error, "static file read failed");
            Response::new(500, "internal error")
        }
    }
}

async fn respond(table: Arc<RwLock<RouteTable>>, request: Request) -> Response {
    let (handler, mount) = {
        let table = table.read();
        (
            table.handler(request.method, &request.path),
            table.mount(&request.path),
        )
    };
    if let Some(handler) = handler {
        return handler(request).await;
    }
    match (request.method, mount) {
        (Method::Get, Some((folder, rest))) => serve_file(folder, rest).await,
        _ => Response::not_found(),
    }
}

/// Sends requests to a listening [`LocalTransport`].
#[derive(Clone, Default)]
pub struct TransportHandle {
    queue: Arc<RwLock<Option<mpsc::Sender<Envelope>>>>,
}

impl TransportHandle {
    pub fn is_listening(&self) -> bool {
        self.queue.read().is_some()
    }

    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn dispatch(&self, request: Request) -> KernelResult<Response> {
        let Some(queue) = self.queue.read().clone() else {
            return Err(KernelError::connection(
                CapabilityKind::Transport,
                "transport is not listening",
            ));
        };
        let (reply, response) = oneshot::channel();
        queue
            .send(Envelope { request, reply })
            .await
            .map_err(|_| KernelError::connection(CapabilityKind::Transport, "transport stopped"))?;
        response.await.map_err(|_| {
            KernelError::connection(CapabilityKind::Transport, "request dropped without a response")
        })
    }
}

/// In-process [`Transport`]. Routes may be added before or after `listen`.
#[derive(Clone)]
pub struct LocalTransport {
    name: String,
    queue_size: usize,
    table: Arc<RwLock<RouteTable>>,
    handle: TransportHandle,
}

impl LocalTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue_size: DEFAULT_QUEUE,
            table: Arc::new(RwLock::new(RouteTable::default())),
            handle: TransportHandle::default(),
        }
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    pub fn is_listening(&self) -> bool {
        self.handle.is_listening()
    }

    pub fn routes(&self) -> Vec<(Method, String)> {
        let mut routes: Vec<_> = self.table.read().routes.keys().cloned().collect();
        routes.sort();
        routes
    }
}

#[async_trait]
impl Transport for LocalTransport {
    #[instrument(skip(self), fields(transport = %self.name))]
    async fn listen(&self) -> KernelResult<()> {
        let mut slot = self.handle.queue.write();
        if slot.is_some() {
            return Err(KernelError::InvalidState(format!(
                "transport {} is already listening",
                self.name
            )));
        }
        let (sender, mut receiver) = mpsc::channel::<Envelope>(self.queue_size);
        let table = self.table.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            while let Some(Envelope { request, reply }) = receiver.recv().await {
                let table = table.clone();
                tokio::spawn(async move {
                    let response = respond(table, request).await;
                    let _ = reply.send(response);
                });
            }
            debug!(transport = %name, "serving loop finished");
        });
        *slot = Some(sender);
        info!(routes = self.table.read().routes.len(), "transport listening");
        Ok(())
    }

    #[instrument(skip(self), fields(transport = %self.name))]
    async fn stop(&self) -> KernelResult<()> {
        if self.handle.queue.write().take().is_some() {
            info!("transport stopped");
        }
        Ok(())
    }

    fn route(&self, method: Method, path: &str, handler: RouteHandler) -> KernelResult<()> {
        let path = normalize(path)?;
        debug!(transport = %self.name, %method, %path, "route registered");
        self.table.write().routes.insert((method, path), handler);
        Ok(())
    }

    fn serve_static(&self, path: &str, folder: &Path) -> KernelResult<()> {
        let path = normalize(path)?;
        if !folder.is_dir() {
            return Err(KernelError::NotFound(format!(
                "static folder {}",
                folder.display()
            )));
        }
        let mut table = self.table.write();
        table.mounts.retain(|(prefix, _)| *prefix != path);
        table.mounts.push((path, folder.to_path_buf()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use microbox_protocol::route_handler;

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn echo() -> RouteHandler {
        route_handler(|request: Request| async move {
            Response::ok(format!("{} {}", request.method, request.path))
        })
    }

    #[tokio::test]
    async fn routes_before_and_after_listen_are_served() -> Result<()> {
        let transport = LocalTransport::new("orders");
        transport.get("/early", echo())?;
        transport.listen().await?;
        transport.post("late", echo())?;

        let handle = transport.handle();
        let early = handle.dispatch(Request::new(Method::Get, "/early")).await?;
        assert_eq!(early.text(), "GET /early");
        let late = handle.dispatch(Request::new(Method::Post, "/late")).await?;
        assert_eq!(late.text(), "POST /late");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_routes_are_404() -> Result<()> {
        let transport = LocalTransport::new("orders");
        transport.get("/known", echo())?;
        transport.listen().await?;

        let handle = transport.handle();
        assert_eq!(handle.dispatch(Request::new(Method::Get, "/unknown")).await?.status, 404);
        assert_eq!(handle.dispatch(Request::new(Method::Delete, "/known")).await?.status, 404);
        Ok(())
    }

    #[tokio::test]
    async fn dispatch_requires_listening() -> Result<()> {
        let transport = LocalTransport::new("orders");
        let handle = transport.handle();
        assert!(handle.dispatch(Request::new(Method::Get, "/")).await.is_err());

        transport.listen().await?;
        assert!(matches!(
            transport.listen().await.unwrap_err(),
            KernelError::InvalidState(_)
        ));
        transport.stop().await?;
        transport.stop().await?;
        assert!(!handle.is_listening());
        assert!(handle.dispatch(Request::new(Method::Get, "/")).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn static_folders_are_served_and_confined() -> Result<()> {
        let root = unique_test_root("microbox-static");
        fs::create_dir_all(root.join("css")).await?;
        fs::write(root.join("index.html"), "<h1>home</h1>").await?;
        fs::write(root.join("css/site.css"), "body {}").await?;

        let transport = LocalTransport::new("web");
        transport.serve_static("/assets", &root)?;
        transport.listen().await?;
        let handle = transport.handle();

        let css = handle.dispatch(Request::new(Method::Get, "/assets/css/site.css")).await?;
        assert_eq!(css.text(), "body {}");
        let index = handle.dispatch(Request::new(Method::Get, "/assets")).await?;
        assert_eq!(index.text(), "<h1>home</h1>");
        let missing = handle.dispatch(Request::new(Method::Get, "/assets/nope.js")).await?;
        assert_eq!(missing.status, 404);
        let escape = handle
            .dispatch(Request::new(Method::Get, "/assets/../secret"))
            .await?;
        assert_eq!(escape.status, 403);
        let sibling = handle.dispatch(Request::new(Method::Get, "/assetsx/site.css")).await?;
        assert_eq!(sibling.status, 404);

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[test]
    fn blank_paths_and_missing_folders_are_rejected() {
        let transport = LocalTransport::new("orders");
        assert!(transport.get(" ", echo()).is_err());
        assert!(transport
            .serve_static("/s", Path::new("/definitely/not/here"))
            .is_err());
        assert!(transport.routes().is_empty());
    }
}
