//! Example: bind an HTTP service into a dependent execution and fetch
//! from it through the resolved endpoint.
//!
//! Run with:
//! ```bash
//! cargo run --example bind_service
//! ```
//!
//! The container engine is mocked with an in-process TCP listener so the
//! example runs anywhere; a real deployment implements `ContainerRuntime`
//! against its backend instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tether_common::config::LifecycleConfig;
use tether_common::error::{Result, TetherError};
use tether_common::types::{DescriptorId, Endpoint, ProcessHandle, ScopeId};
use tether_core::descriptor::ServiceDescriptor;
use tether_core::runtime::{ContainerRuntime, InMemoryInjector, NamespaceInjector};
use tether_sdk::builder::ServiceBuilder;
use tether_sdk::session::Session;

/// Stand-in engine: each "container" is a local TCP listener answering
/// every connection with a fixed HTTP response.
#[derive(Default)]
struct LoopbackRuntime {
    servers: Mutex<HashMap<ProcessHandle, LoopbackServer>>,
}

struct LoopbackServer {
    endpoint: Endpoint,
    task: tokio::task::JoinHandle<()>,
}

#[async_trait]
impl ContainerRuntime for LoopbackRuntime {
    async fn launch(&self, descriptor: &ServiceDescriptor) -> Result<ProcessHandle> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| TetherError::Launch {
                identity: descriptor.identity(),
                message: e.to_string(),
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| TetherError::Launch {
                identity: descriptor.identity(),
                message: e.to_string(),
            })?
            .port();

        let server = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _addr)) = listener.accept().await else {
                    break;
                };
                let mut buf = [0_u8; 1024];
                let _ = stream.read(&mut buf).await;
                let body = "Hello, world!";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        let handle = ProcessHandle::generate();
        let _ = self
            .servers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(
                handle.clone(),
                LoopbackServer {
                    endpoint: Endpoint::new("127.0.0.1", port),
                    task: server,
                },
            );
        Ok(handle)
    }

    async fn terminate(&self, handle: &ProcessHandle) -> Result<()> {
        // Idempotent: terminating an unknown handle is a success.
        if let Some(server) = self
            .servers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(handle)
        {
            server.task.abort();
        }
        Ok(())
    }

    async fn network_address(&self, handle: &ProcessHandle) -> Result<Endpoint> {
        self.servers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(handle)
            .map(|server| server.endpoint.clone())
            .ok_or_else(|| TetherError::Launch {
                identity: DescriptorId::from_digest(&[0; 32]),
                message: format!("unknown handle {handle}"),
            })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing for structured logging
    tracing_subscriber::fmt().with_env_filter("info").init();

    let injector = Arc::new(InMemoryInjector::new());
    let session = Session::new(
        Arc::new(LoopbackRuntime::default()),
        Arc::clone(&injector) as Arc<dyn NamespaceInjector>,
        LifecycleConfig::default(),
    );

    // Describe an HTTP service exposing port 8080
    let http_srv = ServiceBuilder::new("file:///opt/images/python")
        .command(vec![
            "python".into(),
            "-m".into(),
            "http.server".into(),
            "8080".into(),
        ])
        .expose_tcp(8080)
        .build()?;

    // Bind it into a dependent execution under the name "www"
    let scope = ScopeId::generate();
    let mut bindings = session
        .bind(&scope, &[("www".to_string(), http_srv)])
        .await?;

    // Inside the dependent execution, "www" resolves to the service
    let endpoint = injector
        .lookup(&scope, "www")
        .ok_or_else(|| anyhow::anyhow!("binding not injected"))?;

    // Fetch from the bound service, as `wget -qO- http://www:8080` would
    let mut stream =
        tokio::net::TcpStream::connect((endpoint.host.as_str(), endpoint.port)).await?;
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: www\r\n\r\n")
        .await?;
    let mut response = String::new();
    let _ = stream.read_to_string(&mut response).await;

    println!("response from www: {}", response.lines().last().unwrap_or(""));

    // Dependent execution finished: release the bindings, then close
    session.unbind(&mut bindings).await;
    session.close().await;

    Ok(())
}
