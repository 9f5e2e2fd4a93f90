//! Asynchronous manifest URL resolution: wait for the engine, then hand the local URL to the host.

use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use tokio::task::JoinHandle;

use crate::loader::P2PMediaLoader;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ManifestUrlBridge {
    ready_timeout: Duration,
    tasks: Vec<JoinHandle<()>>,
    destroyed: bool,
}

impl ManifestUrlBridge {
    pub fn new(ready_timeout: Duration) -> Self {
        Self {
            ready_timeout,
            tasks: Vec::new(),
            destroyed: false,
        }
    }

    /// Resolve the proxy URL for `manifest_url` once the engine is ready, or once the
    /// ready timeout passes (playback then runs over HTTP only), and pass it to `on_url`.
    pub fn manifest_url_async<F, Fut>(
        &mut self,
        loader: &P2PMediaLoader,
        manifest_url: impl Into<String>,
        on_url: F,
    ) where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.destroyed {
            warn!("manifest url requested after bridge was destroyed");
            return;
        }
        self.tasks.retain(|t| !t.is_finished());
        let loader = loader.clone();
        let manifest_url = manifest_url.into();
        let ready_timeout = self.ready_timeout;
        self.tasks.push(tokio::spawn(async move {
            if !loader.wait_ready(ready_timeout).await {
                warn!(
                    "engine not ready after {:?}, continuing without p2p",
                    ready_timeout
                );
            }
            match loader.manifest_url(&manifest_url).await {
                Ok(url) => {
                    info!("manifest available at {}", url);
                    on_url(url).await;
                }
                Err(e) => warn!("cannot resolve manifest url: {}", e),
            }
        }));
    }

    /// Abort outstanding resolutions. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("manifest url bridge destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}
