use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;

use crate::broker::Broker;
use crate::messaging::ConnectionFactory;
use crate::transport::serve;

/// An in-process broker listening on an ephemeral port.
pub struct TestBroker {
    pub url: String,
    pub broker: Arc<Mutex<Broker>>,
    server: tokio::task::JoinHandle<()>,
}

impl TestBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let broker = Arc::new(Mutex::new(Broker::in_memory().unwrap()));
        let server = tokio::spawn({
            let broker = broker.clone();
            async move {
                let _ = serve(listener, broker).await;
            }
        });
        Self {
            url,
            broker,
            server,
        }
    }

    pub fn connection_factory(&self) -> ConnectionFactory {
        ConnectionFactory::new(&self.url)
            .unwrap()
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(2))
    }

    pub fn session_count(&self) -> usize {
        self.broker.lock().unwrap().clients.len()
    }

    /// Polls until the broker has dropped every session.
    pub async fn wait_for_sessions(&self, count: usize) {
        for _ in 0..100 {
            if self.session_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("broker still has {} sessions", self.session_count());
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        self.server.abort();
    }
}
