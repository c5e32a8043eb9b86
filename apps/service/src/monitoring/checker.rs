use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::database::models::round3;

/// Why a connection attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectFailure {
    Timeout,
    Other(String),
}

impl ConnectFailure {
    /// Short reason stored with a down result
    pub fn reason(&self) -> String {
        match self {
            ConnectFailure::Timeout => "timeout".to_string(),
            ConnectFailure::Other(message) => message.clone(),
        }
    }
}

/// Result of one raw connection attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectOutcome {
    Connected { latency_ms: f64 },
    Failed { reason: ConnectFailure, latency_ms: f64 },
}

impl ConnectOutcome {
    pub fn latency_ms(&self) -> f64 {
        match self {
            ConnectOutcome::Connected { latency_ms }
            | ConnectOutcome::Failed { latency_ms, .. } => *latency_ms,
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    round3(start.elapsed().as_secs_f64() * 1000.0)
}

/// A single connect-and-measure attempt against `host:port`
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Never errors: failures are reported through [`ConnectOutcome::Failed`]
    async fn connect(&self, host: &str, port: u16, timeout: Duration) -> ConnectOutcome;
}

/// TCP port checker
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16, limit: Duration) -> ConnectOutcome {
        let start = Instant::now();

        match timeout(limit, tokio::net::TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => ConnectOutcome::Connected { latency_ms: elapsed_ms(start) },
            Ok(Err(e)) => ConnectOutcome::Failed {
                reason: ConnectFailure::Other(e.to_string()),
                latency_ms: elapsed_ms(start),
            },
            Err(_) => ConnectOutcome::Failed {
                reason: ConnectFailure::Timeout,
                latency_ms: elapsed_ms(start),
            },
        }
    }
}

type BlockingConnect = dyn Fn(&str, u16, Duration) -> ConnectOutcome + Send + Sync;

/// Adapts a blocking connect function, running it on the blocking thread pool
#[derive(Clone)]
pub struct BlockingConnector {
    connect: Arc<BlockingConnect>,
}

impl BlockingConnector {
    pub fn new<F>(connect: F) -> Self
    where
        F: Fn(&str, u16, Duration) -> ConnectOutcome + Send + Sync + 'static,
    {
        Self { connect: Arc::new(connect) }
    }

    /// Plain `std::net` connect with a timeout, trying each resolved address
    pub fn std_tcp() -> Self {
        Self::new(std_tcp_connect)
    }
}

fn std_tcp_connect(host: &str, port: u16, limit: Duration) -> ConnectOutcome {
    use std::net::{TcpStream, ToSocketAddrs};

    let start = Instant::now();
    let addresses = match (host, port).to_socket_addrs() {
        Ok(addresses) => addresses,
        Err(e) => {
            return ConnectOutcome::Failed {
                reason: ConnectFailure::Other(e.to_string()),
                latency_ms: elapsed_ms(start),
            };
        }
    };

    let mut last_failure = ConnectFailure::Other(format!("no addresses for {host}"));
    for address in addresses {
        match TcpStream::connect_timeout(&address, limit) {
            Ok(_stream) => return ConnectOutcome::Connected { latency_ms: elapsed_ms(start) },
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                last_failure = ConnectFailure::Timeout;
            }
            Err(e) => last_failure = ConnectFailure::Other(e.to_string()),
        }
    }

    ConnectOutcome::Failed { reason: last_failure, latency_ms: elapsed_ms(start) }
}

#[async_trait::async_trait]
impl Connector for BlockingConnector {
    async fn connect(&self, host: &str, port: u16, limit: Duration) -> ConnectOutcome {
        let connect = Arc::clone(&self.connect);
        let host = host.to_string();
        let start = Instant::now();

        match tokio::task::spawn_blocking(move || (*connect)(&host, port, limit)).await {
            Ok(outcome) => outcome,
            Err(e) => ConnectOutcome::Failed {
                reason: ConnectFailure::Other(format!("probe worker failed: {e}")),
                latency_ms: elapsed_ms(start),
            },
        }
    }
}
