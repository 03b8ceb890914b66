use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use reqwest::Url;

/// Answers "is the sync endpoint reachable right now".
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self, url: &str) -> bool;
}

/// Opens (and immediately drops) a TCP connection to the endpoint's host.
/// Blocking; call it off the async executor.
#[derive(Debug, Clone)]
pub struct TcpConnectivityProbe {
    timeout: Duration,
}

impl TcpConnectivityProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ConnectivityProbe for TcpConnectivityProbe {
    fn is_online(&self, url: &str) -> bool {
        let Some(target) = resolve_target(url) else {
            tracing::debug!(url, "sync url has no resolvable host");
            return false;
        };

        match TcpStream::connect_timeout(&target, self.timeout) {
            Ok(_) => true,
            Err(error) => {
                tracing::debug!(%target, error = %error, "connectivity probe failed");
                false
            }
        }
    }
}

fn resolve_target(url: &str) -> Option<SocketAddr> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?;
    let port = parsed.port_or_known_default()?;

    (host, port).to_socket_addrs().ok()?.next()
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Duration;

    use super::{ConnectivityProbe, TcpConnectivityProbe};

    #[test]
    fn reports_online_when_port_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let port = listener
            .local_addr()
            .expect("listener should have an address")
            .port();
        let probe = TcpConnectivityProbe::new(Duration::from_millis(500));

        assert!(probe.is_online(&format!("https://127.0.0.1:{port}/exec")));
    }

    #[test]
    fn reports_offline_for_unusable_urls() {
        let probe = TcpConnectivityProbe::new(Duration::from_millis(200));

        assert!(!probe.is_online(""));
        assert!(!probe.is_online("not a url"));
    }
}
