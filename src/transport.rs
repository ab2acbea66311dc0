use crate::config::ArchiverConfig;
use crate::{ArchiverError, Result};
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use url::Url;

const DEFAULT_SOCKS_PORT: u16 = 1080;
const PROXY_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking GET used for both pages and images.
pub trait Transport {
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        (**self).get(url)
    }
}

#[derive(Debug, Clone)]
pub struct ProxyTransport {
    agent: ureq::Agent,
    proxy_addr: String,
}

impl ProxyTransport {
    /// Builds the proxied agent after checking the proxy accepts TCP connections.
    pub fn connect(config: &ArchiverConfig) -> Result<Self> {
        let proxy_addr = proxy_socket_addr(&config.proxy_url)?;
        check_proxy_reachable(&proxy_addr)?;

        let proxy = build_proxy(&config.proxy_url)?;
        let agent = build_http_agent(config, proxy);
        Ok(Self { agent, proxy_addr })
    }

    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }
}

impl Transport for ProxyTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let mut response = self.agent.get(url).call()?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(ArchiverError::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        let mut body = Vec::new();
        response.body_mut().as_reader().read_to_end(&mut body)?;
        Ok(body)
    }
}

fn build_http_agent(config: &ArchiverConfig, proxy: ureq::Proxy) -> ureq::Agent {
    let mut builder = ureq::Agent::config_builder();
    builder = builder
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(config.timeout_secs.max(1))))
        .user_agent(config.user_agent.as_str())
        .proxy(Some(proxy));
    builder.build().into()
}

/// SOCKS5 proxy that always receives the target host name unresolved.
///
/// `.onion` names only resolve inside the proxy, so `socks5://` is treated like `socks5h://`.
fn build_proxy(proxy_url: &str) -> Result<ureq::Proxy> {
    let parsed = parse_proxy_url(proxy_url)?;
    let (host, port) = proxy_host_port(proxy_url, &parsed)?;

    let mut builder = ureq::Proxy::builder(ureq::ProxyProtocol::Socks5)
        .host(host)
        .port(port)
        .resolve_target(false);
    if !parsed.username().is_empty() {
        builder = builder.username(parsed.username());
        if let Some(password) = parsed.password() {
            builder = builder.password(password);
        }
    }
    builder.build().map_err(|e| ArchiverError::ProxyInvalid {
        url: proxy_url.to_string(),
        reason: e.to_string(),
    })
}

/// `host:port` of a `socks5://` or `socks5h://` proxy URL.
pub fn proxy_socket_addr(proxy_url: &str) -> Result<String> {
    let parsed = parse_proxy_url(proxy_url)?;
    let (host, port) = proxy_host_port(proxy_url, &parsed)?;
    Ok(format!("{host}:{port}"))
}

fn parse_proxy_url(proxy_url: &str) -> Result<Url> {
    let parsed = Url::parse(proxy_url.trim()).map_err(|e| ArchiverError::ProxyInvalid {
        url: proxy_url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "socks5" | "socks5h" | "socks") {
        return Err(ArchiverError::ProxyInvalid {
            url: proxy_url.to_string(),
            reason: format!("unsupported scheme {}; expected socks5h", parsed.scheme()),
        });
    }
    Ok(parsed)
}

fn proxy_host_port<'a>(proxy_url: &str, parsed: &'a Url) -> Result<(&'a str, u16)> {
    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| ArchiverError::ProxyInvalid {
            url: proxy_url.to_string(),
            reason: "missing host".to_string(),
        })?;
    Ok((host, parsed.port().unwrap_or(DEFAULT_SOCKS_PORT)))
}

fn check_proxy_reachable(addr: &str) -> Result<()> {
    let unreachable = |source: std::io::Error| ArchiverError::ProxyUnreachable {
        addr: addr.to_string(),
        source,
    };
    let candidates = addr.to_socket_addrs().map_err(unreachable)?;

    let mut last_err = std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "proxy address did not resolve",
    );
    for candidate in candidates {
        match TcpStream::connect_timeout(&candidate, PROXY_CHECK_TIMEOUT) {
            Ok(_) => return Ok(()),
            Err(err) => last_err = err,
        }
    }
    Err(unreachable(last_err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::mpsc;

    #[test]
    fn proxy_socket_addr_requires_socks_scheme_and_host() {
        assert_eq!(
            proxy_socket_addr("socks5://127.0.0.1:9050").expect("addr"),
            "127.0.0.1:9050"
        );
        assert_eq!(
            proxy_socket_addr("socks5h://localhost").expect("addr"),
            "localhost:1080"
        );
        assert!(matches!(
            proxy_socket_addr("http://127.0.0.1:8080"),
            Err(ArchiverError::ProxyInvalid { .. })
        ));
        assert!(matches!(
            proxy_socket_addr("not a url"),
            Err(ArchiverError::ProxyInvalid { .. })
        ));
    }

    #[test]
    fn connect_fails_when_proxy_is_not_listening() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("local addr").port()
        };
        let config = ArchiverConfig {
            proxy_url: format!("socks5://127.0.0.1:{port}"),
            ..ArchiverConfig::default()
        };
        let err = ProxyTransport::connect(&config).expect_err("nothing listening");
        assert!(matches!(err, ArchiverError::ProxyUnreachable { .. }), "err={err}");
    }

    #[test]
    fn connect_succeeds_when_proxy_accepts_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let config = ArchiverConfig {
            proxy_url: format!("socks5://127.0.0.1:{port}"),
            ..ArchiverConfig::default()
        };
        let transport = ProxyTransport::connect(&config).expect("transport");
        assert_eq!(transport.proxy_addr(), format!("127.0.0.1:{port}"));
    }

    /// CONNECT request as seen by a minimal SOCKS5 server: (ATYP, host, port).
    type SocksConnect = (u8, String, u16);

    /// Accepts connections until one completes a SOCKS5 CONNECT, reports it, then refuses it.
    fn spawn_socks5_recorder(listener: TcpListener, tx: mpsc::Sender<SocksConnect>) {
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                stream
                    .set_read_timeout(Some(Duration::from_secs(5)))
                    .expect("read timeout");

                let mut greeting = [0_u8; 2];
                if stream.read_exact(&mut greeting).is_err() {
                    // Startup reachability check; it closes without speaking SOCKS.
                    continue;
                }
                let mut methods = vec![0_u8; greeting[1] as usize];
                stream.read_exact(&mut methods).expect("methods");
                stream.write_all(&[5, 0]).expect("method reply");

                let mut head = [0_u8; 4];
                stream.read_exact(&mut head).expect("request head");
                let host = match head[3] {
                    3 => {
                        let mut len = [0_u8; 1];
                        stream.read_exact(&mut len).expect("domain len");
                        let mut name = vec![0_u8; len[0] as usize];
                        stream.read_exact(&mut name).expect("domain");
                        String::from_utf8_lossy(&name).into_owned()
                    }
                    1 => {
                        let mut ip = [0_u8; 4];
                        stream.read_exact(&mut ip).expect("ipv4");
                        std::net::Ipv4Addr::from(ip).to_string()
                    }
                    _ => {
                        let mut ip = [0_u8; 16];
                        stream.read_exact(&mut ip).expect("ipv6");
                        std::net::Ipv6Addr::from(ip).to_string()
                    }
                };
                let mut port = [0_u8; 2];
                stream.read_exact(&mut port).expect("port");

                // Host unreachable.
                let _ = stream.write_all(&[5, 4, 0, 1, 0, 0, 0, 0, 0, 0]);
                let _ = tx.send((head[3], host, u16::from_be_bytes(port)));
                return;
            }
        });
    }

    #[test]
    fn onion_host_is_resolved_by_the_proxy() {
        for scheme in ["socks5", "socks5h"] {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            let port = listener.local_addr().expect("local addr").port();
            let (tx, rx) = mpsc::channel();
            spawn_socks5_recorder(listener, tx);

            let config = ArchiverConfig {
                proxy_url: format!("{scheme}://127.0.0.1:{port}"),
                timeout_secs: 5,
                ..ArchiverConfig::default()
            };
            let transport = ProxyTransport::connect(&config).expect("transport");
            let result = transport.get("http://exampleexampleexample.onion/");
            assert!(result.is_err(), "proxy refused the connection");

            let (atyp, host, target_port) = rx
                .recv_timeout(Duration::from_secs(10))
                .expect("proxy saw a CONNECT request");
            assert_eq!(atyp, 3, "scheme={scheme}");
            assert_eq!(host, "exampleexampleexample.onion", "scheme={scheme}");
            assert_eq!(target_port, 80, "scheme={scheme}");
        }
    }
}
