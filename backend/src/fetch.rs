//! Out-of-band image retrieval.
//!
//! Finished captures are announced on the control channel but served over
//! plain HTTP from the same host. Retrieval is a single bounded-blocking
//! request/response exchange on a dedicated short-lived connection; it runs
//! on its own worker thread so the poll path is never stalled behind a slow
//! download. Results come back through a channel, tagged with the exposure
//! generation so the synchronizer can discard anything stale.

use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::debug;

use crate::error::FetchError;

/// Resource path prefix the image server serves captures under.
pub const IMAGE_PATH_PREFIX: &str = "/SmartScope-1.0/dev2";

/// Default retrieval timeout. Large captures take a while on the camera's
/// access-point link, but a hung fetch must still resolve.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single capture payload (full-frame 16-bit TIFF is
/// ~23 MB).
const MAX_IMAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Outcome of one worker fetch, delivered back to the poll side.
#[derive(Debug)]
pub struct FetchResult {
    /// Exposure generation the fetch was started for.
    pub generation: u64,
    /// File reference that was retrieved.
    pub file: String,
    /// Raw payload bytes, or why retrieval failed.
    pub outcome: Result<Vec<u8>, FetchError>,
}

/// Retrieve one capture synchronously.
///
/// `host` may carry an explicit port (`"192.168.1.169"` or
/// `"127.0.0.1:8080"`). Blocks up to `timeout`; call this from a worker
/// context, never from the poll path.
pub fn fetch_image(host: &str, file: &str, timeout: Duration) -> Result<Vec<u8>, FetchError> {
    let url = format!("http://{host}{IMAGE_PATH_PREFIX}/{file}");
    debug!("fetching {url}");

    let mut response = ureq::get(&url)
        .config()
        .timeout_global(Some(timeout))
        .build()
        .call()
        .map_err(|e| classify(host, e))?;

    let data = response
        .body_mut()
        .with_config()
        .limit(MAX_IMAGE_BYTES)
        .read_to_vec()
        .map_err(|e| classify(host, e))?;

    if data.is_empty() {
        return Err(FetchError::EmptyBody);
    }
    Ok(data)
}

/// Run [`fetch_image`] on a dedicated thread, delivering the tagged result
/// through `results`.
pub fn spawn_fetch(
    host: String,
    file: String,
    generation: u64,
    timeout: Duration,
    results: Sender<FetchResult>,
) {
    thread::spawn(move || {
        let outcome = fetch_image(&host, &file, timeout);
        // The session may have been dropped mid-download; nothing to do then.
        let _ = results.send(FetchResult {
            generation,
            file,
            outcome,
        });
    });
}

fn classify(host: &str, err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::HostNotFound => FetchError::Unresolvable(host.to_string()),
        ureq::Error::ConnectionFailed => FetchError::ConnectFailed(host.to_string()),
        ureq::Error::Timeout(_) => FetchError::Timeout,
        ureq::Error::StatusCode(code) => {
            FetchError::MalformedResponse(format!("HTTP status {code}"))
        }
        ureq::Error::Io(e)
            if matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ) =>
        {
            FetchError::Timeout
        }
        ureq::Error::Io(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            FetchError::ConnectFailed(e.to_string())
        }
        other => FetchError::MalformedResponse(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;

    /// Serve one canned HTTP response on a loopback socket.
    fn one_shot_server(status: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            // Drain the request head before replying.
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);
            let head = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
        });
        format!("{}:{}", addr.ip(), addr.port())
    }

    #[test]
    fn test_fetch_returns_payload() {
        let host = one_shot_server("200 OK", vec![0xAB; 1024]);
        let data = fetch_image(&host, "img001.tiff", Duration::from_secs(5)).unwrap();
        assert_eq!(data.len(), 1024);
        assert_eq!(data[0], 0xAB);
    }

    #[test]
    fn test_fetch_empty_body_is_an_error() {
        let host = one_shot_server("200 OK", Vec::new());
        let err = fetch_image(&host, "img001.tiff", Duration::from_secs(5)).unwrap_err();
        assert_eq!(err, FetchError::EmptyBody);
    }

    #[test]
    fn test_fetch_http_error_status() {
        let host = one_shot_server("404 Not Found", Vec::new());
        let err = fetch_image(&host, "missing.tiff", Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse(_)));
    }

    #[test]
    fn test_spawn_fetch_delivers_tagged_result() {
        let host = one_shot_server("200 OK", vec![1, 2, 3]);
        let (tx, rx) = crossbeam_channel::unbounded();
        spawn_fetch(
            host,
            "img001.tiff".to_string(),
            7,
            Duration::from_secs(5),
            tx,
        );
        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(result.generation, 7);
        assert_eq!(result.outcome.unwrap(), vec![1, 2, 3]);
    }
}
