//! A one-shot HTTP server for exercising the client against canned replies.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::JoinHandle;

use url::Url;

/// A request as the server received it.
#[derive(Debug)]
pub(crate) struct CapturedRequest {
    pub(crate) request_line: String,
    pub(crate) body: Vec<u8>,
}

/// Serve a single connection with `status`, headers and `body`, then close it.
///
/// `content_length` overrides the advertised length, to simulate a connection that drops early.
pub(crate) fn serve_once(
    status: &str,
    body: &[u8],
    content_length: Option<usize>,
) -> (Url, JoinHandle<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();

    let status = status.to_string();
    let body = body.to_vec();
    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();

        let mut request_length = 0;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).unwrap();
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    request_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut request_body = vec![0; request_length];
        reader.read_exact(&mut request_body).unwrap();

        let mut stream = stream;
        let head = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            content_length.unwrap_or(body.len())
        );
        stream.write_all(head.as_bytes()).unwrap();
        stream.write_all(&body).unwrap();
        stream.flush().unwrap();

        CapturedRequest {
            request_line: request_line.trim_end().to_string(),
            body: request_body,
        }
    });

    (url, handle)
}
