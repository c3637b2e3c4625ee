//! Blocking client for the out-of-process LM handler.
//!
//! Every message on the socket is a 4-byte big-endian length prefix followed by that
//! many bytes of UTF-8 JSON. One connection carries exactly one request and one
//! response.
//!
//! Requests:
//! - single: `{"prompt": "...", "model": "..." | null}`
//! - batched: `{"prompts": ["...", ...], "model": "..." | null}`
//!
//! Responses carry either `error`, or `chat_completion` (single) / `chat_completions`
//! (batched), where each completion has at least a `response` string.

use std::{
    fmt,
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use crate::config::HandlerAddress;

/// Largest response frame the client accepts.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// One completion returned by the LM handler.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LmCompletion {
    /// The model's text response.
    pub response: String,
    /// Model that produced the response, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// The prompt as the handler recorded it, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<serde_json::Value>,
    /// Handler-side latency in seconds, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
}

/// Failure of one LM handler round trip.
#[derive(Debug)]
pub enum LmError {
    /// No handler address is configured for the session.
    NotConfigured,
    /// Connecting, writing or reading failed (including timeouts).
    Io(io::Error),
    /// The handler replied with something other than a valid response frame.
    Protocol(String),
    /// The handler reported an error.
    Handler(String),
}

impl fmt::Display for LmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured => f.write_str("No LM handler configured"),
            Self::Io(e) => write!(f, "LM query failed - {e}"),
            Self::Protocol(msg) => write!(f, "LM query failed - {msg}"),
            Self::Handler(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for LmError {}

impl From<io::Error> for LmError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

#[derive(Debug, serde::Serialize)]
struct LmRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompts: Option<&'a [String]>,
    model: Option<&'a str>,
}

#[derive(Debug, serde::Deserialize)]
struct LmResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    chat_completion: Option<LmCompletion>,
    #[serde(default)]
    chat_completions: Option<Vec<LmCompletion>>,
}

/// Client for one handler address.
#[derive(Debug, Clone)]
pub struct LmClient {
    address: HandlerAddress,
    timeout: Option<Duration>,
}

impl LmClient {
    /// Creates a client; `timeout` bounds connect, write and read separately.
    #[must_use]
    pub fn new(address: HandlerAddress, timeout: Option<Duration>) -> Self {
        Self { address, timeout }
    }

    #[must_use]
    pub fn address(&self) -> &HandlerAddress {
        &self.address
    }

    /// Sends one prompt and waits for its completion.
    pub fn completion(&self, prompt: &str, model: Option<&str>) -> Result<LmCompletion, LmError> {
        let request = LmRequest {
            prompt: Some(prompt),
            prompts: None,
            model,
        };
        let response = self.round_trip(&request)?;
        response
            .chat_completion
            .ok_or_else(|| LmError::Protocol("response has no chat_completion".to_owned()))
    }

    /// Sends several prompts in one request; completions come back in prompt order.
    pub fn completion_batched(&self, prompts: &[String], model: Option<&str>) -> Result<Vec<LmCompletion>, LmError> {
        let request = LmRequest {
            prompt: None,
            prompts: Some(prompts),
            model,
        };
        let response = self.round_trip(&request)?;
        let completions = response
            .chat_completions
            .ok_or_else(|| LmError::Protocol("response has no chat_completions".to_owned()))?;
        if completions.len() != prompts.len() {
            return Err(LmError::Protocol(format!(
                "expected {} completions, got {}",
                prompts.len(),
                completions.len()
            )));
        }
        Ok(completions)
    }

    fn round_trip(&self, request: &LmRequest<'_>) -> Result<LmResponse, LmError> {
        let mut stream = self.connect()?;
        write_frame(&mut stream, request)?;
        let body = read_frame(&mut stream)?;
        let response: LmResponse =
            serde_json::from_slice(&body).map_err(|e| LmError::Protocol(format!("invalid response: {e}")))?;
        if let Some(error) = response.error {
            return Err(LmError::Handler(error));
        }
        Ok(response)
    }

    fn connect(&self) -> Result<TcpStream, LmError> {
        let addrs = (self.address.host.as_str(), self.address.port).to_socket_addrs()?;
        let mut last_error = None;
        for addr in addrs {
            let attempt = match self.timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(self.timeout)?;
                    stream.set_write_timeout(self.timeout)?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(LmError::Io(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("could not resolve {}", self.address),
            )
        })))
    }
}

/// Writes one length-prefixed JSON frame.
fn write_frame(writer: &mut impl Write, payload: &impl serde::Serialize) -> io::Result<()> {
    let body = serde_json::to_vec(payload)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, format!("serialize error: {err}")))?;
    let length = u32::try_from(body.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "request frame too large"))?;
    writer.write_all(&length.to_be_bytes())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Reads one length-prefixed frame body.
fn read_frame(reader: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    let length = u32::from_be_bytes(header);
    if length > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("response frame of {length} bytes exceeds {MAX_FRAME_BYTES}"),
        ));
    }
    let mut body = vec![0; length as usize];
    reader.read_exact(&mut body)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread};

    use serde_json::{Value, json};

    use super::*;

    /// Serves exactly one connection, answering with `reply(request)`.
    fn serve_once(reply: impl FnOnce(Value) -> Value + Send + 'static) -> HandlerAddress {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request: Value = serde_json::from_slice(&read_frame(&mut stream).unwrap()).unwrap();
            write_frame(&mut stream, &reply(request)).unwrap();
        });
        HandlerAddress::new("127.0.0.1", port)
    }

    #[test]
    fn frames_are_length_prefixed() {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &json!({"a": 1})).unwrap();
        assert_eq!(&buffer[..4], &7u32.to_be_bytes());
        assert_eq!(read_frame(&mut buffer.as_slice()).unwrap(), br#"{"a":1}"#);
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let header = (MAX_FRAME_BYTES + 1).to_be_bytes();
        let err = read_frame(&mut header.as_slice()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn single_completion() {
        let address = serve_once(|request| {
            assert_eq!(request, json!({"prompt": "hi", "model": null}));
            json!({"error": null, "chat_completion": {"response": "hello", "model": "m1"}})
        });
        let completion = LmClient::new(address, Some(Duration::from_secs(5)))
            .completion("hi", None)
            .unwrap();
        assert_eq!(completion.response, "hello");
        assert_eq!(completion.model.as_deref(), Some("m1"));
    }

    #[test]
    fn batched_completions_keep_order() {
        let address = serve_once(|request| {
            assert_eq!(request["prompts"], json!(["a", "b"]));
            json!({"chat_completions": [{"response": "A"}, {"response": "B"}]})
        });
        let prompts = vec!["a".to_owned(), "b".to_owned()];
        let completions = LmClient::new(address, Some(Duration::from_secs(5)))
            .completion_batched(&prompts, Some("m2"))
            .unwrap();
        let responses: Vec<&str> = completions.iter().map(|c| c.response.as_str()).collect();
        assert_eq!(responses, ["A", "B"]);
    }

    #[test]
    fn handler_error_is_reported() {
        let address = serve_once(|_| json!({"error": "model overloaded"}));
        let err = LmClient::new(address, Some(Duration::from_secs(5)))
            .completion("hi", None)
            .unwrap_err();
        assert_eq!(err.to_string(), "model overloaded");
    }

    #[test]
    fn refused_connection_is_an_io_error() {
        // bind then drop to obtain a port with no listener
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let err = LmClient::new(HandlerAddress::new("127.0.0.1", port), Some(Duration::from_secs(1)))
            .completion("hi", None)
            .unwrap_err();
        assert!(matches!(err, LmError::Io(_)));
    }
}
