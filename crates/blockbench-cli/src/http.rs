//! ureq-backed transport for the node HTTP API.

use std::io::Read;
use std::time::Duration;

use blockbench_core::{HttpResponse, Transport, TransportError};

/// One pooled agent shared by every request, including all requests of a
/// concurrent batch.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout.min(Duration::from_secs(10)))
            .timeout(timeout)
            .max_idle_connections_per_host(64)
            .build();
        Self { agent }
    }
}

impl Transport for UreqTransport {
    fn post(&self, url: &str, args: &[&str]) -> Result<HttpResponse, TransportError> {
        let mut request = self.agent.post(url);
        for arg in args {
            request = request.query("arg", arg);
        }
        match request.call() {
            Ok(resp) => read_response(resp),
            // non-2xx still carries a body worth reporting
            Err(ureq::Error::Status(_, resp)) => read_response(resp),
            Err(ureq::Error::Transport(e)) => Err(TransportError(e.to_string())),
        }
    }
}

fn read_response(resp: ureq::Response) -> Result<HttpResponse, TransportError> {
    let status = resp.status();
    let mut body = Vec::new();
    resp.into_reader()
        .read_to_end(&mut body)
        .map_err(|e| TransportError(format!("reading response body: {e}")))?;
    Ok(HttpResponse { status, body })
}
