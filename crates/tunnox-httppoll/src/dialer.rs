//! `Dialer` adapter over `HttpPollByteStream`, used when a tunnel (not the
//! control channel itself) needs an HTTP long-poll byte stream tagged
//! `tunnel_type=data` (spec.md §4.10).

use std::time::Duration;

use async_trait::async_trait;
use tunnox_transport::{ByteStream, Dialer, TransportError};

use crate::client::HttpPollClient;
use crate::header::TunnelKind;
use crate::stream::HttpPollByteStream;

pub struct HttpPollDialer {
    client_id: Option<i64>,
    mapping_id: Option<String>,
    token: Option<String>,
}

impl HttpPollDialer {
    pub fn new(client_id: Option<i64>, mapping_id: Option<String>, token: Option<String>) -> Self {
        Self {
            client_id,
            mapping_id,
            token,
        }
    }
}

#[async_trait]
impl Dialer for HttpPollDialer {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        _timeout: Duration,
    ) -> Result<Box<dyn ByteStream>, TransportError> {
        let base_url = if port == 0 {
            host.to_string()
        } else {
            format!("{host}:{port}")
        };
        let http = HttpPollClient::new(base_url, self.token.clone());
        let connection_id = uuid::Uuid::new_v4().to_string();
        let stream = HttpPollByteStream::connect(
            http,
            connection_id,
            TunnelKind::Data,
            self.client_id,
            self.mapping_id.clone(),
        );
        Ok(Box::new(stream))
    }

    fn name(&self) -> &'static str {
        "http_long_poll"
    }
}
