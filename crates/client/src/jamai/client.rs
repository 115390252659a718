use crate::jamai::config::JamaiConfig;
use crate::jamai::idle::IdleTimeout;
use crate::sse::demux_stream;
use gentable_core::gen_table::{
    GenTableClient, GenTableError, GenTableStream, RowAddRequest, RowRegenRequest,
    TableImportRequest, TableType,
};
use reqwest::{header, multipart, Client, RequestBuilder, StatusCode};
use serde::Serialize;
use tokio::time::Duration;
use tracing::{error, info};

#[derive(Clone)]
pub struct JamaiClient {
    http: Client,
    cfg: JamaiConfig,
}

/// Request body with `stream` forced on.
#[derive(Serialize)]
struct Streaming<'a, T: Serialize> {
    #[serde(flatten)]
    inner: &'a T,
    stream: bool,
}

impl JamaiClient {
    pub fn new(cfg: JamaiConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = &cfg.api_key {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", key))?,
            );
        }
        if let Some(project) = &cfg.project_id {
            headers.insert("x-project-id", header::HeaderValue::from_str(project)?);
        }
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .connect_timeout(cfg.timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    fn url(&self, table_type: TableType, op: &str) -> String {
        format!(
            "{}/v1/gen_tables/{}/{}",
            self.cfg.api_base.trim_end_matches('/'),
            table_type,
            op
        )
    }

    /// Sends `req` and demultiplexes the event-stream body. Shared by every
    /// streaming call.
    async fn stream_request<'a>(
        &'a self,
        req: RequestBuilder,
    ) -> Result<GenTableStream<'a>, GenTableError> {
        let resp = req
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target:"gentable::jamai","stream non-200 status={} body={:?}", status, body);
            return Err(map_status_err(status, body));
        }
        let body = resp.bytes_stream();
        Ok(match self.cfg.stream_idle_timeout {
            Some(idle) => demux_stream(IdleTimeout::new(body, idle)),
            None => demux_stream(body),
        })
    }
}

#[allow(async_fn_in_trait)]
impl GenTableClient for JamaiClient {
    async fn add_row_stream<'a>(
        &'a self,
        table_type: TableType,
        req: RowAddRequest,
    ) -> Result<GenTableStream<'a>, GenTableError> {
        let url = self.url(table_type, "rows/add");
        info!(target:"gentable::jamai","add rows table={} rows={} url={}", req.table_id, req.data.len(), url);
        let body = Streaming {
            inner: &req,
            stream: true,
        };
        self.stream_request(self.http.post(url).json(&body)).await
    }

    async fn regen_row_stream<'a>(
        &'a self,
        table_type: TableType,
        req: RowRegenRequest,
    ) -> Result<GenTableStream<'a>, GenTableError> {
        let url = self.url(table_type, "rows/regen");
        info!(target:"gentable::jamai","regen rows table={} rows={} url={}", req.table_id, req.row_ids.len(), url);
        let body = Streaming {
            inner: &req,
            stream: true,
        };
        self.stream_request(self.http.post(url).json(&body)).await
    }

    async fn import_table_data_stream<'a>(
        &'a self,
        table_type: TableType,
        req: TableImportRequest,
    ) -> Result<GenTableStream<'a>, GenTableError> {
        let url = self.url(table_type, "import_data");
        info!(target:"gentable::jamai","import table={} file={} bytes={} url={}", req.table_id, req.file_name, req.data.len(), url);
        let mime = if req.file_name.to_ascii_lowercase().ends_with(".tsv") {
            "text/tab-separated-values"
        } else {
            "text/csv"
        };
        let part = multipart::Part::bytes(req.data)
            .file_name(req.file_name.clone())
            .mime_str(mime)
            .map_err(map_reqwest_err)?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("file_name", req.file_name)
            .text("table_id", req.table_id)
            .text("delimiter", req.delimiter.to_string())
            .text("stream", "true");
        self.stream_request(self.http.post(url).multipart(form)).await
    }
}

fn map_reqwest_err(e: reqwest::Error) -> GenTableError {
    if e.is_timeout() {
        GenTableError::Timeout(e.to_string())
    } else if e.is_request() || e.is_connect() {
        GenTableError::Network(e.to_string())
    } else if e.is_decode() || e.is_body() {
        GenTableError::Decode(e.to_string())
    } else {
        GenTableError::Other(e.to_string())
    }
}

fn map_status_err(status: StatusCode, body: Option<String>) -> GenTableError {
    let body = body.unwrap_or_default();
    let s = format!("{} {}", status.as_u16(), body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GenTableError::Auth(s),
        StatusCode::TOO_MANY_REQUESTS => GenTableError::RateLimit(s),
        StatusCode::NOT_FOUND => GenTableError::NotFound(body),
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => GenTableError::Network(s),
        _ => GenTableError::Status {
            status: status.as_u16(),
            body,
        },
    }
}
