//! Calibration resolver (spec.md §4.3): HTTP-then-TCP fallback, cached per
//! endpoint address until a reconnect to a different endpoint invalidates it.

use std::net::IpAddr;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::{CalError, DaqError, DaqResult, RecoveryAction};
use crate::sample::CalibrationInfo;
use crate::wire::tcp;
use crate::wire::xml::parse_calibration_xml;

/// The sensor's fixed HTTP calibration document path (spec.md §6).
const CALIBRATION_HTTP_PATH: &str = "netftapi2.xml";

struct CacheEntry {
    endpoint: IpAddr,
    info: CalibrationInfo,
}

/// Resolves and caches `CalibrationInfo` for a connected endpoint.
pub struct CalibrationResolver {
    http_client: reqwest::Client,
    cache: Mutex<Option<CacheEntry>>,
}

impl Default for CalibrationResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationResolver {
    pub fn new() -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .build()
                .expect("reqwest client with no custom TLS config never fails to build"),
            cache: Mutex::new(None),
        }
    }

    /// Drops any cached calibration not belonging to `endpoint` (spec.md §4.3,
    /// §3: "cached until reconnect to a different endpoint").
    pub fn invalidate_if_different(&self, endpoint: IpAddr) {
        let mut cache = self.cache.lock();
        if cache.as_ref().map(|e| e.endpoint) != Some(endpoint) {
            *cache = None;
        }
    }

    /// Resolves calibration for `endpoint`, preferring the cache, then HTTP,
    /// then TCP. Returns `CalError::Unavailable` wrapped in a `DaqError` if
    /// both network paths fail.
    pub async fn resolve(
        &self,
        endpoint: IpAddr,
        http_port: u16,
        tcp_port: u16,
        connect_timeout: Duration,
    ) -> DaqResult<CalibrationInfo> {
        if let Some(cached) = self.cache.lock().as_ref() {
            if cached.endpoint == endpoint {
                return Ok(cached.info);
            }
        }

        match self.resolve_via_http(endpoint, http_port, connect_timeout).await {
            Ok(info) => {
                self.store(endpoint, info);
                return Ok(info);
            }
            Err(e) => {
                warn!(target: "calibration", "HTTP calibration failed, falling back to TCP: {e}");
            }
        }

        let info = self.resolve_via_tcp(endpoint, tcp_port, connect_timeout).await.map_err(|e| {
            warn!(target: "calibration", "TCP calibration fallback also failed: {e}");
            DaqError::cal("CAL-001", RecoveryAction::Manual, CalError::Unavailable)
        })?;
        self.store(endpoint, info);
        Ok(info)
    }

    fn store(&self, endpoint: IpAddr, info: CalibrationInfo) {
        *self.cache.lock() = Some(CacheEntry { endpoint, info });
    }

    async fn resolve_via_http(
        &self,
        endpoint: IpAddr,
        http_port: u16,
        connect_timeout: Duration,
    ) -> Result<CalibrationInfo, CalError> {
        let url = format!("http://{endpoint}:{http_port}/{CALIBRATION_HTTP_PATH}");
        let resp = self
            .http_client
            .get(&url)
            .timeout(connect_timeout)
            .send()
            .await
            .map_err(|e| CalError::HttpFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(CalError::HttpFailed(format!("HTTP status {}", resp.status())));
        }

        let body = resp.text().await.map_err(|e| CalError::HttpFailed(e.to_string()))?;
        let (cpf, cpt) = parse_calibration_xml(&body)?;
        CalibrationInfo::new(cpf, cpt).map_err(|e| CalError::ParseFailed(e.to_string()))
    }

    async fn resolve_via_tcp(
        &self,
        endpoint: IpAddr,
        tcp_port: u16,
        connect_timeout: Duration,
    ) -> Result<CalibrationInfo, CalError> {
        let addr = (endpoint, tcp_port);
        let mut stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| CalError::TcpFailed("connect timed out".to_string()))?
            .map_err(|e| CalError::TcpFailed(e.to_string()))?;

        let request = tcp::calibration_request();
        tokio::time::timeout(connect_timeout, stream.write_all(&request))
            .await
            .map_err(|_| CalError::TcpFailed("write timed out".to_string()))?
            .map_err(|e| CalError::TcpFailed(e.to_string()))?;

        let mut buf = vec![0u8; tcp::CAL_RESPONSE_LEN];
        tokio::time::timeout(connect_timeout, stream.read_exact(&mut buf))
            .await
            .map_err(|_| CalError::TcpFailed("read timed out".to_string()))?
            .map_err(|e| CalError::TcpFailed(e.to_string()))?;

        let reply = tcp::decode_calibration_reply(&buf).map_err(|e| CalError::TcpFailed(e.to_string()))?;
        debug!(target: "calibration", cpf = reply.cpf, cpt = reply.cpt, "resolved calibration via TCP");

        let mut info = CalibrationInfo::new(reply.cpf as f64, reply.cpt as f64)
            .map_err(|e| CalError::TcpFailed(e.to_string()))?;
        info.force_unit_code = Some(reply.force_units_code);
        info.torque_unit_code = Some(reply.torque_units_code);
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidate_if_different_clears_cache_for_new_endpoint() {
        let resolver = CalibrationResolver::new();
        let ip_a: IpAddr = "127.0.0.1".parse().unwrap();
        let ip_b: IpAddr = "127.0.0.2".parse().unwrap();
        resolver.store(ip_a, CalibrationInfo::new(1_000_000.0, 1_000_000.0).unwrap());
        resolver.invalidate_if_different(ip_a);
        assert!(resolver.cache.lock().is_some());

        resolver.invalidate_if_different(ip_b);
        assert!(resolver.cache.lock().is_none());
    }

    #[tokio::test]
    async fn cached_entry_short_circuits_network_calls() {
        let resolver = CalibrationResolver::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let info = CalibrationInfo::new(500_000.0, 800_000.0).unwrap();
        resolver.store(ip, info);

        let resolved = resolver.resolve(ip, 1, 1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(resolved.cpf, 500_000.0);
        assert_eq!(resolved.cpt, 800_000.0);
    }
}
