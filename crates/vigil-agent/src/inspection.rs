//! Per-Worker Inspection Loop (§4.7).
//!
//! One [`InspectionWorker`] owns exactly one plugin worker's handshake
//! socket, its shared-memory ring, and its slice of the session store —
//! matching the spec's single-active-key discipline by construction:
//! `run` processes one connection fully before accepting the next, so
//! nothing here needs a lock. Dispatch shape is grounded on the teacher's
//! accept-handshake-dispatch UDS server
//! (`crates/agent-protocol/src/v2/uds_server.rs`); the fail-open default
//! verdict and corruption-recovery idiom are grounded on
//! `crates/proxy/src/agents/manager.rs`'s fail-open/fail-closed handling.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};
use uuid::Uuid;

use vigil_common::{IntakeResult, RateLimiter, RateLimiterConfig, SessionId};
use vigil_config::IntakeConfig;
use vigil_protocol::types::ChunkType;
use vigil_protocol::verdict::WebResponseDescriptor;
use vigil_protocol::{codec, Verdict};

use crate::http_manager::{HttpManager, InspectionInput, InspectionPayload};
use crate::metrics::WorkerMetrics;
use crate::ring::{Received, SharedRing};
use crate::session::SessionStore;
use crate::source_identifier;
use crate::verdict_responder;

const READ_RETRIES: u32 = 3;
const REQUEST_END_TTL: Duration = Duration::from_secs(3600);
const RESPONSE_CODE_TTL: Duration = Duration::from_secs(60);

/// One plugin worker's full lifecycle: listening socket, ring, session
/// store, and re-registration limiter all live here and nowhere else.
pub struct InspectionWorker {
    instance_unique_id: String,
    listener: UnixListener,
    ring_path: PathBuf,
    ring: Option<SharedRing>,
    session_store: SessionStore,
    rate_limiter: RateLimiter,
    config: Arc<IntakeConfig>,
    metrics: Arc<WorkerMetrics>,
    http_manager: Arc<dyn HttpManager>,
    eviction_period: Duration,
    last_eviction: Instant,
}

impl InspectionWorker {
    pub fn new(
        instance_unique_id: String,
        handler_socket_path: PathBuf,
        ring_path: PathBuf,
        config: Arc<IntakeConfig>,
        metrics: Arc<WorkerMetrics>,
        http_manager: Arc<dyn HttpManager>,
    ) -> IntakeResult<Self> {
        if let Some(parent) = handler_socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if handler_socket_path.exists() {
            std::fs::remove_file(&handler_socket_path)?;
        }
        let listener = UnixListener::bind(&handler_socket_path)?;

        let rate_limiter = RateLimiter::new(RateLimiterConfig {
            max_events: config.registration_rate_limit.max_registrations_allowed,
            window: Duration::from_secs(
                config
                    .registration_rate_limit
                    .allowed_duration_of_registrations_secs,
            ),
        });

        let eviction_period = Duration::from_secs(config.expiration_check_seconds);

        Ok(InspectionWorker {
            instance_unique_id,
            listener,
            ring_path,
            ring: None,
            session_store: SessionStore::new(Duration::from_secs(300)),
            rate_limiter,
            config,
            metrics,
            http_manager,
            eviction_period,
            last_eviction: Instant::now(),
        })
    }

    /// Opportunistically runs the session table's TTL sweep (§4.4
    /// "Expiration") when `eviction_period` has elapsed since the last
    /// sweep. Called from points that already run regardless of traffic
    /// (the accept loop, and every signal processed in `serve`) rather than
    /// from its own timer task, since the session store is owned by this
    /// worker alone and must not be touched from another task.
    fn maybe_evict_expired(&mut self) {
        if self.last_eviction.elapsed() >= self.eviction_period {
            let evicted = self.session_store.evict_expired(Instant::now());
            if evicted > 0 {
                info!(worker = %self.instance_unique_id, evicted, "evicted expired sessions");
            }
            self.metrics
                .record_table_size(self.session_store.count() as u32);
            self.last_eviction = Instant::now();
        }
    }

    /// Accepts connections forever. A disconnect (worker silently dies)
    /// returns control here to accept the next one; the ring is left
    /// intact, awaiting re-registration (§4.7 failure semantics).
    pub async fn run(&mut self) {
        loop {
            self.maybe_evict_expired();

            let stream = match self.listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!(worker = %self.instance_unique_id, error = %e, "failed to accept worker connection");
                    continue;
                }
            };

            match self.handshake(stream).await {
                Ok(Some((stream, uid, gid))) => {
                    if let Err(e) = self.ensure_ring(uid, gid) {
                        warn!(worker = %self.instance_unique_id, error = %e, "failed to allocate ring");
                        continue;
                    }
                    if let Err(e) = self.serve(stream).await {
                        warn!(worker = %self.instance_unique_id, error = %e, "serving loop ended");
                    }
                }
                Ok(None) => {
                    warn!(worker = %self.instance_unique_id, "handshake rejected, closing connection");
                }
                Err(e) => {
                    warn!(worker = %self.instance_unique_id, error = %e, "handshake failed");
                }
            }
        }
    }

    /// `(uid_len:u8, uid_bytes, worker_user_id:u32, worker_group_id:u32)`
    /// in, `0x01` out on success. Returns `None` (not an error) when the
    /// presented id doesn't match this instance.
    async fn handshake(
        &self,
        mut stream: UnixStream,
    ) -> IntakeResult<Option<(UnixStream, u32, u32)>> {
        let uid_len = read_u8(&mut stream).await? as usize;
        let mut uid_bytes = vec![0u8; uid_len];
        stream.read_exact(&mut uid_bytes).await?;
        let presented_id = String::from_utf8_lossy(&uid_bytes).into_owned();

        let worker_user_id = read_u32(&mut stream).await?;
        let worker_group_id = read_u32(&mut stream).await?;

        if presented_id != self.instance_unique_id {
            return Ok(None);
        }

        stream.write_all(&[0x01]).await?;
        Ok(Some((stream, worker_user_id, worker_group_id)))
    }

    /// Allocates a fresh ring, reuses the current one, or recovers from a
    /// corrupted/mismatched one, honoring the re-registration rate limit
    /// (§4.7): up to N re-registrations of a sane, matching ring within
    /// the configured window; exceeding it forces a fresh ring and resets
    /// the window.
    fn ensure_ring(&mut self, uid: u32, gid: u32) -> IntakeResult<()> {
        let reusable = matches!(
            &self.ring,
            Some(ring) if !ring.is_corrupted() && ring.uid() == uid && ring.gid() == gid
        );

        if reusable {
            if self.rate_limiter.record(Instant::now()) {
                return Ok(());
            }
            warn!(worker = %self.instance_unique_id, "re-registration limit exceeded, destroying ring");
            self.rate_limiter.reset();
        }

        if let Some(ring) = self.ring.take() {
            let _ = ring.destroy();
        }

        let ring = SharedRing::init(
            &self.instance_unique_id,
            uid,
            gid,
            1,
            self.config.ring_capacity_per_worker,
            &self.ring_path,
        )?;
        self.ring = Some(ring);
        Ok(())
    }

    /// Consumes signals off `stream` and pumps ring frames until the
    /// worker disconnects (§4.7 `Serving`).
    async fn serve(&mut self, mut stream: UnixStream) -> IntakeResult<()> {
        loop {
            self.maybe_evict_expired();

            let signaled_session_id = match self.read_signal(&mut stream).await {
                Ok(id) => id,
                Err(_) => {
                    info!(worker = %self.instance_unique_id, "worker socket closed");
                    return Ok(());
                }
            };

            self.pump_ring(&mut stream, signaled_session_id).await?;
        }
    }

    async fn pump_ring(&mut self, stream: &mut UnixStream, signaled_session_id: SessionId) -> IntakeResult<()> {
        loop {
            let Some(ring) = self.ring.as_mut() else {
                return Ok(());
            };

            let (frame_len, chunk_type_raw, session_id_raw, payload) = match ring.receive() {
                Received::Empty => return Ok(()),
                Received::Corrupted => {
                    warn!(worker = %self.instance_unique_id, dump = %ring.dump(), "ring corrupted, resetting");
                    ring.reset(self.config.ring_capacity_per_worker);
                    self.metrics.record_registration_failure();
                    return Ok(());
                }
                Received::Frame { data } => match parse_frame_head(data) {
                    Some(parsed) => parsed,
                    None => {
                        warn!(worker = %self.instance_unique_id, "frame shorter than header, resetting ring");
                        ring.reset(self.config.ring_capacity_per_worker);
                        self.metrics.record_registration_failure();
                        return Ok(());
                    }
                },
            };
            let _ = frame_len;

            let Some(chunk_type) = ChunkType::from_u16(chunk_type_raw) else {
                self.metrics.record_parse_failure();
                self.ring.as_mut().unwrap().pop()?;
                continue;
            };
            let session_id = SessionId(session_id_raw);

            if chunk_type == ChunkType::MetricFromPlugin {
                self.ring.as_mut().unwrap().pop()?;
                continue;
            }

            if session_id != signaled_session_id {
                self.ring.as_mut().unwrap().pop()?;
                self.metrics.record_irrelevant_signal();
                continue;
            }

            if self.config.fail_open_mode && self.global_fail_open_asserted() {
                self.drain_session(session_id)?;
                let ring = self.ring.as_mut().unwrap();
                verdict_responder::respond(ring, session_id, &Verdict::Accept)?;
                self.send_signal(stream, session_id).await?;
                continue;
            }

            let Some((verdict, is_terminal)) = self
                .dispatch_chunk(chunk_type, session_id, payload.to_vec())
                .await?
            else {
                self.metrics.record_orphan_chunk();
                let ring = self.ring.as_mut().unwrap();
                ring.pop()?;
                if !ring.is_data_available() {
                    self.send_signal(stream, session_id).await?;
                }
                continue;
            };

            if is_terminal {
                self.session_store.delete_entry(session_id);
            } else {
                self.session_store.unset_active_key();
            }

            let ring = self.ring.as_mut().unwrap();
            verdict_responder::respond(ring, session_id, &verdict)?;
            ring.pop()?;
            self.metrics.record_verdict(&verdict);

            let ring_empty = !ring.is_data_available();
            if is_terminal || ring_empty {
                self.send_signal(stream, session_id).await?;
            }
        }
    }

    /// Placeholder for a runtime-detected global fail-open condition
    /// (e.g. the policy engine has been timing out repeatedly); currently
    /// always false, leaving `fail_open_mode` to govern only per-chunk
    /// default verdicts.
    fn global_fail_open_asserted(&self) -> bool {
        false
    }

    fn drain_session(&mut self, session_id: SessionId) -> IntakeResult<()> {
        loop {
            let Some(ring) = self.ring.as_mut() else { return Ok(()) };
            match ring.receive() {
                Received::Frame { data } => match parse_frame_head(data) {
                    Some((_, _, sid, _)) if sid == session_id.0 => {
                        ring.pop()?;
                    }
                    _ => return Ok(()),
                },
                _ => return Ok(()),
            }
        }
    }

    /// Dispatches one chunk to its per-type handler. `RequestStart` is the
    /// only chunk type allowed to create a session entry; every other type
    /// requires one to already exist and returns `Ok(None)` otherwise — a
    /// chunk referencing a session with no preceding `RequestStart` (I3) is
    /// dropped silently, no verdict emitted, no entry fabricated.
    async fn dispatch_chunk(
        &mut self,
        chunk_type: ChunkType,
        session_id: SessionId,
        payload: Vec<u8>,
    ) -> IntakeResult<Option<(Verdict, bool)>> {
        match chunk_type {
            ChunkType::RequestStart => self.dispatch_request_start(session_id, &payload).await,
            ChunkType::RequestHeader | ChunkType::ResponseHeader => {
                self.dispatch_header(chunk_type, session_id, &payload).await
            }
            ChunkType::RequestBody | ChunkType::ResponseBody => {
                self.dispatch_body(chunk_type, session_id, &payload).await
            }
            ChunkType::RequestEnd => {
                if !self.session_store.set_active_key(session_id) {
                    return Ok(None);
                }
                self.session_store.set_expiration(REQUEST_END_TTL);
                let verdict = self
                    .call_inspect(session_id, true, InspectionPayload::End)
                    .await;
                Ok(Some(is_terminal(verdict)))
            }
            ChunkType::ResponseEnd => {
                if !self.session_store.set_active_key(session_id) {
                    return Ok(None);
                }
                let verdict = self
                    .call_inspect(session_id, false, InspectionPayload::End)
                    .await;
                Ok(Some(is_terminal(verdict)))
            }
            ChunkType::ResponseCode => self.dispatch_response_code(session_id, &payload).await,
            ChunkType::ContentLength => self.dispatch_content_length(session_id, &payload),
            ChunkType::MetricFromPlugin => Ok(Some((Verdict::Irrelevant, true))),
            ChunkType::HoldData => self.dispatch_hold_data(session_id, &payload).await,
        }
    }

    async fn dispatch_request_start(
        &mut self,
        session_id: SessionId,
        payload: &[u8],
    ) -> IntakeResult<Option<(Verdict, bool)>> {
        if payload.is_empty() {
            self.session_store.delete_entry(session_id);
            return Ok(Some(is_terminal(self.default_verdict())));
        }

        match codec::parse_transaction_metadata(payload) {
            Ok(metadata) => {
                self.session_store.recreate_entry(session_id);
                assert!(self.session_store.set_active_key(session_id));
                if let Some(opaque) = self.session_store.state_of_active_mut() {
                    opaque.metadata = Some(metadata.clone());
                }
                let verdict = self
                    .call_inspect(session_id, true, InspectionPayload::RequestStart(metadata))
                    .await;
                Ok(Some(is_terminal(verdict)))
            }
            Err(_) => {
                self.session_store.delete_entry(session_id);
                Ok(Some(is_terminal(self.default_verdict())))
            }
        }
    }

    async fn dispatch_header(
        &mut self,
        chunk_type: ChunkType,
        session_id: SessionId,
        payload: &[u8],
    ) -> IntakeResult<Option<(Verdict, bool)>> {
        if !self.session_store.set_active_key(session_id) {
            return Ok(None);
        }

        let is_request_header = chunk_type == ChunkType::RequestHeader;
        let next_index = {
            let opaque = self.session_store.state_of_active().unwrap();
            if is_request_header {
                opaque.next_request_header_index
            } else {
                opaque.next_response_header_index
            }
        };

        let (headers, next) = codec::parse_header_bulk(payload, next_index)?;

        {
            let opaque = self.session_store.state_of_active_mut().unwrap();
            if is_request_header {
                opaque.next_request_header_index = next;
            } else {
                opaque.next_response_header_index = next;
            }
        }

        if is_request_header {
            let resolved = source_identifier::resolve(&headers, &self.config.source_identifiers);
            let tenant_header_value = headers.find(&self.config.tenant_header).map(|h| h.value.clone());
            let opaque = self.session_store.state_of_active_mut().unwrap();
            if let Some(candidate) = resolved.candidate {
                opaque.source_identifier.maybe_upgrade(candidate);
            }
            if let Some(proxy_ip) = resolved.proxy_ip {
                opaque.save("proxy_ip", proxy_ip);
            }
            if let Some(raw) = tenant_header_value {
                let (tenant, profile) = codec::parse_active_tenant_and_profile(&raw);
                opaque.tenant_id = tenant;
                opaque.profile_id = profile;
            }
        }

        let verdict = self
            .call_inspect(session_id, is_request_header, InspectionPayload::Headers(headers))
            .await;
        Ok(Some(is_terminal(verdict)))
    }

    async fn dispatch_body(
        &mut self,
        chunk_type: ChunkType,
        session_id: SessionId,
        payload: &[u8],
    ) -> IntakeResult<Option<(Verdict, bool)>> {
        if !self.session_store.set_active_key(session_id) {
            return Ok(None);
        }
        let mut body = codec::parse_body(payload)?;

        {
            let opaque = self.session_store.state_of_active_mut().unwrap();
            let stream = if chunk_type == ChunkType::RequestBody {
                &mut opaque.request_compression
            } else {
                &mut opaque.response_compression
            };
            match stream.decompress(&body.data) {
                Ok((decoded, _)) => body.data = decoded,
                Err(e) => {
                    self.metrics.record_compression_failure();
                    return Err(e);
                }
            }
            self.metrics.record_compression_success();
        }

        let is_request = chunk_type == ChunkType::RequestBody;
        let verdict = self
            .call_inspect(session_id, is_request, InspectionPayload::Body(body))
            .await;
        Ok(Some(is_terminal(verdict)))
    }

    async fn dispatch_response_code(
        &mut self,
        session_id: SessionId,
        payload: &[u8],
    ) -> IntakeResult<Option<(Verdict, bool)>> {
        if !self.session_store.set_active_key(session_id) {
            return Ok(None);
        }
        let (status, encoding) = codec::parse_response_code(payload)?;
        self.session_store.set_expiration(RESPONSE_CODE_TTL);

        if let Some(opaque) = self.session_store.state_of_active_mut() {
            if let Some(metadata) = opaque.metadata.as_mut() {
                metadata.response_content_encoding = encoding;
            }
        }

        self.metrics.record_response_inspection();
        let verdict = self
            .call_inspect(
                session_id,
                false,
                InspectionPayload::ResponseCode {
                    status,
                    content_encoding: encoding,
                },
            )
            .await;
        Ok(Some(is_terminal(verdict)))
    }

    /// Synthesizes an `Inject` verdict replacing the outgoing
    /// `Content-Length` header, unconditionally and without consulting
    /// `HttpManager` (ported as-is, not "fixed" — see DESIGN.md).
    fn dispatch_content_length(
        &mut self,
        session_id: SessionId,
        payload: &[u8],
    ) -> IntakeResult<Option<(Verdict, bool)>> {
        if !self.session_store.set_active_key(session_id) {
            return Ok(None);
        }
        let length = codec::parse_content_length(payload)?;

        let modification = vigil_protocol::ModificationDescriptor::new(
            0,
            vigil_protocol::verdict::IRRELEVANT_POSITION,
            vigil_protocol::ModificationType::Replace,
            true,
            length.to_string().into_bytes(),
        );
        let verdict = Verdict::Inject(vec![modification]);
        Ok(Some(is_terminal(verdict)))
    }

    async fn dispatch_hold_data(
        &mut self,
        session_id: SessionId,
        _payload: &[u8],
    ) -> IntakeResult<Option<(Verdict, bool)>> {
        if !self.session_store.set_active_key(session_id) {
            return Ok(None);
        }
        let (tenant_id, profile_id) = self.current_tenant_profile();
        let input = InspectionInput {
            session_id,
            is_request: true,
            tenant_id,
            profile_id,
            payload: InspectionPayload::End,
        };
        let verdict = match tokio::time::timeout(
            Duration::from_millis(self.config.processing_timeout_ms),
            self.http_manager.inspect_delayed_verdict(input),
        )
        .await
        {
            Ok(verdict) => verdict,
            Err(_) => self.default_verdict(),
        };
        Ok(Some(is_terminal(verdict)))
    }

    fn current_tenant_profile(&self) -> (String, String) {
        match self.session_store.state_of_active() {
            Some(opaque) => (opaque.tenant_id.clone(), opaque.profile_id.clone()),
            None => (String::new(), String::new()),
        }
    }

    /// Calls `HttpManager::inspect`, bounded by the configured processing
    /// timeout; expiry delivers the default verdict (§5 "Cancellation and
    /// timeouts").
    async fn call_inspect(
        &mut self,
        session_id: SessionId,
        is_request: bool,
        payload: InspectionPayload,
    ) -> Verdict {
        let (tenant_id, profile_id) = self.current_tenant_profile();
        let input = InspectionInput {
            session_id,
            is_request,
            tenant_id,
            profile_id,
            payload,
        };
        match tokio::time::timeout(
            Duration::from_millis(self.config.processing_timeout_ms),
            self.http_manager.inspect(input),
        )
        .await
        {
            Ok(verdict) => verdict,
            Err(_) => self.default_verdict(),
        }
    }

    fn default_verdict(&self) -> Verdict {
        if self.config.fail_open_mode {
            Verdict::Accept
        } else {
            Verdict::Drop(WebResponseDescriptor::Custom {
                response_code: 403,
                title: "Forbidden".to_string(),
                body: "Request blocked".to_string(),
                incident_uuid: Uuid::new_v4().to_string(),
            })
        }
    }

    async fn read_signal(&self, stream: &mut UnixStream) -> IntakeResult<SessionId> {
        let mut last_err = None;
        for attempt in 0..READ_RETRIES {
            if attempt > 0 {
                tokio::task::yield_now().await;
            }
            let mut buf = [0u8; 4];
            match stream.read_exact(&mut buf).await {
                Ok(()) => return Ok(SessionId(u32::from_le_bytes(buf))),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap().into())
    }

    async fn send_signal(&self, stream: &mut UnixStream, session_id: SessionId) -> IntakeResult<()> {
        let mut last_err = None;
        for attempt in 0..READ_RETRIES {
            if attempt > 0 {
                tokio::task::yield_now().await;
            }
            match stream.write_all(&session_id.0.to_le_bytes()).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap().into())
    }
}

fn is_terminal(verdict: Verdict) -> (Verdict, bool) {
    let terminal = verdict.is_terminal();
    (verdict, terminal)
}

/// `data_type:u16, session_id:u32` header, the rest is the chunk payload
/// (§6 "Ring frame (inbound)").
fn parse_frame_head(data: &[u8]) -> Option<(usize, u16, u32, &[u8])> {
    if data.len() < 6 {
        return None;
    }
    let chunk_type = u16::from_le_bytes([data[0], data[1]]);
    let session_id = u32::from_le_bytes([data[2], data[3], data[4], data[5]]);
    Some((data.len(), chunk_type, session_id, &data[6..]))
}

async fn read_u8(stream: &mut UnixStream) -> IntakeResult<u8> {
    let mut buf = [0u8; 1];
    stream.read_exact(&mut buf).await?;
    Ok(buf[0])
}

async fn read_u32(stream: &mut UnixStream) -> IntakeResult<u32> {
    let mut buf = [0u8; 4];
    stream.read_exact(&mut buf).await?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_frame_head_rejects_short_frames() {
        assert!(parse_frame_head(&[1, 2, 3]).is_none());
    }

    #[test]
    fn parse_frame_head_splits_tag_session_and_payload() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&42u32.to_le_bytes());
        data.extend_from_slice(b"payload");

        let (_, chunk_type, session_id, payload) = parse_frame_head(&data).unwrap();
        assert_eq!(chunk_type, 1);
        assert_eq!(session_id, 42);
        assert_eq!(payload, b"payload");
    }

    #[test]
    fn content_length_verdict_is_always_inject_and_nonterminal() {
        let config = Arc::new(IntakeConfig::default());
        let metrics = Arc::new(WorkerMetrics::new());
        let http_manager: Arc<dyn HttpManager> = Arc::new(crate::http_manager::AlwaysAcceptManager);

        let dir = tempfile::tempdir().unwrap();
        let mut worker = InspectionWorker::new(
            "worker-1".to_string(),
            dir.path().join("handler.sock"),
            dir.path().join("ring"),
            config,
            metrics,
            http_manager,
        )
        .unwrap();

        worker.session_store.create_entry(SessionId(9)).unwrap();
        let mut payload = Vec::new();
        payload.extend_from_slice(&128u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());

        let (verdict, terminal) = worker
            .dispatch_content_length(SessionId(9), &payload)
            .unwrap()
            .expect("known session must not be dropped");
        assert!(!terminal);
        match verdict {
            Verdict::Inject(mods) => {
                assert_eq!(mods.len(), 1);
                assert_eq!(mods[0].payload, b"128");
            }
            _ => panic!("expected Inject verdict"),
        }
    }

    #[test]
    fn content_length_for_unknown_session_is_dropped_silently() {
        let config = Arc::new(IntakeConfig::default());
        let metrics = Arc::new(WorkerMetrics::new());
        let http_manager: Arc<dyn HttpManager> = Arc::new(crate::http_manager::AlwaysAcceptManager);

        let dir = tempfile::tempdir().unwrap();
        let mut worker = InspectionWorker::new(
            "worker-1".to_string(),
            dir.path().join("handler.sock"),
            dir.path().join("ring"),
            config,
            metrics,
            http_manager,
        )
        .unwrap();

        let mut payload = Vec::new();
        payload.extend_from_slice(&128u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());

        let dispatched = worker.dispatch_content_length(SessionId(9), &payload).unwrap();
        assert!(dispatched.is_none());
    }
}
