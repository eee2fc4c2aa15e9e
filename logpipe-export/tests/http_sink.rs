//! End-to-end tests of the sender-queue → runner → HTTP sink path against a
//! local socket.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::Method;
use logpipe::metrics::METRIC_RUNNER_SINK_OUT_FAILED_ITEMS_TOTAL;
use logpipe::{EventGroup, PipelineContext};
use logpipe_export::runtime::AgentRuntime;
use logpipe_pipeline::error::FlushResult;
use logpipe_pipeline::flusher::{Flusher, HttpFlusher};
use logpipe_pipeline::queue::{QueueKey, RawDataType, SenderQueue, SenderQueueItem};
use logpipe_pipeline::{FlushError, HttpRequest, HttpResponse};

/// Minimal one-shot HTTP server: reads a request, answers `status`, closes.
fn spawn_http_server(status: u16) -> (u16, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind test listener");
    let port = listener.local_addr().expect("local addr").port();
    let handle = thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut buf = Vec::new();
        let mut tmp = [0u8; 1024];
        loop {
            let n = stream.read(&mut tmp).unwrap_or(0);
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&tmp[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&buf[..pos]).to_lowercase();
                let content_length = headers
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let mut remaining = content_length.saturating_sub(buf.len() - pos - 4);
                while remaining > 0 {
                    let n = stream.read(&mut tmp).unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    remaining = remaining.saturating_sub(n);
                }
                let response = format!(
                    "HTTP/1.1 {status} OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = stream.write_all(response.as_bytes());
                return;
            }
        }
    });
    (port, handle)
}

/// Port with nothing listening on it.
fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    listener.local_addr().expect("local addr").port()
}

#[derive(Default)]
struct RecordingFlusher {
    ctx: PipelineContext,
    target_port: AtomicU16,
    responses: Mutex<Vec<u16>>,
    queue: Mutex<Option<Arc<SenderQueue>>>,
}

impl RecordingFlusher {
    fn responses(&self) -> Vec<u16> {
        self.responses.lock().unwrap().clone()
    }

    fn wait_for_responses(&self, count: usize, timeout: Duration) -> Vec<u16> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let responses = self.responses();
            if responses.len() >= count {
                return responses;
            }
            thread::sleep(Duration::from_millis(20));
        }
        self.responses()
    }
}

impl Flusher for RecordingFlusher {
    fn name(&self) -> &'static str {
        "flusher_recording"
    }

    fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    fn send(&self, _group: EventGroup) -> FlushResult {
        Ok(())
    }

    fn flush(&self, _key: u64) -> FlushResult {
        Ok(())
    }

    fn flush_all(&self) -> FlushResult {
        Ok(())
    }

    fn sender_queue(&self) -> Option<Arc<SenderQueue>> {
        self.queue.lock().unwrap().clone()
    }
}

impl HttpFlusher for RecordingFlusher {
    fn build_request(&self, item: &Arc<SenderQueueItem>) -> Result<HttpRequest, FlushError> {
        let mut request = HttpRequest::new(Method::POST, "127.0.0.1");
        request.port = self.target_port.load(Ordering::SeqCst);
        request.path = "/ingest".to_owned();
        request.timeout = Duration::from_secs(5);
        request.body = item.data.clone();
        Ok(request)
    }

    fn on_send_done(&self, response: &HttpResponse, item: &Arc<SenderQueueItem>) {
        self.responses.lock().unwrap().push(response.status_code);
        if let Some(queue) = self.sender_queue() {
            if response.is_ok() {
                queue.remove(item);
            } else {
                queue.set_idle(item);
            }
        }
    }
}

fn item_for(flusher: &Arc<RecordingFlusher>, payload: &'static [u8]) -> Arc<SenderQueueItem> {
    let flusher_dyn: Arc<dyn HttpFlusher> = flusher.clone();
    let weak: Weak<dyn HttpFlusher> = Arc::downgrade(&flusher_dyn);
    Arc::new(SenderQueueItem::new(
        Bytes::from_static(payload),
        payload.len(),
        weak,
        QueueKey(1),
        RawDataType::EventGroup,
    ))
}

#[test]
fn completed_request_reports_status_to_flusher() {
    let runtime = AgentRuntime::new();
    runtime.sink().start();

    let (port, server) = spawn_http_server(200);
    let flusher = Arc::new(RecordingFlusher::default());
    flusher.target_port.store(port, Ordering::SeqCst);

    let item = item_for(&flusher, b"hello");
    let request = flusher.build_request(&item).unwrap();
    assert!(runtime.sink().add_request(request, item));

    let responses = flusher.wait_for_responses(1, Duration::from_secs(10));
    assert_eq!(responses, vec![200]);
    server.join().unwrap();
    runtime.stop();
}

#[test]
fn transport_retry_exhaustion_reports_exactly_once() {
    let runtime = AgentRuntime::new();
    runtime.sink().start();

    let flusher = Arc::new(RecordingFlusher::default());
    flusher.target_port.store(refused_port(), Ordering::SeqCst);

    let item = item_for(&flusher, b"doomed");
    let mut request = flusher.build_request(&item).unwrap();
    request.max_try_cnt = 3;
    assert!(runtime.sink().add_request(request, item.clone()));

    let responses = flusher.wait_for_responses(1, Duration::from_secs(10));
    // One final callback carrying the transport failure.
    assert_eq!(responses, vec![0]);
    assert_eq!(item.try_cnt(), 3);

    // The in-flight gauge returns to zero and exactly one item counted as
    // failed.
    let deadline = Instant::now() + Duration::from_secs(5);
    while runtime.sink().sending_items() != 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(runtime.sink().sending_items(), 0);

    let failed: u64 = runtime
        .metrics()
        .snapshot()
        .iter()
        .flat_map(|s| s.counters.iter())
        .filter(|(name, _)| name == METRIC_RUNNER_SINK_OUT_FAILED_ITEMS_TOTAL)
        .map(|(_, value)| *value)
        .sum();
    assert_eq!(failed, 1);
    runtime.stop();
}

#[test]
fn runner_drains_queue_through_sink() {
    let runtime = AgentRuntime::new();
    runtime.start();

    let (port, server) = spawn_http_server(200);
    let flusher = Arc::new(RecordingFlusher::default());
    flusher.target_port.store(port, Ordering::SeqCst);

    let ctx = PipelineContext::default();
    let queue = Arc::new(SenderQueue::new(QueueKey(7), "test#queue", &ctx));
    *flusher.queue.lock().unwrap() = Some(queue.clone());
    runtime.runner().register_queue(queue.clone());

    let flusher_dyn: Arc<dyn HttpFlusher> = flusher.clone();
    let weak: Weak<dyn HttpFlusher> = Arc::downgrade(&flusher_dyn);
    let item = SenderQueueItem::new(
        Bytes::from_static(b"queued payload"),
        14,
        weak,
        QueueKey(7),
        RawDataType::EventGroup,
    );
    assert!(queue.push(item));

    let responses = flusher.wait_for_responses(1, Duration::from_secs(10));
    assert_eq!(responses, vec![200]);

    // The completed item leaves the queue.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !queue.is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(queue.is_empty());
    server.join().unwrap();
    runtime.stop();
}
