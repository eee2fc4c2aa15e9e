//! The HTTP sink: one dedicated thread owning the client and an event loop
//! multiplexing every in-flight request.
//!
//! The loop alternates between a bounded (500 ms) wait on the inbound
//! request queue and completions from the in-flight set. Transport errors
//! are retried immediately up to the request's `max_try_cnt`, with the
//! queue item left `Sending` the whole time; the final outcome is delivered
//! exactly once through `on_send_done`. HTTP-level errors are not retried
//! here, the owning flusher classifies them.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use logpipe::metrics::{
    Counter, Gauge, MetricsRecord, MetricsRegistry, METRIC_RUNNER_IN_ITEMS_TOTAL,
    METRIC_RUNNER_LAST_RUN_TIME, METRIC_RUNNER_SINK_FAILED_RESPONSE_TIME_MS,
    METRIC_RUNNER_SINK_OUT_FAILED_ITEMS_TOTAL, METRIC_RUNNER_SINK_OUT_SUCCESSFUL_ITEMS_TOTAL,
    METRIC_RUNNER_SINK_SENDING_ITEMS_TOTAL, METRIC_RUNNER_SINK_SUCCESSFUL_RESPONSE_TIME_MS,
};
use logpipe::{pipe_debug, pipe_error, pipe_info, pipe_warn, unix_now};
use logpipe_pipeline::queue::SenderQueueItem;
use logpipe_pipeline::{HttpRequest, HttpResponse};
use tokio::sync::mpsc;

const INBOUND_QUEUE_CAPACITY: usize = 1024;
const RECV_WAIT: Duration = Duration::from_millis(500);
const STOP_WAIT: Duration = Duration::from_secs(1);

/// One request handed to the sink, paired with the queue item it ships.
pub struct SinkRequest {
    pub request: HttpRequest,
    pub item: Arc<SenderQueueItem>,
}

impl fmt::Debug for SinkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkRequest")
            .field("url", &self.request.url())
            .field("item", &self.item)
            .finish()
    }
}

struct SinkMetrics {
    _record: Arc<MetricsRecord>,
    in_items_total: Arc<Counter>,
    out_successful_items_total: Arc<Counter>,
    out_failed_items_total: Arc<Counter>,
    successful_response_time_ms: Arc<Counter>,
    failed_response_time_ms: Arc<Counter>,
    sending_items_total: Arc<Gauge>,
    last_run_time: Arc<Gauge>,
}

/// Process-wide HTTP egress worker.
pub struct HttpSink {
    tx: Mutex<Option<mpsc::Sender<SinkRequest>>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_flush: Arc<AtomicBool>,
    metrics: Arc<SinkMetrics>,
}

impl HttpSink {
    pub fn new(registry: &MetricsRegistry) -> Arc<Self> {
        let record = registry.register(vec![(
            "runner_name".to_owned(),
            "http_sink".to_owned(),
        )]);
        let metrics = Arc::new(SinkMetrics {
            in_items_total: record.counter(METRIC_RUNNER_IN_ITEMS_TOTAL),
            out_successful_items_total: record
                .counter(METRIC_RUNNER_SINK_OUT_SUCCESSFUL_ITEMS_TOTAL),
            out_failed_items_total: record.counter(METRIC_RUNNER_SINK_OUT_FAILED_ITEMS_TOTAL),
            successful_response_time_ms: record
                .counter(METRIC_RUNNER_SINK_SUCCESSFUL_RESPONSE_TIME_MS),
            failed_response_time_ms: record.counter(METRIC_RUNNER_SINK_FAILED_RESPONSE_TIME_MS),
            sending_items_total: record.gauge(METRIC_RUNNER_SINK_SENDING_ITEMS_TOTAL),
            last_run_time: record.gauge(METRIC_RUNNER_LAST_RUN_TIME),
            _record: record,
        });
        Arc::new(HttpSink {
            tx: Mutex::new(None),
            handle: Mutex::new(None),
            is_flush: Arc::new(AtomicBool::new(false)),
            metrics,
        })
    }

    /// Spawn the worker thread. Idempotent only before `stop`.
    pub fn start(&self) -> bool {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let is_flush = self.is_flush.clone();
        let metrics = self.metrics.clone();
        let handle = match thread::Builder::new()
            .name("logpipe.HttpSink".to_owned())
            .spawn(move || worker(rx, is_flush, metrics))
        {
            Ok(handle) => handle,
            Err(err) => {
                pipe_error!(name: "HttpSink.SpawnFailed", error = err.to_string());
                return false;
            }
        };
        *self.tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        pipe_info!(name: "HttpSink.Started");
        true
    }

    /// Hand a request to the worker; `false` means the sink is stopped or
    /// its inbound queue never drained.
    pub fn add_request(&self, request: HttpRequest, item: Arc<SenderQueueItem>) -> bool {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = tx.as_ref() else {
            return false;
        };
        item.mark_sent();
        tx.blocking_send(SinkRequest { request, item }).is_ok()
    }

    /// Flag the flush, close the inbound queue and give the worker up to a
    /// second to drain before abandoning it.
    pub fn stop(&self) {
        self.is_flush.store(true, Ordering::Release);
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();

        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let deadline = Instant::now() + STOP_WAIT;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                let _ = handle.join();
                pipe_info!(name: "HttpSink.Stopped");
            } else {
                pipe_warn!(name: "HttpSink.ForcedStop");
            }
        }
    }

    pub fn sending_items(&self) -> i64 {
        self.metrics.sending_items_total.get()
    }
}

impl fmt::Debug for HttpSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpSink")
            .field("sending_items", &self.sending_items())
            .finish()
    }
}

fn worker(rx: mpsc::Receiver<SinkRequest>, is_flush: Arc<AtomicBool>, metrics: Arc<SinkMetrics>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            pipe_error!(name: "HttpSink.RuntimeBuildFailed", error = err.to_string());
            return;
        }
    };
    runtime.block_on(run_loop(rx, is_flush, metrics));
}

async fn run_loop(
    mut rx: mpsc::Receiver<SinkRequest>,
    is_flush: Arc<AtomicBool>,
    metrics: Arc<SinkMetrics>,
) {
    let client = match reqwest::Client::builder().build() {
        Ok(client) => client,
        Err(err) => {
            pipe_error!(name: "HttpSink.ClientBuildFailed", error = err.to_string());
            return;
        }
    };

    let mut in_flight: InFlight = FuturesUnordered::new();
    let mut inbound_closed = false;
    loop {
        metrics.last_run_time.set(unix_now() as i64);
        tokio::select! {
            biased;

            Some((request, result, elapsed)) = in_flight.next(), if !in_flight.is_empty() => {
                handle_completion(&client, request, result, elapsed, &metrics, &mut in_flight);
            }

            received = tokio::time::timeout(RECV_WAIT, rx.recv()), if !inbound_closed => {
                match received {
                    Ok(Some(request)) => {
                        metrics.in_items_total.add(1);
                        metrics.sending_items_total.add(1);
                        pipe_debug!(
                            name: "HttpSink.RequestAccepted",
                            url = request.request.url(),
                            try_cnt = request.item.try_cnt(),
                        );
                        in_flight.push(Box::pin(perform(client.clone(), request)));
                    }
                    Ok(None) => inbound_closed = true,
                    Err(_) => {}
                }
            }

            else => {
                // No in-flight work and the inbound queue is closed.
                break;
            }
        }

        if is_flush.load(Ordering::Acquire) && in_flight.is_empty() && rx.is_empty() {
            break;
        }
    }
    pipe_debug!(name: "HttpSink.LoopExited");
}

async fn perform(
    client: reqwest::Client,
    request: SinkRequest,
) -> (SinkRequest, Result<HttpResponse, String>, Duration) {
    let url = request.request.url();
    let mut builder = client
        .request(request.request.method.clone(), &url)
        .timeout(request.request.timeout)
        .body(request.request.body.clone());
    for (key, value) in &request.request.headers {
        builder = builder.header(key, value);
    }

    let started = Instant::now();
    let result = async {
        let response = builder.send().await.map_err(|e| e.to_string())?;
        let status_code = response.status().as_u16();
        let body = response.bytes().await.unwrap_or_default();
        Ok(HttpResponse { status_code, body })
    }
    .await;
    (request, result, started.elapsed())
}

type InFlight = FuturesUnordered<
    std::pin::Pin<
        Box<dyn std::future::Future<Output = (SinkRequest, Result<HttpResponse, String>, Duration)>>,
    >,
>;

fn handle_completion(
    client: &reqwest::Client,
    request: SinkRequest,
    result: Result<HttpResponse, String>,
    elapsed: Duration,
    metrics: &SinkMetrics,
    in_flight: &mut InFlight,
) {
    match result {
        Ok(response) => {
            pipe_debug!(
                name: "HttpSink.RequestCompleted",
                status = response.status_code,
                response_time_ms = elapsed.as_millis() as u64,
            );
            dispatch_send_done(&request, &response);
            metrics.out_successful_items_total.add(1);
            metrics
                .successful_response_time_ms
                .add(elapsed.as_millis() as u64);
            metrics.sending_items_total.sub(1);
        }
        Err(err) => {
            let try_cnt = request.item.increase_try_cnt();
            if try_cnt < request.request.max_try_cnt {
                pipe_warn!(
                    name: "HttpSink.RetryingAfterTransportError",
                    error = err.as_str(),
                    try_cnt = try_cnt,
                );
                // The item stays Sending across immediate retries.
                in_flight.push(Box::pin(perform(client.clone(), request)));
            } else {
                pipe_warn!(
                    name: "HttpSink.TransportRetriesExhausted",
                    error = err.as_str(),
                    try_cnt = try_cnt,
                );
                dispatch_send_done(&request, &HttpResponse::default());
                metrics.out_failed_items_total.add(1);
                metrics
                    .failed_response_time_ms
                    .add(elapsed.as_millis() as u64);
                metrics.sending_items_total.sub(1);
            }
        }
    }
}

fn dispatch_send_done(request: &SinkRequest, response: &HttpResponse) {
    if let Some(flusher) = request.item.flusher.upgrade() {
        flusher.on_send_done(response, &request.item);
    }
}
