use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const BASE_TIMESTAMP: u64 = 1_700_000_000;
const GAS_PER_TX: u64 = 21_000;

/// Deterministic `0x`-prefixed 32-byte hash.
pub fn mock_hash(tag: u8, height: u64, index: u64) -> String {
    format!("0x{tag:02x}{height:046x}{index:016x}")
}

pub fn block_hash(height: u64) -> String {
    mock_hash(0xb1, height, 0)
}

pub fn tx_hash(height: u64, index: u64) -> String {
    mock_hash(0x7a, height, index)
}

#[derive(Clone)]
pub struct MockChain {
    inner: Arc<RwLock<MockChainInner>>,
    tip: Arc<AtomicU64>,
    block_requests: Arc<AtomicU64>,
}

struct MockChainInner {
    length: u64,
    txs_per_block: u64,
    missing_receipts: HashSet<String>,
    failing_fetches: HashMap<u64, u32>,
}

impl MockChain {
    /// Chain of `length` blocks (`0..length`), all visible, each carrying
    /// `txs_per_block` transactions.
    pub fn new(length: u64, txs_per_block: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MockChainInner {
                length,
                txs_per_block,
                missing_receipts: HashSet::new(),
                failing_fetches: HashMap::new(),
            })),
            tip: Arc::new(AtomicU64::new(length.saturating_sub(1))),
            block_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn tip(&self) -> u64 {
        self.tip.load(Ordering::SeqCst)
    }

    pub fn max_height(&self) -> u64 {
        self.inner
            .read()
            .expect("mock chain poisoned")
            .length
            .saturating_sub(1)
    }

    pub fn txs_per_block(&self) -> u64 {
        self.inner.read().expect("mock chain poisoned").txs_per_block
    }

    pub fn set_tip(&self, tip: u64) {
        self.tip.store(tip.min(self.max_height()), Ordering::SeqCst);
    }

    pub fn advance_tip_by(&self, delta: u64) -> u64 {
        let next = self.tip().saturating_add(delta).min(self.max_height());
        self.tip.store(next, Ordering::SeqCst);
        next
    }

    /// `eth_getTransactionReceipt` returns `null` for this transaction.
    pub fn drop_receipt(&self, hash: impl Into<String>) {
        self.inner
            .write()
            .expect("mock chain poisoned")
            .missing_receipts
            .insert(hash.into());
    }

    /// The next `times` full-block requests for `height` fail with a server error.
    pub fn fail_block_fetches(&self, height: u64, times: u32) {
        self.inner
            .write()
            .expect("mock chain poisoned")
            .failing_fetches
            .insert(height, times);
    }

    /// Number of `eth_getBlockBy*` calls served so far.
    pub fn block_requests(&self) -> u64 {
        self.block_requests.load(Ordering::SeqCst)
    }

    fn visible(&self, height: u64) -> bool {
        height <= self.tip()
    }

    fn take_failure(&self, height: u64) -> bool {
        let mut inner = self.inner.write().expect("mock chain poisoned");
        match inner.failing_fetches.get_mut(&height) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn height_for_hash(&self, hash: &str) -> Option<u64> {
        let tip = self.tip();
        (0..=tip).find(|height| block_hash(*height) == hash)
    }

    fn block_json(&self, height: u64, full: bool) -> Value {
        let count = self.txs_per_block();
        let transactions: Vec<Value> = (0..count)
            .map(|index| {
                if full {
                    transaction_json(height, index)
                } else {
                    Value::String(tx_hash(height, index))
                }
            })
            .collect();
        let parent_hash = if height == 0 {
            format!("0x{}", "0".repeat(64))
        } else {
            block_hash(height - 1)
        };

        json!({
            "number": format!("{height:#x}"),
            "hash": block_hash(height),
            "parentHash": parent_hash,
            "timestamp": format!("{:#x}", BASE_TIMESTAMP + height * 12),
            "gasUsed": format!("{:#x}", GAS_PER_TX * count),
            "gasLimit": "0x1c9c380",
            "transactions": transactions,
        })
    }

    fn receipt_json(&self, hash: &str) -> Value {
        let inner = self.inner.read().expect("mock chain poisoned");
        if inner.missing_receipts.contains(hash) {
            return Value::Null;
        }
        json!({
            "transactionHash": hash,
            "status": "0x1",
            "gasUsed": format!("{GAS_PER_TX:#x}"),
        })
    }
}

fn transaction_json(height: u64, index: u64) -> Value {
    json!({
        "hash": tx_hash(height, index),
        "blockHash": block_hash(height),
        "blockNumber": format!("{height:#x}"),
        "transactionIndex": format!("{index:#x}"),
        "from": format!("0x{:040x}", 0x1000 + index),
        "to": format!("0x{:040x}", 0x2000 + height),
        "value": format!("{:#x}", 1_000 + index),
        "gas": format!("{GAS_PER_TX:#x}"),
        "gasPrice": "0x3b9aca00",
    })
}

pub struct MockRpcServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRpcServer {
    pub async fn start(chain: MockChain) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock RPC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let chain = chain.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(chain.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(chain: MockChain, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = match payload {
        Value::Array(calls) => Value::Array(
            calls
                .into_iter()
                .map(|call| handle_call(&chain, call))
                .collect(),
        ),
        call => handle_call(&chain, call),
    };

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(chain: &MockChain, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let full = params.get(1).and_then(Value::as_bool).unwrap_or(false);

    match method.as_str() {
        "eth_blockNumber" => success(id, json!(format!("{:#x}", chain.tip()))),
        "eth_getBlockByNumber" => {
            chain.block_requests.fetch_add(1, Ordering::SeqCst);
            let height = params
                .first()
                .and_then(Value::as_str)
                .and_then(|raw| raw.strip_prefix("0x"))
                .and_then(|digits| u64::from_str_radix(digits, 16).ok());
            match height {
                Some(height) if chain.take_failure(height) => {
                    error(id, -32000, "upstream node unavailable")
                }
                Some(height) if chain.visible(height) => success(id, chain.block_json(height, full)),
                Some(_) => success(id, Value::Null),
                None => error(id, -32602, "invalid block number"),
            }
        }
        "eth_getBlockByHash" => {
            chain.block_requests.fetch_add(1, Ordering::SeqCst);
            let height = params
                .first()
                .and_then(Value::as_str)
                .and_then(|hash| chain.height_for_hash(hash));
            match height {
                Some(height) => success(id, chain.block_json(height, full)),
                None => success(id, Value::Null),
            }
        }
        "eth_getTransactionReceipt" => match params.first().and_then(Value::as_str) {
            Some(hash) => success(id, chain.receipt_json(hash)),
            None => error(id, -32602, "missing transaction hash"),
        },
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
