use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::debug;

use crate::app::messages::{Request, Response};
use crate::app::Application;

#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum AppConnError {
    #[error("app connection stopped")]
    Stopped,
    #[error("unexpected app response: expected {expected}, got {got}")]
    UnexpectedResponse {
        expected: &'static str,
        got: &'static str,
    },
}

/// Callback invoked on the connection's worker thread for every completed
/// request, in request order.
pub type ResponseCallback = Box<dyn FnMut(&Request, &Response) + Send>;

/// Handle to an in-flight async request. Resolves once the worker has run
/// the request against the application.
pub struct ReqRes {
    rx: Receiver<Response>,
}

impl ReqRes {
    pub fn wait(self) -> Result<Response, AppConnError> {
        self.rx.recv().map_err(|_| AppConnError::Stopped)
    }
}

enum WorkItem {
    Call { req: Request, res_tx: Sender<Response> },
    Flush { done: Sender<()> },
}

/// One ordered request/response stream to the application, driven by a
/// dedicated worker thread. Cloning shares the same stream.
#[derive(Clone)]
pub struct AppClient {
    queue: Sender<WorkItem>,
    err: Arc<Mutex<Option<AppConnError>>>,
    callback: Arc<Mutex<Option<ResponseCallback>>>,
}

impl AppClient {
    pub fn new(app: Arc<Mutex<dyn Application>>) -> Self {
        let (queue, rx) = unbounded::<WorkItem>();
        let callback: Arc<Mutex<Option<ResponseCallback>>> = Arc::new(Mutex::new(None));
        let worker_cb = Arc::clone(&callback);
        thread::spawn(move || worker(rx, app, worker_cb));
        Self {
            queue,
            err: Arc::new(Mutex::new(None)),
            callback,
        }
    }

    /// Register the response callback. Replaces any previous one.
    pub fn set_response_callback(&self, cb: ResponseCallback) {
        *self.callback.lock().unwrap_or_else(|e| e.into_inner()) = Some(cb);
    }

    /// The sticky connection error, if the worker has gone away.
    pub fn error(&self) -> Option<AppConnError> {
        self.err.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Enqueue a request; the returned handle resolves on completion.
    pub fn call_async(&self, req: Request) -> Result<ReqRes, AppConnError> {
        let (res_tx, rx) = bounded(1);
        self.queue
            .send(WorkItem::Call { req, res_tx })
            .map_err(|_| self.record_stopped())?;
        Ok(ReqRes { rx })
    }

    /// Run a request to completion.
    pub fn call_sync(&self, req: Request) -> Result<Response, AppConnError> {
        let res = self.call_async(req)?.wait();
        if res.is_err() {
            self.record_stopped();
        }
        res
    }

    /// Block until every previously enqueued request has completed.
    pub fn flush(&self) -> Result<(), AppConnError> {
        let (done, rx) = bounded(1);
        self.queue
            .send(WorkItem::Flush { done })
            .map_err(|_| self.record_stopped())?;
        rx.recv().map_err(|_| self.record_stopped())
    }

    fn record_stopped(&self) -> AppConnError {
        let mut err = self.err.lock().unwrap_or_else(|e| e.into_inner());
        if err.is_none() {
            *err = Some(AppConnError::Stopped);
        }
        AppConnError::Stopped
    }
}

fn worker(
    rx: Receiver<WorkItem>,
    app: Arc<Mutex<dyn Application>>,
    callback: Arc<Mutex<Option<ResponseCallback>>>,
) {
    while let Ok(item) = rx.recv() {
        match item {
            WorkItem::Call { req, res_tx } => {
                let res = {
                    let mut app = app.lock().unwrap_or_else(|e| e.into_inner());
                    dispatch(&mut *app, &req)
                };
                {
                    let mut cb = callback.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(cb) = cb.as_mut() {
                        cb(&req, &res);
                    }
                }
                // receiver may have been dropped (fire-and-forget async call)
                let _ = res_tx.send(res);
            }
            WorkItem::Flush { done } => {
                let _ = done.send(());
            }
        }
    }
    debug!("app connection worker stopped");
}

fn dispatch(app: &mut dyn Application, req: &Request) -> Response {
    match req {
        Request::Info(r) => Response::Info(app.info(r.clone())),
        Request::InitChain(r) => Response::InitChain(app.init_chain(r.clone())),
        Request::BeginBlock(r) => Response::BeginBlock(app.begin_block(r.clone())),
        Request::DeliverTx(tx) => Response::DeliverTx(app.deliver_tx(tx)),
        Request::EndBlock(r) => Response::EndBlock(app.end_block(r.clone())),
        Request::Commit => Response::Commit(app.commit()),
        Request::CheckTx(tx) => Response::CheckTx(app.check_tx(tx)),
        Request::Query(r) => Response::Query(app.query(r.clone())),
    }
}
