//! Prepared calls and the three ways of running them.

use std::sync::Arc;

use log::debug;
use reqwest::{Client, Request};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::interceptor::{Interceptor, Next};
use crate::response::{HttpResponse, Received, RequestSnapshot};

enum Prepared {
    Ready {
        client: Client,
        stages: Vec<Arc<dyn Interceptor>>,
        request: Request,
    },
    /// Configuration failed while preparing; running the call reports this error.
    Failed(Error),
}

/// A finalized request bound to its client and interceptor pipeline.
///
/// Produced by [`HttpRequest::prepare`](crate::HttpRequest::prepare). Configuration is frozen:
/// replacing the context's transport afterwards does not change the call.
pub struct Call {
    dispatcher: Arc<Dispatcher>,
    snapshot: RequestSnapshot,
    prepared: Prepared,
    cancel: CancellationToken,
}

impl Call {
    pub(crate) fn ready(
        dispatcher: Arc<Dispatcher>,
        snapshot: RequestSnapshot,
        client: Client,
        stages: Vec<Arc<dyn Interceptor>>,
        request: Request,
    ) -> Self {
        Self {
            dispatcher,
            snapshot,
            prepared: Prepared::Ready {
                client,
                stages,
                request,
            },
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn failed(
        dispatcher: Arc<Dispatcher>,
        snapshot: RequestSnapshot,
        error: Error,
    ) -> Self {
        Self {
            dispatcher,
            snapshot,
            prepared: Prepared::Failed(error),
            cancel: CancellationToken::new(),
        }
    }

    pub fn request(&self) -> &RequestSnapshot {
        &self.snapshot
    }

    /// Names of the pipeline stages, outermost first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        match &self.prepared {
            Prepared::Ready { stages, .. } => stages.iter().map(|stage| stage.name()).collect(),
            Prepared::Failed(_) => Vec::new(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    #[cfg(test)]
    pub(crate) fn request_body(&self) -> Option<&[u8]> {
        match &self.prepared {
            Prepared::Ready { request, .. } => request.body().and_then(|body| body.as_bytes()),
            Prepared::Failed(_) => None,
        }
    }

    /// Runs the call to completion on the calling thread.
    pub fn execute(self) -> HttpResponse {
        let dispatcher = Arc::clone(&self.dispatcher);
        let snapshot = self.snapshot.clone();
        match dispatcher.block_on(self.send()) {
            Ok(response) => response,
            Err(e) => HttpResponse::failed(snapshot, e),
        }
    }

    /// Runs the call on the current runtime.
    #[tracing::instrument(skip_all, fields(method = %self.snapshot.method(), url = %self.snapshot.url()))]
    pub async fn send(self) -> HttpResponse {
        let Call {
            snapshot,
            prepared,
            cancel,
            ..
        } = self;

        let (client, stages, request) = match prepared {
            Prepared::Ready {
                client,
                stages,
                request,
            } => (client, stages, request),
            Prepared::Failed(error) => return HttpResponse::failed(snapshot, error),
        };

        let run = async {
            let response = Next::new(&client, &stages, &cancel).run(request).await?;
            Received::read(response).await
        };
        // The pipeline is polled first so stages that watch for cancellation can report it.
        let outcome: Result<Received> = tokio::select! {
            biased;
            outcome = run => outcome,
            _ = cancel.cancelled() => Err(Error::Canceled),
        };

        if let Err(e) = &outcome {
            debug!("call: {} {} failed: {}", snapshot.method(), snapshot.url(), e);
        }
        HttpResponse::from_outcome(snapshot, outcome)
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("request", &self.snapshot)
            .field("stages", &self.stage_names())
            .field("canceled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Cancels a call from anywhere.
///
/// An in-flight attempt is aborted, a pending retry wait is cut short and no further attempt
/// starts. The call then ends with [`Error::Canceled`].
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.0.is_cancelled()
    }
}

type ResponseCallback = Box<dyn FnOnce(HttpResponse) + Send>;
type FailureCallback = Box<dyn FnOnce(RequestSnapshot, Error) + Send>;

/// A call run in the background, reporting through callbacks.
///
/// Exactly one callback runs once every stage, retries included, has finished:
/// - the call failed: `on_failure`;
/// - a 2xx response and `on_success` is set: `on_success`;
/// - any other response: `on_response`, if set.
pub struct AsyncCall {
    call: Call,
    callbacks: Callbacks,
}

#[derive(Default)]
struct Callbacks {
    on_success: Option<ResponseCallback>,
    on_response: Option<ResponseCallback>,
    on_failure: Option<FailureCallback>,
}

impl AsyncCall {
    pub(crate) fn new(call: Call) -> Self {
        Self {
            call,
            callbacks: Callbacks::default(),
        }
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(HttpResponse) + Send + 'static,
    {
        self.callbacks.on_success = Some(Box::new(callback));
        self
    }

    pub fn on_response<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(HttpResponse) + Send + 'static,
    {
        self.callbacks.on_response = Some(Box::new(callback));
        self
    }

    pub fn on_failure<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(RequestSnapshot, Error) + Send + 'static,
    {
        self.callbacks.on_failure = Some(Box::new(callback));
        self
    }

    /// Starts the call and returns immediately.
    ///
    /// Runs on the ambient tokio runtime when there is one, otherwise on the dispatcher.
    pub fn enqueue(self) -> CallHandle {
        let AsyncCall { call, callbacks } = self;
        let cancel = call.cancel_handle();

        let handle = match call.dispatcher.handle() {
            Ok(handle) => handle,
            Err(e) => {
                callbacks.deliver(HttpResponse::failed(call.snapshot.clone(), e));
                return CallHandle { cancel, task: None };
            }
        };

        let task = handle.spawn(async move {
            let response = call.send().await;
            callbacks.deliver(response);
        });
        CallHandle {
            cancel,
            task: Some(task),
        }
    }
}

impl Callbacks {
    fn deliver(self, mut response: HttpResponse) {
        if let Some(error) = response.take_error() {
            match self.on_failure {
                Some(callback) => callback(response.request().clone(), error),
                None => debug!("call: failure not handled: {}", error),
            }
            return;
        }

        if response.is_success() {
            if let Some(callback) = self.on_success {
                return callback(response);
            }
        }
        match self.on_response {
            Some(callback) => callback(response),
            None => debug!("call: response {:?} not handled", response.status()),
        }
    }
}

impl std::fmt::Debug for AsyncCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCall")
            .field("call", &self.call)
            .finish_non_exhaustive()
    }
}

/// Handle to an enqueued call.
#[derive(Debug)]
pub struct CallHandle {
    cancel: CancelHandle,
    task: Option<JoinHandle<()>>,
}

impl CallHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_canceled()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Waits until the callback has run.
    pub async fn join(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::test_support::*;
    use crate::interceptor::{RetryInterceptor, RetryPolicy};
    use crate::method::Method;
    use std::sync::mpsc;
    use std::time::Duration;

    fn snapshot() -> RequestSnapshot {
        RequestSnapshot::new(
            Method::Get,
            "http://localhost/".parse().unwrap(),
            Default::default(),
        )
    }

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::with_threads(1))
    }

    fn call(dispatcher: &Arc<Dispatcher>, stages: Vec<Arc<dyn Interceptor>>) -> Call {
        Call::ready(
            Arc::clone(dispatcher),
            snapshot(),
            Client::new(),
            stages,
            get("http://localhost/"),
        )
    }

    #[test]
    fn test_execute_blocks_for_response() {
        let dispatcher = dispatcher();
        let response = call(&dispatcher, vec![ScriptedStage::new(vec![Scripted::Status(201)])])
            .execute();
        assert_eq!(response.status().map(|s| s.as_u16()), Some(201));
        assert_eq!(response.text(), "status 201");
    }

    #[test]
    fn test_failed_preparation_is_reported_at_execution() {
        let call = Call::failed(
            dispatcher(),
            snapshot(),
            Error::Body("unreadable".into()),
        );
        assert!(call.stage_names().is_empty());
        let response = call.execute();
        assert!(matches!(response.error(), Some(Error::Body(_))));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_retry_wait() {
        let terminal = ScriptedStage::always_refused();
        let dispatcher = dispatcher();
        let call = call(&dispatcher, vec![
            Arc::new(RetryInterceptor::new(RetryPolicy::new(5, 10_000))),
            terminal.clone(),
        ]);
        let cancel = call.cancel_handle();

        let task = tokio::spawn(call.send());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let response = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(response.error().unwrap().is_canceled());
        assert_eq!(terminal.attempts(), 1);
    }

    #[test]
    fn test_async_success_callback() {
        let dispatcher = dispatcher();
        let (tx, rx) = mpsc::channel();
        let failure_tx = tx.clone();
        AsyncCall::new(call(&dispatcher, vec![ScriptedStage::new(vec![Scripted::Status(200)])]))
            .on_success(move |response| tx.send(format!("ok {}", response.text())).unwrap())
            .on_failure(move |_, e| failure_tx.send(format!("failed {}", e)).unwrap())
            .enqueue();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "ok status 200"
        );
    }

    #[test]
    fn test_async_non_success_goes_to_on_response() {
        let dispatcher = dispatcher();
        let (tx, rx) = mpsc::channel();
        let success_tx = tx.clone();
        AsyncCall::new(call(&dispatcher, vec![ScriptedStage::new(vec![Scripted::Status(404)])]))
            .on_success(move |_| success_tx.send(0).unwrap())
            .on_response(move |response| {
                tx.send(response.status().map_or(0, |s| s.as_u16())).unwrap()
            })
            .enqueue();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 404);
    }

    #[tokio::test]
    async fn test_async_failure_after_retries() {
        let terminal = ScriptedStage::always_refused();
        let dispatcher = dispatcher();
        let (tx, rx) = mpsc::channel();
        let handle = AsyncCall::new(call(&dispatcher, vec![
            Arc::new(RetryInterceptor::new(RetryPolicy::new(3, 0))),
            terminal.clone(),
        ]))
        .on_failure(move |request, e| tx.send((request.url().clone(), e.is_network())).unwrap())
        .enqueue();

        handle.join().await;
        let (url, network) = rx.try_recv().unwrap();
        assert_eq!(url.as_str(), "http://localhost/");
        assert!(network);
        assert_eq!(terminal.attempts(), 3);
        assert!(rx.try_recv().is_err());
    }
}
