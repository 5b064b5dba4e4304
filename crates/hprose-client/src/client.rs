use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use hprose_common::io::ClassRegistry;
use hprose_common::tags::TAG_END;
use hprose_common::{HproseError, List, Result, Value};
use tokio::runtime::Handle;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::codec::{self, BatchEntry};
use crate::config::ClientConfig;
use crate::context::{split_call_args, CallArg, Callback, Context, InvokeSettings, Outcome};
use crate::endpoints::EndpointSet;
use crate::filter::{Filter, FilterChain};
use crate::pending::{self, Call, Pending, Resolver};
use crate::topic::Topics;
use crate::transport::{self, Transport};

/// Longest pause between two retries of a call.
const MAX_RETRY_INTERVAL_MS: i64 = 5_000;
const RETRY_STEP_MS: i64 = 500;

/// Called after every switch to the next endpoint.
pub type FailswitchHook = Arc<dyn Fn(&Client) + Send + Sync>;

/// A call waiting to be sent.
struct Job {
    name: String,
    args: List,
    ctx: Context,
    resolver: Resolver<Value>,
}

/// Hands the synchronous slot to the next queued call when dropped, so a
/// job that panics still releases it.
struct SyncRelease(Client);

impl Drop for SyncRelease {
    fn drop(&mut self) {
        self.0.sync_done();
    }
}

#[derive(Default)]
struct SyncState {
    /// A synchronous call is in flight
    busy: bool,
    queue: VecDeque<Job>,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    endpoints: Mutex<EndpointSet>,
    transport: RwLock<Arc<dyn Transport>>,
    /// Supplied by the caller, so it survives endpoint changes
    custom_transport: bool,
    registry: Arc<ClassRegistry>,
    filters: FilterChain,
    method_settings: RwLock<HashMap<String, InvokeSettings>>,
    on_error: RwLock<Option<Callback>>,
    on_failswitch: RwLock<Option<FailswitchHook>>,
    sync: Mutex<SyncState>,
    batch: Mutex<Option<Vec<Job>>>,
    id: OnceCell<String>,
    pub(crate) topics: Mutex<Topics>,
}

/// Hprose RPC client.
///
/// Cheap to clone; clones share endpoints, connections, filters, settings
/// and subscriptions.
///
/// Calls start as soon as they are made and must be made from inside a tokio
/// runtime. Each call goes through the same pipeline: encode, outgoing
/// filters, transport (with retry and failover for idempotent calls),
/// incoming filters, decode, then callbacks.
///
/// # Example
///
/// ```rust,no_run
/// use hprose_client::{Client, InvokeSettings};
/// use hprose_common::Value;
///
/// # #[tokio::main]
/// # async fn main() -> hprose_common::Result<()> {
/// let client = Client::new(["http://127.0.0.1:8080/"])?;
/// let sum = client
///     .invoke("sum", vec![Value::from(1), Value::from(2)], InvokeSettings::new())
///     .await?;
/// println!("{:?}", sum);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

impl Client {
    /// Creates a client with the default configuration.
    ///
    /// # Errors
    ///
    /// [`HproseError::Configuration`] when the endpoint list is empty or uses
    /// an unsupported scheme.
    pub fn new<I, S>(uris: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_config(uris, ClientConfig::default())
    }

    pub fn with_config<I, S>(uris: I, config: ClientConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let uris: Vec<String> = uris.into_iter().map(Into::into).collect();
        let transport = transport::create(&uris, &config)?;
        Self::build(uris, config, transport, false)
    }

    /// Creates a client that sends every request through `transport`.
    pub fn with_transport<I, S>(uris: I, config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let uris: Vec<String> = uris.into_iter().map(Into::into).collect();
        Self::build(uris, config, transport, true)
    }

    fn build(
        uris: Vec<String>,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        custom_transport: bool,
    ) -> Result<Self> {
        let endpoints = EndpointSet::new(uris)?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                endpoints: Mutex::new(endpoints),
                transport: RwLock::new(transport),
                custom_transport,
                registry: Arc::new(ClassRegistry::new()),
                filters: FilterChain::new(),
                method_settings: RwLock::new(HashMap::new()),
                on_error: RwLock::new(None),
                on_failswitch: RwLock::new(None),
                sync: Mutex::new(SyncState::default()),
                batch: Mutex::new(None),
                id: OnceCell::new(),
                topics: Mutex::new(Topics::default()),
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Class name aliases used when encoding and decoding objects.
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.inner.registry
    }

    fn endpoints(&self) -> std::sync::MutexGuard<'_, EndpointSet> {
        self.inner
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Endpoint the next attempt goes to.
    pub fn uri(&self) -> String {
        self.endpoints().current().to_string()
    }

    pub fn uris(&self) -> Vec<String> {
        self.endpoints().uris().to_vec()
    }

    /// Times the failover rotation wrapped back to the first endpoint.
    pub fn failround(&self) -> u64 {
        self.endpoints().failround()
    }

    /// Replaces the endpoint list, starting over at its first entry.
    ///
    /// Unless the client was built with its own transport, a transport for
    /// the new scheme replaces the old one and its connections.
    pub fn set_uris<I, S>(&self, uris: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let uris: Vec<String> = uris.into_iter().map(Into::into).collect();
        let transport = if self.inner.custom_transport {
            None
        } else {
            Some(transport::create(&uris, &self.inner.config)?)
        };
        self.endpoints().set_uris(uris)?;
        if let Some(transport) = transport {
            *self
                .inner
                .transport
                .write()
                .unwrap_or_else(PoisonError::into_inner) = transport;
        }
        Ok(())
    }

    fn transport(&self) -> Arc<dyn Transport> {
        self.inner
            .transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stores settings applied to every call of `method`, below call-site
    /// overrides.
    pub fn set_method_settings(&self, method: impl Into<String>, settings: InvokeSettings) {
        self.inner
            .method_settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), settings);
    }

    /// Error handler for calls that have none of their own.
    pub fn on_error(&self, callback: Callback) {
        *self
            .inner
            .on_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(callback);
    }

    pub fn on_failswitch(&self, hook: impl Fn(&Client) + Send + Sync + 'static) {
        *self
            .inner
            .on_failswitch
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    pub fn add_filter(&self, filter: Arc<dyn Filter>) {
        self.inner.filters.add(filter);
    }

    pub fn remove_filter(&self, filter: &Arc<dyn Filter>) -> bool {
        self.inner.filters.remove(filter)
    }

    /// Resolves the settings of one call: client defaults, then the method's
    /// stored settings, then the call-site overrides.
    pub fn context(&self, method: &str, settings: &InvokeSettings) -> Context {
        let mut ctx = Context::new(method, &self.inner.config);
        if let Some(stored) = self
            .inner
            .method_settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
        {
            ctx.apply(stored);
        }
        ctx.apply(settings);
        ctx
    }

    /// Calls `name` on the server.
    ///
    /// The call is under way when this returns; awaiting the [`Call`] yields
    /// its result. Inside a batch the call is queued until
    /// [`end_batch`](Self::end_batch).
    pub fn invoke(&self, name: &str, args: impl Into<List>, settings: InvokeSettings) -> Call {
        let args = args.into();
        let ctx = self.context(name, &settings);
        let (resolver, call) = pending::channel();
        let job = Job {
            name: name.to_string(),
            args,
            ctx,
            resolver,
        };

        if Handle::try_current().is_err() {
            let error =
                HproseError::Configuration("calls must be made inside a tokio runtime".into());
            job.resolver.resolve(Err(error));
            return call;
        }

        let job = {
            let mut batch = self.inner.batch.lock().unwrap_or_else(PoisonError::into_inner);
            match batch.as_mut() {
                Some(queued) => {
                    queued.push(job);
                    return call;
                }
                None => job,
            }
        };

        if job.ctx.oneway {
            self.send_oneway(job);
        } else {
            self.dispatch(job);
        }
        call
    }

    /// Calls `name` with loosely typed arguments: values, then optional
    /// callbacks and overrides (see [`split_call_args`]).
    pub fn invoke_with(&self, name: &str, items: Vec<CallArg>) -> Call {
        match split_call_args(items) {
            Ok((args, settings)) => self.invoke(name, args, settings),
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Resolves at once with `Null` and sends the call in the background.
    fn send_oneway(&self, job: Job) {
        let Job {
            name,
            args,
            mut ctx,
            resolver,
        } = job;
        resolver.resolve(self.finish(&name, &args, &ctx, Ok(Value::Null)));
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.call(&name, &args, &mut ctx).await {
                warn!(method = %name, error = %e, "One-way call failed");
            }
        });
    }

    /// Runs `job` now, or queues it behind an in-flight synchronous call.
    fn dispatch(&self, job: Job) {
        {
            let mut state = self.inner.sync.lock().unwrap_or_else(PoisonError::into_inner);
            if state.busy {
                state.queue.push_back(job);
                return;
            }
            if job.ctx.sync {
                state.busy = true;
            }
        }
        self.spawn_job(job);
    }

    fn spawn_job(&self, job: Job) {
        let client = self.clone();
        tokio::spawn(async move {
            let _release = job.ctx.sync.then(|| SyncRelease(client.clone()));
            client.run_job(job).await;
        });
    }

    /// Drains the queue in order until it hits the next synchronous call.
    fn sync_done(&self) {
        let mut ready = Vec::new();
        {
            let mut state = self.inner.sync.lock().unwrap_or_else(PoisonError::into_inner);
            state.busy = false;
            while !state.busy {
                let Some(job) = state.queue.pop_front() else { break };
                if job.ctx.sync {
                    state.busy = true;
                }
                ready.push(job);
            }
        }
        for job in ready {
            self.spawn_job(job);
        }
    }

    async fn run_job(&self, job: Job) {
        let Job {
            name,
            args,
            mut ctx,
            resolver,
        } = job;
        let result = self.call(&name, &args, &mut ctx).await;
        resolver.resolve(self.finish(&name, &args, &ctx, result));
    }

    async fn call(&self, name: &str, args: &List, ctx: &mut Context) -> Result<Value> {
        let request = codec::encode_call(name, args, ctx.byref, ctx.simple, &self.inner.registry);
        let response = self.round_trip(request, ctx).await?;
        codec::decode_response(response, ctx.mode, args, ctx.simple, &self.inner.registry)
    }

    /// Filters, sends with retry, and filters back.
    async fn round_trip(&self, request: Vec<u8>, ctx: &mut Context) -> Result<Vec<u8>> {
        let request = self.inner.filters.outgoing(request, ctx)?;
        let response = self.send_with_retry(request, ctx).await?;
        self.inner.filters.incoming(response, ctx)
    }

    async fn send_with_retry(&self, request: Vec<u8>, ctx: &mut Context) -> Result<Vec<u8>> {
        loop {
            ctx.uri = self.uri();
            let transport = self.transport();
            match transport.send_and_receive(request.clone(), ctx).await {
                Ok(response) => return Ok(response),
                Err(err) if ctx.idempotent && err.is_retryable() => {
                    let Some(delay) = self.retry_delay(ctx) else {
                        return Err(err);
                    };
                    debug!(
                        method = %ctx.method,
                        retried = ctx.retried,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying call"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Applies failover and returns how long to wait before the next attempt,
    /// or `None` once the retries are used up.
    fn retry_delay(&self, ctx: &mut Context) -> Option<Duration> {
        let endpoints = self.endpoints().len() as i64;
        if ctx.failswitch {
            self.fail_switch();
        }
        if ctx.retried >= ctx.retry {
            return None;
        }
        ctx.retried += 1;
        let mut interval = i64::from(ctx.retried) * RETRY_STEP_MS;
        if ctx.failswitch {
            interval -= (endpoints - 1) * RETRY_STEP_MS;
        }
        let interval = interval.min(MAX_RETRY_INTERVAL_MS).max(0);
        Some(Duration::from_millis(interval as u64))
    }

    fn fail_switch(&self) {
        let (uri, failround) = {
            let mut endpoints = self.endpoints();
            let uri = endpoints.fail_switch().to_string();
            (uri, endpoints.failround())
        };
        info!(uri = %uri, failround, "Switched to next endpoint");
        let hook = self
            .inner
            .on_failswitch
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(self);
        }
    }

    /// Runs the callbacks of a finished call and returns what its future
    /// resolves to. A failing success callback turns the call into a failure.
    fn finish(&self, name: &str, args: &List, ctx: &Context, result: Result<Value>) -> Result<Value> {
        let result = match (result, &ctx.on_success) {
            (Ok(value), Some(callback)) => callback
                .call(Outcome::Success {
                    result: &value,
                    args,
                })
                .map(|()| value),
            (result, _) => result,
        };

        if let Err(error) = &result {
            let handler = ctx.on_error.clone().or_else(|| {
                self.inner
                    .on_error
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
            });
            match handler {
                Some(handler) => {
                    if let Err(e) = handler.call(Outcome::Failure {
                        method: name,
                        error,
                    }) {
                        warn!(method = %name, error = %e, "Error callback failed");
                    }
                }
                None => debug!(method = %name, error = %error, "Call failed"),
            }
        }
        result
    }

    /// Starts collecting calls into a batch instead of sending them.
    pub fn begin_batch(&self) {
        let mut batch = self.inner.batch.lock().unwrap_or_else(PoisonError::into_inner);
        if batch.is_none() {
            *batch = Some(Vec::new());
        }
    }

    /// Sends every call collected since [`begin_batch`](Self::begin_batch) in
    /// one request.
    ///
    /// Each call's own future resolves in the order the calls were made. The
    /// returned future fails when the request as a whole failed.
    pub fn end_batch(&self, settings: InvokeSettings) -> Pending<()> {
        let jobs = self
            .inner
            .batch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_default();
        if jobs.is_empty() {
            return Pending::ready(Ok(()));
        }

        let mut ctx = Context::new("", &self.inner.config);
        ctx.apply(&settings);
        let (resolver, pending) = pending::channel();
        let client = self.clone();
        tokio::spawn(async move {
            resolver.resolve(client.run_batch(jobs, ctx).await);
        });
        pending
    }

    async fn run_batch(&self, jobs: Vec<Job>, mut ctx: Context) -> Result<()> {
        let mut writer = codec::new_writer(ctx.simple, &self.inner.registry);
        for job in &jobs {
            codec::write_call(&mut writer, &job.name, &job.args, job.ctx.byref);
        }
        writer.write_tag(TAG_END);
        debug!(calls = jobs.len(), "Sending batch");

        match self.round_trip(writer.into_bytes(), &mut ctx).await {
            Ok(response) => {
                let entries: Vec<BatchEntry> = jobs
                    .iter()
                    .map(|job| BatchEntry {
                        args: job.args.clone(),
                        mode: job.ctx.mode,
                    })
                    .collect();
                let results =
                    codec::decode_batch(response, &entries, ctx.simple, &self.inner.registry);
                for (job, result) in jobs.into_iter().zip(results) {
                    let result = self.finish(&job.name, &job.args, &job.ctx, result);
                    job.resolver.resolve(result);
                }
                Ok(())
            }
            Err(err) => {
                for job in jobs {
                    let result = self.finish(&job.name, &job.args, &job.ctx, Err(err.clone()));
                    job.resolver.resolve(result);
                }
                Err(err)
            }
        }
    }

    /// Names of the functions the server publishes.
    pub async fn functions(&self) -> Result<Vec<String>> {
        let mut ctx = self.context("", &InvokeSettings::new());
        let response = self
            .round_trip(codec::encode_functions_request(), &mut ctx)
            .await?;
        codec::decode_functions(response, &self.inner.registry)
    }

    /// Id the server assigned to this client, fetched once with the `#`
    /// method.
    pub async fn id(&self) -> Result<String> {
        self.inner
            .id
            .get_or_try_init(|| async {
                let settings = InvokeSettings::new().idempotent(true).failswitch(true);
                let value = self.invoke("#", List::new(Vec::new()), settings).await?;
                match value {
                    Value::String(id) => Ok(id.to_string()),
                    Value::Integer(id) => Ok(id.to_string()),
                    Value::Long(id) => Ok(id.to_string()),
                    other => Err(HproseError::Protocol(format!(
                        "client id is not a string: {:?}",
                        other
                    ))),
                }
            })
            .await
            .cloned()
    }

    /// Stops every subscription and closes persistent connections.
    pub async fn close(&self) {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.transport().close().await;
    }
}
