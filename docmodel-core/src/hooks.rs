//! Lifecycle pipelines: pre interceptors, a terminal handler wrapped by overrides, and posts.
//!
//! Every named lifecycle method (`init`, `hydrate`, `save`, `remove` and any custom name)
//! compiles into one [`Pipeline`]. Running it walks through
//! `Idle -> RunningPre -> RunningHandler -> RunningPost -> Done`, failing out of any running
//! state.
//!
//! # Interceptors
//!
//! An interceptor gets synchronous access to the document and returns a `'static` future
//! that is spawned onto the caller's runtime. The future signals the pipeline through the
//! continuations it was handed:
//!
//! - [`Next`] lets the pipeline advance (`proceed`) or fails it (`abort`).
//! - [`Done`] (parallel interceptors only) reports that the interceptor's own work finished.
//!
//! Serial interceptors advance strictly in declaration order: the next one starts only once
//! the previous one called `next`. Consecutive parallel interceptors are all started together
//! and the pipeline advances as soon as any of them calls `next`. Their `done` signals are
//! collected by a background task that the handler never waits on; failures reported there
//! are logged and can be awaited through [`Document::settle`](crate::document::Document::settle).
//!
//! # Handlers
//!
//! The handler is resolved once at compile time: the default handler is wrapped by each
//! override in registration order, so the most recent override is the outermost call. An
//! override decides itself whether to call the handler it wraps.

use bson::{Bson, Document as Record};
use futures::future::{BoxFuture, FutureExt, join_all, select_all};
use std::{collections::HashMap, fmt, sync::Arc};
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{debug, trace, warn};

use crate::{
    document::Document,
    error::{ModelError, ModelResult},
};

/// Arguments handed to a lifecycle handler.
#[derive(Debug, Clone, Default)]
pub enum HookArgs {
    #[default]
    None,
    /// Initial values for `init`.
    Values(Record),
    /// A stored record and optional projection for `hydrate`.
    Record {
        record: Record,
        projection: Option<Record>,
    },
    /// Free-form arguments for custom methods.
    Custom(Vec<Bson>),
}

/// The continuation that lets a pipeline advance past an interceptor.
#[derive(Debug)]
pub struct Next(oneshot::Sender<ModelResult<()>>);

impl Next {
    fn channel() -> (Self, oneshot::Receiver<ModelResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Lets the pipeline move on.
    pub fn proceed(self) {
        let _ = self.0.send(Ok(()));
    }

    /// Fails the pipeline with `err`.
    pub fn abort(self, err: ModelError) {
        let _ = self.0.send(Err(err));
    }
}

/// Completion signal of a parallel interceptor's asynchronous work.
#[derive(Debug)]
pub struct Done(oneshot::Sender<ModelResult<()>>);

impl Done {
    fn channel() -> (Self, oneshot::Receiver<ModelResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    pub fn complete(self) {
        let _ = self.0.send(Ok(()));
    }

    pub fn fail(self, err: ModelError) {
        let _ = self.0.send(Err(err));
    }
}

/// A terminal lifecycle handler.
pub type Handler = Arc<
    dyn for<'a> Fn(&'a mut Document, HookArgs) -> BoxFuture<'a, ModelResult<()>> + Send + Sync,
>;

/// A handler override. The first argument is the handler it wraps.
pub type Override = Arc<
    dyn for<'a> Fn(Handler, &'a mut Document, HookArgs) -> BoxFuture<'a, ModelResult<()>>
        + Send
        + Sync,
>;

pub type SerialHook = Arc<dyn Fn(&mut Document, Next) -> BoxFuture<'static, ()> + Send + Sync>;

pub type ParallelHook =
    Arc<dyn Fn(&mut Document, Next, Done) -> BoxFuture<'static, ()> + Send + Sync>;

/// One registered pre interceptor, tagged with its execution mode.
#[derive(Clone)]
pub enum PreHook {
    Serial(SerialHook),
    Parallel(ParallelHook),
}

impl fmt::Debug for PreHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreHook::Serial(_) => f.write_str("Serial"),
            PreHook::Parallel(_) => f.write_str("Parallel"),
        }
    }
}

/// Builds a [`Handler`] from a closure, pinning down its higher-ranked signature.
pub fn handler<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a mut Document, HookArgs) -> BoxFuture<'a, ModelResult<()>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

fn noop() -> Handler {
    handler(|_, _| async { Ok(()) }.boxed())
}

fn wrap(inner: Handler, outer: Override) -> Handler {
    handler(move |doc, args| outer(inner.clone(), doc, args))
}

/// Hook registrations of one schema, before compilation.
#[derive(Clone, Default)]
pub(crate) struct HookTable {
    pres: HashMap<String, Vec<PreHook>>,
    posts: HashMap<String, Vec<SerialHook>>,
    handlers: HashMap<String, Handler>,
    overrides: HashMap<String, Vec<Override>>,
}

impl HookTable {
    /// A table with the builtin `init`, `hydrate`, `save` and `remove` handlers registered.
    pub(crate) fn with_defaults() -> Self {
        let mut table = Self::default();
        table.handlers.insert(
            "init".into(),
            handler(|doc, args| {
                async move {
                    match args {
                        HookArgs::Values(values) => doc.apply_values(values),
                        _ => doc.apply_values(Record::new()),
                    }
                }
                .boxed()
            }),
        );
        table.handlers.insert(
            "hydrate".into(),
            handler(|doc, args| {
                async move {
                    match args {
                        HookArgs::Record { record, projection } => {
                            doc.load(record, projection.as_ref());
                            Ok(())
                        }
                        other => Err(ModelError::Hook(format!(
                            "hydrate expects a stored record, got {other:?}"
                        ))),
                    }
                }
                .boxed()
            }),
        );
        table
            .handlers
            .insert("save".into(), handler(|doc, _| doc.persist().boxed()));
        table
            .handlers
            .insert("remove".into(), handler(|doc, _| doc.delete().boxed()));
        table
    }

    pub(crate) fn pre(&mut self, method: &str, hook: PreHook) {
        self.pres.entry(method.to_string()).or_default().push(hook);
    }

    pub(crate) fn post(&mut self, method: &str, hook: SerialHook) {
        self.posts.entry(method.to_string()).or_default().push(hook);
    }

    /// Registers the handler for `method` the first time, and an override afterwards.
    pub(crate) fn hook(&mut self, method: &str, hook: Override) {
        if self.handlers.contains_key(method) {
            self.overrides.entry(method.to_string()).or_default().push(hook);
        } else {
            self.handlers
                .insert(method.to_string(), wrap(noop(), hook));
        }
    }

    /// Resolves every method into a fixed pipeline.
    pub(crate) fn compile(&self) -> HashMap<String, Arc<Pipeline>> {
        let mut names: Vec<&String> = self
            .handlers
            .keys()
            .chain(self.pres.keys())
            .chain(self.posts.keys())
            .collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .map(|name| {
                let base = self.handlers.get(name).cloned().unwrap_or_else(noop);
                let handler = self
                    .overrides
                    .get(name)
                    .into_iter()
                    .flatten()
                    .fold(base, |inner, outer| wrap(inner, outer.clone()));

                let pipeline = Pipeline {
                    method: name.clone(),
                    pres: self.pres.get(name).cloned().unwrap_or_default(),
                    handler,
                    posts: self.posts.get(name).cloned().unwrap_or_default(),
                };
                (name.clone(), Arc::new(pipeline))
            })
            .collect()
    }
}

impl fmt::Debug for HookTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookTable")
            .field("pres", &self.pres)
            .field("posts", &self.posts.keys().collect::<Vec<_>>())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A compiled lifecycle method.
pub struct Pipeline {
    method: String,
    pres: Vec<PreHook>,
    handler: Handler,
    posts: Vec<SerialHook>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("method", &self.method)
            .field("pres", &self.pres)
            .field("posts", &self.posts.len())
            .finish()
    }
}

impl Pipeline {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Runs the pipeline against `doc`.
    ///
    /// Returns after the handler and every post interceptor have finished. Outstanding
    /// parallel `done` signals are attached to the document rather than awaited.
    pub async fn run(&self, doc: &mut Document, args: HookArgs) -> ModelResult<()> {
        trace!(target: "docmodel::pipeline", method = %self.method, state = "running_pre");

        let mut index = 0;
        while index < self.pres.len() {
            match &self.pres[index] {
                PreHook::Serial(hook) => {
                    let (next, signal) = Next::channel();
                    tokio::spawn(hook(doc, next));
                    self.await_next(signal).await?;
                    index += 1;
                }
                PreHook::Parallel(_) => {
                    let mut nexts = Vec::new();
                    let mut dones = Vec::new();
                    while let Some(PreHook::Parallel(hook)) = self.pres.get(index) {
                        let (next, next_rx) = Next::channel();
                        let (done, done_rx) = Done::channel();
                        tokio::spawn(hook(doc, next, done));
                        nexts.push(next_rx);
                        dones.push(done_rx);
                        index += 1;
                    }
                    debug!(
                        target: "docmodel::pipeline",
                        method = %self.method,
                        started = nexts.len(),
                        "parallel interceptors started"
                    );
                    doc.track(self.report_dones(dones));
                    self.await_first_next(nexts).await?;
                }
            }
        }

        trace!(target: "docmodel::pipeline", method = %self.method, state = "running_handler");
        (self.handler)(doc, args).await?;

        trace!(target: "docmodel::pipeline", method = %self.method, state = "running_post");
        for hook in &self.posts {
            let (next, signal) = Next::channel();
            tokio::spawn(hook(doc, next));
            self.await_next(signal).await?;
        }

        trace!(target: "docmodel::pipeline", method = %self.method, state = "done");
        Ok(())
    }

    async fn await_next(&self, signal: oneshot::Receiver<ModelResult<()>>) -> ModelResult<()> {
        match signal.await {
            Ok(result) => result,
            Err(_) => Err(ModelError::Hook(format!(
                "an interceptor of {} finished without calling next",
                self.method
            ))),
        }
    }

    async fn await_first_next(
        &self,
        mut pending: Vec<oneshot::Receiver<ModelResult<()>>>,
    ) -> ModelResult<()> {
        while !pending.is_empty() {
            let (result, _, rest) = select_all(pending).await;
            match result {
                Ok(result) => return result,
                Err(_) => pending = rest,
            }
        }
        Err(ModelError::Hook(format!(
            "no parallel interceptor of {} called next",
            self.method
        )))
    }

    fn report_dones(&self, dones: Vec<oneshot::Receiver<ModelResult<()>>>) -> JoinHandle<()> {
        let method = self.method.clone();
        tokio::spawn(async move {
            for (position, result) in join_all(dones).await.into_iter().enumerate() {
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(
                        target: "docmodel::pipeline",
                        %method,
                        position,
                        error = %err,
                        "parallel interceptor failed after the pipeline advanced"
                    ),
                    Err(_) => warn!(
                        target: "docmodel::pipeline",
                        %method,
                        position,
                        "parallel interceptor dropped done without signalling"
                    ),
                }
            }
        })
    }
}
